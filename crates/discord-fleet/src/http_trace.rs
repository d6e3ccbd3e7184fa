//! Outbound HTTP request tracing.
//!
//! Covers the bot's own Discord REST calls and the stats-site POSTs. Every
//! traced request is counted under `http{method,route,status}` once it
//! completes. Requests whose URL does not normalise to a route are not
//! counted. Slow requests are logged with their raw URL; that log line never
//! changes what is counted.

use std::sync::Arc;
use std::time::Duration;

use serenity::http::HttpError;
use tokio::time::Instant;
use tracing::warn;

use crate::clock::Clock;
use crate::metrics::{self, MetricsSink};
use crate::routes::normalize_route;

/// Requests slower than this are logged.
pub const SLOW_REQUEST_THRESHOLD: Duration = Duration::from_millis(500);

/// Base of the Discord REST API the bot calls through serenity.
pub const DISCORD_API: &str = "https://discord.com/api/v10";

/// Status code a failed Discord call came back with. `None` when the call
/// failed before any response arrived.
pub fn discord_status(error: &serenity::Error) -> Option<u16> {
    match error {
        serenity::Error::Http(HttpError::UnsuccessfulRequest(response)) => Some(response.status_code.as_u16()),
        _ => None,
    }
}

/// Per-request context handed out by [`RequestTracer::start`].
#[derive(Debug, Clone, Copy)]
pub struct RequestContext {
    started: Instant,
}

/// Pairs request start and end callbacks into latency logs and `http` counts.
pub struct RequestTracer<M, C> {
    metrics: Arc<M>,
    clock: Arc<C>,
}

impl<M, C> Clone for RequestTracer<M, C> {
    fn clone(&self) -> Self {
        Self {
            metrics: self.metrics.clone(),
            clock: self.clock.clone(),
        }
    }
}

impl<M: MetricsSink, C: Clock> RequestTracer<M, C> {
    pub fn new(metrics: Arc<M>, clock: Arc<C>) -> Self {
        Self { metrics, clock }
    }

    pub fn start(&self) -> RequestContext {
        RequestContext {
            started: self.clock.now(),
        }
    }

    /// Returns true if the request was counted.
    pub fn end(&self, ctx: RequestContext, method: &str, url: &str, status: u16) -> bool {
        let elapsed = self.clock.now().saturating_duration_since(ctx.started);
        if elapsed > SLOW_REQUEST_THRESHOLD {
            warn!(
                method,
                url,
                elapsed_secs = elapsed.as_secs_f64(),
                "{} {} took {:.3} seconds",
                method,
                url,
                elapsed.as_secs_f64()
            );
        }

        let Some(route) = normalize_route(url) else {
            return false;
        };

        self.metrics.increment(
            metrics::HTTP,
            &[
                ("method", method.to_string()),
                ("route", route.into()),
                ("status", status.to_string()),
            ],
        );
        true
    }

    /// Trace a Discord REST call. `path` is relative to [`DISCORD_API`] and
    /// `ok_status` is what Discord answers that route with on success.
    pub fn end_discord<T>(
        &self,
        ctx: RequestContext,
        method: &str,
        path: &str,
        ok_status: u16,
        result: &serenity::Result<T>,
    ) -> bool {
        let status = match result {
            Ok(_) => ok_status,
            Err(e) => match discord_status(e) {
                Some(status) => status,
                None => return false,
            },
        };
        self.end(ctx, method, &format!("{DISCORD_API}{path}"), status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::mocks::RecordingMetrics;

    fn tracer() -> (RequestTracer<RecordingMetrics, MockClock>, Arc<RecordingMetrics>, Arc<MockClock>) {
        let metrics = Arc::new(RecordingMetrics::new());
        let clock = Arc::new(MockClock::new());
        (RequestTracer::new(metrics.clone(), clock.clone()), metrics, clock)
    }

    #[test]
    fn test_end_counts_normalized_route() {
        let (tracer, metrics, _clock) = tracer();
        let ctx = tracer.start();

        let counted = tracer.end(
            ctx,
            "POST",
            "https://discord.com/api/v10/channels/123/messages?nonce=1",
            200,
        );

        assert!(counted);
        let recorded = metrics.increments();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].counter, "http");
        assert_eq!(recorded[0].label("method"), Some("POST"));
        assert_eq!(recorded[0].label("route"), Some("/channels/_id/messages"));
        assert_eq!(recorded[0].label("status"), Some("200"));
    }

    #[test]
    fn test_malformed_route_not_counted() {
        let (tracer, metrics, _clock) = tracer();
        let ctx = tracer.start();

        assert!(!tracer.end(ctx, "POST", "https://top.gg/api/bots/1/stats", 200));
        assert_eq!(metrics.total(), 0);
    }

    #[test]
    fn test_slow_request_still_counted_once() {
        let (tracer, metrics, clock) = tracer();
        let ctx = tracer.start();
        clock.advance(Duration::from_secs(2));

        assert!(tracer.end(ctx, "GET", "https://discord.com/api/v10/gateway/bot", 429));
        assert_eq!(metrics.count("http"), 1);
        assert_eq!(metrics.increments()[0].label("status"), Some("429"));
    }

    #[test]
    fn test_end_discord_success_uses_route_status() {
        let (tracer, metrics, _clock) = tracer();

        let ok: serenity::Result<()> = Ok(());
        assert!(tracer.end_discord(tracer.start(), "DELETE", "/users/@me/guilds/42", 204, &ok));

        let recorded = metrics.increments();
        assert_eq!(recorded[0].label("method"), Some("DELETE"));
        assert_eq!(recorded[0].label("route"), Some("/users/@me/guilds/_id"));
        assert_eq!(recorded[0].label("status"), Some("204"));
    }

    #[test]
    fn test_end_discord_without_response_not_counted() {
        let (tracer, metrics, _clock) = tracer();

        let failed: serenity::Result<()> = Err(serenity::Error::Other("connection reset"));

        assert!(!tracer.end_discord(tracer.start(), "GET", "/users/@me", 200, &failed));
        assert_eq!(discord_status(&serenity::Error::Other("x")), None);
        assert_eq!(metrics.total(), 0);
    }
}
