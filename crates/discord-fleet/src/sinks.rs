//! Report sinks: third-party bot listing sites that receive the fleet's
//! guild count.
//!
//! Each site gets one POST per reporting round. Sites are independent: one
//! failing never stops the others, and nothing is retried within a round.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::http_trace::RequestTracer;
use crate::metrics::MetricsSink;

/// Fleet-wide statistics sent to every sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildStats {
    pub guild_count: u64,
    pub shard_count: u32,
}

/// Supported listing sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    TopGg,
    DiscordBotsGg,
    DiscordBotList,
    BotsOnDiscord,
    BotsForDiscord,
    DiscordBoats,
}

impl SinkKind {
    pub const ALL: [SinkKind; 6] = [
        SinkKind::TopGg,
        SinkKind::DiscordBotsGg,
        SinkKind::DiscordBotList,
        SinkKind::BotsOnDiscord,
        SinkKind::BotsForDiscord,
        SinkKind::DiscordBoats,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::TopGg => "top.gg",
            Self::DiscordBotsGg => "discord.bots.gg",
            Self::DiscordBotList => "discordbotlist.com",
            Self::BotsOnDiscord => "bots.ondiscord.xyz",
            Self::BotsForDiscord => "botsfordiscord.com",
            Self::DiscordBoats => "discord.boats",
        }
    }

    /// Environment variable holding the site's API token.
    pub fn token_env_var(&self) -> &'static str {
        match self {
            Self::TopGg => "TOPGG_TOKEN",
            Self::DiscordBotsGg => "DBOTS_TOKEN",
            Self::DiscordBotList => "DBL_TOKEN",
            Self::BotsOnDiscord => "BOD_TOKEN",
            Self::BotsForDiscord => "BFD_TOKEN",
            Self::DiscordBoats => "DBOATS_TOKEN",
        }
    }

    pub fn endpoint(&self, bot_id: u64) -> String {
        match self {
            Self::TopGg => format!("https://top.gg/api/bots/{bot_id}/stats"),
            Self::DiscordBotsGg => format!("https://discord.bots.gg/api/v1/bots/{bot_id}/stats"),
            Self::DiscordBotList => format!("https://discordbotlist.com/api/v1/bots/{bot_id}/stats"),
            Self::BotsOnDiscord => format!("https://bots.ondiscord.xyz/bot-api/bots/{bot_id}/guilds"),
            Self::BotsForDiscord => format!("https://botsfordiscord.com/api/bot/{bot_id}"),
            Self::DiscordBoats => format!("https://discord.boats/api/v2/bot/{bot_id}"),
        }
    }

    /// Site-specific JSON body.
    pub fn body(&self, stats: &GuildStats) -> Value {
        match self {
            Self::TopGg => json!({
                "server_count": stats.guild_count,
                "shard_count": stats.shard_count,
            }),
            Self::DiscordBotsGg => json!({
                "guildCount": stats.guild_count,
                "shardCount": stats.shard_count,
            }),
            Self::DiscordBotList => json!({ "guilds": stats.guild_count }),
            Self::BotsOnDiscord => json!({ "guildCount": stats.guild_count }),
            Self::BotsForDiscord | Self::DiscordBoats => {
                json!({ "server_count": stats.guild_count })
            }
        }
    }
}

/// A destination for fleet statistics.
pub trait ReportSink: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn report(&self, stats: &GuildStats) -> impl Future<Output = Result<()>> + Send;
}

/// Posts statistics to a listing site over HTTPS.
pub struct HttpReportSink<M, C> {
    kind: SinkKind,
    endpoint: String,
    token: String,
    http: reqwest::Client,
    tracer: RequestTracer<M, C>,
}

impl<M: MetricsSink, C: Clock> HttpReportSink<M, C> {
    pub fn new(
        kind: SinkKind,
        token: impl Into<String>,
        bot_id: u64,
        http: reqwest::Client,
        tracer: RequestTracer<M, C>,
    ) -> Self {
        Self {
            kind,
            endpoint: kind.endpoint(bot_id),
            token: token.into(),
            http,
            tracer,
        }
    }

    /// Point the sink somewhere other than the site's public API.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn kind(&self) -> SinkKind {
        self.kind
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl<M: MetricsSink, C: Clock> ReportSink for HttpReportSink<M, C> {
    fn name(&self) -> &str {
        self.kind.name()
    }

    async fn report(&self, stats: &GuildStats) -> Result<()> {
        let ctx = self.tracer.start();
        let response = self
            .http
            .post(&self.endpoint)
            .header(reqwest::header::AUTHORIZATION, &self.token)
            .json(&self.kind.body(stats))
            .send()
            .await
            .map_err(|e| Error::sink(self.name(), e))?;

        let status = response.status();
        self.tracer
            .end(ctx, "POST", &self.endpoint, status.as_u16());

        if !status.is_success() {
            return Err(Error::sink(self.name(), format!("HTTP {status}")));
        }

        debug!(sink = self.name(), guild_count = stats.guild_count, "Reported stats");
        Ok(())
    }
}

/// HTTP client shared by the sinks. A site that stops answering fails its
/// POST after `timeout` instead of holding the round open.
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))
}

/// Build one HTTP sink per configured site.
pub fn build_http_sinks<M: MetricsSink, C: Clock>(
    configs: &[crate::config::SinkConfig],
    bot_id: u64,
    http: reqwest::Client,
    metrics: Arc<M>,
    clock: Arc<C>,
) -> Vec<HttpReportSink<M, C>> {
    configs
        .iter()
        .map(|cfg| {
            HttpReportSink::new(
                cfg.kind,
                cfg.token.clone(),
                bot_id,
                http.clone(),
                RequestTracer::new(metrics.clone(), clock.clone()),
            )
        })
        .collect()
}

/// Outcome of one fan-out to every sink.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
}

/// Report to every sink concurrently. Failures are logged per sink.
pub async fn dispatch_all<S: ReportSink>(sinks: &[S], stats: &GuildStats) -> DispatchReport {
    let results = join_all(sinks.iter().map(|sink| async move {
        (sink.name().to_string(), sink.report(stats).await)
    }))
    .await;

    let mut report = DispatchReport::default();
    for (name, result) in results {
        match result {
            Ok(()) => report.succeeded.push(name),
            Err(e) => {
                warn!(sink = %name, error = %e, "Failed to report stats");
                report.failed.push(name);
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::mocks::{MockSink, RecordingMetrics};
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const STATS: GuildStats = GuildStats {
        guild_count: 45,
        shard_count: 6,
    };

    fn http_sink(kind: SinkKind, endpoint: String) -> (HttpReportSink<RecordingMetrics, MockClock>, Arc<RecordingMetrics>) {
        let metrics = Arc::new(RecordingMetrics::new());
        let tracer = RequestTracer::new(metrics.clone(), Arc::new(MockClock::new()));
        let sink = HttpReportSink::new(kind, "secret-token", 42, reqwest::Client::new(), tracer)
            .with_endpoint(endpoint);
        (sink, metrics)
    }

    #[test]
    fn test_bodies_match_site_schemas() {
        assert_eq!(
            SinkKind::TopGg.body(&STATS),
            json!({"server_count": 45, "shard_count": 6})
        );
        assert_eq!(
            SinkKind::DiscordBotsGg.body(&STATS),
            json!({"guildCount": 45, "shardCount": 6})
        );
        assert_eq!(SinkKind::DiscordBotList.body(&STATS), json!({"guilds": 45}));
        assert_eq!(SinkKind::BotsOnDiscord.body(&STATS), json!({"guildCount": 45}));
        assert_eq!(SinkKind::DiscordBoats.body(&STATS), json!({"server_count": 45}));
    }

    #[test]
    fn test_endpoints_embed_bot_id() {
        for kind in SinkKind::ALL {
            assert!(kind.endpoint(1234).contains("1234"), "{}", kind.name());
        }
    }

    #[test]
    fn test_sink_kind_serde_snake_case() {
        let kind: SinkKind = serde_json::from_str("\"discord_bots_gg\"").unwrap();
        assert_eq!(kind, SinkKind::DiscordBotsGg);
    }

    #[tokio::test]
    async fn test_http_sink_posts_body_with_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/bots/42/stats"))
            .and(header("authorization", "secret-token"))
            .and(body_json(json!({"guildCount": 45, "shardCount": 6})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let (sink, metrics) = http_sink(
            SinkKind::DiscordBotsGg,
            format!("{}/api/v1/bots/42/stats", server.uri()),
        );

        sink.report(&STATS).await.unwrap();

        assert_eq!(metrics.count("http"), 1);
        assert_eq!(metrics.increments()[0].label("route"), Some("/bots/_id/stats"));
    }

    #[tokio::test]
    async fn test_http_sink_non_success_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let (sink, _metrics) = http_sink(SinkKind::TopGg, format!("{}/api/bots/42/stats", server.uri()));

        let err = sink.report(&STATS).await.unwrap_err();
        assert!(err.to_string().contains("top.gg"));
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn test_stalled_sink_times_out_without_blocking_others() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/bots/42/stats"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3600)))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/bots/42/stats"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let metrics = Arc::new(RecordingMetrics::new());
        let clock = Arc::new(MockClock::new());
        let configs = [
            crate::config::SinkConfig {
                kind: SinkKind::TopGg,
                token: "a".to_string(),
            },
            crate::config::SinkConfig {
                kind: SinkKind::DiscordBotsGg,
                token: "b".to_string(),
            },
        ];
        let client = build_http_client(Duration::from_millis(200)).unwrap();
        let sinks: Vec<_> = build_http_sinks(&configs, 42, client, metrics, clock)
            .into_iter()
            .map(|sink| {
                let endpoint = sink.endpoint().replace("https://top.gg", &server.uri());
                let endpoint = endpoint.replace("https://discord.bots.gg", &server.uri());
                sink.with_endpoint(endpoint)
            })
            .collect();

        let report = tokio::time::timeout(Duration::from_secs(10), dispatch_all(&sinks, &STATS))
            .await
            .expect("round blocked on a stalled sink");

        assert_eq!(report.succeeded, vec!["discord.bots.gg".to_string()]);
        assert_eq!(report.failed, vec!["top.gg".to_string()]);
    }

    #[tokio::test]
    async fn test_dispatch_all_isolates_failures() {
        let sinks = vec![
            MockSink::new("a"),
            MockSink::failing("b"),
            MockSink::new("c"),
        ];

        let report = dispatch_all(&sinks, &STATS).await;

        assert_eq!(report.succeeded, vec!["a".to_string(), "c".to_string()]);
        assert_eq!(report.failed, vec!["b".to_string()]);
        for sink in &sinks {
            assert_eq!(sink.calls(), vec![STATS]);
        }
    }
}
