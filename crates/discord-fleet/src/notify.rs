//! Operator notices.
//!
//! Notices are informational embeds posted to operator channels. Delivery is
//! best effort: [`best_effort_notify`] is the only place a notifier is called,
//! and it never lets a failure escape.

use std::future::Future;
use std::sync::Arc;

use serenity::all::{ChannelId, CreateEmbed, CreateEmbedFooter, CreateMessage, Http, Timestamp};
use tracing::debug;

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::http_trace::RequestTracer;
use crate::metrics::MetricsSink;

pub const GREEN: u32 = 0x00FF00;
pub const RED: u32 = 0xFF0000;

/// Which operator channel a notice goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeChannel {
    /// Shard and cluster lifecycle.
    Events,
    /// Guild joins and removals.
    Joins,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorNotice {
    pub channel: NoticeChannel,
    pub title: String,
    pub description: Option<String>,
    pub footer: Option<String>,
    pub colour: u32,
}

impl OperatorNotice {
    pub fn new(channel: NoticeChannel, title: impl Into<String>, colour: u32) -> Self {
        Self {
            channel,
            title: title.into(),
            description: None,
            footer: None,
            colour,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_footer(mut self, footer: impl Into<String>) -> Self {
        self.footer = Some(footer.into());
        self
    }
}

pub trait Notifier: Send + Sync + 'static {
    fn notify(&self, notice: OperatorNotice) -> impl Future<Output = Result<()>> + Send;
}

impl<N: Notifier> Notifier for Arc<N> {
    fn notify(&self, notice: OperatorNotice) -> impl Future<Output = Result<()>> + Send {
        (**self).notify(notice)
    }
}

/// Deliver a notice, logging and discarding any failure.
pub async fn best_effort_notify<N: Notifier>(notifier: &N, notice: OperatorNotice) {
    let title = notice.title.clone();
    if let Err(e) = notifier.notify(notice).await {
        debug!(title, error = %e, "Operator notice not delivered");
    }
}

/// Posts notices as embeds through the Discord REST API.
pub struct DiscordNotifier<M, C> {
    http: Arc<Http>,
    tracer: RequestTracer<M, C>,
    event_channel: Option<ChannelId>,
    join_channel: Option<ChannelId>,
}

impl<M: MetricsSink, C: Clock> DiscordNotifier<M, C> {
    pub fn new(
        http: Arc<Http>,
        tracer: RequestTracer<M, C>,
        event_channel_id: Option<u64>,
        join_channel_id: Option<u64>,
    ) -> Self {
        Self {
            http,
            tracer,
            event_channel: event_channel_id.map(ChannelId::new),
            join_channel: join_channel_id.map(ChannelId::new),
        }
    }

    fn channel(&self, channel: NoticeChannel) -> Option<ChannelId> {
        match channel {
            NoticeChannel::Events => self.event_channel,
            NoticeChannel::Joins => self.join_channel,
        }
    }
}

pub fn build_embed(notice: &OperatorNotice) -> CreateEmbed {
    let mut embed = CreateEmbed::new()
        .title(&notice.title)
        .colour(notice.colour)
        .timestamp(Timestamp::now());
    if let Some(ref description) = notice.description {
        embed = embed.description(description);
    }
    if let Some(ref footer) = notice.footer {
        embed = embed.footer(CreateEmbedFooter::new(footer));
    }
    embed
}

impl<M: MetricsSink, C: Clock> Notifier for DiscordNotifier<M, C> {
    async fn notify(&self, notice: OperatorNotice) -> Result<()> {
        let Some(channel) = self.channel(notice.channel) else {
            return Err(Error::Notify(format!("no channel configured for {:?} notices", notice.channel)));
        };
        let ctx = self.tracer.start();
        let result = channel
            .send_message(&self.http, CreateMessage::new().embed(build_embed(&notice)))
            .await;
        self.tracer
            .end_discord(ctx, "POST", &format!("/channels/{channel}/messages"), 200, &result);
        result.map_err(|e| Error::Notify(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::mocks::{MockNotifier, RecordingMetrics};
    use serde_json::json;
    use serenity::all::HttpBuilder;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_best_effort_notify_delivers() {
        let notifier = MockNotifier::new();
        let notice = OperatorNotice::new(NoticeChannel::Events, "[Cluster 1] Bot Ready", GREEN);

        best_effort_notify(&notifier, notice.clone()).await;

        assert_eq!(notifier.notices(), vec![notice]);
    }

    #[tokio::test]
    async fn test_best_effort_notify_swallows_failure() {
        let notifier = MockNotifier::failing();

        best_effort_notify(&notifier, OperatorNotice::new(NoticeChannel::Joins, "Server Join", GREEN)).await;

        assert_eq!(notifier.notices().len(), 1);
    }

    fn discord_notifier(
        http: Http,
        event_channel_id: Option<u64>,
    ) -> (DiscordNotifier<RecordingMetrics, MockClock>, Arc<RecordingMetrics>) {
        let metrics = Arc::new(RecordingMetrics::new());
        let tracer = RequestTracer::new(metrics.clone(), Arc::new(MockClock::new()));
        (DiscordNotifier::new(Arc::new(http), tracer, event_channel_id, None), metrics)
    }

    #[tokio::test]
    async fn test_discord_notifier_without_channel_fails() {
        let (notifier, metrics) = discord_notifier(Http::new("token"), None);

        let err = notifier
            .notify(OperatorNotice::new(NoticeChannel::Events, "x", RED))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("no channel configured"));
        assert_eq!(metrics.total(), 0);
    }

    #[tokio::test]
    async fn test_discord_notifier_counts_message_route() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v10/channels/123/messages"))
            .respond_with(
                ResponseTemplate::new(403).set_body_json(json!({"code": 50013, "message": "Missing Permissions"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        let http = HttpBuilder::new("token")
            .proxy(server.uri())
            .ratelimiter_disabled(true)
            .build();
        let (notifier, metrics) = discord_notifier(http, Some(123));

        let result = notifier
            .notify(OperatorNotice::new(NoticeChannel::Events, "[Cluster 1] Bot Ready", GREEN))
            .await;

        assert!(result.is_err());
        let recorded = metrics.increments();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].counter, "http");
        assert_eq!(recorded[0].label("method"), Some("POST"));
        assert_eq!(recorded[0].label("route"), Some("/channels/_id/messages"));
        assert_eq!(recorded[0].label("status"), Some("403"));
    }

    #[test]
    fn test_notice_builder() {
        let notice = OperatorNotice::new(NoticeChannel::Joins, "Server Leave", RED)
            .with_description("Guild (1)")
            .with_footer("10 servers");

        assert_eq!(notice.description.as_deref(), Some("Guild (1)"));
        assert_eq!(notice.footer.as_deref(), Some("10 servers"));
        let _ = build_embed(&notice);
    }
}
