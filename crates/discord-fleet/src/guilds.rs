//! Guild membership changes.
//!
//! A join is counted, announced with the current fleet total, and undone
//! right away when the guild is banned. A removal is counted, the guild's
//! configuration rows are deleted, and it is announced.

use std::future::Future;
use std::sync::Arc;

use serenity::all::{GuildId, Http};
use tracing::{info, warn};

use crate::clock::Clock;
use crate::cluster::{ClusterBroadcast, aggregate_guild_count};
use crate::error::{Error, Result};
use crate::http_trace::RequestTracer;
use crate::metrics::{self, MetricsSink};
use crate::notify::{GREEN, NoticeChannel, Notifier, OperatorNotice, RED, best_effort_notify};
use crate::snapshot::{BanList, Snapshot};
use crate::store::FleetStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildInfo {
    pub id: u64,
    pub name: String,
}

impl GuildInfo {
    fn describe(&self) -> String {
        format!("{} ({})", self.name, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Stayed,
    LeftBanned,
}

/// Leaves a guild on the bot's behalf.
pub trait GuildLeaver: Send + Sync + 'static {
    fn leave(&self, guild_id: u64) -> impl Future<Output = Result<()>> + Send;
}

/// Leaves guilds through the Discord REST API.
pub struct DiscordGuildLeaver<M, C> {
    http: Arc<Http>,
    tracer: RequestTracer<M, C>,
}

impl<M, C> DiscordGuildLeaver<M, C> {
    pub fn new(http: Arc<Http>, tracer: RequestTracer<M, C>) -> Self {
        Self { http, tracer }
    }
}

impl<M: MetricsSink, C: Clock> GuildLeaver for DiscordGuildLeaver<M, C> {
    async fn leave(&self, guild_id: u64) -> Result<()> {
        let ctx = self.tracer.start();
        let result = self.http.leave_guild(GuildId::new(guild_id)).await;
        self.tracer
            .end_discord(ctx, "DELETE", &format!("/users/@me/guilds/{guild_id}"), 204, &result);
        result.map_err(|e| Error::Discord(format!("failed to leave guild {guild_id}: {e}")))
    }
}

pub struct GuildMembership<S, B, M, N, L> {
    store: Arc<S>,
    broadcast: B,
    bans: Arc<Snapshot<BanList>>,
    metrics: Arc<M>,
    notifier: N,
    leaver: L,
    expected_clusters: usize,
}

impl<S, B, M, N, L> GuildMembership<S, B, M, N, L>
where
    S: FleetStore,
    B: ClusterBroadcast,
    M: MetricsSink,
    N: Notifier,
    L: GuildLeaver,
{
    pub fn new(
        store: Arc<S>,
        broadcast: B,
        bans: Arc<Snapshot<BanList>>,
        metrics: Arc<M>,
        notifier: N,
        leaver: L,
        expected_clusters: usize,
    ) -> Self {
        Self {
            store,
            broadcast,
            bans,
            metrics,
            notifier,
            leaver,
            expected_clusters,
        }
    }

    /// Sum of whatever cluster replies arrive. Shown to operators only.
    async fn fleet_total(&self) -> Option<u64> {
        match aggregate_guild_count(&self.broadcast, self.expected_clusters).await {
            Ok(aggregate) => Some(aggregate.total()),
            Err(e) => {
                warn!(error = %e, "Guild-count broadcast failed");
                None
            }
        }
    }

    async fn announce(&self, title: &str, guild: &GuildInfo, colour: u32) {
        let mut notice = OperatorNotice::new(NoticeChannel::Joins, title, colour).with_description(guild.describe());
        if let Some(total) = self.fleet_total().await {
            notice = notice.with_footer(format!("{total} servers"));
        }
        best_effort_notify(&self.notifier, notice).await;
    }

    pub async fn on_join(&self, guild: &GuildInfo) -> JoinOutcome {
        self.metrics.increment(metrics::GUILDS_JOIN, &[]);
        info!(guild_id = guild.id, "Joined guild");
        self.announce("Server Join", guild, GREEN).await;

        if !self.bans.load().is_guild_banned(guild.id) {
            return JoinOutcome::Stayed;
        }

        info!(guild_id = guild.id, "Leaving banned guild");
        if let Err(e) = self.leaver.leave(guild.id).await {
            warn!(guild_id = guild.id, error = %e, "Failed to leave banned guild");
        }
        JoinOutcome::LeftBanned
    }

    pub async fn on_remove(&self, guild: &GuildInfo) {
        self.metrics.increment(metrics::GUILDS_LEAVE, &[]);
        info!(guild_id = guild.id, "Removed from guild");

        if let Err(e) = self.store.delete_guild_data(guild.id).await {
            warn!(guild_id = guild.id, error = %e, "Failed to delete guild configuration");
        }
        self.announce("Server Leave", guild, RED).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::clock::MockClock;
    use crate::mocks::{MockClusterBroadcast, MockNotifier, MockStore, RecordingMetrics};
    use serenity::all::HttpBuilder;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Clone, Default)]
    struct RecordingLeaver {
        left: Arc<Mutex<Vec<u64>>>,
    }

    impl GuildLeaver for RecordingLeaver {
        async fn leave(&self, guild_id: u64) -> Result<()> {
            self.left.lock().unwrap().push(guild_id);
            Ok(())
        }
    }

    type Membership = GuildMembership<MockStore, MockClusterBroadcast, RecordingMetrics, MockNotifier, RecordingLeaver>;

    struct Fixture {
        membership: Membership,
        store: MockStore,
        bans: Arc<Snapshot<BanList>>,
        metrics: Arc<RecordingMetrics>,
        notifier: MockNotifier,
        leaver: RecordingLeaver,
    }

    fn fixture(broadcast: MockClusterBroadcast) -> Fixture {
        let store = MockStore::new();
        let bans = Arc::new(Snapshot::default());
        let metrics = Arc::new(RecordingMetrics::new());
        let notifier = MockNotifier::new();
        let leaver = RecordingLeaver::default();
        let membership = GuildMembership::new(
            Arc::new(store.clone()),
            broadcast,
            bans.clone(),
            metrics.clone(),
            notifier.clone(),
            leaver.clone(),
            2,
        );
        Fixture {
            membership,
            store,
            bans,
            metrics,
            notifier,
            leaver,
        }
    }

    fn guild(id: u64) -> GuildInfo {
        GuildInfo {
            id,
            name: "Test Guild".to_string(),
        }
    }

    #[tokio::test]
    async fn test_join_counts_and_announces_fleet_total() {
        let f = fixture(MockClusterBroadcast::with_guild_counts(&[40, 2]));

        let outcome = f.membership.on_join(&guild(77)).await;

        assert_eq!(outcome, JoinOutcome::Stayed);
        assert_eq!(f.metrics.count("guilds_join"), 1);
        let notices = f.notifier.notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].title, "Server Join");
        assert_eq!(notices[0].channel, NoticeChannel::Joins);
        assert_eq!(notices[0].description.as_deref(), Some("Test Guild (77)"));
        assert_eq!(notices[0].footer.as_deref(), Some("42 servers"));
        assert!(f.leaver.left.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_join_of_banned_guild_leaves() {
        let f = fixture(MockClusterBroadcast::with_guild_counts(&[1, 1]));
        let mut banned = BanList::default();
        banned.guilds.insert(66);
        f.bans.publish(banned);

        let outcome = f.membership.on_join(&guild(66)).await;

        assert_eq!(outcome, JoinOutcome::LeftBanned);
        assert_eq!(*f.leaver.left.lock().unwrap(), vec![66]);
    }

    #[tokio::test]
    async fn test_partial_fleet_total_still_announced() {
        let f = fixture(MockClusterBroadcast::with_guild_counts(&[40]));

        f.membership.on_join(&guild(1)).await;

        assert_eq!(f.notifier.notices()[0].footer.as_deref(), Some("40 servers"));
    }

    #[tokio::test]
    async fn test_broadcast_failure_omits_footer() {
        let broadcast = MockClusterBroadcast::new();
        broadcast.fail(true);
        let f = fixture(broadcast);

        f.membership.on_join(&guild(1)).await;

        assert_eq!(f.notifier.notices()[0].footer, None);
    }

    #[tokio::test]
    async fn test_remove_deletes_configuration() {
        let f = fixture(MockClusterBroadcast::with_guild_counts(&[3, 4]));

        f.membership.on_remove(&guild(88)).await;

        assert_eq!(f.metrics.count("guilds_leave"), 1);
        assert_eq!(f.store.deleted_guilds(), vec![88]);
        let notices = f.notifier.notices();
        assert_eq!(notices[0].title, "Server Leave");
        assert_eq!(notices[0].colour, RED);
    }

    #[tokio::test]
    async fn test_discord_leaver_counts_leave_route() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/v10/users/@me/guilds/66"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        let http = HttpBuilder::new("token")
            .proxy(server.uri())
            .ratelimiter_disabled(true)
            .build();
        let metrics = Arc::new(RecordingMetrics::new());
        let leaver = DiscordGuildLeaver::new(
            Arc::new(http),
            RequestTracer::new(metrics.clone(), Arc::new(MockClock::new())),
        );

        leaver.leave(66).await.unwrap();

        assert_eq!(metrics.count_labelled("http", "route", "/users/@me/guilds/_id"), 1);
        assert_eq!(metrics.count_labelled("http", "status", "204"), 1);
    }

    #[tokio::test]
    async fn test_remove_survives_store_failure() {
        let f = fixture(MockClusterBroadcast::with_guild_counts(&[3, 4]));
        f.store.fail_guild_delete(true);

        f.membership.on_remove(&guild(88)).await;

        assert!(f.store.deleted_guilds().is_empty());
        assert_eq!(f.metrics.count("guilds_leave"), 1);
        assert_eq!(f.notifier.notices().len(), 1);
    }
}
