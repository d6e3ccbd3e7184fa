//! Fleet guild-count reporting.
//!
//! One round asks every cluster for its guild count and, only when all of
//! them answered, forwards the total to the report sinks. Runs on the leader
//! cluster only.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cluster::{Aggregate, ClusterBroadcast, aggregate_guild_count};
use crate::clock::Clock;
use crate::config::{ClusterConfig, StatsConfig};
use crate::signal::sleep_or_shutdown;
use crate::sinks::{GuildStats, ReportSink, dispatch_all};

/// What one round did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundOutcome {
    Published {
        guild_count: u64,
        succeeded: usize,
        failed: usize,
    },
    Incomplete {
        received: usize,
        expected: usize,
    },
    BroadcastFailed,
}

pub struct StatsReporter<B, S, C> {
    broadcast: B,
    sinks: Vec<S>,
    clock: Arc<C>,
    expected_clusters: usize,
    shard_count: u32,
    interval: Duration,
    incomplete_backoff: Duration,
}

impl<B: ClusterBroadcast, S: ReportSink, C: Clock> StatsReporter<B, S, C> {
    pub fn new(broadcast: B, sinks: Vec<S>, clock: Arc<C>, cluster: &ClusterConfig, stats: &StatsConfig) -> Self {
        Self {
            broadcast,
            sinks,
            clock,
            expected_clusters: cluster.count as usize,
            shard_count: cluster.shard_count,
            interval: stats.interval(),
            incomplete_backoff: stats.incomplete_backoff(),
        }
    }

    /// Delay to wait after a round with this outcome.
    pub fn delay_after(&self, outcome: &RoundOutcome) -> Duration {
        match outcome {
            RoundOutcome::Published { .. } => self.interval,
            RoundOutcome::Incomplete { .. } | RoundOutcome::BroadcastFailed => self.incomplete_backoff,
        }
    }

    /// Run one round and return the delay before the next.
    pub async fn run_round(&self) -> Duration {
        let outcome = self.round().await;
        self.delay_after(&outcome)
    }

    pub async fn round(&self) -> RoundOutcome {
        let aggregate = match aggregate_guild_count(&self.broadcast, self.expected_clusters).await {
            Ok(aggregate) => aggregate,
            Err(e) => {
                warn!(error = %e, "Guild-count broadcast failed");
                return RoundOutcome::BroadcastFailed;
            }
        };

        let guild_count = match aggregate {
            Aggregate::Complete(total) => total,
            Aggregate::Incomplete { received, expected, .. } => {
                info!(received, expected, "Not every cluster answered, skipping stats post");
                return RoundOutcome::Incomplete { received, expected };
            }
        };

        let stats = GuildStats {
            guild_count,
            shard_count: self.shard_count,
        };
        let report = dispatch_all(&self.sinks, &stats).await;
        info!(
            guild_count,
            shard_count = self.shard_count,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Posted fleet stats"
        );

        RoundOutcome::Published {
            guild_count,
            succeeded: report.succeeded.len(),
            failed: report.failed.len(),
        }
    }

    /// Repeat rounds until shutdown. Shutdown is only observed between rounds.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            sinks = self.sinks.len(),
            expected_clusters = self.expected_clusters,
            "Stats reporter started"
        );
        loop {
            let delay = self.run_round().await;
            debug!(delay_secs = delay.as_secs(), "Next stats round scheduled");
            if sleep_or_shutdown(&*self.clock, delay, &mut shutdown).await {
                break;
            }
        }
        info!("Stats reporter stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::mocks::{MockClusterBroadcast, MockSink};

    fn cluster(count: u32) -> ClusterConfig {
        ClusterConfig {
            id: 1,
            count,
            leader: 1,
            shard_count: 12,
            broadcast_timeout_ms: 5000,
        }
    }

    fn reporter(
        counts: &[u64],
        expected: u32,
        sinks: Vec<MockSink>,
    ) -> (StatsReporter<MockClusterBroadcast, MockSink, MockClock>, Arc<MockClock>) {
        let clock = Arc::new(MockClock::new());
        let reporter = StatsReporter::new(
            MockClusterBroadcast::with_guild_counts(counts),
            sinks,
            clock.clone(),
            &cluster(expected),
            &StatsConfig::default(),
        );
        (reporter, clock)
    }

    #[tokio::test]
    async fn test_incomplete_round_calls_no_sink_and_backs_off() {
        let sink = MockSink::new("top.gg");
        let (reporter, _clock) = reporter(&[10, 20], 3, vec![sink.clone()]);

        let delay = reporter.run_round().await;

        assert_eq!(delay, Duration::from_secs(300));
        assert!(sink.calls().is_empty());
    }

    #[tokio::test]
    async fn test_complete_round_posts_total_to_every_sink() {
        let sinks = vec![MockSink::new("a"), MockSink::new("b")];
        let (reporter, _clock) = reporter(&[10, 20, 15], 3, sinks.clone());

        let delay = reporter.run_round().await;

        assert_eq!(delay, Duration::from_secs(900));
        let expected = GuildStats {
            guild_count: 45,
            shard_count: 12,
        };
        for sink in &sinks {
            assert_eq!(sink.calls(), vec![expected]);
        }
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_block_others() {
        let sinks = vec![MockSink::failing("a"), MockSink::new("b")];
        let (reporter, _clock) = reporter(&[5], 1, sinks.clone());

        let outcome = reporter.round().await;

        assert_eq!(
            outcome,
            RoundOutcome::Published {
                guild_count: 5,
                succeeded: 1,
                failed: 1
            }
        );
        assert_eq!(sinks[1].calls().len(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_failure_backs_off() {
        let sink = MockSink::new("a");
        let (reporter, _clock) = reporter(&[], 2, vec![sink.clone()]);
        reporter.broadcast.fail(true);

        assert_eq!(reporter.round().await, RoundOutcome::BroadcastFailed);
        assert_eq!(reporter.run_round().await, Duration::from_secs(300));
        assert!(sink.calls().is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let sink = MockSink::new("a");
        let (reporter, clock) = reporter(&[1, 2], 2, vec![sink.clone()]);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(reporter.run(rx));
        while sink.calls().len() < 2 {
            tokio::task::yield_now().await;
        }
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert!(clock.sleeps().iter().all(|d| *d == Duration::from_secs(900)));
    }
}
