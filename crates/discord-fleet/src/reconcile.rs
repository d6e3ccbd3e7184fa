//! Store-to-cache reconciliation loops.
//!
//! Each loop owns one snapshot: it rebuilds the whole value from the store on
//! every tick and publishes it with a single swap. A failed tick is logged and
//! the previous snapshot stays in place until the next one succeeds.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::Result;
use crate::leader::IsLeader;
use crate::signal::sleep_or_shutdown;
use crate::snapshot::{BanList, CategorySet, Snapshot};
use crate::store::{BanCategory, BanRecord, FleetStore};
use crate::sweeper::{ExpirySweeper, SweepReport};

/// Split ban rows into the user and guild sets.
pub fn partition_bans(rows: &[BanRecord]) -> BanList {
    let mut bans = BanList::default();
    for row in rows {
        match row.category {
            BanCategory::User => bans.users.insert(row.identifier),
            BanCategory::Guild => bans.guilds.insert(row.identifier),
        };
    }
    bans
}

/// Result of one successful ban tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub banned_users: usize,
    pub banned_guilds: usize,
    /// `None` when this cluster is not the leader or its premium fetch failed.
    pub sweep: Option<SweepReport>,
}

/// Ban list refresh plus the leader-only premium sweep.
pub struct BanReconciler<S, L, C> {
    store: Arc<S>,
    bans: Arc<Snapshot<BanList>>,
    leader: L,
    clock: Arc<C>,
    sweeper: ExpirySweeper,
    interval: Duration,
}

impl<S: FleetStore, L: IsLeader, C: Clock> BanReconciler<S, L, C> {
    pub fn new(store: Arc<S>, bans: Arc<Snapshot<BanList>>, leader: L, clock: Arc<C>, interval: Duration) -> Self {
        Self {
            store,
            bans,
            leader,
            clock,
            sweeper: ExpirySweeper::new(),
            interval,
        }
    }

    /// FETCH, PARTITION, SWEEP on the leader, then PUBLISH.
    ///
    /// A ban fetch failure returns early and leaves the published snapshot
    /// alone. Premium rows are read on the leader only, and a failure there
    /// skips the sweep without holding back the ban list.
    pub async fn tick(&self) -> Result<TickReport> {
        let rows = self.store.fetch_bans().await?;
        let next = partition_bans(&rows);

        let sweep = if self.leader.is_leader() {
            match self.store.fetch_expiring_premium().await {
                Ok(premium) => Some(self.sweeper.sweep(&*self.store, &premium, self.clock.utc_now()).await),
                Err(e) => {
                    warn!(error = %e, "Premium fetch failed, skipping sweep");
                    None
                }
            }
        } else {
            None
        };

        let report = TickReport {
            banned_users: next.users.len(),
            banned_guilds: next.guilds.len(),
            sweep,
        };
        self.bans.publish(next);
        Ok(report)
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            leader = self.leader.is_leader(),
            "Ban reconciler started"
        );
        loop {
            match self.tick().await {
                Ok(report) => debug!(
                    banned_users = report.banned_users,
                    banned_guilds = report.banned_guilds,
                    "Ban list refreshed"
                ),
                Err(e) => warn!(error = %e, "Ban reconciliation failed, keeping previous snapshot"),
            }
            if sleep_or_shutdown(&*self.clock, self.interval, &mut shutdown).await {
                break;
            }
        }
        info!("Ban reconciler stopped");
    }
}

/// Configured-category refresh.
pub struct CategoryReconciler<S, C> {
    store: Arc<S>,
    categories: Arc<Snapshot<CategorySet>>,
    clock: Arc<C>,
    interval: Duration,
}

impl<S: FleetStore, C: Clock> CategoryReconciler<S, C> {
    pub fn new(store: Arc<S>, categories: Arc<Snapshot<CategorySet>>, clock: Arc<C>, interval: Duration) -> Self {
        Self {
            store,
            categories,
            clock,
            interval,
        }
    }

    /// Returns the number of distinct categories published.
    pub async fn tick(&self) -> Result<usize> {
        let next: CategorySet = self.store.fetch_categories().await?.into_iter().collect();
        let count = next.len();
        self.categories.publish(next);
        Ok(count)
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "Category reconciler started");
        loop {
            if let Err(e) = self.tick().await {
                warn!(error = %e, "Category reconciliation failed, keeping previous snapshot");
            }
            if sleep_or_shutdown(&*self.clock, self.interval, &mut shutdown).await {
                break;
            }
        }
        info!("Category reconciler stopped");
    }
}

#[cfg(test)]
#[path = "reconcile_tests.rs"]
mod reconcile_tests;
