//! Test doubles for the fleet's collaborators.
//!
//! Enabled with the `test-support` feature:
//!
//! ```toml
//! [dev-dependencies]
//! discord-fleet = { path = "...", features = ["test-support"] }
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use crate::cluster::{ClusterBroadcast, ClusterReply, ClusterRequest};
use crate::error::{Error, Result};
use crate::metrics::{Label, MetricsSink};
use crate::notify::{Notifier, OperatorNotice};
use crate::sinks::{GuildStats, ReportSink};
use crate::store::{BanRecord, FleetStore, PremiumEntitlement};

// ── RecordingMetrics ──────────────────────────────────────────────────────────

/// One recorded counter increment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Increment {
    pub counter: &'static str,
    pub labels: Vec<(&'static str, String)>,
}

impl Increment {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Records every increment in order.
#[derive(Clone, Default)]
pub struct RecordingMetrics {
    increments: Arc<Mutex<Vec<Increment>>>,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increments(&self) -> Vec<Increment> {
        self.increments.lock().unwrap().clone()
    }

    /// Number of increments of `counter`, across all label sets.
    pub fn count(&self, counter: &str) -> usize {
        self.increments
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.counter == counter)
            .count()
    }

    /// Number of increments of `counter` whose `key` label equals `value`.
    pub fn count_labelled(&self, counter: &str, key: &str, value: &str) -> usize {
        self.increments
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.counter == counter && i.label(key) == Some(value))
            .count()
    }

    pub fn total(&self) -> usize {
        self.increments.lock().unwrap().len()
    }
}

impl MetricsSink for RecordingMetrics {
    fn increment(&self, counter: &'static str, labels: &[Label]) {
        self.increments.lock().unwrap().push(Increment {
            counter,
            labels: labels.to_vec(),
        });
    }
}

// ── MockSink ──────────────────────────────────────────────────────────────────

/// Report sink that records what it was sent.
#[derive(Clone)]
pub struct MockSink {
    name: String,
    fail: bool,
    calls: Arc<Mutex<Vec<GuildStats>>>,
}

impl MockSink {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fail: false,
            calls: Arc::default(),
        }
    }

    /// A sink whose every report is rejected.
    pub fn failing(name: &str) -> Self {
        Self {
            fail: true,
            ..Self::new(name)
        }
    }

    pub fn calls(&self) -> Vec<GuildStats> {
        self.calls.lock().unwrap().clone()
    }
}

impl ReportSink for MockSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn report(&self, stats: &GuildStats) -> Result<()> {
        self.calls.lock().unwrap().push(*stats);
        if self.fail {
            return Err(Error::sink(&self.name, "rejected by mock"));
        }
        Ok(())
    }
}

// ── MockStore ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct StoreState {
    bans: Vec<BanRecord>,
    premium: Vec<PremiumEntitlement>,
    categories: Vec<u64>,
    wiped: Vec<u64>,
    revoked: Vec<u64>,
    deleted_guilds: Vec<u64>,
    fail_wipe_for: HashSet<u64>,
}

/// In-memory store. Fetch failures are toggled per table.
#[derive(Clone, Default)]
pub struct MockStore {
    state: Arc<Mutex<StoreState>>,
    fail_bans: Arc<AtomicBool>,
    fail_premium: Arc<AtomicBool>,
    fail_categories: Arc<AtomicBool>,
    fail_delete: Arc<AtomicBool>,
    ban_fetches: Arc<AtomicUsize>,
    premium_fetches: Arc<AtomicUsize>,
    category_fetches: Arc<AtomicUsize>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_bans(&self, bans: Vec<BanRecord>) {
        self.state.lock().unwrap().bans = bans;
    }

    pub fn set_premium(&self, premium: Vec<PremiumEntitlement>) {
        self.state.lock().unwrap().premium = premium;
    }

    /// Entitlements still present.
    pub fn premium(&self) -> Vec<PremiumEntitlement> {
        self.state.lock().unwrap().premium.clone()
    }

    pub fn has_premium(&self, identifier: u64) -> bool {
        self.state
            .lock()
            .unwrap()
            .premium
            .iter()
            .any(|p| p.identifier == identifier)
    }

    pub fn set_categories(&self, categories: Vec<u64>) {
        self.state.lock().unwrap().categories = categories;
    }

    pub fn fail_ban_fetch(&self, fail: bool) {
        self.fail_bans.store(fail, Ordering::SeqCst);
    }

    pub fn fail_premium_fetch(&self, fail: bool) {
        self.fail_premium.store(fail, Ordering::SeqCst);
    }

    pub fn fail_category_fetch(&self, fail: bool) {
        self.fail_categories.store(fail, Ordering::SeqCst);
    }

    pub fn fail_guild_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    pub fn fail_wipe_for(&self, identifier: u64) {
        self.state.lock().unwrap().fail_wipe_for.insert(identifier);
    }

    /// Every successful `wipe_premium` call, including no-op repeats.
    pub fn wiped(&self) -> Vec<u64> {
        self.state.lock().unwrap().wiped.clone()
    }

    /// Identifiers whose entitlement was actually removed.
    pub fn revoked(&self) -> Vec<u64> {
        self.state.lock().unwrap().revoked.clone()
    }

    pub fn deleted_guilds(&self) -> Vec<u64> {
        self.state.lock().unwrap().deleted_guilds.clone()
    }

    pub fn ban_fetches(&self) -> usize {
        self.ban_fetches.load(Ordering::SeqCst)
    }

    pub fn premium_fetches(&self) -> usize {
        self.premium_fetches.load(Ordering::SeqCst)
    }

    pub fn category_fetches(&self) -> usize {
        self.category_fetches.load(Ordering::SeqCst)
    }
}

fn unavailable() -> Error {
    Error::Store(sqlx::Error::PoolTimedOut)
}

impl FleetStore for MockStore {
    async fn fetch_bans(&self) -> Result<Vec<BanRecord>> {
        self.ban_fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_bans.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(self.state.lock().unwrap().bans.clone())
    }

    async fn fetch_expiring_premium(&self) -> Result<Vec<PremiumEntitlement>> {
        self.premium_fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_premium.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(self
            .state
            .lock()
            .unwrap()
            .premium
            .iter()
            .filter(|p| p.expiry.is_some())
            .copied()
            .collect())
    }

    async fn fetch_categories(&self) -> Result<Vec<u64>> {
        self.category_fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_categories.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(self.state.lock().unwrap().categories.clone())
    }

    async fn wipe_premium(&self, identifier: u64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_wipe_for.contains(&identifier) {
            return Err(unavailable());
        }
        state.wiped.push(identifier);
        let before = state.premium.len();
        state.premium.retain(|p| p.identifier != identifier);
        if state.premium.len() != before {
            state.revoked.push(identifier);
        }
        Ok(())
    }

    async fn delete_guild_data(&self, guild_id: u64) -> Result<()> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        self.state.lock().unwrap().deleted_guilds.push(guild_id);
        Ok(())
    }
}

// ── MockClusterBroadcast ──────────────────────────────────────────────────────

/// Broadcast that answers from a fixed reply list.
#[derive(Clone, Default)]
pub struct MockClusterBroadcast {
    replies: Arc<Mutex<HashMap<ClusterRequest, Vec<ClusterReply>>>>,
    fail: Arc<AtomicBool>,
    calls: Arc<Mutex<Vec<(ClusterRequest, usize)>>>,
}

impl MockClusterBroadcast {
    pub fn new() -> Self {
        Self::default()
    }

    /// Guild-count replies, one per value, from clusters 1..=n.
    pub fn with_guild_counts(counts: &[u64]) -> Self {
        let mock = Self::new();
        mock.set_replies(
            ClusterRequest::GuildCount,
            counts
                .iter()
                .zip(1u32..)
                .map(|(&value, cluster_id)| ClusterReply { cluster_id, value })
                .collect(),
        );
        mock
    }

    pub fn set_replies(&self, request: ClusterRequest, replies: Vec<ClusterReply>) {
        self.replies.lock().unwrap().insert(request, replies);
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<(ClusterRequest, usize)> {
        self.calls.lock().unwrap().clone()
    }
}

impl ClusterBroadcast for MockClusterBroadcast {
    async fn broadcast(&self, request: ClusterRequest, expected: usize) -> Result<Vec<ClusterReply>> {
        self.calls.lock().unwrap().push((request, expected));
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Nats("no responders".to_string()));
        }
        Ok(self
            .replies
            .lock()
            .unwrap()
            .get(&request)
            .cloned()
            .unwrap_or_default())
    }
}

// ── MockNotifier ──────────────────────────────────────────────────────────────

/// Records notices. A failing notifier still records the attempt.
#[derive(Clone, Default)]
pub struct MockNotifier {
    notices: Arc<Mutex<Vec<OperatorNotice>>>,
    fail: Arc<AtomicBool>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let mock = Self::new();
        mock.fail.store(true, Ordering::SeqCst);
        mock
    }

    pub fn notices(&self) -> Vec<OperatorNotice> {
        self.notices.lock().unwrap().clone()
    }
}

impl Notifier for MockNotifier {
    async fn notify(&self, notice: OperatorNotice) -> Result<()> {
        self.notices.lock().unwrap().push(notice);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Notify("channel unavailable".to_string()));
        }
        Ok(())
    }
}
