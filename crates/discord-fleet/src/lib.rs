//! # discord-fleet
//!
//! Runtime glue shared by every cluster of a sharded Discord bot.
//!
//! ## Features
//!
//! - Fleet guild total gathered over NATS scatter-gather and posted to bot
//!   listing sites, only when every cluster answered.
//! - Ban list and configured-category caches rebuilt from Postgres on a fixed
//!   cadence and published as immutable snapshots.
//! - Expired premium entitlements revoked by a statically designated leader
//!   cluster.
//! - Gateway lifecycle and dispatch frames counted through OpenTelemetry, with
//!   best-effort operator notices.
//! - Outbound HTTP requests labelled by a normalized, low-cardinality route.

pub mod clock;
pub mod cluster;
pub mod config;
pub mod error;
pub mod events;
pub mod guilds;
pub mod handler;
pub mod health;
pub mod http_trace;
pub mod leader;
pub mod metrics;
pub mod notify;
pub mod reconcile;
pub mod routes;
pub mod signal;
pub mod sinks;
pub mod snapshot;
pub mod stats;
pub mod store;
pub mod subjects;
pub mod sweeper;
pub mod telemetry;

#[cfg(any(test, feature = "test-support"))]
pub mod mocks;

pub use cluster::{Aggregate, ClusterBroadcast, NatsClusterBroadcast, aggregate_guild_count};
pub use config::Config;
pub use error::{Error, Result};
pub use events::{EventClassifier, LifecycleEvent};
pub use leader::{IsLeader, LeaderDesignation};
pub use reconcile::{BanReconciler, CategoryReconciler};
pub use routes::{RouteLabel, normalize_route};
pub use snapshot::{BanList, CategorySet, FleetCaches, Snapshot};
pub use stats::StatsReporter;
pub use store::{FleetStore, PgStore};
pub use sweeper::ExpirySweeper;
