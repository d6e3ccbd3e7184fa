//! Configuration management for discord-fleet

#[path = "config_tests.rs"]
mod config_tests;

use std::fs;
use std::ops::Range;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::sinks::SinkKind;

/// Environment lookup, swappable in tests.
pub trait ReadEnv {
    fn var(&self, key: &str) -> Option<String>;
}

/// Reads the process environment.
pub struct SystemEnv;

impl ReadEnv for SystemEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Complete fleet configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub discord: DiscordConfig,
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub nats: NatsConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub stats: StatsConfig,
    #[serde(default)]
    pub sinks: Vec<SinkConfig>,
}

/// Discord connection and operator channels
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    #[serde(default = "default_bot_token")]
    pub bot_token: String,
    /// Channel receiving shard lifecycle notices
    #[serde(default)]
    pub event_channel_id: Option<u64>,
    /// Channel receiving guild join/leave notices
    #[serde(default)]
    pub join_channel_id: Option<u64>,
    #[serde(default = "default_primary_colour")]
    pub primary_colour: u32,
}

/// Position of this process in the fleet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// 1-based cluster index
    pub id: u32,
    /// Number of clusters in the fleet
    pub count: u32,
    /// Cluster that runs fleet-wide side effects (stats reporting, premium sweep)
    #[serde(default = "default_leader")]
    pub leader: u32,
    /// Total shards across the fleet, reported to the stats sites
    pub shard_count: u32,
    #[serde(default = "default_broadcast_timeout_ms")]
    pub broadcast_timeout_ms: u64,
}

impl ClusterConfig {
    pub fn broadcast_timeout(&self) -> Duration {
        Duration::from_millis(self.broadcast_timeout_ms)
    }

    /// Shards this cluster runs. Shards are split into contiguous blocks of
    /// equal size; the last cluster may get fewer.
    pub fn shard_range(&self) -> Range<u32> {
        let count = self.count.max(1);
        let per_cluster = self.shard_count.div_ceil(count);
        let start = (self.id.saturating_sub(1) * per_cluster).min(self.shard_count);
        let end = (start + per_cluster).min(self.shard_count);
        start..end
    }
}

/// Shared store connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
        }
    }
}

/// NATS connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsConfig {
    pub servers: Vec<String>,
    /// Subject prefix shared by every cluster of one bot (e.g. "prod", "dev")
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self::new(vec!["localhost:4222".to_string()], default_prefix())
    }
}

impl NatsConfig {
    pub fn new(servers: Vec<String>, prefix: impl Into<String>) -> Self {
        Self {
            servers,
            prefix: prefix.into(),
            credentials_file: None,
            username: None,
            password: None,
        }
    }

    /// Parse servers from a comma-separated URL string
    pub fn from_url(url: impl AsRef<str>, prefix: impl Into<String>) -> Self {
        let servers = url
            .as_ref()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        Self::new(servers, prefix)
    }
}

/// Reconciliation cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default = "default_ban_interval_secs")]
    pub ban_interval_secs: u64,
    #[serde(default = "default_category_interval_secs")]
    pub category_interval_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            ban_interval_secs: default_ban_interval_secs(),
            category_interval_secs: default_category_interval_secs(),
        }
    }
}

impl ReconcileConfig {
    pub fn ban_interval(&self) -> Duration {
        Duration::from_secs(self.ban_interval_secs)
    }

    pub fn category_interval(&self) -> Duration {
        Duration::from_secs(self.category_interval_secs)
    }
}

/// Guild-count reporting cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Disables reporting to the stats sites entirely
    #[serde(default)]
    pub testing: bool,
    #[serde(default = "default_stats_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_incomplete_backoff_secs")]
    pub incomplete_backoff_secs: u64,
    /// Upper bound on one POST to a stats site
    #[serde(default = "default_sink_timeout_secs")]
    pub sink_timeout_secs: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            testing: false,
            interval_secs: default_stats_interval_secs(),
            incomplete_backoff_secs: default_incomplete_backoff_secs(),
            sink_timeout_secs: default_sink_timeout_secs(),
        }
    }
}

impl StatsConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn incomplete_backoff(&self) -> Duration {
        Duration::from_secs(self.incomplete_backoff_secs)
    }

    pub fn sink_timeout(&self) -> Duration {
        Duration::from_secs(self.sink_timeout_secs)
    }
}

/// One stats site and its credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkConfig {
    pub kind: SinkKind,
    pub token: String,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env<E: ReadEnv>(env: &E) -> Result<Self> {
        let bot_token = env
            .var("DISCORD_BOT_TOKEN")
            .context("DISCORD_BOT_TOKEN not set")?;

        let cluster = ClusterConfig {
            id: parse_var(env, "CLUSTER_ID")?.unwrap_or(1),
            count: parse_var(env, "CLUSTER_COUNT")?.unwrap_or(1),
            leader: parse_var(env, "LEADER_CLUSTER")?.unwrap_or_else(default_leader),
            shard_count: parse_var(env, "SHARD_COUNT")?.unwrap_or(1),
            broadcast_timeout_ms: parse_var(env, "BROADCAST_TIMEOUT_MS")?
                .unwrap_or_else(default_broadcast_timeout_ms),
        };

        let nats_url = env
            .var("NATS_URL")
            .unwrap_or_else(|| "localhost:4222".to_string());
        let prefix = env.var("FLEET_PREFIX").unwrap_or_else(default_prefix);

        let store = StoreConfig {
            database_url: env.var("DATABASE_URL").unwrap_or_else(default_database_url),
            ..StoreConfig::default()
        };

        let testing = env
            .var("FLEET_TESTING")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(false);

        let sinks = SinkKind::ALL
            .iter()
            .filter_map(|kind| {
                env.var(kind.token_env_var())
                    .filter(|token| !token.trim().is_empty())
                    .map(|token| SinkConfig { kind: *kind, token })
            })
            .collect();

        Ok(Config {
            discord: DiscordConfig {
                bot_token,
                event_channel_id: parse_var(env, "EVENT_CHANNEL_ID")?,
                join_channel_id: parse_var(env, "JOIN_CHANNEL_ID")?,
                primary_colour: default_primary_colour(),
            },
            cluster,
            store,
            nats: NatsConfig::from_url(nats_url, prefix),
            reconcile: ReconcileConfig::default(),
            stats: StatsConfig {
                testing,
                sink_timeout_secs: parse_var(env, "SINK_TIMEOUT_SECS")?.unwrap_or_else(default_sink_timeout_secs),
                ..StatsConfig::default()
            },
            sinks,
        })
    }

    /// Reject configurations the fleet cannot run with.
    pub fn validate(&self) -> crate::error::Result<()> {
        let cluster = &self.cluster;
        if cluster.count == 0 {
            return Err(Error::Config("cluster count must be at least 1".into()));
        }
        if cluster.shard_count == 0 {
            return Err(Error::Config("shard count must be at least 1".into()));
        }
        if cluster.id == 0 || cluster.id > cluster.count {
            return Err(Error::Config(format!(
                "cluster id {} outside 1..={}",
                cluster.id, cluster.count
            )));
        }
        if cluster.leader == 0 || cluster.leader > cluster.count {
            return Err(Error::Config(format!(
                "leader cluster {} outside 1..={}",
                cluster.leader, cluster.count
            )));
        }
        if self.discord.bot_token.trim().is_empty() {
            return Err(Error::Config("discord bot token is empty".into()));
        }
        for (name, secs) in [
            ("reconcile.ban_interval_secs", self.reconcile.ban_interval_secs),
            ("reconcile.category_interval_secs", self.reconcile.category_interval_secs),
            ("stats.interval_secs", self.stats.interval_secs),
            ("stats.incomplete_backoff_secs", self.stats.incomplete_backoff_secs),
            ("stats.sink_timeout_secs", self.stats.sink_timeout_secs),
        ] {
            if secs == 0 {
                return Err(Error::Config(format!("{name} must be greater than zero")));
            }
        }
        if let Some(sink) = self.sinks.iter().find(|s| s.token.trim().is_empty()) {
            return Err(Error::Config(format!(
                "report sink {} has an empty token",
                sink.kind.name()
            )));
        }
        Ok(())
    }
}

fn parse_var<E: ReadEnv, T: std::str::FromStr>(env: &E, key: &str) -> Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env.var(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("{key}={raw:?} is not valid")),
        _ => Ok(None),
    }
}

fn default_bot_token() -> String {
    std::env::var("DISCORD_BOT_TOKEN").unwrap_or_default()
}

fn default_primary_colour() -> u32 {
    0x1E90FF
}

fn default_leader() -> u32 {
    1
}

fn default_broadcast_timeout_ms() -> u64 {
    5_000
}

fn default_database_url() -> String {
    "postgres://localhost/discord".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_acquire_timeout_secs() -> u64 {
    5
}

fn default_prefix() -> String {
    "prod".to_string()
}

fn default_ban_interval_secs() -> u64 {
    60
}

fn default_category_interval_secs() -> u64 {
    5
}

fn default_stats_interval_secs() -> u64 {
    900
}

fn default_incomplete_backoff_secs() -> u64 {
    300
}

fn default_sink_timeout_secs() -> u64 {
    10
}
