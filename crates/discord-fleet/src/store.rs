//! Shared store access.
//!
//! The store is the source of truth for bans, premium entitlements and guild
//! configuration. Everything here is read by the reconciliation loops; the
//! only writes are the entitlement downgrade and guild-data removal.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::error::Result;

/// What a ban row applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BanCategory {
    User,
    Guild,
}

impl BanCategory {
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(Self::User),
            1 => Some(Self::Guild),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BanRecord {
    pub identifier: u64,
    pub category: BanCategory,
}

impl BanRecord {
    pub fn user(identifier: u64) -> Self {
        Self {
            identifier,
            category: BanCategory::User,
        }
    }

    pub fn guild(identifier: u64) -> Self {
        Self {
            identifier,
            category: BanCategory::Guild,
        }
    }
}

/// A premium entitlement. `expiry: None` never expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PremiumEntitlement {
    pub identifier: u64,
    pub expiry: Option<DateTime<Utc>>,
}

/// Shared store collaborator.
pub trait FleetStore: Send + Sync + 'static {
    fn fetch_bans(&self) -> impl Future<Output = Result<Vec<BanRecord>>> + Send;

    /// Entitlements that carry an expiry.
    fn fetch_expiring_premium(
        &self,
    ) -> impl Future<Output = Result<Vec<PremiumEntitlement>>> + Send;

    fn fetch_categories(&self) -> impl Future<Output = Result<Vec<u64>>> + Send;

    /// Revoke an entitlement. Revoking one that is already gone is not an error.
    fn wipe_premium(&self, identifier: u64) -> impl Future<Output = Result<()>> + Send;

    fn delete_guild_data(&self, guild_id: u64) -> impl Future<Output = Result<()>> + Send;
}

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.database_url)
            .await?;
        info!(
            max_connections = config.max_connections,
            "Store pool connected"
        );
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl FleetStore for PgStore {
    async fn fetch_bans(&self) -> Result<Vec<BanRecord>> {
        let mut conn = self.pool.acquire().await?;
        let rows: Vec<(i64, i32)> = sqlx::query_as("SELECT identifier, category FROM ban")
            .fetch_all(&mut *conn)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(identifier, category)| {
                let Some(identifier) = to_snowflake(identifier) else {
                    warn!(identifier, "Skipping ban row with invalid identifier");
                    return None;
                };
                match BanCategory::from_raw(category) {
                    Some(category) => Some(BanRecord {
                        identifier,
                        category,
                    }),
                    None => {
                        debug!(identifier, category, "Skipping ban row with unknown category");
                        None
                    }
                }
            })
            .collect())
    }

    async fn fetch_expiring_premium(&self) -> Result<Vec<PremiumEntitlement>> {
        let mut conn = self.pool.acquire().await?;
        let rows: Vec<(i64, Option<i64>)> =
            sqlx::query_as("SELECT identifier, expiry FROM premium WHERE expiry IS NOT NULL")
                .fetch_all(&mut *conn)
                .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(identifier, expiry)| {
                let Some(identifier) = to_snowflake(identifier) else {
                    warn!(identifier, "Skipping premium row with invalid identifier");
                    return None;
                };
                Some(PremiumEntitlement {
                    identifier,
                    expiry: expiry.and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
                })
            })
            .collect())
    }

    async fn fetch_categories(&self) -> Result<Vec<u64>> {
        let mut conn = self.pool.acquire().await?;
        let rows: Vec<(Option<i64>,)> = sqlx::query_as("SELECT category FROM data")
            .fetch_all(&mut *conn)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(category,)| category.and_then(to_snowflake))
            .collect())
    }

    async fn wipe_premium(&self, identifier: u64) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        let result = sqlx::query("DELETE FROM premium WHERE identifier = $1")
            .bind(identifier as i64)
            .execute(&mut *conn)
            .await?;
        debug!(
            identifier,
            rows = result.rows_affected(),
            "Wiped premium entitlement"
        );
        Ok(())
    }

    async fn delete_guild_data(&self, guild_id: u64) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("DELETE FROM data WHERE guild = $1")
            .bind(guild_id as i64)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

/// Snowflakes are stored as `bigint`; negative values are corrupt rows.
fn to_snowflake(raw: i64) -> Option<u64> {
    u64::try_from(raw).ok()
}
