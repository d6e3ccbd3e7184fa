//! Premium expiry sweep.
//!
//! Runs inside the ban reconciliation tick on the leader cluster only. The
//! cleanup itself is idempotent, so a second cluster sweeping the same
//! entitlement by mistake costs a redundant delete and nothing else.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::store::{FleetStore, PremiumEntitlement};

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub swept: Vec<u64>,
    pub failed: Vec<u64>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExpirySweeper;

impl ExpirySweeper {
    pub fn new() -> Self {
        Self
    }

    /// Distinct identifiers whose expiry is strictly before `now`, in
    /// ascending order. Entitlements without an expiry are skipped.
    pub fn expired(&self, rows: &[PremiumEntitlement], now: DateTime<Utc>) -> Vec<u64> {
        rows.iter()
            .filter_map(|row| match row.expiry {
                Some(expiry) if expiry < now => Some(row.identifier),
                _ => None,
            })
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Revoke every expired entitlement once.
    pub async fn sweep<S: FleetStore>(
        &self,
        store: &S,
        rows: &[PremiumEntitlement],
        now: DateTime<Utc>,
    ) -> SweepReport {
        let mut report = SweepReport::default();

        for identifier in self.expired(rows, now) {
            match store.wipe_premium(identifier).await {
                Ok(()) => report.swept.push(identifier),
                Err(e) => {
                    warn!(identifier, error = %e, "Failed to wipe expired premium");
                    report.failed.push(identifier);
                }
            }
        }

        if !report.swept.is_empty() {
            info!(count = report.swept.len(), "Swept expired premium entitlements");
        }
        report
    }
}
