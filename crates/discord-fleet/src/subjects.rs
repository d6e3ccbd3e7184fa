//! NATS subject patterns for cross-cluster traffic.
//!
//! Subject pattern: `fleet.{prefix}.{scope}.{request}`
//!
//! - `fleet.{prefix}.cluster.guild_count`

/// Subjects every cluster answers on.
pub mod cluster {
    pub fn guild_count(prefix: &str) -> String {
        format!("fleet.{}.cluster.guild_count", prefix)
    }
}
