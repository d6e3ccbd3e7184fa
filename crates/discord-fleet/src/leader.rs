//! Static leader designation.
//!
//! Fleet-wide side effects (stats reporting, the premium sweep) run on exactly
//! one cluster. Which one is fixed by configuration rather than elected, so
//! every cluster reaches the same answer without talking to the others.

use crate::config::ClusterConfig;

/// "Am I the leader?" predicate.
pub trait IsLeader: Send + Sync + 'static {
    fn is_leader(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaderDesignation {
    pub cluster_id: u32,
    pub leader_cluster: u32,
}

impl LeaderDesignation {
    pub fn new(cluster_id: u32, leader_cluster: u32) -> Self {
        Self {
            cluster_id,
            leader_cluster,
        }
    }
}

impl From<&ClusterConfig> for LeaderDesignation {
    fn from(cluster: &ClusterConfig) -> Self {
        Self::new(cluster.id, cluster.leader)
    }
}

impl IsLeader for LeaderDesignation {
    fn is_leader(&self) -> bool {
        self.cluster_id == self.leader_cluster
    }
}

impl IsLeader for bool {
    fn is_leader(&self) -> bool {
        *self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_configured_cluster_leads() {
        assert!(LeaderDesignation::new(1, 1).is_leader());
        assert!(!LeaderDesignation::new(2, 1).is_leader());
        assert!(LeaderDesignation::new(3, 3).is_leader());
    }

    #[test]
    fn test_from_cluster_config() {
        let cluster = ClusterConfig {
            id: 2,
            count: 4,
            leader: 2,
            shard_count: 16,
            broadcast_timeout_ms: 5_000,
        };
        let designation = LeaderDesignation::from(&cluster);
        assert!(designation.is_leader());
        assert_eq!(designation.cluster_id, 2);
    }
}
