//! Read-only caches republished wholesale by the reconciliation loops.
//!
//! A writer builds the next value off to the side and swaps it in with a
//! single reference replacement. Readers take an `Arc` and keep a consistent
//! view for as long as they hold it, whatever the writer does meanwhile.

use std::collections::HashSet;
use std::sync::Arc;

use arc_swap::ArcSwap;

/// An atomically swapped, immutable snapshot.
#[derive(Debug)]
pub struct Snapshot<T> {
    current: ArcSwap<T>,
}

impl<T> Snapshot<T> {
    pub fn new(initial: T) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
        }
    }

    /// Current snapshot. Lock-free; never waits on a writer.
    pub fn load(&self) -> Arc<T> {
        self.current.load_full()
    }

    /// Replace the snapshot, returning the previous one.
    pub fn publish(&self, next: T) -> Arc<T> {
        self.current.swap(Arc::new(next))
    }
}

impl<T: Default> Default for Snapshot<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Banned users and banned guilds, published together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BanList {
    pub users: HashSet<u64>,
    pub guilds: HashSet<u64>,
}

impl BanList {
    pub fn is_user_banned(&self, user_id: u64) -> bool {
        self.users.contains(&user_id)
    }

    pub fn is_guild_banned(&self, guild_id: u64) -> bool {
        self.guilds.contains(&guild_id)
    }
}

/// Category ids currently configured across all guilds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategorySet(pub HashSet<u64>);

impl CategorySet {
    pub fn contains(&self, category_id: u64) -> bool {
        self.0.contains(&category_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<u64> for CategorySet {
    fn from_iter<I: IntoIterator<Item = u64>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Process-wide caches owned by the reconciliation loops.
#[derive(Debug, Clone, Default)]
pub struct FleetCaches {
    pub bans: Arc<Snapshot<BanList>>,
    pub categories: Arc<Snapshot<CategorySet>>,
}

impl FleetCaches {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ban_list(users: &[u64], guilds: &[u64]) -> BanList {
        BanList {
            users: users.iter().copied().collect(),
            guilds: guilds.iter().copied().collect(),
        }
    }

    #[test]
    fn test_publish_replaces_and_returns_previous() {
        let snapshot = Snapshot::new(ban_list(&[1], &[]));
        let previous = snapshot.publish(ban_list(&[2], &[3]));

        assert!(previous.is_user_banned(1));
        assert!(snapshot.load().is_user_banned(2));
        assert!(snapshot.load().is_guild_banned(3));
        assert!(!snapshot.load().is_user_banned(1));
    }

    #[test]
    fn test_reader_keeps_old_view_after_publish() {
        let snapshot = Snapshot::new(ban_list(&[1, 3], &[2]));
        let held = snapshot.load();

        snapshot.publish(ban_list(&[], &[]));

        assert_eq!(*held, ban_list(&[1, 3], &[2]));
        assert_eq!(*snapshot.load(), BanList::default());
    }

    #[test]
    fn test_concurrent_readers_never_see_a_mixture() {
        let old = ban_list(&(0..500).collect::<Vec<_>>(), &[0]);
        let new = ban_list(&(500..1000).collect::<Vec<_>>(), &[1]);
        let snapshot = Arc::new(Snapshot::new(old.clone()));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let snapshot = snapshot.clone();
                let (old, new) = (old.clone(), new.clone());
                std::thread::spawn(move || {
                    for _ in 0..2_000 {
                        let seen = snapshot.load();
                        assert!(*seen == old || *seen == new, "observed a partial ban list");
                    }
                })
            })
            .collect();

        for i in 0..200 {
            snapshot.publish(if i % 2 == 0 { new.clone() } else { old.clone() });
        }

        for reader in readers {
            reader.join().unwrap();
        }
    }

    #[test]
    fn test_concurrent_publishers_each_replace_exactly_one_value() {
        let snapshot = Arc::new(Snapshot::new(0u64));

        let writers: Vec<_> = (1..=8u64)
            .map(|n| {
                let snapshot = snapshot.clone();
                std::thread::spawn(move || *snapshot.publish(n))
            })
            .collect();

        let mut seen: Vec<u64> = writers.into_iter().map(|w| w.join().unwrap()).collect();
        seen.push(*snapshot.load());
        seen.sort_unstable();

        assert_eq!(seen, (0..=8).collect::<Vec<_>>());
    }

    #[test]
    fn test_category_set_from_iter() {
        let set: CategorySet = [10, 20, 10].into_iter().collect();
        assert_eq!(set.len(), 2);
        assert!(set.contains(20));
        assert!(!CategorySet::default().contains(20));
    }

    #[test]
    fn test_fleet_caches_share_snapshots_across_clones() {
        let caches = FleetCaches::new();
        let reader = caches.clone();
        caches.categories.publish([7].into_iter().collect());
        assert!(reader.categories.load().contains(7));
    }
}
