//! Per-peer unseen message counts for the local viewer.
//!
//! This cache is disposable: the server's grouped count is the authority and
//! [`UnseenCounters::replace_all`] overwrites everything with it.

use std::collections::HashMap;

use natter_shared::types::UserId;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnseenCounters {
    counts: HashMap<UserId, u32>,
}

impl UnseenCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, peer: UserId) -> u32 {
        let count = self.counts.entry(peer).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    pub fn clear(&mut self, peer: UserId) {
        self.counts.remove(&peer);
    }

    /// Overwrite with the server's counts. Zero entries are dropped.
    pub fn replace_all(&mut self, counts: HashMap<UserId, u32>) {
        self.counts = counts.into_iter().filter(|(_, n)| *n > 0).collect();
    }

    pub fn get(&self, peer: UserId) -> u32 {
        self.counts.get(&peer).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u32 {
        self.counts.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (UserId, u32)> + '_ {
        self.counts.iter().map(|(peer, n)| (*peer, *n))
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_and_clear() {
        let mut counters = UnseenCounters::new();
        let peer = UserId::new();

        assert_eq!(counters.increment(peer), 1);
        assert_eq!(counters.increment(peer), 2);
        assert_eq!(counters.total(), 2);

        counters.clear(peer);
        assert_eq!(counters.get(peer), 0);
        assert!(counters.is_empty());
    }

    #[test]
    fn test_replace_all_overwrites() {
        let mut counters = UnseenCounters::new();
        let stale = UserId::new();
        let fresh = UserId::new();
        let zero = UserId::new();
        counters.increment(stale);

        counters.replace_all(HashMap::from([(fresh, 3), (zero, 0)]));
        assert_eq!(counters.get(stale), 0);
        assert_eq!(counters.get(fresh), 3);
        assert_eq!(counters.iter().count(), 1);
    }
}
