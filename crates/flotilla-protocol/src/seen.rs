//! Duplicate suppression for flooded packets.
//!
//! The default policy keeps every processed packet id for the life of the
//! process. Long-lived nodes can opt into [`SeenPolicy::Bounded`], which
//! forgets ids by age and by count; a packet still circulating after its id
//! was evicted is then bounded only by its ttl.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;

use crate::identity::PacketId;

/// Retention policy for processed packet ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeenPolicy {
    /// Never evict.
    #[default]
    Unbounded,
    /// Keep at most `capacity` ids (if set), each for at most `ttl` (if set).
    Bounded {
        capacity: Option<usize>,
        ttl: Option<Duration>,
    },
}

/// Set of packet ids this node has already processed.
///
/// Ids map to the instant they were first processed. Lookups use `peek`, so
/// eviction order is insertion order.
pub struct SeenSet {
    policy: SeenPolicy,
    ids: LruCache<PacketId, Instant>,
}

impl std::fmt::Debug for SeenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeenSet")
            .field("policy", &self.policy)
            .field("len", &self.ids.len())
            .finish()
    }
}

impl Default for SeenSet {
    fn default() -> Self {
        Self::new(SeenPolicy::Unbounded)
    }
}

impl SeenSet {
    pub fn new(policy: SeenPolicy) -> Self {
        let ids = match policy {
            SeenPolicy::Bounded {
                capacity: Some(capacity),
                ..
            } => LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
            _ => LruCache::unbounded(),
        };
        Self { policy, ids }
    }

    pub fn policy(&self) -> SeenPolicy {
        self.policy
    }

    /// Whether `id` was processed and has not expired.
    pub fn contains(&self, id: &PacketId) -> bool {
        self.contains_at(id, Instant::now())
    }

    /// Like [`contains`](Self::contains) with an explicit clock reading.
    pub fn contains_at(&self, id: &PacketId, now: Instant) -> bool {
        self.ids
            .peek(id)
            .is_some_and(|inserted| !self.expired(*inserted, now))
    }

    /// Mark `id` as processed. Returns false if it was already present.
    pub fn insert(&mut self, id: PacketId) -> bool {
        self.insert_at(id, Instant::now())
    }

    /// Like [`insert`](Self::insert) with an explicit clock reading.
    pub fn insert_at(&mut self, id: PacketId, now: Instant) -> bool {
        self.evict(now);
        if self.contains_at(&id, now) {
            return false;
        }
        // At capacity the least recently inserted id is dropped.
        self.ids.put(id, now);
        true
    }

    fn expired(&self, inserted: Instant, now: Instant) -> bool {
        match self.policy {
            SeenPolicy::Bounded { ttl: Some(ttl), .. } => {
                now.saturating_duration_since(inserted) >= ttl
            }
            _ => false,
        }
    }

    fn evict(&mut self, now: Instant) {
        while let Some((_, inserted)) = self.ids.peek_lru() {
            if !self.expired(*inserted, now) {
                break;
            }
            self.ids.pop_lru();
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_keeps_everything() {
        let mut seen = SeenSet::default();
        assert_eq!(seen.policy(), SeenPolicy::Unbounded);

        for i in 0..10_000 {
            assert!(seen.insert(PacketId::new(i.to_string())));
        }
        assert!(!seen.insert(PacketId::from("0")));
        assert_eq!(seen.len(), 10_000);
    }

    #[test]
    fn bounded_capacity_evicts_oldest() {
        let policy = SeenPolicy::Bounded { capacity: Some(2), ttl: None };
        let mut seen = SeenSet::new(policy);
        assert_eq!(seen.policy(), policy);

        seen.insert(PacketId::from("a"));
        seen.insert(PacketId::from("b"));
        // A lookup does not make "a" recent again.
        assert!(seen.contains(&PacketId::from("a")));
        seen.insert(PacketId::from("c"));

        assert!(!seen.contains(&PacketId::from("a")));
        assert!(seen.contains(&PacketId::from("b")));
        assert!(seen.contains(&PacketId::from("c")));
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn bounded_ttl_expires_by_age() {
        let mut seen = SeenSet::new(SeenPolicy::Bounded {
            capacity: Some(100),
            ttl: Some(Duration::from_secs(10)),
        });
        let start = Instant::now();

        assert!(seen.insert_at(PacketId::from("old"), start));
        assert!(!seen.insert_at(PacketId::from("old"), start + Duration::from_secs(5)));

        // Expired ids are forgotten and may be processed again.
        assert!(seen.insert_at(PacketId::from("old"), start + Duration::from_secs(11)));
        assert_eq!(seen.len(), 1);
    }

    #[test]
    fn expired_id_is_not_seen_without_another_insert() {
        let mut seen = SeenSet::new(SeenPolicy::Bounded {
            capacity: None,
            ttl: Some(Duration::from_secs(10)),
        });
        let start = Instant::now();
        seen.insert_at(PacketId::from("p"), start);

        assert!(seen.contains_at(&PacketId::from("p"), start + Duration::from_secs(9)));
        assert!(!seen.contains_at(&PacketId::from("p"), start + Duration::from_secs(10)));
    }

    #[test]
    fn zero_capacity_still_remembers_the_latest_id() {
        let mut seen = SeenSet::new(SeenPolicy::Bounded { capacity: Some(0), ttl: None });

        assert!(seen.insert(PacketId::from("a")));
        assert!(!seen.insert(PacketId::from("a")));
        assert_eq!(seen.len(), 1);
    }
}
