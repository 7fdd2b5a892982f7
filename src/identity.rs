//! Identity allocation for new entities

use crate::error::{Error, Result};
use dashmap::DashMap;

/// Hands out numeric entity identities, one independent sequence per
/// entity kind
pub trait IdentityAllocator: Send + Sync {
    /// Next identity for `kind`
    fn next_id(&self, kind: &str) -> Result<i64>;

    /// Reserve `count` consecutive identities for `kind`
    fn next_ids(&self, kind: &str, count: usize) -> Result<Vec<i64>>;

    /// Make `value` the next identity handed out for `kind`
    fn reset(&self, kind: &str, value: i64);

    /// Make sure no identity at or below `id` is handed out for `kind`
    fn advance_past(&self, kind: &str, id: i64);
}

/// Default first identity of a fresh sequence
pub const DEFAULT_START: i64 = 1000;

/// Process-local sequences, safe to share across tasks
#[derive(Debug)]
pub struct InMemoryIdentityAllocator {
    start: i64,
    increment: i64,
    /// Next value per kind
    next: DashMap<String, i64>,
}

impl InMemoryIdentityAllocator {
    pub fn new(start: i64, increment: i64) -> Result<Self> {
        if increment <= 0 {
            return Err(Error::Configuration(format!(
                "identity increment must be positive, got {increment}"
            )));
        }
        Ok(Self {
            start,
            increment,
            next: DashMap::new(),
        })
    }

    /// Forget every sequence; each restarts from the configured start
    pub fn clear_all(&self) {
        self.next.clear();
    }

    fn reserve(&self, kind: &str, count: i64) -> Result<i64> {
        // The entry guard holds the shard lock, so reservations never interleave
        let mut next = self.next.entry(kind.to_string()).or_insert(self.start);
        let first = *next;
        *next = self
            .increment
            .checked_mul(count)
            .and_then(|step| first.checked_add(step))
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "identity sequence for {kind} exhausted at {first} (reserving {count})"
                ))
            })?;
        Ok(first)
    }
}

impl Default for InMemoryIdentityAllocator {
    fn default() -> Self {
        Self {
            start: DEFAULT_START,
            increment: 1,
            next: DashMap::new(),
        }
    }
}

impl IdentityAllocator for InMemoryIdentityAllocator {
    fn next_id(&self, kind: &str) -> Result<i64> {
        self.reserve(kind, 1)
    }

    fn next_ids(&self, kind: &str, count: usize) -> Result<Vec<i64>> {
        if count == 0 {
            return Err(Error::Configuration(
                "identity batch count must be positive".to_string(),
            ));
        }
        let count = i64::try_from(count).map_err(|_| {
            Error::Configuration(format!("identity batch of {count} is too large"))
        })?;
        let first = self.reserve(kind, count)?;
        Ok((0..count).map(|i| first + i * self.increment).collect())
    }

    fn reset(&self, kind: &str, value: i64) {
        self.next.insert(kind.to_string(), value);
    }

    fn advance_past(&self, kind: &str, id: i64) {
        let mut next = self.next.entry(kind.to_string()).or_insert(self.start);
        if *next <= id {
            *next = id.saturating_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_sequences_are_per_kind() {
        let ids = InMemoryIdentityAllocator::default();
        assert_eq!(ids.next_id("order").unwrap(), 1000);
        assert_eq!(ids.next_id("customer").unwrap(), 1000);
        assert_eq!(ids.next_id("order").unwrap(), 1001);
    }

    #[test]
    fn test_batches_and_increment() {
        let ids = InMemoryIdentityAllocator::new(1000, 5).unwrap();
        assert_eq!(ids.next_ids("order", 3).unwrap(), vec![1000, 1005, 1010]);
        assert_eq!(ids.next_id("order").unwrap(), 1015);
        assert!(matches!(ids.next_ids("order", 0), Err(Error::Configuration(_))));
        assert!(InMemoryIdentityAllocator::new(1, 0).is_err());
    }

    #[test]
    fn test_exhausted_sequence_is_an_error() {
        let ids = InMemoryIdentityAllocator::new(i64::MAX - 10, 4).unwrap();
        assert_eq!(ids.next_ids("order", 2).unwrap(), vec![i64::MAX - 10, i64::MAX - 6]);
        assert!(matches!(ids.next_ids("order", 2), Err(Error::Configuration(_))));
        assert!(matches!(ids.next_id("order"), Err(Error::Configuration(_))));

        let ids = InMemoryIdentityAllocator::new(1, i64::MAX / 2).unwrap();
        assert!(matches!(ids.next_ids("order", 3), Err(Error::Configuration(_))));
        assert_eq!(ids.next_id("order").unwrap(), 1);

        ids.advance_past("customer", i64::MAX);
        assert!(ids.next_id("customer").is_err());
    }

    #[test]
    fn test_reset_and_clear() {
        let ids = InMemoryIdentityAllocator::new(5000, 1).unwrap();
        assert_eq!(ids.next_id("order").unwrap(), 5000);
        ids.reset("order", 2000);
        assert_eq!(ids.next_id("order").unwrap(), 2000);
        ids.clear_all();
        assert_eq!(ids.next_id("order").unwrap(), 5000);

        ids.advance_past("order", 7000);
        assert_eq!(ids.next_id("order").unwrap(), 7001);
        ids.advance_past("order", 10);
        assert_eq!(ids.next_id("order").unwrap(), 7002);
    }

    #[test]
    fn test_concurrent_allocation_is_unique() {
        let ids = Arc::new(InMemoryIdentityAllocator::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ids = Arc::clone(&ids);
                std::thread::spawn(move || {
                    (0..100).map(|_| ids.next_id("order").unwrap()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 800);
        assert_eq!(seen.iter().min(), Some(&1000));
        assert_eq!(seen.iter().max(), Some(&1799));
    }
}
