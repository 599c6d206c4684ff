//! # Supply Registry
//!
//! **Per-item issuance counters with atomic check-and-increment**
//!
//! Every unit ever issued passes through [`SupplyRegistry::try_reserve_n`].
//! Each item owns its own counter, so reservations on unrelated items never
//! contend. Reservations on the same item serialize on a compare-and-swap
//! loop: at most one caller wins each remaining unit.
//!
//! ## Guarantees
//!
//! 1. `current <= max` at every instant for capped items
//! 2. A failed reservation leaves the counter untouched
//! 3. Counters outlive catalog removal, so a re-registered id keeps its history

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::catalog::ItemId;
use crate::error::{DistributionError, DistributionResult};

/// Issuance counter for one item.
#[derive(Debug, Default)]
pub struct SupplyCounter {
    /// Units issued so far.
    current: AtomicU64,
    /// Hard cap. 0 means unbounded.
    max: AtomicU64,
}

impl SupplyCounter {
    fn new(max: u64) -> Self {
        Self {
            current: AtomicU64::new(0),
            max: AtomicU64::new(max),
        }
    }

    /// Units issued so far.
    #[inline]
    #[must_use]
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }

    /// Hard cap, 0 for unbounded.
    #[inline]
    #[must_use]
    pub fn max(&self) -> u64 {
        self.max.load(Ordering::Acquire)
    }

    /// Returns true if at least `n` more units can be issued.
    #[inline]
    #[must_use]
    pub fn can_issue_n(&self, n: u64) -> bool {
        let max = self.max();
        max == 0 || self.current().saturating_add(n) <= max
    }

    /// Atomically issues `n` units, or nothing.
    fn reserve(&self, n: u64) -> Result<u64, u64> {
        let max = self.max();
        self.current
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                let next = current.checked_add(n)?;
                (max == 0 || next <= max).then_some(next)
            })
            .map(|previous| previous + n)
            .map_err(|_| max)
    }

    /// Returns `n` units reserved by a rolled-back bundle.
    fn release(&self, n: u64) -> Result<(), u64> {
        self.current
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(n)
            })
            .map(|_| ())
    }
}

/// Snapshot of one item's supply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SupplySnapshot {
    /// Units issued so far.
    pub current: u64,
    /// Hard cap, 0 for unbounded.
    pub max: u64,
}

impl SupplySnapshot {
    /// Units left, or `None` when unbounded.
    #[must_use]
    pub const fn remaining(&self) -> Option<u64> {
        if self.max == 0 {
            None
        } else {
            Some(self.max.saturating_sub(self.current))
        }
    }
}

/// Registry of per-item issuance counters.
#[derive(Debug, Default)]
pub struct SupplyRegistry {
    counters: RwLock<HashMap<ItemId, Arc<SupplyCounter>>>,
}

impl SupplyRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a counter for an item, or updates the cap of a known one.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError::InvalidConfig`] if the new cap is below
    /// what the item has already issued.
    pub fn register(&self, item_id: ItemId, max_issuance: u64) -> DistributionResult<()> {
        let mut counters = self.counters.write();
        if let Some(counter) = counters.get(&item_id) {
            let current = counter.current();
            if max_issuance != 0 && max_issuance < current {
                return Err(DistributionError::InvalidConfig(format!(
                    "item {item_id} has issued {current}, cannot cap it at {max_issuance}"
                )));
            }
            counter.max.store(max_issuance, Ordering::Release);
            return Ok(());
        }
        counters.insert(item_id, Arc::new(SupplyCounter::new(max_issuance)));
        Ok(())
    }

    /// Shared handle to an item's counter.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError::ItemNotFound`] for an unregistered item.
    pub fn counter(&self, item_id: ItemId) -> DistributionResult<Arc<SupplyCounter>> {
        self.counters
            .read()
            .get(&item_id)
            .cloned()
            .ok_or(DistributionError::ItemNotFound(item_id))
    }

    /// Returns true if one more unit of the item can be issued.
    ///
    /// Unknown items cannot be issued.
    #[must_use]
    pub fn can_issue(&self, item_id: ItemId) -> bool {
        self.counter(item_id)
            .map(|counter| counter.can_issue_n(1))
            .unwrap_or(false)
    }

    /// Atomically issues one unit.
    ///
    /// # Errors
    ///
    /// See [`SupplyRegistry::try_reserve_n`].
    pub fn try_reserve(&self, item_id: ItemId) -> DistributionResult<u64> {
        self.try_reserve_n(item_id, 1)
    }

    /// Atomically issues `n` units of one item, all or nothing.
    ///
    /// Returns the issuance count after the reservation.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError::SupplyExhausted`] without touching the
    /// counter if fewer than `n` units remain, or
    /// [`DistributionError::ItemNotFound`] for an unregistered item.
    pub fn try_reserve_n(&self, item_id: ItemId, n: u64) -> DistributionResult<u64> {
        self.counter(item_id)?
            .reserve(n)
            .map_err(|max_issuance| DistributionError::SupplyExhausted {
                item_id,
                max_issuance,
            })
    }

    /// Returns `n` previously reserved units.
    ///
    /// Only used to roll back a bundle whose minting failed.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError::InvariantViolation`] if more units are
    /// released than were issued.
    pub fn release(&self, item_id: ItemId, n: u64) -> DistributionResult<()> {
        self.counter(item_id)?.release(n).map_err(|current| {
            DistributionError::InvariantViolation(format!(
                "release of {n} units of item {item_id} with only {current} issued"
            ))
        })
    }

    /// Current supply of an item.
    #[must_use]
    pub fn snapshot(&self, item_id: ItemId) -> Option<SupplySnapshot> {
        self.counters.read().get(&item_id).map(|counter| SupplySnapshot {
            current: counter.current(),
            max: counter.max(),
        })
    }

    /// Units issued so far for an item, 0 if unknown.
    #[must_use]
    pub fn current(&self, item_id: ItemId) -> u64 {
        self.snapshot(item_id).map_or(0, |snapshot| snapshot.current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_always_issues() {
        let registry = SupplyRegistry::new();
        registry.register(1, 0).unwrap();

        for expected in 1..=1000 {
            assert_eq!(registry.try_reserve(1).unwrap(), expected);
        }
        assert!(registry.can_issue(1));
        assert_eq!(registry.snapshot(1).unwrap().remaining(), None);
    }

    #[test]
    fn test_capped_item_stops_at_max() {
        let registry = SupplyRegistry::new();
        registry.register(7, 3).unwrap();

        for _ in 0..3 {
            registry.try_reserve(7).unwrap();
        }
        assert!(!registry.can_issue(7));
        assert_eq!(
            registry.try_reserve(7),
            Err(DistributionError::SupplyExhausted {
                item_id: 7,
                max_issuance: 3
            })
        );
        assert_eq!(registry.current(7), 3);
    }

    #[test]
    fn test_reserve_n_is_all_or_nothing() {
        let registry = SupplyRegistry::new();
        registry.register(2, 5).unwrap();

        registry.try_reserve_n(2, 3).unwrap();
        assert!(registry.try_reserve_n(2, 3).is_err());
        assert_eq!(registry.current(2), 3);
        registry.try_reserve_n(2, 2).unwrap();
        assert_eq!(registry.snapshot(2).unwrap().remaining(), Some(0));
    }

    #[test]
    fn test_release_returns_units() {
        let registry = SupplyRegistry::new();
        registry.register(3, 1).unwrap();

        registry.try_reserve(3).unwrap();
        registry.release(3, 1).unwrap();
        assert!(registry.can_issue(3));
        assert!(matches!(
            registry.release(3, 1),
            Err(DistributionError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_unknown_item() {
        let registry = SupplyRegistry::new();
        assert!(!registry.can_issue(99));
        assert_eq!(registry.try_reserve(99), Err(DistributionError::ItemNotFound(99)));
    }

    #[test]
    fn test_reregister_keeps_history() {
        let registry = SupplyRegistry::new();
        registry.register(4, 10).unwrap();
        registry.try_reserve_n(4, 6).unwrap();

        assert!(registry.register(4, 5).is_err());
        registry.register(4, 8).unwrap();
        assert_eq!(registry.snapshot(4), Some(SupplySnapshot { current: 6, max: 8 }));
    }

    #[test]
    fn test_concurrent_reservations_never_overissue() {
        let registry = SupplyRegistry::new();
        registry.register(5, 100).unwrap();

        let granted: u64 = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        let mut won = 0u64;
                        for _ in 0..50 {
                            if registry.try_reserve(5).is_ok() {
                                won += 1;
                            }
                        }
                        won
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(granted, 100);
        assert_eq!(registry.current(5), 100);
    }
}
