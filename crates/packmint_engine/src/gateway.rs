//! # External Collaborators
//!
//! The engine decides *which* items a bundle yields. Two collaborators do the
//! rest:
//!
//! - [`RandomnessCoordinator`]: accepts randomness requests and later calls
//!   back through `DistributionEngine::fulfill`.
//! - [`MintGateway`]: the token ledger that records issuance.
//!
//! ## Mint Transactions
//!
//! A bundle is minted through a [`MintTransaction`]. If a later mint fails,
//! or the transaction is dropped without `commit()`, every mint already
//! applied is revoked in reverse order. A bundle is either fully minted or
//! not at all.
//!
//! ```text
//! begin ──> mint(a) ──> mint(b) ──> mint(c) ✗
//!                                      │
//!              revoke(b) <── revoke(a) <┘
//! ```

use alloy_primitives::{Address, U256};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::catalog::ItemId;
use crate::error::{DistributionError, DistributionResult};

/// A mint or revoke refused by the token ledger.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct MintFailed {
    /// Ledger-provided reason.
    pub reason: String,
}

impl MintFailed {
    /// Creates a failure with a reason.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// A randomness request the coordinator could not accept.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("randomness request failed: {reason}")]
pub struct RandomnessRequestFailed {
    /// Coordinator-provided reason.
    pub reason: String,
}

/// Source of verifiable randomness with a deferred callback.
pub trait RandomnessCoordinator: Send + Sync {
    /// Requests `num_words` random words and returns the request id the
    /// coordinator will call back with.
    ///
    /// # Errors
    ///
    /// Returns [`RandomnessRequestFailed`] if the request was not accepted.
    fn request_randomness(&self, num_words: u32) -> Result<U256, RandomnessRequestFailed>;
}

/// The token ledger that records issuance.
pub trait MintGateway: Send + Sync {
    /// Mints `quantity` units of `item` to `recipient`.
    ///
    /// # Errors
    ///
    /// Returns [`MintFailed`] if the ledger refuses the mint.
    fn mint(&self, recipient: Address, item: ItemId, quantity: u32) -> Result<(), MintFailed>;

    /// Reverses a mint applied earlier in the same bundle.
    ///
    /// # Errors
    ///
    /// Returns [`MintFailed`] if the ledger refuses the revoke.
    fn revoke(&self, recipient: Address, item: ItemId, quantity: u32) -> Result<(), MintFailed>;
}

impl<T: RandomnessCoordinator + ?Sized> RandomnessCoordinator for Arc<T> {
    fn request_randomness(&self, num_words: u32) -> Result<U256, RandomnessRequestFailed> {
        (**self).request_randomness(num_words)
    }
}

impl<T: MintGateway + ?Sized> MintGateway for Arc<T> {
    fn mint(&self, recipient: Address, item: ItemId, quantity: u32) -> Result<(), MintFailed> {
        (**self).mint(recipient, item, quantity)
    }

    fn revoke(&self, recipient: Address, item: ItemId, quantity: u32) -> Result<(), MintFailed> {
        (**self).revoke(recipient, item, quantity)
    }
}

/// All-or-nothing group of mints for one recipient.
pub struct MintTransaction<'a, G: MintGateway + ?Sized> {
    /// The ledger.
    gateway: &'a G,
    /// Who receives the items.
    recipient: Address,
    /// Mints applied so far, in order.
    applied: Vec<(ItemId, u32)>,
    /// Whether this transaction has been committed or rolled back.
    finalized: bool,
}

impl<'a, G: MintGateway + ?Sized> MintTransaction<'a, G> {
    /// Begins a transaction.
    #[must_use]
    pub fn begin(gateway: &'a G, recipient: Address) -> Self {
        Self {
            gateway,
            recipient,
            applied: Vec::new(),
            finalized: false,
        }
    }

    /// Mints one entry of the bundle.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError::MintFailed`]. The caller should then
    /// roll back (or drop) the transaction.
    pub fn mint(&mut self, item_id: ItemId, quantity: u32) -> DistributionResult<()> {
        if self.finalized {
            return Err(DistributionError::InvariantViolation(
                "mint on a finalized transaction".to_string(),
            ));
        }
        self.gateway
            .mint(self.recipient, item_id, quantity)
            .map_err(|e| DistributionError::MintFailed {
                item_id,
                quantity,
                reason: e.reason,
            })?;
        self.applied.push((item_id, quantity));
        Ok(())
    }

    /// Number of mints applied so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.applied.len()
    }

    /// Returns true if nothing has been minted yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }

    /// Commits the transaction and returns what was minted.
    #[must_use]
    pub fn commit(mut self) -> Vec<(ItemId, u32)> {
        self.finalized = true;
        std::mem::take(&mut self.applied)
    }

    /// Revokes every applied mint in reverse order.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError::MintRollbackFailed`] for the first revoke
    /// the ledger refused. The remaining revokes are still attempted.
    pub fn rollback(mut self) -> DistributionResult<()> {
        self.revert()
    }

    fn revert(&mut self) -> DistributionResult<()> {
        self.finalized = true;
        let mut first_failure = None;
        while let Some((item_id, quantity)) = self.applied.pop() {
            if let Err(e) = self.gateway.revoke(self.recipient, item_id, quantity) {
                tracing::error!(
                    item_id,
                    quantity,
                    recipient = %self.recipient,
                    reason = %e.reason,
                    "revoke failed during bundle rollback"
                );
                first_failure.get_or_insert(DistributionError::MintRollbackFailed {
                    item_id,
                    quantity,
                    reason: e.reason,
                });
            }
        }
        first_failure.map_or(Ok(()), Err)
    }
}

impl<G: MintGateway + ?Sized> Drop for MintTransaction<'_, G> {
    fn drop(&mut self) {
        // If not finalized, auto-rollback
        if !self.finalized {
            let _ = self.revert();
        }
    }
}

/// In-memory token ledger.
///
/// Records balances per (owner, item). Used by tests, benches and local
/// simulations. A failure can be armed to make the Nth future mint fail.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    balances: Mutex<HashMap<(Address, ItemId), u64>>,
    /// Mints left before the armed failure triggers.
    fail_after: Mutex<Option<usize>>,
}

impl MemoryLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the mint after the next `successes` mints fail once.
    pub fn fail_after(&self, successes: usize) {
        *self.fail_after.lock() = Some(successes);
    }

    /// Balance of one item for one owner.
    #[must_use]
    pub fn balance_of(&self, owner: Address, item: ItemId) -> u64 {
        self.balances.lock().get(&(owner, item)).copied().unwrap_or(0)
    }

    /// Total units held by one owner.
    #[must_use]
    pub fn total_of(&self, owner: Address) -> u64 {
        self.balances
            .lock()
            .iter()
            .filter(|((holder, _), _)| *holder == owner)
            .map(|(_, balance)| *balance)
            .sum()
    }

    /// Total units held by everyone.
    #[must_use]
    pub fn total_supply(&self) -> u64 {
        self.balances.lock().values().sum()
    }
}

impl MintGateway for MemoryLedger {
    fn mint(&self, recipient: Address, item: ItemId, quantity: u32) -> Result<(), MintFailed> {
        {
            let mut fail_after = self.fail_after.lock();
            if let Some(left) = fail_after.as_mut() {
                if *left == 0 {
                    *fail_after = None;
                    return Err(MintFailed::new("ledger rejected mint"));
                }
                *left -= 1;
            }
        }
        *self.balances.lock().entry((recipient, item)).or_insert(0) += u64::from(quantity);
        Ok(())
    }

    fn revoke(&self, recipient: Address, item: ItemId, quantity: u32) -> Result<(), MintFailed> {
        let mut balances = self.balances.lock();
        let balance = balances
            .get_mut(&(recipient, item))
            .filter(|balance| **balance >= u64::from(quantity))
            .ok_or_else(|| MintFailed::new("revoke exceeds balance"))?;
        *balance -= u64::from(quantity);
        Ok(())
    }
}

/// In-memory coordinator that accepts every request and hands out ids
/// 1, 2, 3 and so on.
///
/// The words themselves are delivered by whoever drives the test, through
/// `DistributionEngine::fulfill`.
#[derive(Debug)]
pub struct SequentialCoordinator {
    next_id: AtomicU64,
    offline: AtomicBool,
    requests: Mutex<Vec<(U256, u32)>>,
}

impl Default for SequentialCoordinator {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            offline: AtomicBool::new(false),
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl SequentialCoordinator {
    /// Creates a coordinator whose first id is 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following request fail (or succeed again).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Release);
    }

    /// Every accepted request as (id, words requested), oldest first.
    #[must_use]
    pub fn requests(&self) -> Vec<(U256, u32)> {
        self.requests.lock().clone()
    }
}

impl RandomnessCoordinator for SequentialCoordinator {
    fn request_randomness(&self, num_words: u32) -> Result<U256, RandomnessRequestFailed> {
        if self.offline.load(Ordering::Acquire) {
            return Err(RandomnessRequestFailed {
                reason: "coordinator offline".to_string(),
            });
        }
        let id = U256::from(self.next_id.fetch_add(1, Ordering::AcqRel));
        self.requests.lock().push((id, num_words));
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> Address {
        Address::repeat_byte(0xAA)
    }

    #[test]
    fn test_commit_keeps_mints() {
        let ledger = MemoryLedger::new();
        let mut txn = MintTransaction::begin(&ledger, owner());
        txn.mint(1, 3).unwrap();
        txn.mint(2, 1).unwrap();

        assert_eq!(txn.commit(), vec![(1, 3), (2, 1)]);
        assert_eq!(ledger.balance_of(owner(), 1), 3);
        assert_eq!(ledger.total_of(owner()), 4);
    }

    #[test]
    fn test_failed_mint_rolls_back_everything() {
        let ledger = MemoryLedger::new();
        ledger.fail_after(2);

        let mut txn = MintTransaction::begin(&ledger, owner());
        txn.mint(1, 1).unwrap();
        txn.mint(2, 1).unwrap();
        let err = txn.mint(3, 1).unwrap_err();
        assert!(matches!(err, DistributionError::MintFailed { item_id: 3, .. }));

        txn.rollback().unwrap();
        assert_eq!(ledger.total_supply(), 0);
    }

    #[test]
    fn test_drop_without_commit_rolls_back() {
        let ledger = MemoryLedger::new();
        {
            let mut txn = MintTransaction::begin(&ledger, owner());
            txn.mint(1, 5).unwrap();
            assert_eq!(txn.len(), 1);
            // Drop without commit - should auto-rollback
        }
        assert_eq!(ledger.total_supply(), 0);
    }

    #[test]
    fn test_sequential_coordinator_ids() {
        let coordinator = SequentialCoordinator::new();
        assert_eq!(coordinator.request_randomness(15).unwrap(), U256::from(1));
        assert_eq!(coordinator.request_randomness(15).unwrap(), U256::from(2));

        coordinator.set_offline(true);
        assert!(coordinator.request_randomness(15).is_err());
        assert_eq!(coordinator.requests().len(), 2);
    }

    #[test]
    fn test_revoke_over_balance_fails() {
        let ledger = MemoryLedger::new();
        assert!(ledger.revoke(owner(), 1, 1).is_err());
    }
}
