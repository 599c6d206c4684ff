//! # Distribution Error Types
//!
//! All errors that can leave the distribution engine.
//!
//! Local recoveries (tier fallback, candidate advance inside a tier) never
//! show up here. What does show up is either a refused request or a
//! structural violation.

use alloy_primitives::{Address, U256};
use thiserror::Error;

use crate::catalog::ItemId;

/// Errors that can occur in the distribution engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DistributionError {
    /// The emission cap is zero or not a multiple of the bundle size.
    #[error(
        "invalid emission cap {requested}: must be a non-zero multiple of {bundle_size} \
         (nearest valid: {})",
        nearest_caps(.suggested_lower, .suggested_higher)
    )]
    InvalidEmissionCap {
        /// The cap that was requested.
        requested: u64,
        /// The bundle size the cap must be a multiple of.
        bundle_size: u32,
        /// `floor(requested / bundle_size) * bundle_size`.
        suggested_lower: u64,
        /// `suggested_lower + bundle_size`, or `None` past `u64::MAX`.
        suggested_higher: Option<u64>,
    },

    /// The new cap is below what has already been issued.
    #[error("emission cap {requested} is below current emission {total_emission}")]
    CapBelowEmission {
        /// The cap that was requested.
        requested: u64,
        /// Units already issued through packs.
        total_emission: u64,
    },

    /// Opening another pack would cross the emission cap.
    #[error("emission cap reached: {total_emission}/{cap}, bundle of {bundle_size} refused")]
    EmissionCapReached {
        /// Units issued so far.
        total_emission: u64,
        /// The cap.
        cap: u64,
        /// Size of the refused bundle.
        bundle_size: u32,
    },

    /// An item has no remaining supply.
    #[error("supply exhausted for item {item_id}: {max_issuance} issued")]
    SupplyExhausted {
        /// The exhausted item.
        item_id: ItemId,
        /// Its hard cap.
        max_issuance: u64,
    },

    /// No pack request exists with this id.
    #[error("unknown request {0}")]
    UnknownRequest(U256),

    /// The pack request was already fulfilled.
    #[error("request {0} already fulfilled")]
    AlreadyFulfilled(U256),

    /// Another callback for this request is being processed right now.
    #[error("request {0} is being fulfilled by another callback")]
    FulfillmentInProgress(U256),

    /// The pack request expired and its emission was refunded.
    #[error("request {0} expired before fulfillment")]
    RequestExpired(U256),

    /// The callback did not come from the configured coordinator.
    #[error("unauthorized fulfillment caller {caller}")]
    Unauthorized {
        /// Address that attempted the callback.
        caller: Address,
    },

    /// The coordinator returned an id that is already tracked.
    #[error("coordinator reused request id {0}")]
    DuplicateRequestId(U256),

    /// The coordinator could not accept the randomness request.
    #[error("randomness unavailable: {0}")]
    RandomnessUnavailable(String),

    /// The callback delivered the wrong number of random words.
    #[error("expected {expected} random words, received {received}")]
    RandomnessLengthMismatch {
        /// Words the bundle needs.
        expected: usize,
        /// Words actually delivered.
        received: usize,
    },

    /// The mint gateway refused a mint. The whole bundle was rolled back.
    #[error("mint of item {item_id} x{quantity} failed: {reason}")]
    MintFailed {
        /// Item being minted.
        item_id: ItemId,
        /// Quantity being minted.
        quantity: u32,
        /// Gateway-provided reason.
        reason: String,
    },

    /// A compensating revoke failed while rolling back a bundle.
    #[error("rollback of item {item_id} x{quantity} failed: {reason}")]
    MintRollbackFailed {
        /// Item being revoked.
        item_id: ItemId,
        /// Quantity being revoked.
        quantity: u32,
        /// Gateway-provided reason.
        reason: String,
    },

    /// Item not found in the catalog.
    #[error("item not found: {0}")]
    ItemNotFound(ItemId),

    /// Item is registered but cannot currently be issued.
    #[error("item is inactive: {0}")]
    ItemInactive(ItemId),

    /// Item id already registered.
    #[error("item already registered: {0}")]
    DuplicateItem(ItemId),

    /// Item cannot be changed because something still depends on it.
    #[error("item {item_id} is in use: {reason}")]
    ItemInUse {
        /// The item.
        item_id: ItemId,
        /// What still references it.
        reason: String,
    },

    /// COMMON has no active unbounded item, so the fallback chain has no floor.
    #[error("COMMON tier has no active unbounded item")]
    CommonTierIncomplete,

    /// A tier threshold table is malformed.
    #[error("invalid tier table: {0}")]
    InvalidTierTable(String),

    /// Deck type not found.
    #[error("deck not found: {0}")]
    DeckNotFound(String),

    /// Deck name already registered.
    #[error("deck already registered: {0}")]
    DuplicateDeck(String),

    /// Deck exists but is not active.
    #[error("deck is inactive: {0}")]
    DeckInactive(String),

    /// Deck definition is malformed.
    #[error("invalid deck: {0}")]
    InvalidDeck(String),

    /// The set is locked against administrative changes.
    #[error("set is locked")]
    SetLocked,

    /// Locking requires at least one registered item.
    #[error("cannot lock an empty set")]
    EmptySet,

    /// A supply invariant that must hold structurally was broken.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Invalid configuration file.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for distribution operations.
pub type DistributionResult<T> = Result<T, DistributionError>;

#[allow(clippy::trivially_copy_pass_by_ref)]
fn nearest_caps(lower: &u64, higher: &Option<u64>) -> String {
    match higher {
        Some(higher) => format!("{lower} or {higher}"),
        None => lower.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_cap_message() {
        let err = DistributionError::InvalidEmissionCap {
            requested: 160,
            bundle_size: 15,
            suggested_lower: 150,
            suggested_higher: Some(165),
        };
        assert!(err.to_string().ends_with("(nearest valid: 150 or 165)"));

        let err = DistributionError::InvalidEmissionCap {
            requested: u64::MAX,
            bundle_size: 2,
            suggested_lower: u64::MAX - 1,
            suggested_higher: None,
        };
        assert!(err.to_string().ends_with(&format!("(nearest valid: {})", u64::MAX - 1)));
    }
}
