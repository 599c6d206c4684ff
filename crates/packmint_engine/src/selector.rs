//! # Rarity Selector
//!
//! **Turns random words into concrete items, one slot at a time**
//!
//! Each slot consumes one 256-bit word:
//!
//! ```text
//! word = [ high 128 bits | low 128 bits ]
//!           item draw       tier roll (mod 10000)
//! ```
//!
//! ## Algorithm
//!
//! 1. Tier: the lucky slot rolls against the lucky table, every other slot
//!    against the base table.
//! 2. Item: `draw mod len(tier)` picks a starting candidate. If its supply is
//!    gone, the next candidate is tried (wrapping around).
//! 3. Fallback: if the whole tier is empty or exhausted, the next more common
//!    tier is tried, down to COMMON.
//!
//! COMMON is always non-empty and unbounded, so every slot resolves. The
//! selector holds no state of its own; the only side effect is the supply
//! reservation of the chosen item.

use alloy_primitives::U256;

use crate::catalog::{ItemId, RarityCatalog};
use crate::error::{DistributionError, DistributionResult};
use crate::rarity::{roll_bp, Rarity, TierTables};
use crate::supply::SupplyRegistry;

/// The two independent draws derived from one random word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotEntropy {
    /// Basis-point roll used for tier resolution.
    pub tier_roll: u16,
    /// Draw used to pick the starting candidate inside a tier.
    pub item_draw: u128,
}

impl SlotEntropy {
    /// Splits a word into its tier roll (low half) and item draw (high half).
    #[must_use]
    pub fn from_word(word: U256) -> Self {
        let limbs = word.as_limbs();
        let low = u128::from(limbs[0]) | (u128::from(limbs[1]) << 64);
        let high = u128::from(limbs[2]) | (u128::from(limbs[3]) << 64);
        Self {
            tier_roll: roll_bp(low),
            item_draw: high,
        }
    }

    /// Index of the first candidate in a tier of `len` items.
    #[inline]
    #[must_use]
    pub fn start_index(&self, len: usize) -> usize {
        // The remainder is below `len`, so it fits in usize.
        (self.item_draw % len as u128) as usize
    }
}

/// One resolved bundle slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedSlot {
    /// Position in the bundle.
    pub slot: usize,
    /// The item drawn. One unit of its supply is reserved.
    pub item_id: ItemId,
    /// Tier the roll selected.
    pub rolled: Rarity,
    /// Tier the item actually came from after fallback.
    pub resolved: Rarity,
}

impl ResolvedSlot {
    /// Returns true if the rolled tier could not be served.
    #[inline]
    #[must_use]
    pub fn fell_back(&self) -> bool {
        self.resolved != self.rolled
    }
}

/// Resolves bundle slots against a catalog and a supply registry.
#[derive(Clone, Copy, Debug)]
pub struct RaritySelector<'a> {
    catalog: &'a RarityCatalog,
    supply: &'a SupplyRegistry,
    tables: &'a TierTables,
    lucky_slot: usize,
}

impl<'a> RaritySelector<'a> {
    /// Creates a selector.
    #[must_use]
    pub const fn new(
        catalog: &'a RarityCatalog,
        supply: &'a SupplyRegistry,
        tables: &'a TierTables,
        lucky_slot: usize,
    ) -> Self {
        Self {
            catalog,
            supply,
            tables,
            lucky_slot,
        }
    }

    /// Tier selected for a slot by a roll, before any fallback.
    #[inline]
    #[must_use]
    pub fn tier_for_slot(&self, slot: usize, roll: u16) -> Rarity {
        if slot == self.lucky_slot {
            self.tables.lucky.resolve(roll)
        } else {
            self.tables.base.resolve(roll)
        }
    }

    /// Resolves one slot and reserves one unit of the chosen item.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError::InvariantViolation`] if every tier down
    /// to COMMON is empty or exhausted.
    pub fn resolve_slot(&self, slot: usize, word: U256) -> DistributionResult<ResolvedSlot> {
        let entropy = SlotEntropy::from_word(word);
        let rolled = self.tier_for_slot(slot, entropy.tier_roll);

        for tier in rolled.fallback_chain() {
            if let Some(item_id) = self.reserve_in_tier(tier, &entropy) {
                if tier != rolled {
                    tracing::debug!(slot, %rolled, resolved = %tier, item_id, "slot fell back");
                }
                return Ok(ResolvedSlot {
                    slot,
                    item_id,
                    rolled,
                    resolved: tier,
                });
            }
            tracing::debug!(slot, %tier, "tier empty or exhausted");
        }

        Err(DistributionError::InvariantViolation(format!(
            "slot {slot} could not resolve: every tier down to COMMON is exhausted"
        )))
    }

    /// Walks a tier from the drawn candidate, wrapping around, and reserves
    /// the first item that still has supply.
    fn reserve_in_tier(&self, tier: Rarity, entropy: &SlotEntropy) -> Option<ItemId> {
        let items = self.catalog.items_in_tier(tier);
        if items.is_empty() {
            return None;
        }

        let start = entropy.start_index(items.len());
        (0..items.len())
            .map(|offset| items[(start + offset) % items.len()])
            .find(|item_id| match self.supply.try_reserve(*item_id) {
                Ok(_) => true,
                Err(DistributionError::SupplyExhausted { .. }) => false,
                Err(e) => {
                    tracing::warn!(item_id, error = %e, "catalog item has no supply counter");
                    false
                }
            })
    }

    /// Resolves a whole bundle, one word per slot.
    ///
    /// On failure every reservation made for this bundle is released.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError::InvariantViolation`] if a slot cannot
    /// resolve at all.
    pub fn resolve_bundle(&self, words: &[U256]) -> DistributionResult<Vec<ResolvedSlot>> {
        let mut slots = Vec::with_capacity(words.len());
        for (slot, word) in words.iter().enumerate() {
            match self.resolve_slot(slot, *word) {
                Ok(resolved) => slots.push(resolved),
                Err(e) => {
                    release_slots(self.supply, &slots);
                    return Err(e);
                }
            }
        }
        Ok(slots)
    }
}

/// Returns the supply reserved by resolved slots.
pub fn release_slots(supply: &SupplyRegistry, slots: &[ResolvedSlot]) {
    for slot in slots {
        if let Err(e) = supply.release(slot.item_id, 1) {
            tracing::error!(item_id = slot.item_id, error = %e, "failed to release slot supply");
        }
    }
}
