//! # Deck Bundler
//!
//! **Fixed-composition bundles, resolved synchronously**
//!
//! A deck is a named list of (item, quantity) pairs. Opening one mints
//! exactly those quantities in a single call: no randomness, no request
//! ledger, no emission counter. Deck items still draw on their own supply
//! counters, so a capped item in a deck cannot be over-issued.
//!
//! The bundler also owns the set lock. Once locked, no items, deck types or
//! emission-cap changes are accepted, while pack and deck opening continue.

use alloy_primitives::Address;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::catalog::{ItemId, RarityCatalog};
use crate::error::{DistributionError, DistributionResult};
use crate::gateway::{MintGateway, MintTransaction};
use crate::supply::SupplyRegistry;

/// One line of a deck.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeckEntry {
    /// The item.
    pub item_id: ItemId,
    /// Units per deck.
    pub quantity: u32,
}

/// A fixed-composition deck.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeckType {
    /// Unique name.
    pub name: String,
    /// Contents, in definition order.
    pub entries: Vec<DeckEntry>,
    /// Sum of all quantities.
    pub total_cards: u64,
    /// Price in the smallest unit of the payment token.
    pub price: u128,
    /// Whether the deck can be opened.
    pub active: bool,
}

impl DeckType {
    /// Returns true if the deck contains the item.
    #[must_use]
    pub fn contains(&self, item_id: ItemId) -> bool {
        self.entries.iter().any(|entry| entry.item_id == item_id)
    }
}

/// Registry and opener of deck types.
#[derive(Debug, Default)]
pub struct DeckBundler {
    decks: RwLock<Vec<DeckType>>,
    locked: AtomicBool,
}

impl DeckBundler {
    /// Creates an empty, unlocked bundler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true once the set is locked.
    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    /// Registers a deck type.
    ///
    /// # Errors
    ///
    /// - [`DistributionError::SetLocked`] after `lock_set`
    /// - [`DistributionError::InvalidDeck`] for an empty name, empty or
    ///   mismatched inputs, zero quantities or a repeated item
    /// - [`DistributionError::ItemNotFound`] for an item not in the catalog
    /// - [`DistributionError::ItemInactive`] for a deactivated item
    /// - [`DistributionError::DuplicateDeck`] for a taken name
    pub fn add_deck_type(
        &self,
        catalog: &RarityCatalog,
        name: &str,
        items: &[ItemId],
        quantities: &[u32],
        price: u128,
    ) -> DistributionResult<()> {
        if self.is_locked() {
            return Err(DistributionError::SetLocked);
        }
        if name.trim().is_empty() {
            return Err(DistributionError::InvalidDeck("deck name is empty".to_string()));
        }
        if items.is_empty() {
            return Err(DistributionError::InvalidDeck(format!("deck {name} has no items")));
        }
        if items.len() != quantities.len() {
            return Err(DistributionError::InvalidDeck(format!(
                "deck {name} has {} items but {} quantities",
                items.len(),
                quantities.len()
            )));
        }

        let mut seen = HashSet::with_capacity(items.len());
        let mut entries = Vec::with_capacity(items.len());
        for (&item_id, &quantity) in items.iter().zip(quantities) {
            check_issuable(catalog, item_id)?;
            if quantity == 0 {
                return Err(DistributionError::InvalidDeck(format!(
                    "deck {name} has zero quantity for item {item_id}"
                )));
            }
            if !seen.insert(item_id) {
                return Err(DistributionError::InvalidDeck(format!(
                    "deck {name} lists item {item_id} twice"
                )));
            }
            entries.push(DeckEntry { item_id, quantity });
        }

        let mut decks = self.decks.write();
        if decks.iter().any(|deck| deck.name == name) {
            return Err(DistributionError::DuplicateDeck(name.to_string()));
        }
        let total_cards = entries.iter().map(|entry| u64::from(entry.quantity)).sum();
        decks.push(DeckType {
            name: name.to_string(),
            entries,
            total_cards,
            price,
            active: true,
        });
        Ok(())
    }

    /// Activates or deactivates a deck type.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError::SetLocked`] after `lock_set`, or
    /// [`DistributionError::DeckNotFound`].
    pub fn set_active(&self, name: &str, active: bool) -> DistributionResult<()> {
        if self.is_locked() {
            return Err(DistributionError::SetLocked);
        }
        let mut decks = self.decks.write();
        let deck = decks
            .iter_mut()
            .find(|deck| deck.name == name)
            .ok_or_else(|| DistributionError::DeckNotFound(name.to_string()))?;
        deck.active = active;
        Ok(())
    }

    /// Snapshot of a deck type.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<DeckType> {
        self.decks.read().iter().find(|deck| deck.name == name).cloned()
    }

    /// Deck names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.decks.read().iter().map(|deck| deck.name.clone()).collect()
    }

    /// Returns true if an active deck contains the item.
    #[must_use]
    pub fn references_item(&self, item_id: ItemId) -> bool {
        self.decks
            .read()
            .iter()
            .any(|deck| deck.active && deck.contains(item_id))
    }

    /// Opens a deck: reserves supply for every entry, then mints every entry
    /// with its exact quantity.
    ///
    /// All or nothing: if any reservation or mint fails, supply is released
    /// and applied mints are revoked.
    ///
    /// # Errors
    ///
    /// - [`DistributionError::DeckNotFound`] / [`DistributionError::DeckInactive`]
    /// - [`DistributionError::SupplyExhausted`] if a capped item cannot cover
    ///   its quantity
    /// - [`DistributionError::MintFailed`] if the ledger refuses a mint
    pub fn open_deck<G: MintGateway + ?Sized>(
        &self,
        name: &str,
        requester: Address,
        supply: &SupplyRegistry,
        gateway: &G,
    ) -> DistributionResult<Vec<(ItemId, u32)>> {
        let deck = self
            .get(name)
            .ok_or_else(|| DistributionError::DeckNotFound(name.to_string()))?;
        if !deck.active {
            return Err(DistributionError::DeckInactive(name.to_string()));
        }

        let mut reserved: Vec<DeckEntry> = Vec::with_capacity(deck.entries.len());
        for entry in &deck.entries {
            if let Err(e) = supply.try_reserve_n(entry.item_id, u64::from(entry.quantity)) {
                release_entries(supply, &reserved);
                return Err(e);
            }
            reserved.push(*entry);
        }

        let mut txn = MintTransaction::begin(gateway, requester);
        for entry in &deck.entries {
            if let Err(e) = txn.mint(entry.item_id, entry.quantity) {
                let rollback = txn.rollback();
                release_entries(supply, &reserved);
                rollback?;
                return Err(e);
            }
        }

        let minted = txn.commit();
        tracing::info!(
            deck = name,
            recipient = %requester,
            units = deck.total_cards,
            "deck opened"
        );
        Ok(minted)
    }

    /// Locks the set.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError::EmptySet`] if no item is registered, or
    /// [`DistributionError::SetLocked`] if already locked.
    pub fn lock_set(&self, item_count: usize) -> DistributionResult<()> {
        if item_count == 0 {
            return Err(DistributionError::EmptySet);
        }
        self.locked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| DistributionError::SetLocked)
    }
}

fn release_entries(supply: &SupplyRegistry, entries: &[DeckEntry]) {
    for entry in entries {
        if let Err(e) = supply.release(entry.item_id, u64::from(entry.quantity)) {
            tracing::error!(item_id = entry.item_id, error = %e, "failed to release deck supply");
        }
    }
}

/// Checks that a deck entry's item exists and is active.
///
/// # Errors
///
/// Returns [`DistributionError::ItemNotFound`] or
/// [`DistributionError::ItemInactive`].
pub fn check_issuable(catalog: &RarityCatalog, item_id: ItemId) -> DistributionResult<()> {
    match catalog.get(item_id) {
        None => Err(DistributionError::ItemNotFound(item_id)),
        Some(item) if !item.active => Err(DistributionError::ItemInactive(item_id)),
        Some(_) => Ok(()),
    }
}
