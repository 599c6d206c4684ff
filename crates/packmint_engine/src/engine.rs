//! # Distribution Engine
//!
//! The facade that wires every component together.
//!
//! ## The Pack Pipeline
//!
//! ```text
//! open_pack(requester)
//!   1. COMMON floor present?
//!   2. Emission: reserve one bundle          (refused -> EmissionCapReached)
//!   3. Coordinator: request bundle_size words
//!   4. Ledger: record Pending                 (failure -> emission released)
//!
//! ... later, on the coordinator's callback ...
//!
//! fulfill(caller, request_id, words)
//!   1. Caller is the coordinator?             (no -> Unauthorized)
//!   2. Ledger: claim the Pending request      (replay -> AlreadyFulfilled)
//!   3. Selector: resolve every slot, reserving supply
//!   4. Gateway: mint every slot in one transaction
//!   5. Ledger: mark Fulfilled
//!      Any failure in 3-4 releases supply, revokes mints and leaves the
//!      request Pending for a retry.
//! ```
//!
//! Deck opens skip all of this and go straight to the [`DeckBundler`].

use alloy_primitives::{Address, U256};
use parking_lot::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::catalog::{ItemDefinition, ItemId, RarityCatalog};
use crate::config::EngineConfig;
use crate::deck::{check_issuable, DeckBundler, DeckType};
use crate::emission::{EmissionController, EmissionSnapshot};
use crate::error::{DistributionError, DistributionResult};
use crate::gateway::{MintGateway, MintTransaction, RandomnessCoordinator};
use crate::ledger::{PackRequest, PackRequestLedger, RequestId};
use crate::rarity::{Rarity, TierTables};
use crate::selector::{release_slots, RaritySelector, ResolvedSlot};
use crate::supply::{SupplyRegistry, SupplySnapshot};

/// Current unix time in seconds.
#[must_use]
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}

/// Outcome of a fulfilled pack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackOpening {
    /// The request, now Fulfilled.
    pub request: PackRequest,
    /// How each slot resolved.
    pub slots: Vec<ResolvedSlot>,
}

impl PackOpening {
    /// Number of slots that fell back to a more common tier.
    #[must_use]
    pub fn fallbacks(&self) -> usize {
        self.slots.iter().filter(|slot| slot.fell_back()).count()
    }
}

/// An item definition together with its live issuance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemSnapshot {
    /// The definition.
    pub definition: ItemDefinition,
    /// Issued units and cap.
    pub supply: SupplySnapshot,
}

/// The scarcity-controlled distribution engine.
///
/// `C` requests randomness, `M` records issuance. Everything else lives here.
pub struct DistributionEngine<C, M> {
    /// Randomness source.
    coordinator: C,
    /// Token ledger.
    gateway: M,
    /// The only address allowed to deliver randomness.
    coordinator_address: Address,
    /// Items by tier.
    catalog: RwLock<RarityCatalog>,
    /// Per-item issuance counters.
    supply: SupplyRegistry,
    /// Lucky-slot and base thresholds.
    tables: RwLock<TierTables>,
    /// Global pack emission.
    emission: EmissionController,
    /// Pending and fulfilled pack requests.
    ledger: PackRequestLedger,
    /// Deck types and the set lock.
    decks: DeckBundler,
    /// Slot that may roll scarce tiers.
    lucky_slot: usize,
    /// Expiry window for Pending requests, if any.
    pending_ttl_secs: Option<u64>,
}

impl<C, M> std::fmt::Debug for DistributionEngine<C, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributionEngine")
            .field("coordinator_address", &self.coordinator_address)
            .field("emission", &self.emission.snapshot())
            .field("pending", &self.ledger.pending_count())
            .field("locked", &self.decks.is_locked())
            .finish_non_exhaustive()
    }
}

impl<C: RandomnessCoordinator, M: MintGateway> DistributionEngine<C, M> {
    /// Builds an engine from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns any error from [`EngineConfig::validate`].
    pub fn from_config(
        config: &EngineConfig,
        coordinator: C,
        gateway: M,
    ) -> DistributionResult<Self> {
        config.validate()?;

        let catalog = config.build_catalog()?;
        let supply = SupplyRegistry::new();
        for item in catalog.iter() {
            supply.register(item.id, item.max_issuance)?;
        }
        let decks = config.build_decks(&catalog)?;
        let emission = EmissionController::new(config.bundle_size, config.emission_cap)?;

        tracing::info!(
            items = catalog.item_count(),
            decks = config.decks.len(),
            bundle_size = config.bundle_size,
            emission_cap = config.emission_cap,
            "distribution engine ready"
        );

        Ok(Self {
            coordinator,
            gateway,
            coordinator_address: config.coordinator,
            catalog: RwLock::new(catalog),
            supply,
            tables: RwLock::new(config.tiers.clone()),
            emission,
            ledger: PackRequestLedger::new(),
            decks,
            lucky_slot: config.lucky_slot(),
            pending_ttl_secs: config.pending_ttl_secs,
        })
    }

    // =========================================================================
    // Packs
    // =========================================================================

    /// Opens a pack for `requester` and returns the coordinator's request id.
    ///
    /// # Errors
    ///
    /// - [`DistributionError::CommonTierIncomplete`] if COMMON has no active
    ///   item
    /// - [`DistributionError::EmissionCapReached`] if the bundle would cross
    ///   the cap
    /// - [`DistributionError::RandomnessUnavailable`] or
    ///   [`DistributionError::DuplicateRequestId`] from the coordinator, in
    ///   which case the emission reservation is returned
    pub fn open_pack(&self, requester: Address) -> DistributionResult<RequestId> {
        self.open_pack_at(requester, unix_now())
    }

    /// [`Self::open_pack`] with an explicit clock.
    ///
    /// # Errors
    ///
    /// See [`Self::open_pack`].
    pub fn open_pack_at(&self, requester: Address, now: u64) -> DistributionResult<RequestId> {
        if !self.catalog.read().has_common_floor() {
            return Err(DistributionError::CommonTierIncomplete);
        }

        let total_emission = self.emission.reserve()?;
        let bundle_size = self.emission.bundle_size();

        match self.ledger.open(&self.coordinator, requester, bundle_size, now) {
            Ok(id) => {
                tracing::info!(
                    request_id = %id,
                    requester = %requester,
                    total_emission,
                    "pack opened"
                );
                Ok(id)
            }
            Err(e) => {
                if let Err(release) = self.emission.release() {
                    tracing::error!(error = %release, "failed to return emission of a refused pack");
                }
                tracing::warn!(requester = %requester, error = %e, "pack open refused");
                Err(e)
            }
        }
    }

    /// Randomness callback: resolves and mints a Pending pack.
    ///
    /// # Errors
    ///
    /// - [`DistributionError::Unauthorized`] if `caller` is not the
    ///   coordinator
    /// - [`DistributionError::UnknownRequest`],
    ///   [`DistributionError::AlreadyFulfilled`],
    ///   [`DistributionError::RequestExpired`] or
    ///   [`DistributionError::FulfillmentInProgress`], all without effects
    /// - [`DistributionError::RandomnessLengthMismatch`] if the word count is
    ///   not the bundle size
    /// - [`DistributionError::MintFailed`] if the ledger refused a mint; the
    ///   bundle is rolled back and the request stays Pending
    pub fn fulfill(
        &self,
        caller: Address,
        request_id: RequestId,
        words: &[U256],
    ) -> DistributionResult<PackOpening> {
        if caller != self.coordinator_address {
            tracing::warn!(caller = %caller, request_id = %request_id, "unauthorized fulfillment");
            return Err(DistributionError::Unauthorized { caller });
        }

        let mut resolved = Vec::new();
        let outcome = self.ledger.fulfill(request_id, unix_now(), |request| {
            let slots = self.resolve_and_mint(request, words)?;
            let items = slots.iter().map(|slot| slot.item_id).collect();
            resolved = slots;
            Ok(items)
        });

        match outcome {
            Ok(request) => {
                let opening = PackOpening {
                    request,
                    slots: resolved,
                };
                tracing::info!(
                    request_id = %request_id,
                    requester = %opening.request.requester,
                    fallbacks = opening.fallbacks(),
                    "pack fulfilled"
                );
                Ok(opening)
            }
            Err(e) => {
                tracing::warn!(request_id = %request_id, error = %e, "fulfillment rejected");
                Err(e)
            }
        }
    }

    fn resolve_and_mint(
        &self,
        request: &PackRequest,
        words: &[U256],
    ) -> DistributionResult<Vec<ResolvedSlot>> {
        let expected = request.bundle_size as usize;
        if words.len() != expected {
            return Err(DistributionError::RandomnessLengthMismatch {
                expected,
                received: words.len(),
            });
        }

        let slots = {
            let catalog = self.catalog.read();
            let tables = self.tables.read();
            RaritySelector::new(&catalog, &self.supply, &tables, self.lucky_slot)
                .resolve_bundle(words)?
        };

        let mut txn = MintTransaction::begin(&self.gateway, request.requester);
        for slot in &slots {
            if let Err(e) = txn.mint(slot.item_id, 1) {
                let rollback = txn.rollback();
                release_slots(&self.supply, &slots);
                rollback?;
                return Err(e);
            }
        }
        let _minted = txn.commit();
        Ok(slots)
    }

    /// Expires Pending requests older than the configured TTL and returns
    /// their emission. Does nothing without a TTL.
    pub fn expire_stale_requests(&self, now: u64) -> Vec<RequestId> {
        let Some(ttl) = self.pending_ttl_secs else {
            return Vec::new();
        };

        let expired = self.ledger.expire_stale(now, ttl);
        for id in &expired {
            if let Err(e) = self.emission.release() {
                tracing::error!(request_id = %id, error = %e, "failed to refund expired request");
            }
        }
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), ttl_secs = ttl, "expired stale pack requests");
        }
        expired
    }

    // =========================================================================
    // Decks
    // =========================================================================

    /// Opens a deck and returns the (item, quantity) pairs minted.
    ///
    /// # Errors
    ///
    /// See [`DeckBundler::open_deck`].
    pub fn open_deck(
        &self,
        name: &str,
        requester: Address,
    ) -> DistributionResult<Vec<(ItemId, u32)>> {
        self.decks.open_deck(name, requester, &self.supply, &self.gateway)
    }

    // =========================================================================
    // Administration
    // =========================================================================

    /// Registers an item and its supply counter.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError::SetLocked`] after `lock_set`, or catalog
    /// and supply errors.
    pub fn add_item(&self, item: ItemDefinition) -> DistributionResult<()> {
        let mut catalog = self.catalog.write();
        self.ensure_unlocked()?;

        let mut staged = catalog.clone();
        staged.add_item(item.clone())?;
        self.supply.register(item.id, item.max_issuance)?;
        *catalog = staged;

        tracing::info!(item_id = item.id, name = %item.name, rarity = %item.rarity, "item added");
        Ok(())
    }

    /// Removes an item. Its issuance history is kept.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError::SetLocked`] after `lock_set`,
    /// [`DistributionError::ItemInUse`] while packs are Pending, while an
    /// active deck contains it, or if it is the last active COMMON.
    pub fn remove_item(&self, item_id: ItemId) -> DistributionResult<ItemDefinition> {
        let mut catalog = self.catalog.write();
        self.ensure_item_mutable(item_id)?;
        let removed = catalog.remove_item(item_id)?;
        tracing::info!(item_id, "item removed");
        Ok(removed)
    }

    /// Moves an item to another tier.
    ///
    /// # Errors
    ///
    /// Same as [`Self::remove_item`], plus
    /// [`DistributionError::InvalidConfig`] for a capped item moved to
    /// COMMON.
    pub fn reassign_tier(&self, item_id: ItemId, tier: Rarity) -> DistributionResult<()> {
        let mut catalog = self.catalog.write();
        self.ensure_item_mutable(item_id)?;
        catalog.reassign_tier(item_id, tier)?;
        tracing::info!(item_id, %tier, "item reassigned");
        Ok(())
    }

    /// Activates or deactivates an item.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError::SetLocked`] after `lock_set`; a
    /// deactivation also fails like [`Self::remove_item`].
    pub fn set_item_active(&self, item_id: ItemId, active: bool) -> DistributionResult<()> {
        let mut catalog = self.catalog.write();
        if active {
            self.ensure_unlocked()?;
        } else {
            self.ensure_item_mutable(item_id)?;
        }
        catalog.set_active(item_id, active)?;
        tracing::info!(item_id, active, "item activation changed");
        Ok(())
    }

    /// Replaces both tier tables at once.
    ///
    /// Thresholds are not part of the locked set and can still be tuned
    /// after `lock_set`.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError::InvalidTierTable`].
    pub fn set_tier_tables(&self, tables: TierTables) -> DistributionResult<()> {
        tables.validate()?;
        *self.tables.write() = tables;
        tracing::info!("tier tables replaced");
        Ok(())
    }

    /// Changes the emission cap.
    ///
    /// # Errors
    ///
    /// See [`EmissionController::set_cap`].
    pub fn set_emission_cap(&self, new_cap: u64) -> DistributionResult<()> {
        // Serializes with `lock_set`, which holds the write guard.
        let _catalog = self.catalog.read();
        self.ensure_unlocked()?;
        self.emission.set_cap(new_cap)?;
        tracing::info!(emission_cap = new_cap, "emission cap changed");
        Ok(())
    }

    /// Registers a deck type.
    ///
    /// # Errors
    ///
    /// See [`DeckBundler::add_deck_type`].
    pub fn add_deck_type(
        &self,
        name: &str,
        items: &[ItemId],
        quantities: &[u32],
        price: u128,
    ) -> DistributionResult<()> {
        let catalog = self.catalog.read();
        self.decks.add_deck_type(&catalog, name, items, quantities, price)?;
        tracing::info!(deck = name, entries = items.len(), "deck type added");
        Ok(())
    }

    /// Activates or deactivates a deck type.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError::ItemNotFound`] or
    /// [`DistributionError::ItemInactive`] when activating a deck whose item
    /// was removed or deactivated, or errors from [`DeckBundler::set_active`].
    pub fn set_deck_active(&self, name: &str, active: bool) -> DistributionResult<()> {
        let catalog = self.catalog.read();
        if active {
            let deck = self
                .decks
                .get(name)
                .ok_or_else(|| DistributionError::DeckNotFound(name.to_string()))?;
            for entry in &deck.entries {
                check_issuable(&catalog, entry.item_id)?;
            }
        }
        self.decks.set_active(name, active)?;
        tracing::info!(deck = name, active, "deck activation changed");
        Ok(())
    }

    /// Locks the set: no more item, deck or cap changes.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError::EmptySet`] without items,
    /// [`DistributionError::CommonTierIncomplete`] without an active COMMON
    /// item, or [`DistributionError::SetLocked`] if already locked.
    pub fn lock_set(&self) -> DistributionResult<()> {
        let catalog = self.catalog.write();
        if catalog.item_count() > 0 && !catalog.has_common_floor() {
            return Err(DistributionError::CommonTierIncomplete);
        }
        self.decks.lock_set(catalog.item_count())?;
        self.emission.lock();
        tracing::info!(items = catalog.item_count(), "set locked");
        Ok(())
    }

    fn ensure_unlocked(&self) -> DistributionResult<()> {
        if self.decks.is_locked() {
            return Err(DistributionError::SetLocked);
        }
        Ok(())
    }

    fn ensure_item_mutable(&self, item_id: ItemId) -> DistributionResult<()> {
        self.ensure_unlocked()?;
        let pending = self.ledger.pending_count();
        if pending > 0 {
            return Err(DistributionError::ItemInUse {
                item_id,
                reason: format!("{pending} pack requests pending"),
            });
        }
        if self.decks.references_item(item_id) {
            return Err(DistributionError::ItemInUse {
                item_id,
                reason: "contained in an active deck".to_string(),
            });
        }
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Item definition and live issuance.
    #[must_use]
    pub fn item(&self, item_id: ItemId) -> Option<ItemSnapshot> {
        let definition = self.catalog.read().get(item_id).cloned()?;
        let supply = self.supply.snapshot(item_id)?;
        Some(ItemSnapshot { definition, supply })
    }

    /// Active items of a tier, in registration order.
    #[must_use]
    pub fn items_in_tier(&self, tier: Rarity) -> Vec<ItemId> {
        self.catalog.read().items_in_tier(tier).to_vec()
    }

    /// Units reserved by packs so far.
    #[must_use]
    pub fn total_emission(&self) -> u64 {
        self.emission.total_emission()
    }

    /// The emission cap.
    #[must_use]
    pub fn emission_cap(&self) -> u64 {
        self.emission.emission_cap()
    }

    /// Packs that can still be opened.
    #[must_use]
    pub fn remaining_packs(&self) -> u64 {
        self.emission.snapshot().remaining_packs()
    }

    /// Full emission counter state.
    #[must_use]
    pub fn emission(&self) -> EmissionSnapshot {
        self.emission.snapshot()
    }

    /// Snapshot of a pack request.
    #[must_use]
    pub fn request(&self, request_id: RequestId) -> Option<PackRequest> {
        self.ledger.get(request_id)
    }

    /// Every request of one requester, oldest first.
    #[must_use]
    pub fn requests_of(&self, requester: Address) -> Vec<PackRequest> {
        self.ledger.requests_of(requester)
    }

    /// Number of Pending requests.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.ledger.pending_count()
    }

    /// Snapshot of a deck type.
    #[must_use]
    pub fn deck(&self, name: &str) -> Option<DeckType> {
        self.decks.get(name)
    }

    /// Deck names in registration order.
    #[must_use]
    pub fn deck_names(&self) -> Vec<String> {
        self.decks.names()
    }

    /// Current tier tables.
    #[must_use]
    pub fn tier_tables(&self) -> TierTables {
        self.tables.read().clone()
    }

    /// Returns true once the set is locked.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.decks.is_locked()
    }

    /// Slots per pack.
    #[must_use]
    pub fn bundle_size(&self) -> u32 {
        self.emission.bundle_size()
    }

    /// Slot allowed to roll scarce tiers.
    #[must_use]
    pub const fn lucky_slot(&self) -> usize {
        self.lucky_slot
    }

    /// The only address allowed to call [`Self::fulfill`].
    #[must_use]
    pub const fn coordinator_address(&self) -> Address {
        self.coordinator_address
    }

    /// The randomness coordinator.
    #[must_use]
    pub const fn coordinator(&self) -> &C {
        &self.coordinator
    }

    /// The token ledger.
    #[must_use]
    pub const fn gateway(&self) -> &M {
        &self.gateway
    }
}
