//! # Rarity Catalog
//!
//! Item-type registry partitioned by rarity tier.
//!
//! Each tier keeps its active items in registration order. Deactivating an
//! item takes it out of its tier list; reactivating it appends it again.
//! Registration is administrative and happens outside the hot path.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{DistributionError, DistributionResult};
use crate::rarity::Rarity;

/// Unique identifier for an item type.
pub type ItemId = u32;

/// An item type definition.
///
/// The live issuance count is owned by the supply registry, not by the
/// catalog.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDefinition {
    /// Unique identifier.
    pub id: ItemId,
    /// Display name.
    pub name: String,
    /// Rarity tier.
    pub rarity: Rarity,
    /// Hard issuance cap. 0 means unbounded.
    #[serde(default)]
    pub max_issuance: u64,
    /// Whether the item can currently be drawn.
    #[serde(default = "default_active")]
    pub active: bool,
}

const fn default_active() -> bool {
    true
}

impl ItemDefinition {
    /// Creates an active, unbounded item.
    #[must_use]
    pub fn new(id: ItemId, name: impl Into<String>, rarity: Rarity) -> Self {
        Self {
            id,
            name: name.into(),
            rarity,
            max_issuance: 0,
            active: true,
        }
    }

    /// Sets a hard issuance cap.
    #[must_use]
    pub const fn with_max_issuance(mut self, max_issuance: u64) -> Self {
        self.max_issuance = max_issuance;
        self
    }

    /// Sets the active flag.
    #[must_use]
    pub const fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Returns true if the item has no issuance cap.
    #[inline]
    #[must_use]
    pub const fn is_unbounded(&self) -> bool {
        self.max_issuance == 0
    }
}

/// Registry of item types by tier.
#[derive(Clone, Debug, Default)]
pub struct RarityCatalog {
    /// Every registered item, active or not.
    items: HashMap<ItemId, ItemDefinition>,
    /// Active items per tier, in registration order.
    tiers: [Vec<ItemId>; Rarity::COUNT],
}

impl RarityCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered items (active or not).
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Gets an item definition.
    #[must_use]
    pub fn get(&self, id: ItemId) -> Option<&ItemDefinition> {
        self.items.get(&id)
    }

    /// Returns true if the item is registered.
    #[must_use]
    pub fn contains(&self, id: ItemId) -> bool {
        self.items.contains_key(&id)
    }

    /// Iterates over every registered item in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &ItemDefinition> {
        self.items.values()
    }

    /// Active items of a tier, in registration order.
    #[inline]
    #[must_use]
    pub fn items_in_tier(&self, tier: Rarity) -> &[ItemId] {
        &self.tiers[tier.index()]
    }

    /// Returns true if the tier has no active item.
    #[inline]
    #[must_use]
    pub fn is_empty(&self, tier: Rarity) -> bool {
        self.tiers[tier.index()].is_empty()
    }

    /// Returns true if COMMON has at least one active item.
    ///
    /// COMMON items are always unbounded, so this is the whole floor check.
    #[must_use]
    pub fn has_common_floor(&self) -> bool {
        !self.is_empty(Rarity::Common)
    }

    /// Registers an item.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is taken or a COMMON item carries a cap.
    pub fn add_item(&mut self, item: ItemDefinition) -> DistributionResult<()> {
        if self.items.contains_key(&item.id) {
            return Err(DistributionError::DuplicateItem(item.id));
        }
        Self::check_common_unbounded(&item, item.rarity)?;

        if item.active {
            self.tiers[item.rarity.index()].push(item.id);
        }
        self.items.insert(item.id, item);
        Ok(())
    }

    /// Removes an item.
    ///
    /// # Errors
    ///
    /// Returns an error if the item is unknown or is the last active COMMON.
    pub fn remove_item(&mut self, id: ItemId) -> DistributionResult<ItemDefinition> {
        let item = self.items.get(&id).ok_or(DistributionError::ItemNotFound(id))?;
        if item.active {
            self.check_floor_survives(item)?;
        }

        let item = self
            .items
            .remove(&id)
            .ok_or(DistributionError::ItemNotFound(id))?;
        self.tiers[item.rarity.index()].retain(|other| *other != id);
        Ok(item)
    }

    /// Moves an item to another tier.
    ///
    /// # Errors
    ///
    /// Returns an error if the item is unknown, would leave COMMON empty, or
    /// would become a capped COMMON item.
    pub fn reassign_tier(&mut self, id: ItemId, tier: Rarity) -> DistributionResult<()> {
        let item = self.items.get(&id).ok_or(DistributionError::ItemNotFound(id))?;
        if item.rarity == tier {
            return Ok(());
        }
        Self::check_common_unbounded(item, tier)?;
        if item.active {
            self.check_floor_survives(item)?;
        }

        let old = item.rarity;
        let active = item.active;
        if active {
            self.tiers[old.index()].retain(|other| *other != id);
            self.tiers[tier.index()].push(id);
        }
        if let Some(item) = self.items.get_mut(&id) {
            item.rarity = tier;
        }
        Ok(())
    }

    /// Activates or deactivates an item.
    ///
    /// # Errors
    ///
    /// Returns an error if the item is unknown or deactivating it would leave
    /// COMMON empty.
    pub fn set_active(&mut self, id: ItemId, active: bool) -> DistributionResult<()> {
        let item = self.items.get(&id).ok_or(DistributionError::ItemNotFound(id))?;
        if item.active == active {
            return Ok(());
        }
        if !active {
            self.check_floor_survives(item)?;
        }

        let tier = item.rarity;
        if active {
            self.tiers[tier.index()].push(id);
        } else {
            self.tiers[tier.index()].retain(|other| *other != id);
        }
        if let Some(item) = self.items.get_mut(&id) {
            item.active = active;
        }
        Ok(())
    }

    /// Rejects taking the last active COMMON item out of COMMON.
    fn check_floor_survives(&self, item: &ItemDefinition) -> DistributionResult<()> {
        if item.rarity == Rarity::Common && self.tiers[Rarity::Common.index()].len() == 1 {
            return Err(DistributionError::ItemInUse {
                item_id: item.id,
                reason: "last active COMMON item".to_string(),
            });
        }
        Ok(())
    }

    fn check_common_unbounded(item: &ItemDefinition, tier: Rarity) -> DistributionResult<()> {
        if tier == Rarity::Common && !item.is_unbounded() {
            return Err(DistributionError::InvalidConfig(format!(
                "COMMON item {} must be unbounded, has max issuance {}",
                item.id, item.max_issuance
            )));
        }
        Ok(())
    }
}
