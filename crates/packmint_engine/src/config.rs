//! # Engine Configuration
//!
//! Loaded once at startup from TOML.
//!
//! ```toml
//! bundle_size = 15
//! emission_cap = 150
//! coordinator = "0x00000000000000000000000000000000000000c0"
//! pending_ttl_secs = 86400
//!
//! [tiers]
//! lucky = [{ tier = "serialized", min_roll_bp = 9500 }, { tier = "uncommon", min_roll_bp = 1000 }]
//! base = [{ tier = "uncommon", min_roll_bp = 7000 }]
//!
//! [[items]]
//! id = 1
//! name = "Squire"
//! rarity = "common"
//!
//! [[decks]]
//! name = "Starter"
//! entries = [{ item_id = 1, quantity = 3 }]
//! price = "250000000000000000000000"
//! ```
//!
//! TOML integers stop at `i64::MAX`, so a deck price above that is written
//! as a decimal string.

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::catalog::{ItemDefinition, RarityCatalog};
use crate::deck::{DeckBundler, DeckEntry};
use crate::emission::check_cap;
use crate::error::{DistributionError, DistributionResult};
use crate::rarity::TierTables;

/// One deck type as written in the config file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeckConfig {
    /// Unique name.
    pub name: String,
    /// Contents.
    pub entries: Vec<DeckEntry>,
    /// Price in the smallest unit of the payment token.
    #[serde(default, with = "price_format")]
    pub price: u128,
}

impl DeckConfig {
    /// Item ids, in entry order.
    #[must_use]
    pub fn item_ids(&self) -> Vec<u32> {
        self.entries.iter().map(|entry| entry.item_id).collect()
    }

    /// Quantities, in entry order.
    #[must_use]
    pub fn quantities(&self) -> Vec<u32> {
        self.entries.iter().map(|entry| entry.quantity).collect()
    }
}

/// Complete engine configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Slots per pack.
    pub bundle_size: u32,
    /// Slot allowed to roll scarce tiers. Defaults to the last slot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lucky_slot: Option<usize>,
    /// Cap on units issued through packs.
    pub emission_cap: u64,
    /// The only address allowed to deliver randomness.
    pub coordinator: Address,
    /// Seconds after which a Pending request may be expired and refunded.
    /// Without it, Pending requests wait forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_ttl_secs: Option<u64>,
    /// Lucky-slot and base tier tables.
    #[serde(default)]
    pub tiers: TierTables,
    /// Item catalog.
    #[serde(default)]
    pub items: Vec<ItemDefinition>,
    /// Deck types.
    #[serde(default)]
    pub decks: Vec<DeckConfig>,
}

impl EngineConfig {
    /// Creates a config with default tier tables and no items or decks.
    #[must_use]
    pub fn new(bundle_size: u32, emission_cap: u64, coordinator: Address) -> Self {
        Self {
            bundle_size,
            lucky_slot: None,
            emission_cap,
            coordinator,
            pending_ttl_secs: None,
            tiers: TierTables::default(),
            items: Vec::new(),
            decks: Vec::new(),
        }
    }

    /// Adds an item.
    #[must_use]
    pub fn with_item(mut self, item: ItemDefinition) -> Self {
        self.items.push(item);
        self
    }

    /// Sets the pending-request TTL.
    #[must_use]
    pub const fn with_pending_ttl(mut self, ttl_secs: u64) -> Self {
        self.pending_ttl_secs = Some(ttl_secs);
        self
    }

    /// Parses a config from TOML text and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError::InvalidConfig`] on a parse error, or any
    /// error from [`EngineConfig::validate`].
    pub fn from_toml_str(text: &str) -> DistributionResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| DistributionError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a config file.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError::InvalidConfig`] if the file cannot be
    /// read or parsed, or any error from [`EngineConfig::validate`].
    pub fn from_file(path: impl AsRef<Path>) -> DistributionResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            DistributionError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Serializes the config back to TOML.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError::InvalidConfig`] if serialization fails.
    pub fn to_toml_string(&self) -> DistributionResult<String> {
        toml::to_string(self).map_err(|e| DistributionError::InvalidConfig(e.to_string()))
    }

    /// Index of the lucky slot.
    #[must_use]
    pub fn lucky_slot(&self) -> usize {
        self.lucky_slot
            .unwrap_or_else(|| (self.bundle_size as usize).saturating_sub(1))
    }

    /// Checks every constructor-time invariant.
    ///
    /// # Errors
    ///
    /// - [`DistributionError::InvalidConfig`] for a zero bundle size, a lucky
    ///   slot outside the bundle or a zero TTL
    /// - [`DistributionError::InvalidEmissionCap`] for a bad cap
    /// - [`DistributionError::InvalidTierTable`] for malformed tables
    /// - [`DistributionError::CommonTierIncomplete`] without an active COMMON
    /// - catalog and deck errors for bad items or decks
    pub fn validate(&self) -> DistributionResult<()> {
        if self.bundle_size == 0 {
            return Err(DistributionError::InvalidConfig(
                "bundle_size must be at least 1".to_string(),
            ));
        }
        if self.lucky_slot() >= self.bundle_size as usize {
            return Err(DistributionError::InvalidConfig(format!(
                "lucky_slot {} is outside a bundle of {}",
                self.lucky_slot(),
                self.bundle_size
            )));
        }
        if self.pending_ttl_secs == Some(0) {
            return Err(DistributionError::InvalidConfig(
                "pending_ttl_secs must be positive".to_string(),
            ));
        }
        check_cap(self.emission_cap, self.bundle_size)?;
        self.tiers.validate()?;

        let catalog = self.build_catalog()?;
        self.build_decks(&catalog)?;
        Ok(())
    }

    /// Builds the catalog described by `items`.
    ///
    /// # Errors
    ///
    /// Returns catalog errors, or [`DistributionError::CommonTierIncomplete`]
    /// if items are listed but none of them is an active COMMON. An empty
    /// list is accepted so a set can be built through the admin surface.
    pub(crate) fn build_catalog(&self) -> DistributionResult<RarityCatalog> {
        let mut catalog = RarityCatalog::new();
        for item in &self.items {
            catalog.add_item(item.clone())?;
        }
        if !self.items.is_empty() && !catalog.has_common_floor() {
            return Err(DistributionError::CommonTierIncomplete);
        }
        Ok(catalog)
    }

    /// Builds the deck table described by `decks`.
    ///
    /// # Errors
    ///
    /// Returns deck errors from [`DeckBundler::add_deck_type`].
    pub(crate) fn build_decks(&self, catalog: &RarityCatalog) -> DistributionResult<DeckBundler> {
        let bundler = DeckBundler::new();
        for deck in &self.decks {
            bundler.add_deck_type(
                catalog,
                &deck.name,
                &deck.item_ids(),
                &deck.quantities(),
                deck.price,
            )?;
        }
        Ok(bundler)
    }
}

/// Deck prices as TOML integers when they fit, decimal strings otherwise.
mod price_format {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S: Serializer>(price: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        match i64::try_from(*price) {
            Ok(small) => serializer.serialize_i64(small),
            Err(_) => serializer.serialize_str(&price.to_string()),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        deserializer.deserialize_any(PriceVisitor)
    }

    struct PriceVisitor;

    impl Visitor<'_> for PriceVisitor {
        type Value = u128;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a non-negative integer or a decimal string")
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<u128, E> {
            u128::try_from(value).map_err(|_| E::custom(format!("negative price {value}")))
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<u128, E> {
            Ok(u128::from(value))
        }

        fn visit_u128<E: de::Error>(self, value: u128) -> Result<u128, E> {
            Ok(value)
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<u128, E> {
            value
                .parse()
                .map_err(|_| E::custom(format!("invalid price {value:?}")))
        }
    }
}
