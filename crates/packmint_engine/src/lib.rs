//! # PACKMINT Distribution Engine
//!
//! Scarcity-controlled pack and deck distribution.
//!
//! ## Design Principles
//!
//! 1. **Integer odds** - Tier thresholds are basis points, a roll is `random % 10000`
//! 2. **Scarcity through one slot** - Only the lucky slot may roll RARE and above
//! 3. **Every slot resolves** - Exhausted tiers fall back down to COMMON, which is unbounded
//! 4. **All-or-nothing bundles** - A pack or deck is fully minted or not at all
//! 5. **External configuration** - Catalog, tables and decks come from TOML
//!
//! ## Two Phases
//!
//! Opening a pack reserves emission and asks the randomness coordinator for
//! words. The pack is resolved later, when the coordinator calls
//! [`DistributionEngine::fulfill`]. Decks resolve in a single call.
//!
//! ## Example
//!
//! ```rust,ignore
//! use packmint_engine::{DistributionEngine, EngineConfig, MemoryLedger};
//!
//! let config = EngineConfig::from_file("config/starter_set.toml")?;
//! let engine = DistributionEngine::from_config(&config, coordinator, MemoryLedger::new())?;
//!
//! let request_id = engine.open_pack(buyer)?;
//! // ... coordinator delivers 15 words ...
//! let opening = engine.fulfill(config.coordinator, request_id, &words)?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]
#![allow(clippy::module_name_repetitions)]

pub mod catalog;
pub mod config;
pub mod deck;
pub mod emission;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod rarity;
pub mod selector;
pub mod supply;

pub use catalog::{ItemDefinition, ItemId, RarityCatalog};
pub use config::{DeckConfig, EngineConfig};
pub use deck::{DeckBundler, DeckEntry, DeckType};
pub use emission::{EmissionController, EmissionSnapshot};
pub use engine::{unix_now, DistributionEngine, ItemSnapshot, PackOpening};
pub use error::{DistributionError, DistributionResult};
pub use gateway::{
    MemoryLedger, MintFailed, MintGateway, MintTransaction, RandomnessCoordinator,
    RandomnessRequestFailed, SequentialCoordinator,
};
pub use ledger::{PackRequest, PackRequestLedger, RequestId, RequestStatus};
pub use rarity::{Rarity, TierTable, TierTables, TierThreshold, ROLL_PRECISION_BP};
pub use selector::{RaritySelector, ResolvedSlot, SlotEntropy};
pub use supply::{SupplyCounter, SupplyRegistry, SupplySnapshot};
