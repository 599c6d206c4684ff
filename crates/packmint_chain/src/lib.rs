//! # PACKMINT Chain Bridge
//!
//! Connects the distribution engine to the randomness coordinator and the
//! card ledger.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐  RandomWordsFulfilled  ┌─────────────────────┐
//! │  Coordinator    │ ─────────────────────▶ │ FulfillmentListener │
//! │  Contract       │                        └──────────┬──────────┘
//! └─────────────────┘                                   │ fulfill()
//!         ▲                                             ▼
//!         │ requestRandomWords          ┌──────────────────────────┐
//!         └──────────────────────────── │    DistributionEngine    │
//!                                       └────────────┬─────────────┘
//!                                                    │ mint()
//!                                                    ▼
//!                                       ┌──────────────────────────┐
//!                                       │  LedgerOutbox (calldata) │
//!                                       └──────────────────────────┘
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod contracts;
pub mod error;
pub mod events;
pub mod listener;
pub mod outbox;
pub mod simulator;

pub use contracts::{ICardLedger, IRandomnessCoordinator};
pub use error::{BridgeError, BridgeResult};
pub use events::{
    encode_fulfilled, CardTransfer, CoordinatorEvent, EventParser, RandomnessFulfilled,
    RandomnessRequested,
};
pub use listener::{DispatchOutcome, DispatchReport, FulfillmentListener, ListenerConfig, ListenerStats};
pub use outbox::{LedgerCall, LedgerOutbox};
pub use simulator::SimulatedCoordinator;
