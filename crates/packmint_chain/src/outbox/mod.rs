//! # Card Ledger Outbox
//!
//! A [`MintGateway`] that turns engine mints into `ICardLedger` calldata.
//!
//! The engine decides the items; a relayer picks up the encoded calls from
//! the outbox and submits them. A revoke of a mint still in the outbox
//! cancels it instead of queueing a burn.

use alloy_primitives::{Address, U256};
use alloy_sol_types::SolCall;
use parking_lot::Mutex;

use packmint_engine::{ItemId, MintFailed, MintGateway};

use crate::contracts::ICardLedger;

/// One queued ledger call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedgerCall {
    /// `mint(to, id, amount)`.
    Mint {
        /// Recipient.
        to: Address,
        /// Card id.
        item: ItemId,
        /// Units.
        amount: u32,
    },
    /// `burn(from, id, amount)`.
    Burn {
        /// Holder.
        from: Address,
        /// Card id.
        item: ItemId,
        /// Units.
        amount: u32,
    },
}

impl LedgerCall {
    /// ABI-encoded calldata for the card ledger.
    #[must_use]
    pub fn calldata(&self) -> Vec<u8> {
        match *self {
            Self::Mint { to, item, amount } => ICardLedger::mintCall {
                to,
                id: U256::from(item),
                amount: U256::from(amount),
            }
            .abi_encode(),
            Self::Burn { from, item, amount } => ICardLedger::burnCall {
                from,
                id: U256::from(item),
                amount: U256::from(amount),
            }
            .abi_encode(),
        }
    }
}

/// Queue of ledger calls waiting for a relayer.
#[derive(Debug)]
pub struct LedgerOutbox {
    calls: Mutex<Vec<LedgerCall>>,
    capacity: usize,
}

impl LedgerOutbox {
    /// Creates an outbox that refuses mints once `capacity` calls are queued.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            capacity,
        }
    }

    /// Number of queued calls.
    #[must_use]
    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.lock().is_empty()
    }

    /// Takes every queued call, oldest first.
    #[must_use]
    pub fn drain(&self) -> Vec<LedgerCall> {
        std::mem::take(&mut *self.calls.lock())
    }
}

impl MintGateway for LedgerOutbox {
    fn mint(&self, recipient: Address, item: ItemId, quantity: u32) -> Result<(), MintFailed> {
        let mut calls = self.calls.lock();
        if calls.len() >= self.capacity {
            return Err(MintFailed::new(format!("outbox full ({} calls)", self.capacity)));
        }
        calls.push(LedgerCall::Mint {
            to: recipient,
            item,
            amount: quantity,
        });
        Ok(())
    }

    fn revoke(&self, recipient: Address, item: ItemId, quantity: u32) -> Result<(), MintFailed> {
        let mut calls = self.calls.lock();
        let queued = LedgerCall::Mint {
            to: recipient,
            item,
            amount: quantity,
        };
        if let Some(index) = calls.iter().rposition(|call| *call == queued) {
            calls.remove(index);
        } else {
            calls.push(LedgerCall::Burn {
                from: recipient,
                item,
                amount: quantity,
            });
        }
        Ok(())
    }
}
