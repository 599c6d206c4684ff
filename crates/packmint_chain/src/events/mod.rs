//! # Coordinator and Ledger Events
//!
//! Event types and parsing for raw logs. Parsing reads straight from the
//! ABI-encoded bytes.

use alloy_primitives::{Address, U256};
use alloy_sol_types::SolEvent;

use crate::contracts::{ICardLedger, IRandomnessCoordinator};

/// ABI word size.
const WORD: usize = 32;

/// Events the bridge cares about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CoordinatorEvent {
    /// A consumer asked for randomness.
    Requested(RandomnessRequested),
    /// The coordinator delivered randomness.
    Fulfilled(RandomnessFulfilled),
}

/// `RandomWordsRequested` data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RandomnessRequested {
    /// Coordinator-issued id.
    pub request_id: U256,
    /// Contract that asked.
    pub consumer: Address,
    /// Words requested.
    pub num_words: u32,
    /// Block where this occurred.
    pub block_number: u64,
}

/// `RandomWordsFulfilled` data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RandomnessFulfilled {
    /// Coordinator-issued id.
    pub request_id: U256,
    /// The delivered words, one per slot.
    pub words: Vec<U256>,
    /// Block where this occurred.
    pub block_number: u64,
    /// Log index within the block.
    pub log_index: u32,
}

/// `TransferSingle` data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CardTransfer {
    /// Account that triggered the transfer.
    pub operator: Address,
    /// Previous holder. Zero for mints.
    pub from: Address,
    /// New holder. Zero for burns.
    pub to: Address,
    /// Card id.
    pub id: U256,
    /// Units moved.
    pub value: U256,
    /// Block where this occurred.
    pub block_number: u64,
}

impl CardTransfer {
    /// Returns true for a mint.
    #[must_use]
    pub fn is_mint(&self) -> bool {
        self.from == Address::ZERO
    }

    /// Returns true for a burn.
    #[must_use]
    pub fn is_burn(&self) -> bool {
        self.to == Address::ZERO
    }
}

/// Event parser for raw log data.
pub struct EventParser;

impl EventParser {
    /// Parses a `RandomWordsFulfilled` log.
    ///
    /// Returns `None` for another event, a missing topic or a malformed
    /// word array.
    #[must_use]
    pub fn parse_fulfilled(
        topics: &[[u8; 32]],
        data: &[u8],
        block_number: u64,
        log_index: u32,
    ) -> Option<RandomnessFulfilled> {
        // Event sig + requestId = 2
        if topics.len() < 2
            || topics[0] != IRandomnessCoordinator::RandomWordsFulfilled::SIGNATURE_HASH.0
        {
            return None;
        }
        let request_id = U256::from_be_slice(&topics[1]);

        // Layout: offset(32) | length(32) | word[0](32) | ... | word[n-1](32)
        let offset = read_usize(data, 0)?;
        let len = read_usize(data, offset)?;
        let start = offset.checked_add(WORD)?;
        let end = len.checked_mul(WORD)?.checked_add(start)?;
        if data.len() < end {
            return None;
        }
        let words = data[start..end]
            .chunks_exact(WORD)
            .map(U256::from_be_slice)
            .collect();

        Some(RandomnessFulfilled {
            request_id,
            words,
            block_number,
            log_index,
        })
    }

    /// Parses a `RandomWordsRequested` log.
    #[must_use]
    pub fn parse_requested(
        topics: &[[u8; 32]],
        data: &[u8],
        block_number: u64,
    ) -> Option<RandomnessRequested> {
        // Event sig + requestId + consumer = 3
        if topics.len() < 3
            || topics[0] != IRandomnessCoordinator::RandomWordsRequested::SIGNATURE_HASH.0
            || data.len() < WORD
        {
            return None;
        }

        let request_id = U256::from_be_slice(&topics[1]);
        let consumer = Address::from_slice(&topics[2][12..32]);
        let num_words = u32::from_be_bytes([data[28], data[29], data[30], data[31]]);

        Some(RandomnessRequested {
            request_id,
            consumer,
            num_words,
            block_number,
        })
    }

    /// Parses a `TransferSingle` log from the card ledger.
    #[must_use]
    pub fn parse_transfer_single(
        topics: &[[u8; 32]],
        data: &[u8],
        block_number: u64,
    ) -> Option<CardTransfer> {
        // Event sig + operator + from + to = 4
        if topics.len() < 4
            || topics[0] != ICardLedger::TransferSingle::SIGNATURE_HASH.0
            || data.len() < 2 * WORD
        {
            return None;
        }

        Some(CardTransfer {
            operator: Address::from_slice(&topics[1][12..32]),
            from: Address::from_slice(&topics[2][12..32]),
            to: Address::from_slice(&topics[3][12..32]),
            id: U256::from_be_slice(&data[..WORD]),
            value: U256::from_be_slice(&data[WORD..2 * WORD]),
            block_number,
        })
    }

    /// Parses any log the bridge understands.
    #[must_use]
    pub fn parse(
        topics: &[[u8; 32]],
        data: &[u8],
        block_number: u64,
        log_index: u32,
    ) -> Option<CoordinatorEvent> {
        if let Some(fulfilled) = Self::parse_fulfilled(topics, data, block_number, log_index) {
            return Some(CoordinatorEvent::Fulfilled(fulfilled));
        }
        Self::parse_requested(topics, data, block_number).map(CoordinatorEvent::Requested)
    }
}

/// Encodes a `RandomWordsFulfilled` log as (topics, data).
#[must_use]
pub fn encode_fulfilled(request_id: U256, words: &[U256]) -> (Vec<[u8; 32]>, Vec<u8>) {
    let topics = vec![
        IRandomnessCoordinator::RandomWordsFulfilled::SIGNATURE_HASH.0,
        request_id.to_be_bytes::<32>(),
    ];

    let mut data = Vec::with_capacity((2 + words.len()) * WORD);
    data.extend_from_slice(&U256::from(WORD).to_be_bytes::<32>());
    data.extend_from_slice(&U256::from(words.len()).to_be_bytes::<32>());
    for word in words {
        data.extend_from_slice(&word.to_be_bytes::<32>());
    }
    (topics, data)
}

/// Reads a 32-byte big-endian word at `at` as a usize, if it fits.
fn read_usize(data: &[u8], at: usize) -> Option<usize> {
    let word = data.get(at..at.checked_add(WORD)?)?;
    if word[..24].iter().any(|byte| *byte != 0) {
        return None;
    }
    let mut tail = [0u8; 8];
    tail.copy_from_slice(&word[24..]);
    usize::try_from(u64::from_be_bytes(tail)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fulfilled_round_trip() {
        let words = vec![U256::from(7), U256::MAX, U256::ZERO];
        let (topics, data) = encode_fulfilled(U256::from(42), &words);

        let parsed = EventParser::parse_fulfilled(&topics, &data, 100, 3).unwrap();

        assert_eq!(parsed.request_id, U256::from(42));
        assert_eq!(parsed.words, words);
        assert_eq!(parsed.block_number, 100);
        assert_eq!(parsed.log_index, 3);
    }

    #[test]
    fn test_fulfilled_rejects_truncated_data() {
        let (topics, data) = encode_fulfilled(U256::from(1), &[U256::from(1), U256::from(2)]);

        assert!(EventParser::parse_fulfilled(&topics, &data[..data.len() - 1], 1, 0).is_none());
        assert!(EventParser::parse_fulfilled(&topics[..1], &data, 1, 0).is_none());
    }

    #[test]
    fn test_fulfilled_rejects_other_signature() {
        let (mut topics, data) = encode_fulfilled(U256::from(1), &[U256::from(1)]);
        topics[0] = [0xAB; 32];
        assert!(EventParser::parse_fulfilled(&topics, &data, 1, 0).is_none());
    }

    #[test]
    fn test_parse_requested() {
        let mut consumer = [0u8; 32];
        consumer[12..].copy_from_slice(Address::repeat_byte(0x22).as_slice());
        let topics = [
            IRandomnessCoordinator::RandomWordsRequested::SIGNATURE_HASH.0,
            U256::from(9).to_be_bytes::<32>(),
            consumer,
        ];
        let data = U256::from(15).to_be_bytes::<32>();

        let event = EventParser::parse(&topics, &data, 5, 0).unwrap();
        assert_eq!(
            event,
            CoordinatorEvent::Requested(RandomnessRequested {
                request_id: U256::from(9),
                consumer: Address::repeat_byte(0x22),
                num_words: 15,
                block_number: 5,
            })
        );
    }

    #[test]
    fn test_parse_transfer_single_mint() {
        let mut to = [0u8; 32];
        to[12..].copy_from_slice(Address::repeat_byte(0x33).as_slice());
        let topics = [
            ICardLedger::TransferSingle::SIGNATURE_HASH.0,
            [0u8; 32],
            [0u8; 32],
            to,
        ];
        let mut data = U256::from(40).to_be_bytes::<32>().to_vec();
        data.extend_from_slice(&U256::from(1).to_be_bytes::<32>());

        let transfer = EventParser::parse_transfer_single(&topics, &data, 9).unwrap();
        assert!(transfer.is_mint());
        assert!(!transfer.is_burn());
        assert_eq!(transfer.to, Address::repeat_byte(0x33));
        assert_eq!(transfer.id, U256::from(40));
    }
}
