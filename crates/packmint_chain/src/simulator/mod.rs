//! # Simulated Coordinator
//!
//! A deterministic stand-in for the on-chain randomness coordinator.
//!
//! Requests are queued in arrival order and given sequential ids. Words
//! come from a seeded ChaCha20 stream, so a run with the same seed and the
//! same request order always yields the same packs.

use alloy_primitives::{Address, U256};
use parking_lot::Mutex;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use packmint_engine::{RandomnessCoordinator, RandomnessRequestFailed};

use crate::error::{BridgeError, BridgeResult};
use crate::events::{encode_fulfilled, RandomnessFulfilled};

/// A queued randomness request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct QueuedRequest {
    id: U256,
    num_words: u32,
}

/// Deterministic coordinator simulator.
#[derive(Debug)]
pub struct SimulatedCoordinator {
    /// Address the simulated callbacks come from.
    address: Address,
    /// Next request id.
    next_id: AtomicU64,
    /// Current simulated block.
    block_number: AtomicU64,
    /// When set, every request is refused.
    offline: AtomicBool,
    /// Requests waiting for words, oldest first.
    queue: Mutex<VecDeque<QueuedRequest>>,
    /// Word stream.
    rng: Mutex<ChaCha20Rng>,
}

impl SimulatedCoordinator {
    /// Creates a simulator with a seed.
    #[must_use]
    pub fn new(address: Address, seed: u64) -> Self {
        Self {
            address,
            next_id: AtomicU64::new(1),
            block_number: AtomicU64::new(1),
            offline: AtomicBool::new(false),
            queue: Mutex::new(VecDeque::new()),
            rng: Mutex::new(ChaCha20Rng::seed_from_u64(seed)),
        }
    }

    /// Address the simulated callbacks come from.
    #[must_use]
    pub const fn address(&self) -> Address {
        self.address
    }

    /// Makes every following request fail (or succeed again).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Release);
    }

    /// Number of requests waiting for words.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Produces the words for the oldest queued request.
    #[must_use]
    pub fn fulfill_next(&self) -> Option<RandomnessFulfilled> {
        let request = self.queue.lock().pop_front()?;
        Some(self.fulfillment(request))
    }

    /// Produces the words for a specific queued request, out of order.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::NoSuchRequest`] if the id is not queued.
    pub fn fulfill(&self, request_id: U256) -> BridgeResult<RandomnessFulfilled> {
        let request = {
            let mut queue = self.queue.lock();
            let index = queue
                .iter()
                .position(|queued| queued.id == request_id)
                .ok_or(BridgeError::NoSuchRequest(request_id))?;
            queue.remove(index).ok_or(BridgeError::NoSuchRequest(request_id))?
        };
        Ok(self.fulfillment(request))
    }

    /// Produces the raw log (topics, data) for the oldest queued request.
    #[must_use]
    pub fn emit_next_log(&self) -> Option<(Vec<[u8; 32]>, Vec<u8>)> {
        self.fulfill_next()
            .map(|fulfilled| encode_fulfilled(fulfilled.request_id, &fulfilled.words))
    }

    /// Produces words for every queued request, oldest first.
    #[must_use]
    pub fn drain(&self) -> Vec<RandomnessFulfilled> {
        std::iter::from_fn(|| self.fulfill_next()).collect()
    }

    fn fulfillment(&self, request: QueuedRequest) -> RandomnessFulfilled {
        let words = {
            let mut rng = self.rng.lock();
            (0..request.num_words)
                .map(|_| {
                    U256::from_limbs([rng.next_u64(), rng.next_u64(), rng.next_u64(), rng.next_u64()])
                })
                .collect()
        };
        RandomnessFulfilled {
            request_id: request.id,
            words,
            block_number: self.block_number.fetch_add(1, Ordering::AcqRel),
            log_index: 0,
        }
    }
}

impl RandomnessCoordinator for SimulatedCoordinator {
    fn request_randomness(&self, num_words: u32) -> Result<U256, RandomnessRequestFailed> {
        if self.offline.load(Ordering::Acquire) {
            return Err(RandomnessRequestFailed {
                reason: "simulated coordinator offline".to_string(),
            });
        }
        let id = U256::from(self.next_id.fetch_add(1, Ordering::AcqRel));
        self.queue.lock().push_back(QueuedRequest { id, num_words });
        tracing::debug!(request_id = %id, num_words, "simulated randomness requested");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_ids_and_queue() {
        let simulator = SimulatedCoordinator::new(Address::repeat_byte(0xC0), 1);
        let first = simulator.request_randomness(3).unwrap();
        let second = simulator.request_randomness(5).unwrap();

        assert_eq!(first, U256::from(1));
        assert_eq!(second, U256::from(2));
        assert_eq!(simulator.pending(), 2);

        let fulfilled = simulator.fulfill_next().unwrap();
        assert_eq!(fulfilled.request_id, first);
        assert_eq!(fulfilled.words.len(), 3);
        assert_eq!(simulator.pending(), 1);
    }

    #[test]
    fn test_same_seed_same_words() {
        let a = SimulatedCoordinator::new(Address::ZERO, 42);
        let b = SimulatedCoordinator::new(Address::ZERO, 42);
        a.request_randomness(15).unwrap();
        b.request_randomness(15).unwrap();

        assert_eq!(a.fulfill_next().unwrap().words, b.fulfill_next().unwrap().words);
    }

    #[test]
    fn test_out_of_order_fulfillment() {
        let simulator = SimulatedCoordinator::new(Address::ZERO, 7);
        simulator.request_randomness(1).unwrap();
        let second = simulator.request_randomness(1).unwrap();

        assert_eq!(simulator.fulfill(second).unwrap().request_id, second);
        assert_eq!(
            simulator.fulfill(second),
            Err(BridgeError::NoSuchRequest(second))
        );
        assert_eq!(simulator.drain().len(), 1);
    }

    #[test]
    fn test_offline_refuses() {
        let simulator = SimulatedCoordinator::new(Address::ZERO, 7);
        simulator.set_offline(true);
        assert!(simulator.request_randomness(1).is_err());
        assert_eq!(simulator.pending(), 0);
    }
}
