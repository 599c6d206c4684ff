//! # Fulfillment Listener
//!
//! Buffers coordinator fulfillment logs and hands them to the engine.
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │  Coordinator │ ──▶ │   Listener   │ ──▶ │   Channel    │ ──▶ │    Engine    │
//! │  logs        │     │   (Parser)   │     │   (Bounded)  │     │   fulfill()  │
//! └──────────────┘     └──────────────┘     └──────────────┘     └──────────────┘
//! ```
//!
//! Every event is dispatched with the configured coordinator address as the
//! caller, so the engine's sender check still applies.

use alloy_primitives::Address;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use packmint_engine::{
    DistributionEngine, DistributionError, MintGateway, PackOpening, RandomnessCoordinator,
    RequestId,
};

use crate::error::{BridgeError, BridgeResult};
use crate::events::{EventParser, RandomnessFulfilled};

/// Configuration for the listener.
#[derive(Clone, Debug)]
pub struct ListenerConfig {
    /// Address the engine accepts callbacks from.
    pub coordinator_address: Address,
    /// Channel buffer size for events.
    pub channel_buffer: usize,
    /// How long `run` waits for an event before checking for a stop.
    pub poll_interval_ms: u64,
}

impl ListenerConfig {
    /// Creates a config with default buffering.
    #[must_use]
    pub fn new(coordinator_address: Address) -> Self {
        Self {
            coordinator_address,
            channel_buffer: 1024,
            poll_interval_ms: 10,
        }
    }
}

/// Counters for the listener.
#[derive(Debug, Default)]
pub struct ListenerStats {
    /// Logs accepted into the channel.
    pub events_received: AtomicU64,
    /// Logs that did not decode.
    pub events_malformed: AtomicU64,
    /// Callbacks the engine fulfilled.
    pub accepted: AtomicU64,
    /// Callbacks for already fulfilled requests.
    pub duplicates: AtomicU64,
    /// Callbacks the engine refused for any other reason.
    pub rejected: AtomicU64,
    /// Average latency in microseconds.
    pub avg_latency_us: AtomicU64,
    /// Maximum latency in microseconds.
    pub max_latency_us: AtomicU64,
}

/// What happened to one dispatched callback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The engine fulfilled the pack.
    Fulfilled(PackOpening),
    /// The request was already fulfilled.
    Duplicate(RequestId),
    /// The engine refused the callback. The request may still be Pending.
    Rejected(RandomnessFulfilled, DistributionError),
}

/// Outcome of one `dispatch` pass.
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Packs fulfilled in this pass.
    pub openings: Vec<PackOpening>,
    /// Callbacks for already fulfilled requests.
    pub duplicates: usize,
    /// Callbacks refused, with the reason.
    pub rejected: Vec<(RandomnessFulfilled, DistributionError)>,
}

/// Buffers fulfillment events and feeds them to the engine.
pub struct FulfillmentListener {
    /// Sender side of event channel.
    sender: Sender<(RandomnessFulfilled, Instant)>,
    /// Receiver side of event channel.
    receiver: Receiver<(RandomnessFulfilled, Instant)>,
    /// Whether `run` is looping.
    running: Arc<AtomicBool>,
    /// Counters.
    stats: Arc<ListenerStats>,
    /// Configuration.
    config: ListenerConfig,
}

impl FulfillmentListener {
    /// Creates a listener.
    #[must_use]
    pub fn new(config: ListenerConfig) -> Self {
        let (sender, receiver) = bounded(config.channel_buffer);

        Self {
            sender,
            receiver,
            running: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(ListenerStats::default()),
            config,
        }
    }

    /// Returns a reference to the statistics.
    #[must_use]
    pub fn stats(&self) -> Arc<ListenerStats> {
        Arc::clone(&self.stats)
    }

    /// Number of buffered events.
    #[must_use]
    pub fn backlog(&self) -> usize {
        self.receiver.len()
    }

    /// Checks if `run` is currently looping.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Makes `run` return after its current wait.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Buffers an already decoded event.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ChannelFull`] if the buffer is full.
    pub fn inject(&self, event: RandomnessFulfilled) -> BridgeResult<()> {
        match self.sender.try_send((event, Instant::now())) {
            Ok(()) => {
                self.stats.events_received.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => {
                Err(BridgeError::ChannelFull {
                    capacity: self.config.channel_buffer,
                })
            }
        }
    }

    /// Decodes a raw coordinator log and buffers it.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::MalformedLog`] if the log is not a
    /// `RandomWordsFulfilled`, or [`BridgeError::ChannelFull`].
    pub fn process_raw_log(
        &self,
        topics: &[[u8; 32]],
        data: &[u8],
        block_number: u64,
        log_index: u32,
    ) -> BridgeResult<()> {
        let Some(event) = EventParser::parse_fulfilled(topics, data, block_number, log_index)
        else {
            self.stats.events_malformed.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(block_number, log_index, "skipping undecodable coordinator log");
            return Err(BridgeError::MalformedLog {
                block_number,
                log_index,
            });
        };
        self.inject(event)
    }

    /// Drains the buffer into the engine.
    pub fn dispatch<C, M>(&self, engine: &DistributionEngine<C, M>) -> DispatchReport
    where
        C: RandomnessCoordinator,
        M: MintGateway,
    {
        let mut report = DispatchReport::default();
        while let Ok((event, received_at)) = self.receiver.try_recv() {
            match self.handle(engine, event, received_at) {
                DispatchOutcome::Fulfilled(opening) => report.openings.push(opening),
                DispatchOutcome::Duplicate(_) => report.duplicates += 1,
                DispatchOutcome::Rejected(event, e) => report.rejected.push((event, e)),
            }
        }
        report
    }

    /// Dispatches events as they arrive until [`Self::stop`] is called.
    ///
    /// Each outcome is sent to `outcomes` as soon as the engine returns, so
    /// refused callbacks can be inspected or redelivered while the loop
    /// runs. Nothing is retained between events; totals live in
    /// [`ListenerStats`]. A dropped receiver only discards outcomes.
    pub fn run<C, M>(&self, engine: &DistributionEngine<C, M>, outcomes: &Sender<DispatchOutcome>)
    where
        C: RandomnessCoordinator,
        M: MintGateway,
    {
        self.running.store(true, Ordering::SeqCst);
        let poll = Duration::from_millis(self.config.poll_interval_ms);

        while self.is_running() {
            match self.receiver.recv_timeout(poll) {
                Ok((event, received_at)) => {
                    let outcome = self.handle(engine, event, received_at);
                    if outcomes.send(outcome).is_err() {
                        tracing::debug!("outcome receiver dropped");
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn handle<C, M>(
        &self,
        engine: &DistributionEngine<C, M>,
        event: RandomnessFulfilled,
        received_at: Instant,
    ) -> DispatchOutcome
    where
        C: RandomnessCoordinator,
        M: MintGateway,
    {
        let caller = self.config.coordinator_address;
        let outcome = engine.fulfill(caller, event.request_id, &event.words);
        self.record_latency(received_at);

        match outcome {
            Ok(opening) => {
                self.stats.accepted.fetch_add(1, Ordering::Relaxed);
                DispatchOutcome::Fulfilled(opening)
            }
            Err(DistributionError::AlreadyFulfilled(id)) => {
                tracing::debug!(request_id = %id, "duplicate coordinator callback");
                self.stats.duplicates.fetch_add(1, Ordering::Relaxed);
                DispatchOutcome::Duplicate(id)
            }
            Err(e) => {
                tracing::warn!(
                    request_id = %event.request_id,
                    block_number = event.block_number,
                    error = %e,
                    "coordinator callback refused"
                );
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                DispatchOutcome::Rejected(event, e)
            }
        }
    }

    fn record_latency(&self, received_at: Instant) {
        let latency_us = u64::try_from(received_at.elapsed().as_micros()).unwrap_or(u64::MAX);

        let _ = self.stats.max_latency_us.fetch_update(
            Ordering::Relaxed,
            Ordering::Relaxed,
            |current| (latency_us > current).then_some(latency_us),
        );

        // Weighted moving average favoring recent values
        let handled = self.stats.accepted.load(Ordering::Relaxed)
            + self.stats.duplicates.load(Ordering::Relaxed)
            + self.stats.rejected.load(Ordering::Relaxed);
        let current_avg = self.stats.avg_latency_us.load(Ordering::Relaxed);
        let new_avg = if handled == 0 {
            latency_us
        } else {
            (current_avg * 7 + latency_us) / 8
        };
        self.stats.avg_latency_us.store(new_avg, Ordering::Relaxed);
    }
}
