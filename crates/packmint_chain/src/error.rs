//! # Bridge Error Types

use alloy_primitives::U256;
use packmint_engine::DistributionError;
use thiserror::Error;

/// Errors raised between the chain and the engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// The engine refused an operation.
    #[error(transparent)]
    Engine(#[from] DistributionError),

    /// A log could not be decoded as a coordinator event.
    #[error("malformed log at block {block_number}, index {log_index}")]
    MalformedLog {
        /// Block of the log.
        block_number: u64,
        /// Index of the log within the block.
        log_index: u32,
    },

    /// The event buffer is full.
    #[error("event channel full ({capacity} buffered)")]
    ChannelFull {
        /// Buffer capacity.
        capacity: usize,
    },

    /// The simulator has no request queued under this id.
    #[error("no queued randomness request {0}")]
    NoSuchRequest(U256),
}

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;
