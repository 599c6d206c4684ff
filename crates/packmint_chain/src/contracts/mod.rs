//! # Contract Definitions
//!
//! Solidity ABIs for the two collaborators the engine talks to.

// The sol! macro generates code that we can't document, so allow missing_docs
#![allow(missing_docs)]

use alloy_sol_types::sol;

sol! {
    /// Verifiable randomness coordinator.
    ///
    /// A consumer calls `requestRandomWords`; some blocks later the
    /// coordinator calls the consumer back and emits `RandomWordsFulfilled`.
    #[derive(Debug)]
    interface IRandomnessCoordinator {
        /// Emitted when a consumer asks for words.
        event RandomWordsRequested(
            uint256 indexed requestId,
            address indexed consumer,
            uint32 numWords
        );

        /// Emitted when the words are delivered.
        event RandomWordsFulfilled(
            uint256 indexed requestId,
            uint256[] randomWords
        );

        /// Asks for `numWords` random words and returns the request id.
        function requestRandomWords(uint32 numWords) external returns (uint256 requestId);
    }
}

sol! {
    /// Multi-token card ledger (ERC-1155 style).
    #[derive(Debug)]
    interface ICardLedger {
        /// Emitted on every mint, burn and transfer.
        event TransferSingle(
            address indexed operator,
            address indexed from,
            address indexed to,
            uint256 id,
            uint256 value
        );

        /// Mints `amount` units of card `id` to `to`.
        function mint(address to, uint256 id, uint256 amount) external;

        /// Burns `amount` units of card `id` held by `from`.
        function burn(address from, uint256 id, uint256 amount) external;

        /// Balance of one card for one holder.
        function balanceOf(address account, uint256 id) external view returns (uint256);
    }
}
