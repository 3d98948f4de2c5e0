//! Error types for the bridge relayer

use thiserror::Error;

/// Main error type for the relayer
#[derive(Error, Debug)]
pub enum RelayerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Contract ABI error: {0}")]
    Abi(String),

    #[error("Chain connection error for {chain}: {message}")]
    ChainConnection { chain: String, message: String },

    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Submission error: {0}")]
    Submission(String),

    #[error("Transaction {tx_hash} reverted")]
    Reverted { tx_hash: String },

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },
}

impl RelayerError {
    /// Build a connection error for the named chain
    pub fn connection(chain: impl Into<String>, message: impl ToString) -> Self {
        RelayerError::ChainConnection {
            chain: chain.into(),
            message: message.to_string(),
        }
    }

    /// Whether a relay attempt that failed with this error may be re-run.
    ///
    /// Only errors raised before a transaction could be in flight, or after
    /// it was definitively rejected on-ledger, qualify. Broadcast failures and
    /// inclusion timeouts leave the outcome unknown and are never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RelayerError::ChainConnection { .. }
                | RelayerError::Wallet(_)
                | RelayerError::Reverted { .. }
        )
    }
}

/// Result type for relayer operations
pub type RelayerResult<T> = Result<T, RelayerError>;
