//! Chain module - ledger connections and log subscriptions
//!
//! This module provides:
//! - The `LedgerClient` capability the relay engine talks to
//! - A WebSocket-backed implementation with automatic reconnects
//! - Log subscriptions with a pluggable retry policy for re-opening them

pub mod provider;
pub mod subscription;

pub use provider::ChainProvider;
pub use subscription::{
    LogSubscription, RetryPolicy, SubscriptionHandle, SubscriptionItem, SubscriptionManager,
};

use crate::error::RelayerResult;

use async_trait::async_trait;
use ethers::types::{Address, Bytes, Filter, TransactionReceipt, H256, U256, U64};

#[cfg(test)]
use mockall::automock;

/// Outcome of waiting for a submitted transaction to be mined
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inclusion {
    pub success: bool,
    pub block_number: Option<u64>,
    pub gas_used: Option<U256>,
}

impl From<&TransactionReceipt> for Inclusion {
    fn from(receipt: &TransactionReceipt) -> Self {
        Self {
            success: receipt.status == Some(U64::from(1)),
            block_number: receipt.block_number.map(|b| b.as_u64()),
            gas_used: receipt.gas_used,
        }
    }
}

/// Operations the relayer needs from a single ledger
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Open a live stream of logs matching `filter`
    async fn subscribe_logs(&self, filter: Filter) -> RelayerResult<LogSubscription>;

    /// Chain identifier used for replay protection
    async fn chain_id(&self) -> RelayerResult<U256>;

    /// Next transaction ordinal for `account`, counting pending transactions
    async fn transaction_count(&self, account: Address) -> RelayerResult<U256>;

    /// Suggested legacy gas price
    async fn gas_price(&self) -> RelayerResult<U256>;

    /// Broadcast a signed, RLP-encoded transaction
    async fn send_raw_transaction(&self, tx: Bytes) -> RelayerResult<H256>;

    /// Block until the transaction is mined and report its outcome
    async fn wait_for_inclusion(&self, tx_hash: H256) -> RelayerResult<Inclusion>;
}
