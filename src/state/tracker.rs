//! Deduplication of relayed deposits

use ethers::types::U256;
use std::collections::HashSet;
use tracing::debug;

/// Records deposit nonces whose mirrored transaction was confirmed.
///
/// One tracker belongs to one relay direction and is only touched from that
/// direction's event loop.
pub trait NonceTracker: Send {
    /// Whether `nonce` has already been relayed successfully
    fn is_processed(&self, nonce: &U256) -> bool;

    /// Record a confirmed relay; marking twice is a no-op
    fn mark_processed(&mut self, nonce: U256);
}

/// Process-local tracker; contents are lost on restart
#[derive(Debug, Default)]
pub struct InMemoryNonceTracker {
    processed: HashSet<U256>,
}

impl InMemoryNonceTracker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NonceTracker for InMemoryNonceTracker {
    fn is_processed(&self, nonce: &U256) -> bool {
        self.processed.contains(nonce)
    }

    fn mark_processed(&mut self, nonce: U256) {
        if self.processed.insert(nonce) {
            debug!("Marked nonce {} as processed", nonce);
        }
    }
}
