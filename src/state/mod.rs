//! Relay state kept for the lifetime of the process
//!
//! Handles:
//! - Tracking which deposit nonces have been relayed to completion
//!
//! Nothing here is persisted; a restart forgets every processed nonce.

mod tracker;

pub use tracker::{InMemoryNonceTracker, NonceTracker};
