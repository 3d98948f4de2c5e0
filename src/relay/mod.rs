//! Relay directions
//!
//! The relayer runs two independent directions, A→B and B→A. Each owns its
//! own subscription, dedup tracker and destination transaction pipeline.

mod direction;

pub use direction::{Endpoint, RelayDirection};
