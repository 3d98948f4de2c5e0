//! Mirrored transaction construction, signing and confirmation

mod gas;
mod relayer;

pub use relayer::{RelayOutcome, TransactionRelayer};
