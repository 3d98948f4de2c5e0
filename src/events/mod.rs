//! Deposit event type and decoding
//!
//! A deposit log carries the event signature plus three indexed fields in its
//! topics (`from`, `toChainId`, `to`) and the ABI-encoded `amount` and `nonce`
//! in its data.

use crate::abi::{BridgeAbi, DEPOSIT_EVENT};
use crate::error::{RelayerError, RelayerResult};

use ethers::prelude::*;
use std::sync::Arc;

/// Indexed topics expected on a deposit log: signature plus three fields
const DEPOSIT_TOPICS: usize = 4;

/// A deposit commitment observed on the source chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositEvent {
    pub sender: Address,
    pub destination_chain_id: U256,
    pub recipient: Address,
    pub amount: U256,
    /// Bridge-level sequence number, unique per source/destination pair
    pub nonce: U256,
    pub block_number: Option<u64>,
    pub tx_hash: Option<H256>,
}

/// Turns raw source-chain logs into `DepositEvent`s
#[derive(Debug, Clone)]
pub struct EventDecoder {
    abi: Arc<BridgeAbi>,
}

impl EventDecoder {
    pub fn new(abi: Arc<BridgeAbi>) -> Self {
        Self { abi }
    }

    /// Decode a log, failing with `MalformedEvent` on any shape mismatch
    pub fn decode(&self, log: &Log) -> RelayerResult<DepositEvent> {
        if log.topics.len() < DEPOSIT_TOPICS {
            return Err(RelayerError::MalformedEvent(format!(
                "expected {} topics, got {}",
                DEPOSIT_TOPICS,
                log.topics.len()
            )));
        }

        if log.topics[0] != self.abi.deposit_signature() {
            return Err(RelayerError::MalformedEvent(format!(
                "topic {:?} is not a {} event",
                log.topics[0], DEPOSIT_EVENT
            )));
        }

        let sender = topic_address(&log.topics[1]);
        let destination_chain_id = U256::from_big_endian(log.topics[2].as_bytes());
        let recipient = topic_address(&log.topics[3]);

        let (amount, nonce) = self.abi.decode_deposit_data(&log.data)?;

        Ok(DepositEvent {
            sender,
            destination_chain_id,
            recipient,
            amount,
            nonce,
            block_number: log.block_number.map(|b| b.as_u64()),
            tx_hash: log.transaction_hash,
        })
    }
}

fn topic_address(topic: &H256) -> Address {
    Address::from_slice(&topic.as_bytes()[12..32])
}
