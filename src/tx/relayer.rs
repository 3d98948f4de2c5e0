//! Mirrors a validated deposit onto the destination chain
//!
//! Per event the relayer moves through: chain-id check, dedup check, call
//! encoding, nonce/gas fetch, signing, broadcast, inclusion wait and finally
//! the dedup commit. Every failure is terminal for the event unless the
//! configured attempt budget allows a re-run of a stage that cannot have left
//! a transaction in flight.

use super::gas::GasEstimator;
use crate::abi::BridgeAbi;
use crate::chain::LedgerClient;
use crate::config::RelayerConfig;
use crate::error::{RelayerError, RelayerResult};
use crate::events::DepositEvent;
use crate::state::NonceTracker;

use ethers::prelude::*;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Stage of the relay pipeline an event failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayStage {
    Encode,
    Prepare,
    Sign,
    Submit,
    Inclusion,
    Reverted,
}

impl RelayStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayStage::Encode => "encode",
            RelayStage::Prepare => "prepare",
            RelayStage::Sign => "sign",
            RelayStage::Submit => "submit",
            RelayStage::Inclusion => "inclusion",
            RelayStage::Reverted => "reverted",
        }
    }

    /// Stages after which no transaction can still land on-chain
    fn allows_retry(&self) -> bool {
        matches!(
            self,
            RelayStage::Prepare | RelayStage::Sign | RelayStage::Reverted
        )
    }
}

impl fmt::Display for RelayStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an event was dropped without submitting anything
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The deposit targets a chain other than this relayer's destination
    WrongDestination { expected: U256, actual: U256 },
    AlreadyProcessed,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::WrongDestination { .. } => "wrong_destination",
            SkipReason::AlreadyProcessed => "already_processed",
        }
    }
}

/// A mirrored transaction that was mined successfully
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub tx_hash: H256,
    pub block_number: Option<u64>,
    pub gas_used: Option<U256>,
}

/// Terminal result of relaying one event
#[derive(Debug)]
pub enum RelayOutcome {
    Confirmed(Confirmation),
    Skipped(SkipReason),
    Failed {
        stage: RelayStage,
        error: RelayerError,
    },
}

impl RelayOutcome {
    #[cfg(test)]
    pub fn is_confirmed(&self) -> bool {
        matches!(self, RelayOutcome::Confirmed(_))
    }
}

type StageResult<T> = Result<T, (RelayStage, RelayerError)>;

/// Builds, signs, submits and confirms mirrored transactions on one chain
pub struct TransactionRelayer {
    /// Direction label for logs and metrics
    label: String,
    destination: Arc<dyn LedgerClient>,
    destination_bridge: Address,
    /// Destination chain id, fetched once at startup
    chain_id: U256,
    abi: Arc<BridgeAbi>,
    /// Signing wallet bound to `chain_id`
    wallet: LocalWallet,
    gas: GasEstimator,
    max_attempts: u32,
    retry_delay: Duration,
}

impl TransactionRelayer {
    pub fn new(
        label: impl Into<String>,
        destination: Arc<dyn LedgerClient>,
        destination_bridge: Address,
        chain_id: U256,
        abi: Arc<BridgeAbi>,
        wallet: LocalWallet,
        config: &RelayerConfig,
    ) -> RelayerResult<Self> {
        if chain_id > U256::from(u64::MAX) {
            return Err(RelayerError::Config(format!(
                "destination chain id {} does not fit EIP-155 signing",
                chain_id
            )));
        }
        let wallet = wallet.with_chain_id(chain_id.as_u64());

        Ok(Self {
            label: label.into(),
            destination,
            destination_bridge,
            chain_id,
            abi,
            wallet,
            gas: GasEstimator::from_config(config),
            max_attempts: config.relay_max_attempts.max(1),
            retry_delay: config.relay_retry_delay(),
        })
    }

    /// Parse a hex-encoded private key into a signing wallet
    pub fn load_wallet(private_key: &str) -> RelayerResult<LocalWallet> {
        let key = private_key.trim();
        let key = key.strip_prefix("0x").unwrap_or(key);
        key.parse::<LocalWallet>()
            .map_err(|e| RelayerError::Wallet(format!("Invalid private key: {}", e)))
    }

    pub fn chain_id(&self) -> U256 {
        self.chain_id
    }

    /// Run one deposit through the relay pipeline
    pub async fn relay(
        &self,
        event: &DepositEvent,
        tracker: &mut dyn NonceTracker,
    ) -> RelayOutcome {
        if event.destination_chain_id != self.chain_id {
            info!(
                "Skipping deposit nonce={} intended for chain {}",
                event.nonce, event.destination_chain_id
            );
            return self.skip(SkipReason::WrongDestination {
                expected: self.chain_id,
                actual: event.destination_chain_id,
            });
        }

        if tracker.is_processed(&event.nonce) {
            info!("Nonce {} already processed", event.nonce);
            return self.skip(SkipReason::AlreadyProcessed);
        }

        info!(
            "Deposit: from={:?} to={:?} amount={} nonce={}",
            event.sender, event.recipient, event.amount, event.nonce
        );

        let started = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.attempt(event).await {
                Ok(confirmation) => {
                    tracker.mark_processed(event.nonce);
                    info!(
                        "Transaction confirmed: nonce={} tx={:?} block={:?} gasUsed={:?}",
                        event.nonce,
                        confirmation.tx_hash,
                        confirmation.block_number,
                        confirmation.gas_used
                    );
                    crate::metrics::record_tx_confirmed(&self.label);
                    crate::metrics::record_relay_latency(
                        &self.label,
                        started.elapsed().as_secs_f64(),
                    );
                    return RelayOutcome::Confirmed(confirmation);
                }
                Err((stage, error)) => {
                    if attempt < self.max_attempts && stage.allows_retry() && error.is_retryable()
                    {
                        warn!(
                            "Relay of nonce {} failed at {} (attempt {}/{}): {}; retrying",
                            event.nonce, stage, attempt, self.max_attempts, error
                        );
                        tokio::time::sleep(self.retry_delay).await;
                        continue;
                    }

                    error!(
                        "Relay of nonce {} failed at {}: {}",
                        event.nonce, stage, error
                    );
                    crate::metrics::record_tx_failed(&self.label, stage.as_str());
                    return RelayOutcome::Failed { stage, error };
                }
            }
        }
    }

    fn skip(&self, reason: SkipReason) -> RelayOutcome {
        crate::metrics::record_event_skipped(&self.label, reason.as_str());
        RelayOutcome::Skipped(reason)
    }

    /// One pass from encoding through inclusion
    async fn attempt(&self, event: &DepositEvent) -> StageResult<Confirmation> {
        let calldata = self
            .abi
            .encode_receive(event.recipient, event.amount, event.nonce)
            .map_err(|e| (RelayStage::Encode, e))?;

        let tx = self
            .build_tx(calldata)
            .await
            .map_err(|e| (RelayStage::Prepare, e))?;

        let signed = self
            .sign(&tx)
            .await
            .map_err(|e| (RelayStage::Sign, e))?;

        let tx_hash = self
            .destination
            .send_raw_transaction(signed)
            .await
            .map_err(|e| (RelayStage::Submit, e))?;

        info!("Transaction sent: {:?}", tx_hash);
        crate::metrics::record_tx_submitted(&self.label);

        let inclusion = self
            .destination
            .wait_for_inclusion(tx_hash)
            .await
            .map_err(|e| (RelayStage::Inclusion, e))?;

        if !inclusion.success {
            warn!("Transaction failed: {:?}", tx_hash);
            return Err((
                RelayStage::Reverted,
                RelayerError::Reverted {
                    tx_hash: format!("{:?}", tx_hash),
                },
            ));
        }

        Ok(Confirmation {
            tx_hash,
            block_number: inclusion.block_number,
            gas_used: inclusion.gas_used,
        })
    }

    /// Legacy EIP-155 transaction calling the destination bridge
    async fn build_tx(&self, calldata: Bytes) -> RelayerResult<TypedTransaction> {
        // Fetched fresh for every attempt; the wallet has at most one
        // transaction in flight per destination.
        let nonce = self
            .destination
            .transaction_count(self.wallet.address())
            .await?;
        let gas_price = self.gas.gas_price(self.destination.as_ref()).await?;

        let tx = TransactionRequest::new()
            .to(self.destination_bridge)
            .value(U256::zero())
            .gas(self.gas.gas_limit())
            .gas_price(gas_price)
            .data(calldata)
            .nonce(nonce)
            .chain_id(self.wallet.chain_id());

        Ok(TypedTransaction::Legacy(tx))
    }

    async fn sign(&self, tx: &TypedTransaction) -> RelayerResult<Bytes> {
        let signature = self
            .wallet
            .sign_transaction(tx)
            .await
            .map_err(|e| RelayerError::Wallet(e.to_string()))?;
        Ok(tx.rlp_signed(&signature))
    }
}
