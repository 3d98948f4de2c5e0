//! WebSocket chain provider implementing `LedgerClient` on top of ethers

use super::{Inclusion, LedgerClient, LogSubscription, SubscriptionHandle};
use crate::config::{ChainConfig, RelayerConfig};
use crate::error::{RelayerError, RelayerResult};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Provider, Ws};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Ledger connection over a reconnecting WebSocket
pub struct ChainProvider {
    /// Chain name used in logs and errors
    name: String,
    provider: Arc<Provider<Ws>>,
    /// Upper bound on waiting for a receipt
    inclusion_timeout: Duration,
    poll_interval: Duration,
}

impl ChainProvider {
    /// Dial the chain's WebSocket endpoint
    pub async fn connect(config: &ChainConfig, relayer: &RelayerConfig) -> RelayerResult<Self> {
        let ws = Ws::connect_with_reconnects(config.ws_url.as_str(), config.ws_reconnects)
            .await
            .map_err(|e| RelayerError::connection(&config.name, e))?;

        let poll_interval = relayer.receipt_poll_interval();
        let provider = Provider::new(ws).interval(poll_interval);

        info!("Connected to {} at {}", config.name, config.ws_url);

        Ok(Self {
            name: config.name.clone(),
            provider: Arc::new(provider),
            inclusion_timeout: relayer.inclusion_timeout(),
            poll_interval,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn connection_error(&self, e: impl ToString) -> RelayerError {
        RelayerError::connection(&self.name, e)
    }
}

#[async_trait]
impl LedgerClient for ChainProvider {
    async fn subscribe_logs(&self, filter: Filter) -> RelayerResult<LogSubscription> {
        let (sink, subscription) = LogSubscription::channel(self.name.clone());
        let (ready_tx, ready_rx) = oneshot::channel();
        let provider = self.provider.clone();
        let chain = self.name.clone();

        // The ethers stream borrows its provider, so it lives inside the task
        // that forwards logs into the subscription's channel.
        let task = tokio::spawn(async move {
            let mut stream = match provider.subscribe_logs(&filter).await {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
            };

            while let Some(log) = stream.next().await {
                if !sink.send_log(log).await {
                    debug!("Subscriber for {} went away", chain);
                    return;
                }
            }

            warn!("Log stream for {} ended", chain);
            sink.send_error(RelayerError::connection(&chain, "log subscription dropped"))
                .await;
        });

        match ready_rx.await {
            Ok(Ok(())) => Ok(subscription.with_handle(SubscriptionHandle::new(task))),
            Ok(Err(message)) => Err(self.connection_error(message)),
            Err(_) => Err(self.connection_error("subscription task exited")),
        }
    }

    async fn chain_id(&self) -> RelayerResult<U256> {
        self.provider
            .get_chainid()
            .await
            .map_err(|e| self.connection_error(e))
    }

    async fn transaction_count(&self, account: Address) -> RelayerResult<U256> {
        self.provider
            .get_transaction_count(account, Some(BlockNumber::Pending.into()))
            .await
            .map_err(|e| self.connection_error(e))
    }

    async fn gas_price(&self) -> RelayerResult<U256> {
        self.provider
            .get_gas_price()
            .await
            .map_err(|e| self.connection_error(e))
    }

    async fn send_raw_transaction(&self, tx: Bytes) -> RelayerResult<H256> {
        let pending = self
            .provider
            .send_raw_transaction(tx)
            .await
            .map_err(|e| RelayerError::Submission(e.to_string()))?;
        Ok(pending.tx_hash())
    }

    async fn wait_for_inclusion(&self, tx_hash: H256) -> RelayerResult<Inclusion> {
        let pending = PendingTransaction::new(tx_hash, &*self.provider)
            .interval(self.poll_interval)
            .retries(lookup_retries(self.inclusion_timeout, self.poll_interval));

        let receipt = timeout(self.inclusion_timeout, pending)
            .await
            .map_err(|_| RelayerError::Timeout {
                operation: format!("inclusion of {:?} on {}", tx_hash, self.name),
            })?
            .map_err(|e| self.connection_error(e))?
            .ok_or_else(|| {
                RelayerError::Submission(format!(
                    "transaction {:?} dropped from the {} mempool",
                    tx_hash, self.name
                ))
            })?;

        Ok(Inclusion::from(&receipt))
    }
}

/// Polls for a transaction the node does not report yet before treating it
/// as dropped. Covers the whole inclusion window so only the timeout ends
/// the wait early.
fn lookup_retries(inclusion_timeout: Duration, poll_interval: Duration) -> usize {
    const MIN_RETRIES: usize = 3;

    let interval = poll_interval.as_millis().max(1);
    let polls = inclusion_timeout.as_millis() / interval;
    usize::try_from(polls).unwrap_or(usize::MAX).max(MIN_RETRIES)
}
