//! One source→destination relay loop

use crate::abi::BridgeAbi;
use crate::chain::{LedgerClient, LogSubscription, SubscriptionItem, SubscriptionManager};
use crate::config::RelayerConfig;
use crate::error::{RelayerError, RelayerResult};
use crate::events::EventDecoder;
use crate::state::{InMemoryNonceTracker, NonceTracker};
use crate::tx::{RelayOutcome, TransactionRelayer};

use ethers::signers::LocalWallet;
use ethers::types::{Address, Log, U256};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A ledger as seen by one side of a relay direction
#[derive(Clone)]
pub struct Endpoint {
    pub name: String,
    pub client: Arc<dyn LedgerClient>,
    pub bridge: Address,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, client: Arc<dyn LedgerClient>, bridge: Address) -> Self {
        Self {
            name: name.into(),
            client,
            bridge,
        }
    }
}

/// Watches deposits on a source chain and mirrors them on a destination chain.
///
/// Logs are handled strictly one at a time: the next log is not read until
/// the previous one reached a terminal outcome, inclusion wait included.
pub struct RelayDirection {
    label: String,
    subscriptions: SubscriptionManager,
    decoder: EventDecoder,
    tracker: Box<dyn NonceTracker>,
    relayer: TransactionRelayer,
}

impl RelayDirection {
    /// Build a direction, fetching the destination chain id once
    pub async fn connect(
        source: Endpoint,
        destination: Endpoint,
        abi: Arc<BridgeAbi>,
        wallet: LocalWallet,
        config: &RelayerConfig,
    ) -> RelayerResult<Self> {
        let label = format!("{} -> {}", source.name, destination.name);

        let chain_id = destination.client.chain_id().await?;
        info!("{}: destination chain id {}", label, chain_id);

        let subscriptions = SubscriptionManager::new(
            source.name,
            source.client,
            source.bridge,
            abi.deposit_signature(),
            config.subscription_retry.clone(),
        );

        let relayer = TransactionRelayer::new(
            label.clone(),
            destination.client,
            destination.bridge,
            chain_id,
            abi.clone(),
            wallet,
            config,
        )?;

        Ok(Self {
            label,
            subscriptions,
            decoder: EventDecoder::new(abi),
            tracker: Box::new(InMemoryNonceTracker::new()),
            relayer,
        })
    }

    /// Replace the default in-memory dedup tracker
    pub fn with_tracker(mut self, tracker: Box<dyn NonceTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Relay deposits until the subscription can no longer be re-opened
    pub async fn run(mut self) -> RelayerResult<()> {
        info!(
            "{}: relaying deposits to chain {}",
            self.label,
            self.relayer.chain_id()
        );

        loop {
            let mut subscription = self.subscriptions.open_with_retry().await?;
            info!("{}: subscribed to deposit events", self.label);

            let error = self.consume(&mut subscription).await;
            warn!("{}: subscription error: {}", self.label, error);
            subscription.unsubscribe();
        }
    }

    /// Process logs until the subscription reports an error
    async fn consume(&mut self, subscription: &mut LogSubscription) -> RelayerError {
        loop {
            match subscription.next().await {
                SubscriptionItem::Log(log) => {
                    self.handle_log(&log).await;
                }
                SubscriptionItem::Error(error) => return error,
            }
        }
    }

    /// Decode and relay a single raw log; malformed logs are dropped
    pub async fn handle_log(&mut self, log: &Log) -> Option<RelayOutcome> {
        crate::metrics::record_log_received(&self.label);

        let event = match self.decoder.decode(log) {
            Ok(event) => event,
            Err(e) => {
                warn!("{}: parse event: {}", self.label, e);
                crate::metrics::record_event_malformed(&self.label);
                return None;
            }
        };

        let outcome = self.relayer.relay(&event, self.tracker.as_mut()).await;
        match &outcome {
            RelayOutcome::Confirmed(confirmation) => debug!(
                "{}: nonce {} confirmed in {:?}",
                self.label, event.nonce, confirmation.tx_hash
            ),
            RelayOutcome::Skipped(reason) => debug!(
                "{}: nonce {} skipped ({})",
                self.label,
                event.nonce,
                reason.as_str()
            ),
            RelayOutcome::Failed { stage, error } => debug!(
                "{}: nonce {} left unprocessed after {} failure: {}",
                self.label, event.nonce, stage, error
            ),
        }
        Some(outcome)
    }

    #[cfg(test)]
    pub fn is_processed(&self, nonce: &U256) -> bool {
        self.tracker.is_processed(nonce)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{Inclusion, MockLedgerClient, RetryPolicy};
    use crate::test_utils::{bridge_abi, deposit_log, test_wallet};
    use ethers::types::H256;
    use ethers::utils::keccak256;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn config() -> RelayerConfig {
        RelayerConfig {
            subscription_retry: RetryPolicy {
                initial_interval_ms: 1,
                multiplier: 1.0,
                max_interval_ms: 1,
                max_attempts: 0,
            },
            ..Default::default()
        }
    }

    /// Destination on chain 7 that confirms everything and reports each
    /// confirmation on the returned channel
    fn destination(expected_submissions: usize) -> (MockLedgerClient, mpsc::UnboundedReceiver<H256>) {
        let (confirmed_tx, confirmed_rx) = mpsc::unbounded_channel();
        let mut client = MockLedgerClient::new();
        client
            .expect_chain_id()
            .times(1)
            .returning(|| Ok(U256::from(7)));
        client
            .expect_transaction_count()
            .returning(|_| Ok(U256::from(0)));
        client
            .expect_gas_price()
            .returning(|| Ok(U256::from(1_000_000_000u64)));
        client
            .expect_send_raw_transaction()
            .times(expected_submissions)
            .returning(|raw| Ok(H256::from(keccak256(&raw))));
        client.expect_wait_for_inclusion().returning(move |tx_hash| {
            let _ = confirmed_tx.send(tx_hash);
            Ok(Inclusion {
                success: true,
                block_number: Some(1),
                gas_used: Some(U256::from(50_000)),
            })
        });
        (client, confirmed_rx)
    }

    /// Source whose successive subscriptions are handed out in order
    fn source(subscriptions: Vec<LogSubscription>) -> MockLedgerClient {
        let expected = subscriptions.len();
        let queue = Mutex::new(VecDeque::from(subscriptions));
        let mut client = MockLedgerClient::new();
        client
            .expect_subscribe_logs()
            .times(expected)
            .returning(move |_| {
                queue
                    .lock()
                    .unwrap()
                    .pop_front()
                    .ok_or_else(|| RelayerError::connection("chain-a", "no more streams"))
            });
        client
    }

    async fn direction(source: MockLedgerClient, destination: MockLedgerClient) -> RelayDirection {
        RelayDirection::connect(
            Endpoint::new("chain-a", Arc::new(source), Address::repeat_byte(0x11)),
            Endpoint::new("chain-b", Arc::new(destination), Address::repeat_byte(0x22)),
            Arc::new(bridge_abi()),
            test_wallet(),
            &config(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_malformed_log_does_not_stop_the_stream() {
        let (destination, _confirmed) = destination(1);
        let mut direction = direction(MockLedgerClient::new(), destination).await;

        let mut short = deposit_log(7, 1000, 41);
        short.topics.truncate(2);
        assert!(direction.handle_log(&short).await.is_none());
        assert!(!direction.is_processed(&U256::from(41)));

        let outcome = direction.handle_log(&deposit_log(7, 1000, 42)).await;
        assert!(outcome.unwrap().is_confirmed());
        assert!(direction.is_processed(&U256::from(42)));
    }

    #[tokio::test]
    async fn test_foreign_deposit_is_never_submitted() {
        let (destination, _confirmed) = destination(0);
        let mut direction = direction(MockLedgerClient::new(), destination).await;

        let outcome = direction.handle_log(&deposit_log(99, 1000, 42)).await;
        assert!(matches!(outcome, Some(RelayOutcome::Skipped(_))));
        assert!(!direction.is_processed(&U256::from(42)));
    }

    #[tokio::test]
    async fn test_stream_error_resubscribes_once_without_duplicates() {
        let (first_sink, first) = LogSubscription::channel("chain-a");
        let (second_sink, second) = LogSubscription::channel("chain-a");
        let source = source(vec![first, second]);
        let (destination, mut confirmed) = destination(2);
        let direction = direction(source, destination).await;

        let task = tokio::spawn(direction.run());

        assert!(first_sink.send_log(deposit_log(7, 1000, 42)).await);
        let first_tx = tokio::time::timeout(Duration::from_secs(5), confirmed.recv())
            .await
            .unwrap()
            .unwrap();
        first_sink
            .send_error(RelayerError::connection("chain-a", "ws reset"))
            .await;

        // The fresh stream replays the already relayed deposit before a new one.
        assert!(second_sink.send_log(deposit_log(7, 1000, 42)).await);
        assert!(second_sink.send_log(deposit_log(7, 500, 43)).await);
        let second_tx = tokio::time::timeout(Duration::from_secs(5), confirmed.recv())
            .await
            .unwrap()
            .unwrap();
        assert_ne!(first_tx, second_tx);

        // Give the loop a moment to drain anything it might still submit.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(confirmed.try_recv().is_err());

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_reverted_relay_reports_stage_and_error() {
        let mut destination = MockLedgerClient::new();
        destination
            .expect_chain_id()
            .returning(|| Ok(U256::from(7)));
        destination
            .expect_transaction_count()
            .returning(|_| Ok(U256::from(0)));
        destination
            .expect_gas_price()
            .returning(|| Ok(U256::from(1_000_000_000u64)));
        destination
            .expect_send_raw_transaction()
            .times(1)
            .returning(|raw| Ok(H256::from(keccak256(&raw))));
        destination.expect_wait_for_inclusion().returning(|_| {
            Ok(Inclusion {
                success: false,
                block_number: Some(1),
                gas_used: Some(U256::from(21_000)),
            })
        });
        let mut direction = direction(MockLedgerClient::new(), destination).await;

        match direction.handle_log(&deposit_log(7, 1000, 42)).await {
            Some(RelayOutcome::Failed { stage, error }) => {
                assert_eq!(stage.as_str(), "reverted");
                assert!(matches!(error, RelayerError::Reverted { .. }));
            }
            other => panic!("expected a failed relay, got {:?}", other),
        }
        assert!(!direction.is_processed(&U256::from(42)));
    }

    #[tokio::test]
    async fn test_custom_tracker_is_consulted() {
        let (destination, _confirmed) = destination(0);
        let mut tracker = InMemoryNonceTracker::new();
        tracker.mark_processed(U256::from(42));
        let mut direction = direction(MockLedgerClient::new(), destination)
            .await
            .with_tracker(Box::new(tracker));

        let outcome = direction.handle_log(&deposit_log(7, 1000, 42)).await;
        assert!(matches!(outcome, Some(RelayOutcome::Skipped(_))));
        assert_eq!(direction.label(), "chain-a -> chain-b");
    }
}
