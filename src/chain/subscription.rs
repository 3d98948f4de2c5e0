//! Log subscriptions and the policy used to (re-)open them

use super::LedgerClient;
use crate::error::{RelayerError, RelayerResult};

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use ethers::types::{Address, Filter, Log, H256};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Buffered logs per subscription before the producer waits on the consumer
const LOG_CHANNEL_CAPACITY: usize = 1024;

/// Exponential backoff applied between failed subscription attempts
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    pub initial_interval_ms: u64,
    pub multiplier: f64,
    pub max_interval_ms: u64,
    /// Attempts before giving up; 0 retries forever
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval_ms: 500,
            multiplier: 2.0,
            max_interval_ms: 30_000,
            max_attempts: 0,
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.initial_interval_ms))
            .with_randomization_factor(0.1)
            .with_multiplier(self.multiplier)
            .with_max_interval(Duration::from_millis(self.max_interval_ms))
            .with_max_elapsed_time(None)
            .build()
    }

    fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts != 0 && attempts >= self.max_attempts
    }
}

/// Owns the task feeding a subscription; aborting it tears the subscription down
#[derive(Debug, Default)]
pub struct SubscriptionHandle {
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    pub fn new(task: JoinHandle<()>) -> Self {
        Self { task: Some(task) }
    }

    pub fn unsubscribe(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Producer side of a `LogSubscription`
#[derive(Debug, Clone)]
pub struct LogSink {
    logs: mpsc::Sender<Log>,
    errors: mpsc::Sender<RelayerError>,
}

impl LogSink {
    /// Forward a log; returns false once the subscriber has gone away
    pub async fn send_log(&self, log: Log) -> bool {
        self.logs.send(log).await.is_ok()
    }

    /// Report an asynchronous stream failure
    pub async fn send_error(&self, error: RelayerError) {
        let _ = self.errors.send(error).await;
    }
}

/// What the subscription produced next
#[derive(Debug)]
pub enum SubscriptionItem {
    Log(Log),
    Error(RelayerError),
}

/// A live stream of raw logs together with its asynchronous error channel
#[derive(Debug)]
pub struct LogSubscription {
    chain: String,
    logs: mpsc::Receiver<Log>,
    errors: mpsc::Receiver<RelayerError>,
    handle: SubscriptionHandle,
}

impl LogSubscription {
    /// Create a connected sink/subscription pair with no backing task
    pub fn channel(chain: impl Into<String>) -> (LogSink, LogSubscription) {
        let (log_tx, log_rx) = mpsc::channel(LOG_CHANNEL_CAPACITY);
        let (err_tx, err_rx) = mpsc::channel(1);
        let sink = LogSink {
            logs: log_tx,
            errors: err_tx,
        };
        let subscription = LogSubscription {
            chain: chain.into(),
            logs: log_rx,
            errors: err_rx,
            handle: SubscriptionHandle::default(),
        };
        (sink, subscription)
    }

    pub fn with_handle(mut self, handle: SubscriptionHandle) -> Self {
        self.handle = handle;
        self
    }

    /// Wait for either the next log or a stream error.
    ///
    /// Logs already buffered are delivered before a pending error. A closed
    /// log stream is reported as a connection error.
    pub async fn next(&mut self) -> SubscriptionItem {
        tokio::select! {
            biased;
            log = self.logs.recv() => match log {
                Some(log) => SubscriptionItem::Log(log),
                None => SubscriptionItem::Error(RelayerError::connection(
                    &self.chain,
                    "log stream closed",
                )),
            },
            Some(error) = self.errors.recv() => SubscriptionItem::Error(error),
        }
    }

    pub fn unsubscribe(mut self) {
        self.handle.unsubscribe();
    }
}

/// Opens and re-opens the deposit log subscription for one source ledger
pub struct SubscriptionManager {
    chain: String,
    client: Arc<dyn LedgerClient>,
    contract_address: Address,
    event_signature: H256,
    retry: RetryPolicy,
}

impl SubscriptionManager {
    pub fn new(
        chain: impl Into<String>,
        client: Arc<dyn LedgerClient>,
        contract_address: Address,
        event_signature: H256,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            chain: chain.into(),
            client,
            contract_address,
            event_signature,
            retry,
        }
    }

    /// Filter matching the deposit event emitted by the source contract
    pub fn filter(&self) -> Filter {
        Filter::new()
            .address(self.contract_address)
            .topic0(self.event_signature)
    }

    /// Single subscription attempt
    pub async fn open(&self) -> RelayerResult<LogSubscription> {
        self.client.subscribe_logs(self.filter()).await
    }

    /// Open a subscription, backing off between failed attempts
    pub async fn open_with_retry(&self) -> RelayerResult<LogSubscription> {
        let mut backoff = self.retry.backoff();
        let mut attempts = 0;

        loop {
            attempts += 1;
            match self.open().await {
                Ok(subscription) => {
                    crate::metrics::record_subscription_opened(&self.chain);
                    if attempts > 1 {
                        info!(
                            "Subscribed to {} after {} attempts",
                            self.chain, attempts
                        );
                    } else {
                        debug!("Subscribed to {}", self.chain);
                    }
                    return Ok(subscription);
                }
                Err(e) => {
                    crate::metrics::record_subscription_error(&self.chain);
                    if self.retry.exhausted(attempts) {
                        return Err(e);
                    }
                    let delay = backoff
                        .next_backoff()
                        .unwrap_or(Duration::from_millis(self.retry.max_interval_ms));
                    warn!(
                        "Subscribe error on {} (attempt {}): {}; retrying in {:?}",
                        self.chain, attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockLedgerClient;
    use ethers::types::ValueOrArray;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            initial_interval_ms: 1,
            multiplier: 1.0,
            max_interval_ms: 1,
            max_attempts,
        }
    }

    fn manager(client: MockLedgerClient, policy: RetryPolicy) -> SubscriptionManager {
        SubscriptionManager::new(
            "chain-a",
            Arc::new(client),
            Address::repeat_byte(0x11),
            H256::repeat_byte(0xaa),
            policy,
        )
    }

    #[test]
    fn test_filter_targets_contract_and_signature() {
        let manager = manager(MockLedgerClient::new(), RetryPolicy::default());
        let filter = manager.filter();
        assert_eq!(
            filter.address,
            Some(ValueOrArray::Value(Address::repeat_byte(0x11)))
        );
        assert_eq!(
            filter.topics[0],
            Some(ValueOrArray::Value(Some(H256::repeat_byte(0xaa))))
        );
        assert!(filter.topics[1].is_none());
    }

    #[tokio::test]
    async fn test_open_retries_until_success() {
        let mut client = MockLedgerClient::new();
        let mut calls = 0;
        client.expect_subscribe_logs().times(3).returning(move |_| {
            calls += 1;
            if calls < 3 {
                Err(RelayerError::connection("chain-a", "dial failed"))
            } else {
                Ok(LogSubscription::channel("chain-a").1)
            }
        });

        let manager = manager(client, fast_policy(0));
        assert!(manager.open_with_retry().await.is_ok());
    }

    #[tokio::test]
    async fn test_open_gives_up_after_max_attempts() {
        let mut client = MockLedgerClient::new();
        client
            .expect_subscribe_logs()
            .times(2)
            .returning(|_| Err(RelayerError::connection("chain-a", "dial failed")));

        let manager = manager(client, fast_policy(2));
        let err = manager.open_with_retry().await.unwrap_err();
        assert!(matches!(err, RelayerError::ChainConnection { .. }));
    }

    #[tokio::test]
    async fn test_buffered_logs_are_delivered_before_error() {
        let (sink, mut subscription) = LogSubscription::channel("chain-a");
        assert!(sink.send_log(Log::default()).await);
        sink.send_error(RelayerError::connection("chain-a", "ws closed"))
            .await;

        assert!(matches!(subscription.next().await, SubscriptionItem::Log(_)));
        assert!(matches!(
            subscription.next().await,
            SubscriptionItem::Error(RelayerError::ChainConnection { .. })
        ));
    }

    #[tokio::test]
    async fn test_closed_stream_reports_error() {
        let (sink, mut subscription) = LogSubscription::channel("chain-a");
        drop(sink);
        match subscription.next().await {
            SubscriptionItem::Error(e) => assert!(e.to_string().contains("closed")),
            SubscriptionItem::Log(_) => panic!("expected stream error"),
        }
    }

    #[tokio::test]
    async fn test_unsubscribe_aborts_feeding_task() {
        let (alive_tx, alive_rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let _alive = alive_tx;
            std::future::pending::<()>().await;
        });
        let (_sink, subscription) = LogSubscription::channel("chain-a");
        subscription
            .with_handle(SubscriptionHandle::new(task))
            .unsubscribe();

        // The sender is dropped once the aborted task is torn down.
        assert!(alive_rx.await.is_err());
    }
}
