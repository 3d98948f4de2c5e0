//! Gas limit and price selection for mirrored transactions

use crate::chain::LedgerClient;
use crate::config::RelayerConfig;
use crate::error::RelayerResult;

use ethers::types::U256;
use tracing::debug;

/// Gas parameters for `receiveFromOtherChain` calls
#[derive(Debug, Clone)]
pub struct GasEstimator {
    /// Fixed gas limit; the call has a bounded cost so it is not estimated
    gas_limit: U256,
    /// Buffer percentage added on top of the node's suggested price
    gas_price_buffer_percent: u64,
}

impl GasEstimator {
    pub fn new(gas_limit: u64, gas_price_buffer_percent: u64) -> Self {
        Self {
            gas_limit: U256::from(gas_limit),
            gas_price_buffer_percent,
        }
    }

    pub fn from_config(config: &RelayerConfig) -> Self {
        Self::new(config.gas_limit, config.gas_price_buffer_percent)
    }

    pub fn gas_limit(&self) -> U256 {
        self.gas_limit
    }

    /// Suggested legacy gas price from the destination, plus buffer
    pub async fn gas_price(&self, client: &dyn LedgerClient) -> RelayerResult<U256> {
        let price = client.gas_price().await?;
        let buffered = self.apply_buffer(price);
        debug!("Gas price: suggested {}, using {}", price, buffered);
        Ok(buffered)
    }

    fn apply_buffer(&self, price: U256) -> U256 {
        price + price * self.gas_price_buffer_percent / 100
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockLedgerClient;

    #[test]
    fn test_no_buffer_keeps_suggested_price() {
        let gas = GasEstimator::new(300_000, 0);
        assert_eq!(gas.apply_buffer(U256::from(1_000)), U256::from(1_000));
        assert_eq!(gas.gas_limit(), U256::from(300_000));
    }

    #[tokio::test]
    async fn test_buffer_is_added_to_suggested_price() {
        let mut client = MockLedgerClient::new();
        client
            .expect_gas_price()
            .times(1)
            .returning(|| Ok(U256::from(2_000_000_000u64)));

        let gas = GasEstimator::new(300_000, 10);
        assert_eq!(
            gas.gas_price(&client).await.unwrap(),
            U256::from(2_200_000_000u64)
        );
    }
}
