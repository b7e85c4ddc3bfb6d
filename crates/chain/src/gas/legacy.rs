//! Legacy `gasPrice` pricing, fetched fresh for every transaction.

use super::{GasParams, GasStrategy};
use alloy::network::TransactionBuilder;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

#[derive(Debug)]
pub struct LegacyGasStrategy {
    /// Maximum gas price in wei.
    max_gas_price: u128,
}

impl LegacyGasStrategy {
    pub fn new(max_gas_price: u128) -> Self {
        Self { max_gas_price }
    }

    fn cap(&self, gas_price: u128) -> u128 {
        if gas_price > self.max_gas_price {
            debug!(
                node_price = gas_price,
                cap = self.max_gas_price,
                "Node gas price above cap"
            );
        }
        gas_price.min(self.max_gas_price)
    }
}

#[async_trait]
impl GasStrategy for LegacyGasStrategy {
    async fn fetch_params(&self, rpc_url: &str) -> Result<GasParams> {
        let provider = ProviderBuilder::new().on_http(rpc_url.parse()?);
        let gas_price = provider.get_gas_price().await?;

        Ok(GasParams::Legacy {
            gas_price: self.cap(gas_price),
        })
    }

    fn apply_gas(&self, tx: &mut TransactionRequest, params: &GasParams) {
        match params {
            GasParams::Legacy { gas_price } => {
                tx.set_gas_price(*gas_price);
            }
            GasParams::Eip1559 {
                max_fee_per_gas, ..
            } => {
                tx.set_gas_price(*max_fee_per_gas);
            }
        }
    }

    fn strategy_name(&self) -> &'static str {
        "Legacy"
    }
}
