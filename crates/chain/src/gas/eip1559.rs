//! EIP-1559 pricing: `max_fee = base_fee * multiplier + tip`, capped.

use super::{GasParams, GasStrategy};
use alloy::eips::BlockNumberOrTag;
use alloy::network::TransactionBuilder;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use anyhow::{anyhow, Result};
use async_trait::async_trait;

#[derive(Debug)]
pub struct Eip1559GasStrategy {
    /// Tip in wei used when the node cannot suggest one.
    default_priority_fee: u128,
    /// Headroom on the latest base fee (2.0 survives several full blocks).
    max_fee_multiplier: f64,
    /// Ceiling for `max_fee_per_gas` in wei.
    max_fee_cap: u128,
}

impl Eip1559GasStrategy {
    pub fn new(default_priority_fee: u128, max_fee_multiplier: f64) -> Self {
        Self {
            default_priority_fee,
            max_fee_multiplier,
            max_fee_cap: 500_000_000_000,
        }
    }

    pub fn with_max_fee_cap(mut self, cap: u128) -> Self {
        self.max_fee_cap = cap;
        self
    }

    fn calculate_max_fee(&self, base_fee: u128, priority_fee: u128) -> u128 {
        let max_fee = ((base_fee as f64) * self.max_fee_multiplier) as u128 + priority_fee;
        max_fee.min(self.max_fee_cap)
    }
}

#[async_trait]
impl GasStrategy for Eip1559GasStrategy {
    async fn fetch_params(&self, rpc_url: &str) -> Result<GasParams> {
        let provider = ProviderBuilder::new().on_http(rpc_url.parse()?);

        let block = provider
            .get_block_by_number(BlockNumberOrTag::Latest)
            .await?
            .ok_or_else(|| anyhow!("Latest block unavailable"))?;
        let base_fee = block
            .header
            .base_fee_per_gas
            .map(u128::from)
            .ok_or_else(|| anyhow!("Chain does not report a base fee"))?;

        let priority_fee = provider
            .get_max_priority_fee_per_gas()
            .await
            .unwrap_or(self.default_priority_fee);

        Ok(GasParams::Eip1559 {
            max_fee_per_gas: self.calculate_max_fee(base_fee, priority_fee),
            max_priority_fee_per_gas: priority_fee.min(self.max_fee_cap),
            base_fee,
        })
    }

    fn apply_gas(&self, tx: &mut TransactionRequest, params: &GasParams) {
        match params {
            GasParams::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
                ..
            } => {
                tx.set_max_fee_per_gas(*max_fee_per_gas);
                tx.set_max_priority_fee_per_gas(*max_priority_fee_per_gas);
            }
            GasParams::Legacy { gas_price } => {
                tx.set_max_fee_per_gas(*gas_price);
                tx.set_max_priority_fee_per_gas(self.default_priority_fee.min(*gas_price));
            }
        }
    }

    fn strategy_name(&self) -> &'static str {
        "EIP-1559"
    }
}
