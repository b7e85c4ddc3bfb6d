//! Gas pricing for outgoing transactions.
//!
//! Liquidations on the target chain and bids on the OEV network are priced
//! per transaction from the node's fee data. The target chain defaults to a
//! legacy `gasPrice`; the OEV network may use EIP-1559 fields instead.

mod eip1559;
mod legacy;

pub use eip1559::Eip1559GasStrategy;
pub use legacy::LegacyGasStrategy;

use alloy::rpc::types::TransactionRequest;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

const GWEI: f64 = 1e9;

/// Gas parameters fetched from the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GasParams {
    Legacy {
        gas_price: u128,
    },
    Eip1559 {
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
        base_fee: u128,
    },
}

impl GasParams {
    /// Price per gas unit used for cost reporting.
    pub fn effective_gas_price(&self) -> u128 {
        match self {
            GasParams::Legacy { gas_price } => *gas_price,
            GasParams::Eip1559 {
                max_fee_per_gas, ..
            } => *max_fee_per_gas,
        }
    }
}

/// Gas pricing strategy used by a transaction sender.
#[async_trait]
pub trait GasStrategy: Send + Sync + Debug {
    /// Fetch current fee data from the node behind `rpc_url`.
    async fn fetch_params(&self, rpc_url: &str) -> Result<GasParams>;

    /// Write the fee fields of `params` into `tx`.
    fn apply_gas(&self, tx: &mut TransactionRequest, params: &GasParams);

    fn strategy_name(&self) -> &'static str;
}

/// Which fee fields a chain expects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GasPricing {
    #[default]
    Legacy,
    Eip1559,
}

/// Per-chain gas settings, read from the deployment file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasSettings {
    #[serde(default)]
    pub pricing: GasPricing,
    /// Upper bound on the price paid per gas unit.
    #[serde(default = "default_max_gas_price_gwei")]
    pub max_gas_price_gwei: f64,
    /// Tip used when the node does not suggest one (EIP-1559 only).
    #[serde(default = "default_priority_fee_gwei")]
    pub priority_fee_gwei: f64,
}

fn default_max_gas_price_gwei() -> f64 {
    50.0
}

fn default_priority_fee_gwei() -> f64 {
    0.001
}

impl Default for GasSettings {
    fn default() -> Self {
        Self {
            pricing: GasPricing::default(),
            max_gas_price_gwei: default_max_gas_price_gwei(),
            priority_fee_gwei: default_priority_fee_gwei(),
        }
    }
}

/// Build the strategy described by `settings`.
pub fn create_gas_strategy(settings: &GasSettings) -> Box<dyn GasStrategy> {
    let max_price = (settings.max_gas_price_gwei * GWEI) as u128;
    match settings.pricing {
        GasPricing::Eip1559 => Box::new(
            Eip1559GasStrategy::new((settings.priority_fee_gwei * GWEI) as u128, 2.0)
                .with_max_fee_cap(max_price),
        ),
        GasPricing::Legacy => Box::new(LegacyGasStrategy::new(max_price)),
    }
}

/// Scale a gas estimate by `percent` (200 doubles it).
pub fn gas_limit_with_buffer(estimate: u64, percent: u64) -> u64 {
    estimate.saturating_mul(percent) / 100
}
