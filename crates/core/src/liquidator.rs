//! Liquidation executor for auction-won OEV updates.

use alloy::primitives::{Address, B256};
use oev_liquidator_chain::gas::gas_limit_with_buffer;
use oev_liquidator_chain::{LiquidationCall, LiquidationReceipt, TargetLedger};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// Gas limit as a percentage of the node's estimate. Estimates for
/// multi-account liquidations have run out of gas before.
pub const GAS_LIMIT_PERCENT_OF_ESTIMATE: u64 = 200;

/// Result of one liquidation transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiquidationOutcome {
    /// The transaction was mined successfully. Accounts the market did not
    /// absorb are listed in `not_liquidated`.
    Completed {
        tx_hash: B256,
        liquidated: Vec<Address>,
        not_liquidated: Vec<Address>,
    },
    Failed {
        reason: FailureReason,
        tx_hash: Option<B256>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    GasEstimation,
    Submission,
    ReceiptTimeout,
    Reverted,
}

impl LiquidationOutcome {
    /// Hash to report as fulfillment, only for mined successful transactions.
    pub fn fulfilled_tx_hash(&self) -> Option<B256> {
        match self {
            Self::Completed { tx_hash, .. } => Some(*tx_hash),
            Self::Failed { .. } => None,
        }
    }
}

/// Gas figures of a mined liquidation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GasStats {
    pub gas_used: u64,
    pub estimated_gas: u64,
    pub gas_limit: u64,
    pub gas_used_to_estimate_percentage: f64,
    pub gas_used_to_limit_percentage: f64,
}

impl GasStats {
    pub fn new(gas_used: u64, estimated_gas: u64, gas_limit: u64) -> Self {
        let percentage = |part: u64, whole: u64| {
            if whole == 0 {
                0.0
            } else {
                part as f64 * 100.0 / whole as f64
            }
        };
        Self {
            gas_used,
            estimated_gas,
            gas_limit,
            gas_used_to_estimate_percentage: percentage(gas_used, estimated_gas),
            gas_used_to_limit_percentage: percentage(gas_used, gas_limit),
        }
    }
}

/// Split `accounts` by whether the market absorbed them.
pub fn reconcile_absorbed(
    accounts: &[Address],
    absorbed: &[Address],
) -> (Vec<Address>, Vec<Address>) {
    let absorbed: HashSet<Address> = absorbed.iter().copied().collect();
    accounts
        .iter()
        .copied()
        .partition(|account| absorbed.contains(account))
}

pub struct Liquidator {
    ledger: Arc<dyn TargetLedger>,
    transaction_timeout: Duration,
}

impl Liquidator {
    pub fn new(ledger: Arc<dyn TargetLedger>, transaction_timeout: Duration) -> Self {
        Self {
            ledger,
            transaction_timeout,
        }
    }

    /// Send the liquidation and wait for its receipt.
    #[instrument(skip_all, fields(accounts = call.accounts.len(), bid_amount = %call.bid_amount))]
    pub async fn liquidate(&self, call: &LiquidationCall) -> LiquidationOutcome {
        let estimated_gas = match self.ledger.estimate_liquidation_gas(call).await {
            Ok(estimate) => estimate,
            Err(e) => {
                error!(error = %format!("{e:#}"), "Unexpected error while preparing the liquidation");
                return LiquidationOutcome::Failed {
                    reason: FailureReason::GasEstimation,
                    tx_hash: None,
                };
            }
        };
        let gas_limit = gas_limit_with_buffer(estimated_gas, GAS_LIMIT_PERCENT_OF_ESTIMATE);
        info!(estimated_gas, gas_limit, "Gas limits");

        let receipt = match self
            .ledger
            .submit_liquidation(call, gas_limit, self.transaction_timeout)
            .await
        {
            Ok(Some(receipt)) => receipt,
            Ok(None) => {
                error!(
                    timeout_ms = self.transaction_timeout.as_millis() as u64,
                    "Waiting for transaction receipt timed out"
                );
                return LiquidationOutcome::Failed {
                    reason: FailureReason::ReceiptTimeout,
                    tx_hash: None,
                };
            }
            Err(e) => {
                error!(error = %format!("{e:#}"), "Failed to send the liquidation");
                return LiquidationOutcome::Failed {
                    reason: FailureReason::Submission,
                    tx_hash: None,
                };
            }
        };

        self.reconcile(call, &receipt, GasStats::new(receipt.gas_used, estimated_gas, gas_limit))
    }

    fn reconcile(
        &self,
        call: &LiquidationCall,
        receipt: &LiquidationReceipt,
        gas: GasStats,
    ) -> LiquidationOutcome {
        let tx_hash = receipt.tx_hash;
        info!(
            tx_hash = %tx_hash,
            gas_used = gas.gas_used,
            estimated_gas = gas.estimated_gas,
            gas_limit = gas.gas_limit,
            gas_price = receipt.gas_price,
            gas_used_to_estimate_pct = gas.gas_used_to_estimate_percentage,
            gas_used_to_limit_pct = gas.gas_used_to_limit_percentage,
            "Gas usage"
        );

        if !receipt.success {
            error!(tx_hash = %tx_hash, "Liquidation reverted");
            return LiquidationOutcome::Failed {
                reason: FailureReason::Reverted,
                tx_hash: Some(tx_hash),
            };
        }

        let (liquidated, not_liquidated) =
            reconcile_absorbed(&call.accounts, &receipt.absorbed_borrowers);

        if liquidated.is_empty() {
            error!(tx_hash = %tx_hash, failed = ?not_liquidated, "No liquidation was successful");
        } else if !not_liquidated.is_empty() {
            warn!(
                tx_hash = %tx_hash,
                failed = ?not_liquidated,
                liquidated = ?liquidated,
                "Some liquidations were not successful"
            );
        } else {
            info!(tx_hash = %tx_hash, liquidated = ?liquidated, "Liquidation successful");
        }

        LiquidationOutcome::Completed {
            tx_hash,
            liquidated,
            not_liquidated,
        }
    }
}
