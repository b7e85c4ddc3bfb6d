//! Transaction signer and sender.
//!
//! One hot wallet signs for both chains, so each chain gets its own sender
//! with its own nonce counter and gas strategy. Nonces are tracked locally
//! and resynced from the chain whenever a transaction reverts, times out
//! or fails to submit.

use crate::gas::{create_gas_strategy, GasSettings, GasStrategy, LegacyGasStrategy};
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{Log, TransactionRequest};
use alloy::signers::local::PrivateKeySigner;
use anyhow::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Local nonce counter.
pub struct NonceManager {
    current: AtomicU64,
}

impl NonceManager {
    pub fn new(initial_nonce: u64) -> Self {
        Self {
            current: AtomicU64::new(initial_nonce),
        }
    }

    /// Take the next nonce.
    #[inline]
    pub fn next(&self) -> u64 {
        self.current.fetch_add(1, Ordering::SeqCst)
    }

    #[inline]
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    /// Move forward to the chain's value, never backwards.
    pub fn sync(&self, chain_nonce: u64) {
        self.current.fetch_max(chain_nonce, Ordering::SeqCst);
    }

    /// Force the chain's value (after a dropped or reverted transaction).
    pub fn reset(&self, chain_nonce: u64) {
        self.current.store(chain_nonce, Ordering::SeqCst);
    }
}

/// A transaction to sign and submit.
#[derive(Debug, Clone)]
pub struct OutgoingTransaction {
    pub to: Address,
    pub calldata: Bytes,
    pub value: U256,
    /// Estimated by the node when absent.
    pub gas_limit: Option<u64>,
}

impl OutgoingTransaction {
    pub fn new(to: Address, calldata: Bytes) -> Self {
        Self {
            to,
            calldata,
            value: U256::ZERO,
            gas_limit: None,
        }
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }
}

/// Mined transaction, reduced to what the bot inspects.
#[derive(Debug, Clone)]
pub struct SubmittedTransaction {
    pub tx_hash: B256,
    pub success: bool,
    pub block_number: Option<u64>,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub gas_price: u128,
    pub logs: Vec<Log>,
}

impl SubmittedTransaction {
    /// Wei spent on gas.
    pub fn fee(&self) -> u128 {
        u128::from(self.gas_used).saturating_mul(self.gas_price)
    }
}

pub struct TransactionSenderBuilder {
    rpc_url: String,
    chain_id: u64,
    gas_strategy: Option<Box<dyn GasStrategy>>,
}

impl TransactionSenderBuilder {
    pub fn new(rpc_url: impl Into<String>, chain_id: u64) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            chain_id,
            gas_strategy: None,
        }
    }

    pub fn gas_strategy(mut self, strategy: Box<dyn GasStrategy>) -> Self {
        self.gas_strategy = Some(strategy);
        self
    }

    pub fn gas_settings(mut self, settings: &GasSettings) -> Self {
        self.gas_strategy = Some(create_gas_strategy(settings));
        self
    }

    pub async fn build(self, private_key: &str) -> Result<TransactionSender> {
        let signer: PrivateKeySigner = private_key.trim_start_matches("0x").parse()?;
        let address = signer.address();
        let wallet = EthereumWallet::from(signer);

        let provider = ProviderBuilder::new().on_http(self.rpc_url.parse()?);
        let initial_nonce = provider.get_transaction_count(address).await?;

        let gas_strategy = self
            .gas_strategy
            .unwrap_or_else(|| Box::new(LegacyGasStrategy::new(50_000_000_000)));

        info!(
            address = %address,
            chain_id = self.chain_id,
            initial_nonce,
            gas_strategy = gas_strategy.strategy_name(),
            "Transaction sender initialized"
        );

        Ok(TransactionSender {
            rpc_url: self.rpc_url,
            wallet,
            address,
            chain_id: self.chain_id,
            nonce_manager: NonceManager::new(initial_nonce),
            gas_strategy,
        })
    }
}

/// Signs with the hot wallet and submits to one chain.
pub struct TransactionSender {
    rpc_url: String,
    wallet: EthereumWallet,
    address: Address,
    chain_id: u64,
    nonce_manager: NonceManager,
    gas_strategy: Box<dyn GasStrategy>,
}

impl TransactionSender {
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn current_nonce(&self) -> u64 {
        self.nonce_manager.current()
    }

    fn request(&self, tx: &OutgoingTransaction) -> TransactionRequest {
        TransactionRequest::default()
            .with_from(self.address)
            .with_to(tx.to)
            .with_input(tx.calldata.clone())
            .with_value(tx.value)
            .with_chain_id(self.chain_id)
    }

    /// Ask the node how much gas `tx` needs when sent from the hot wallet.
    pub async fn estimate_gas(&self, tx: &OutgoingTransaction) -> Result<u64> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.parse()?);
        let estimate = provider.estimate_gas(self.request(tx)).await?;
        Ok(estimate)
    }

    /// Sign, submit and wait up to `timeout` for one confirmation.
    ///
    /// `Ok(None)` means the receipt did not arrive in time. The transaction
    /// may still be mined later.
    pub async fn submit(
        &self,
        tx: OutgoingTransaction,
        timeout: Duration,
    ) -> Result<Option<SubmittedTransaction>> {
        let started = Instant::now();

        let gas_limit = match tx.gas_limit {
            Some(limit) => limit,
            None => self.estimate_gas(&tx).await?,
        };
        let gas_params = self.gas_strategy.fetch_params(&self.rpc_url).await?;
        let nonce = self.nonce_manager.next();

        let mut request = self
            .request(&tx)
            .with_nonce(nonce)
            .with_gas_limit(gas_limit);
        self.gas_strategy.apply_gas(&mut request, &gas_params);

        debug!(
            to = %tx.to,
            nonce,
            gas_limit,
            gas_price = gas_params.effective_gas_price(),
            value = %tx.value,
            "Sending transaction"
        );

        let provider = ProviderBuilder::new()
            .wallet(self.wallet.clone())
            .on_http(self.rpc_url.parse()?);

        let pending = match provider.send_transaction(request).await {
            Ok(pending) => pending,
            Err(e) => {
                self.sync_nonce().await;
                return Err(e.into());
            }
        };
        let tx_hash = *pending.tx_hash();
        info!(tx_hash = %tx_hash, chain_id = self.chain_id, "Transaction submitted");

        let receipt = match tokio::time::timeout(timeout, pending.get_receipt()).await {
            Ok(receipt) => receipt?,
            Err(_) => {
                warn!(
                    tx_hash = %tx_hash,
                    timeout_ms = timeout.as_millis() as u64,
                    "Timed out waiting for receipt"
                );
                self.sync_nonce().await;
                return Ok(None);
            }
        };

        let submitted = SubmittedTransaction {
            tx_hash,
            success: receipt.status(),
            block_number: receipt.block_number,
            gas_limit,
            gas_used: receipt.gas_used,
            gas_price: receipt.effective_gas_price,
            logs: receipt.inner.logs().to_vec(),
        };

        if submitted.success {
            debug!(
                tx_hash = %tx_hash,
                block = submitted.block_number.unwrap_or_default(),
                gas_used = submitted.gas_used,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Transaction confirmed"
            );
        } else {
            warn!(tx_hash = %tx_hash, "Transaction reverted, syncing nonce");
            self.sync_nonce().await;
        }

        Ok(Some(submitted))
    }

    /// Reload the nonce from the chain's pending count.
    pub async fn sync_nonce(&self) {
        let provider = match self.rpc_url.parse() {
            Ok(url) => ProviderBuilder::new().on_http(url),
            Err(e) => {
                warn!(error = %e, "Invalid RPC URL, nonce not synced");
                return;
            }
        };
        match provider.get_transaction_count(self.address).pending().await {
            Ok(chain_nonce) => {
                self.nonce_manager.reset(chain_nonce);
                debug!(nonce = chain_nonce, "Nonce synced from chain");
            }
            Err(e) => {
                warn!(error = %e, "Failed to sync nonce from chain");
            }
        }
    }
}

impl std::fmt::Debug for TransactionSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionSender")
            .field("address", &self.address)
            .field("chain_id", &self.chain_id)
            .field("rpc_url", &self.rpc_url)
            .field("gas_strategy", &self.gas_strategy.strategy_name())
            .finish_non_exhaustive()
    }
}
