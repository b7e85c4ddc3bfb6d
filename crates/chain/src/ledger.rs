//! What the bot needs from the target chain.
//!
//! `TargetChainClient` implements this against a live node. The trait keeps
//! discovery, filtering and execution testable without one.

use alloy::primitives::{Address, Bytes, B256, U256};
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Per-account figures returned by the liquidator's `getAccountsDetails`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountDetails {
    pub account: Address,
    pub borrow_usd: U256,
    pub max_borrow_usd: U256,
    pub collateral_usd: U256,
    pub is_liquidatable: bool,
}

/// Arguments of one `liquidate` call, already paired with the won bid.
#[derive(Debug, Clone)]
pub struct LiquidationCall {
    pub accounts: Vec<Address>,
    pub dapp_id: U256,
    pub bid_amount: U256,
    pub signed_data_timestamp_cutoff: u32,
    pub award_signature: Bytes,
    /// One list of encoded signed data per updated feed.
    pub signed_data: Vec<Vec<Bytes>>,
}

/// Mined liquidation transaction.
#[derive(Debug, Clone)]
pub struct LiquidationReceipt {
    pub tx_hash: B256,
    pub success: bool,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub gas_price: u128,
    /// Borrowers named by the market's `AbsorbCollateral` events.
    pub absorbed_borrowers: Vec<Address>,
}

#[async_trait]
pub trait TargetLedger: Send + Sync {
    async fn block_number(&self) -> Result<u64>;

    /// Accounts that withdrew from the market in `[from_block, to_block]`.
    async fn withdrawers(&self, from_block: u64, to_block: u64) -> Result<Vec<Address>>;

    /// Resolve dAPI name hashes to data feed ids, in input order.
    async fn data_feed_ids(&self, dapi_name_hashes: &[B256]) -> Result<Vec<B256>>;

    /// Registry details for each data feed id, in input order. `None` for
    /// feeds the registry does not know.
    async fn data_feed_details(
        &self,
        data_feed_ids: &[B256],
    ) -> Result<Vec<Option<Vec<(Address, B256)>>>>;

    /// Account details, evaluated after applying `price_updates` in a
    /// simulation when any are given.
    async fn accounts_details(
        &self,
        accounts: &[Address],
        price_updates: &[Bytes],
    ) -> Result<Vec<AccountDetails>>;

    /// Profit of liquidating `accounts` after `price_updates`, in wei.
    async fn expected_profit(&self, accounts: &[Address], price_updates: &[Bytes])
        -> Result<U256>;

    async fn estimate_liquidation_gas(&self, call: &LiquidationCall) -> Result<u64>;

    /// Submit and wait up to `timeout`. `Ok(None)` on timeout.
    async fn submit_liquidation(
        &self,
        call: &LiquidationCall,
        gas_limit: u64,
        timeout: Duration,
    ) -> Result<Option<LiquidationReceipt>>;
}
