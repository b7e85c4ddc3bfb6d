//! In-memory stand-ins for the chain, the OEV network and the signed APIs.

use alloy::primitives::{Address, Bytes, B256, U256};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use oev_liquidator_api::{SignedApiError, SignedData, SignedDataSource};
use oev_liquidator_chain::{
    AccountDetails, AuctionHouse, AwardedBid, BidSubmission, LiquidationCall, LiquidationReceipt,
    NetworkReceipt, TargetLedger,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crate::auction::derive_bid_id;

pub fn account(
    byte: u8,
    borrow: u64,
    max_borrow: u64,
    collateral: u64,
    is_liquidatable: bool,
) -> AccountDetails {
    AccountDetails {
        account: Address::repeat_byte(byte),
        borrow_usd: U256::from(borrow),
        max_borrow_usd: U256::from(max_borrow),
        collateral_usd: U256::from(collateral),
        is_liquidatable,
    }
}

#[derive(Debug, Clone)]
pub enum LiquidationBehavior {
    /// Mined successfully. `None` absorbs every account.
    Success { absorbed: Option<Vec<Address>> },
    Revert,
    Timeout,
    Error,
    /// Never returns.
    Hang,
}

pub struct FakeLedger {
    block_number: AtomicU64,
    withdrawals: Mutex<Vec<(u64, Address)>>,
    failing_log_start: Mutex<Option<u64>>,
    log_queries: Mutex<Vec<(u64, u64)>>,

    accounts: Mutex<HashMap<Address, AccountDetails>>,
    /// Figures after the simulated price update.
    updated_accounts: Mutex<HashMap<Address, AccountDetails>>,
    failing_details_calls: Mutex<HashSet<usize>>,
    details_calls: AtomicUsize,
    price_updates_seen: Mutex<Vec<Vec<Bytes>>>,

    data_feed_ids: Mutex<Option<HashMap<B256, B256>>>,
    feed_details: Mutex<HashMap<B256, Vec<(Address, B256)>>>,
    feed_details_queries: Mutex<Vec<Vec<B256>>>,

    expected_profit: Mutex<U256>,
    gas_estimate: AtomicU64,
    liquidation: Mutex<LiquidationBehavior>,
    submissions: Mutex<Vec<(LiquidationCall, u64)>>,
}

impl Default for FakeLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeLedger {
    pub fn new() -> Self {
        Self {
            block_number: AtomicU64::new(1_000),
            withdrawals: Mutex::new(Vec::new()),
            failing_log_start: Mutex::new(None),
            log_queries: Mutex::new(Vec::new()),
            accounts: Mutex::new(HashMap::new()),
            updated_accounts: Mutex::new(HashMap::new()),
            failing_details_calls: Mutex::new(HashSet::new()),
            details_calls: AtomicUsize::new(0),
            price_updates_seen: Mutex::new(Vec::new()),
            data_feed_ids: Mutex::new(Some(HashMap::new())),
            feed_details: Mutex::new(HashMap::new()),
            feed_details_queries: Mutex::new(Vec::new()),
            expected_profit: Mutex::new(U256::ZERO),
            gas_estimate: AtomicU64::new(500_000),
            liquidation: Mutex::new(LiquidationBehavior::Success { absorbed: None }),
            submissions: Mutex::new(Vec::new()),
        }
    }

    pub fn set_block_number(&self, block: u64) {
        self.block_number.store(block, Ordering::SeqCst);
    }

    pub fn add_withdrawal(&self, block: u64, account: Address) {
        self.withdrawals.lock().push((block, account));
    }

    /// Fail log queries starting at `from_block`.
    pub fn fail_logs_from(&self, from_block: u64) {
        *self.failing_log_start.lock() = Some(from_block);
    }

    pub fn log_queries(&self) -> Vec<(u64, u64)> {
        self.log_queries.lock().clone()
    }

    pub fn set_account(&self, details: AccountDetails) {
        self.accounts.lock().insert(details.account, details);
    }

    /// Figures reported when price updates are applied first.
    pub fn set_updated_account(&self, details: AccountDetails) {
        self.updated_accounts.lock().insert(details.account, details);
    }

    /// Fail the `index`-th (0-based) `accounts_details` call.
    pub fn fail_details_call(&self, index: usize) {
        self.failing_details_calls.lock().insert(index);
    }

    pub fn details_calls(&self) -> usize {
        self.details_calls.load(Ordering::SeqCst)
    }

    pub fn price_updates_seen(&self) -> Vec<Vec<Bytes>> {
        self.price_updates_seen.lock().clone()
    }

    pub fn set_data_feed_id(&self, dapi_name_hash: B256, data_feed_id: B256) {
        if let Some(ids) = self.data_feed_ids.lock().as_mut() {
            ids.insert(dapi_name_hash, data_feed_id);
        }
    }

    pub fn fail_data_feed_ids(&self) {
        *self.data_feed_ids.lock() = None;
    }

    pub fn set_feed_details(&self, data_feed_id: B256, details: Vec<(Address, B256)>) {
        self.feed_details.lock().insert(data_feed_id, details);
    }

    pub fn feed_details_queries(&self) -> Vec<Vec<B256>> {
        self.feed_details_queries.lock().clone()
    }

    pub fn set_expected_profit(&self, profit: U256) {
        *self.expected_profit.lock() = profit;
    }

    pub fn set_liquidation(&self, behavior: LiquidationBehavior) {
        *self.liquidation.lock() = behavior;
    }

    pub fn submissions(&self) -> Vec<(LiquidationCall, u64)> {
        self.submissions.lock().clone()
    }
}

#[async_trait]
impl TargetLedger for FakeLedger {
    async fn block_number(&self) -> Result<u64> {
        Ok(self.block_number.load(Ordering::SeqCst))
    }

    async fn withdrawers(&self, from_block: u64, to_block: u64) -> Result<Vec<Address>> {
        self.log_queries.lock().push((from_block, to_block));
        if *self.failing_log_start.lock() == Some(from_block) {
            bail!("log query {from_block}..{to_block} failed");
        }
        Ok(self
            .withdrawals
            .lock()
            .iter()
            .filter(|(block, _)| (from_block..=to_block).contains(block))
            .map(|(_, account)| *account)
            .collect())
    }

    async fn data_feed_ids(&self, dapi_name_hashes: &[B256]) -> Result<Vec<B256>> {
        let ids = self.data_feed_ids.lock();
        let ids = ids.as_ref().ok_or_else(|| anyhow!("multicall failed"))?;
        Ok(dapi_name_hashes
            .iter()
            .map(|hash| ids.get(hash).copied().unwrap_or_default())
            .collect())
    }

    async fn data_feed_details(
        &self,
        data_feed_ids: &[B256],
    ) -> Result<Vec<Option<Vec<(Address, B256)>>>> {
        self.feed_details_queries.lock().push(data_feed_ids.to_vec());
        let details = self.feed_details.lock();
        Ok(data_feed_ids.iter().map(|id| details.get(id).cloned()).collect())
    }

    async fn accounts_details(
        &self,
        accounts: &[Address],
        price_updates: &[Bytes],
    ) -> Result<Vec<AccountDetails>> {
        let call = self.details_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_details_calls.lock().contains(&call) {
            bail!("getAccountsDetails call {call} failed");
        }
        self.price_updates_seen.lock().push(price_updates.to_vec());

        let base = self.accounts.lock();
        let updated_accounts = self.updated_accounts.lock();
        Ok(accounts
            .iter()
            .map(|account| {
                let updated = (!price_updates.is_empty())
                    .then(|| updated_accounts.get(account))
                    .flatten();
                updated
                    .or_else(|| base.get(account))
                    .cloned()
                    .unwrap_or(AccountDetails {
                        account: *account,
                        borrow_usd: U256::ZERO,
                        max_borrow_usd: U256::ZERO,
                        collateral_usd: U256::ZERO,
                        is_liquidatable: false,
                    })
            })
            .collect())
    }

    async fn expected_profit(&self, _accounts: &[Address], price_updates: &[Bytes]) -> Result<U256> {
        self.price_updates_seen.lock().push(price_updates.to_vec());
        Ok(*self.expected_profit.lock())
    }

    async fn estimate_liquidation_gas(&self, _call: &LiquidationCall) -> Result<u64> {
        Ok(self.gas_estimate.load(Ordering::SeqCst))
    }

    async fn submit_liquidation(
        &self,
        call: &LiquidationCall,
        gas_limit: u64,
        _timeout: Duration,
    ) -> Result<Option<LiquidationReceipt>> {
        self.submissions.lock().push((call.clone(), gas_limit));
        let behavior = self.liquidation.lock().clone();
        let receipt = |success: bool, absorbed: Vec<Address>| LiquidationReceipt {
            tx_hash: B256::repeat_byte(0x7f),
            success,
            gas_limit,
            gas_used: gas_limit / 3,
            gas_price: 1_000_000,
            absorbed_borrowers: absorbed,
        };

        match behavior {
            LiquidationBehavior::Success { absorbed } => Ok(Some(receipt(
                true,
                absorbed.unwrap_or_else(|| call.accounts.clone()),
            ))),
            LiquidationBehavior::Revert => Ok(Some(receipt(false, Vec::new()))),
            LiquidationBehavior::Timeout => Ok(None),
            LiquidationBehavior::Error => bail!("nonce too low"),
            LiquidationBehavior::Hang => {
                std::future::pending::<()>().await;
                Ok(None)
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum AwardBehavior {
    Never,
    /// Award the most recent bid for the topic after this many empty polls.
    WinAfter(u32),
    /// Award another bidder.
    LoseTo(B256),
}

pub struct FakeAuctionHouse {
    bid_receipt: Mutex<Option<NetworkReceipt>>,
    /// How long a bid takes to confirm.
    bid_delay: Mutex<Duration>,
    placed_bids: Mutex<Vec<BidSubmission>>,
    award: Mutex<AwardBehavior>,
    award_queries: AtomicU32,
    reports: Mutex<Vec<(B256, B256, B256)>>,
}

impl Default for FakeAuctionHouse {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeAuctionHouse {
    pub fn new() -> Self {
        Self {
            bid_receipt: Mutex::new(Some(NetworkReceipt {
                tx_hash: B256::repeat_byte(0xb1),
                success: true,
            })),
            bid_delay: Mutex::new(Duration::ZERO),
            placed_bids: Mutex::new(Vec::new()),
            award: Mutex::new(AwardBehavior::WinAfter(0)),
            award_queries: AtomicU32::new(0),
            reports: Mutex::new(Vec::new()),
        }
    }

    pub fn award_signature() -> Bytes {
        Bytes::from_static(&[0xa5; 65])
    }

    pub fn set_bid_receipt(&self, receipt: Option<NetworkReceipt>) {
        *self.bid_receipt.lock() = receipt;
    }

    pub fn set_bid_delay(&self, delay: Duration) {
        *self.bid_delay.lock() = delay;
    }

    pub fn set_award(&self, behavior: AwardBehavior) {
        *self.award.lock() = behavior;
    }

    pub fn placed_bids(&self) -> Vec<BidSubmission> {
        self.placed_bids.lock().clone()
    }

    pub fn award_queries(&self) -> u32 {
        self.award_queries.load(Ordering::SeqCst)
    }

    pub fn reports(&self) -> Vec<(B256, B256, B256)> {
        self.reports.lock().clone()
    }
}

#[async_trait]
impl AuctionHouse for FakeAuctionHouse {
    fn bidder(&self) -> Address {
        Address::repeat_byte(0xb1)
    }

    async fn block_number(&self) -> Result<u64> {
        Ok(5_000_000)
    }

    async fn place_bid(
        &self,
        bid: &BidSubmission,
        _timeout: Duration,
    ) -> Result<Option<NetworkReceipt>> {
        self.placed_bids.lock().push(bid.clone());
        let delay = *self.bid_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(*self.bid_receipt.lock())
    }

    async fn awarded_bids(
        &self,
        bid_topic: B256,
        _from_block: u64,
        _to_block: u64,
    ) -> Result<Vec<AwardedBid>> {
        let query = self.award_queries.fetch_add(1, Ordering::SeqCst);
        let award = |bid_id| AwardedBid {
            bidder: self.bidder(),
            bid_topic,
            bid_id,
            award_details: Self::award_signature(),
            block_number: Some(5_000_000),
        };

        match *self.award.lock() {
            AwardBehavior::Never => Ok(Vec::new()),
            AwardBehavior::LoseTo(bid_id) => Ok(vec![award(bid_id)]),
            AwardBehavior::WinAfter(empty_polls) if query >= empty_polls => Ok(self
                .placed_bids
                .lock()
                .iter()
                .rev()
                .find(|bid| bid.bid_topic == bid_topic)
                .map(|bid| award(derive_bid_id(self.bidder(), bid_topic, &bid.bid_details)))
                .into_iter()
                .collect()),
            AwardBehavior::WinAfter(_) => Ok(Vec::new()),
        }
    }

    async fn report_fulfillment(
        &self,
        bid_topic: B256,
        bid_details_hash: B256,
        tx_hash: B256,
        _timeout: Duration,
    ) -> Result<Option<NetworkReceipt>> {
        self.reports.lock().push((bid_topic, bid_details_hash, tx_hash));
        Ok(Some(NetworkReceipt {
            tx_hash: B256::repeat_byte(0xf0),
            success: true,
        }))
    }
}

/// Signed values served per airnode. Unknown airnodes fail.
#[derive(Default)]
pub struct FakeSignedData {
    values: Mutex<HashMap<Address, HashMap<B256, SignedData>>>,
    requests: AtomicUsize,
}

impl FakeSignedData {
    pub fn serve(&self, beacon_id: B256, data: SignedData) {
        self.values
            .lock()
            .entry(data.airnode)
            .or_default()
            .insert(beacon_id, data);
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignedDataSource for FakeSignedData {
    async fn fetch_signed_data(
        &self,
        airnode: Address,
    ) -> Result<HashMap<B256, SignedData>, SignedApiError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.values
            .lock()
            .get(&airnode)
            .cloned()
            .ok_or(SignedApiError::NoEndpoints)
    }
}
