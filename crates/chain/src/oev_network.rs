//! The OEV network, where bids for update rights are placed and awarded.

use crate::bindings::{encode_fulfillment_details, IOevAuctionHouse};
use crate::gas::GasSettings;
use crate::signer::{OutgoingTransaction, TransactionSender, TransactionSenderBuilder};
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::Filter;
use alloy::sol_types::{SolCall, SolEvent};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Arguments of `placeBidWithExpiration`.
#[derive(Debug, Clone)]
pub struct BidSubmission {
    pub bid_topic: B256,
    /// Chain the won update will be executed on.
    pub chain_id: u64,
    pub amount: U256,
    pub bid_details: Bytes,
    pub expiration_timestamp: u32,
}

/// A decoded `AwardedBid` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwardedBid {
    pub bidder: Address,
    pub bid_topic: B256,
    pub bid_id: B256,
    pub award_details: Bytes,
    pub block_number: Option<u64>,
}

/// Outcome of a mined OEV network transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkReceipt {
    pub tx_hash: B256,
    pub success: bool,
}

#[async_trait]
pub trait AuctionHouse: Send + Sync {
    /// Address that bids are placed from.
    fn bidder(&self) -> Address;

    async fn block_number(&self) -> Result<u64>;

    /// Submit a bid and wait up to `timeout`. `Ok(None)` on timeout.
    async fn place_bid(
        &self,
        bid: &BidSubmission,
        timeout: Duration,
    ) -> Result<Option<NetworkReceipt>>;

    /// `AwardedBid` events for `bid_topic` in `[from_block, to_block]`.
    async fn awarded_bids(
        &self,
        bid_topic: B256,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<AwardedBid>>;

    /// Report that the awarded update was used in `tx_hash`.
    async fn report_fulfillment(
        &self,
        bid_topic: B256,
        bid_details_hash: B256,
        tx_hash: B256,
        timeout: Duration,
    ) -> Result<Option<NetworkReceipt>>;
}

pub struct OevNetworkClient {
    rpc_url: String,
    auction_house: Address,
    sender: TransactionSender,
}

impl OevNetworkClient {
    pub async fn connect(
        rpc_url: &str,
        chain_id: u64,
        auction_house: Address,
        private_key: &str,
        gas: &GasSettings,
    ) -> Result<Self> {
        let provider = ProviderBuilder::new().on_http(rpc_url.parse()?);
        let block = provider
            .get_block_number()
            .await
            .context("OEV network RPC unreachable")?;

        let sender = TransactionSenderBuilder::new(rpc_url, chain_id)
            .gas_settings(gas)
            .build(private_key)
            .await?;

        info!(block, chain_id, auction_house = %auction_house, "OEV network client connected");

        Ok(Self {
            rpc_url: rpc_url.to_string(),
            auction_house,
            sender,
        })
    }

    fn read_provider(&self) -> Result<impl Provider> {
        Ok(ProviderBuilder::new().on_http(self.rpc_url.parse()?))
    }
}

fn place_bid_calldata(bid: &BidSubmission) -> Bytes {
    IOevAuctionHouse::placeBidWithExpirationCall {
        bidTopic: bid.bid_topic,
        chainId: U256::from(bid.chain_id),
        bidAmount: bid.amount,
        bidDetails: bid.bid_details.clone(),
        maxCollateralAmount: U256::MAX,
        maxProtocolFeeAmount: U256::MAX,
        expirationTimestamp: bid.expiration_timestamp,
    }
    .abi_encode()
    .into()
}

#[async_trait]
impl AuctionHouse for OevNetworkClient {
    fn bidder(&self) -> Address {
        self.sender.address()
    }

    async fn block_number(&self) -> Result<u64> {
        Ok(self.read_provider()?.get_block_number().await?)
    }

    #[instrument(skip_all, fields(bid_topic = %bid.bid_topic, amount = %bid.amount))]
    async fn place_bid(
        &self,
        bid: &BidSubmission,
        timeout: Duration,
    ) -> Result<Option<NetworkReceipt>> {
        let tx = OutgoingTransaction::new(self.auction_house, place_bid_calldata(bid));
        Ok(self
            .sender
            .submit(tx, timeout)
            .await?
            .map(|submitted| NetworkReceipt {
                tx_hash: submitted.tx_hash,
                success: submitted.success,
            }))
    }

    async fn awarded_bids(
        &self,
        bid_topic: B256,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<AwardedBid>> {
        let filter = Filter::new()
            .address(self.auction_house)
            .event_signature(IOevAuctionHouse::AwardedBid::SIGNATURE_HASH)
            .topic2(bid_topic)
            .from_block(from_block)
            .to_block(to_block);

        let logs = self.read_provider()?.get_logs(&filter).await?;
        debug!(count = logs.len(), from_block, to_block, "Fetched AwardedBid logs");

        Ok(logs
            .iter()
            .filter_map(|log| {
                let decoded = log.log_decode::<IOevAuctionHouse::AwardedBid>().ok()?;
                let event = decoded.inner.data;
                Some(AwardedBid {
                    bidder: event.bidder,
                    bid_topic: event.bidTopic,
                    bid_id: event.bidId,
                    award_details: event.awardDetails,
                    block_number: log.block_number,
                })
            })
            .collect())
    }

    async fn report_fulfillment(
        &self,
        bid_topic: B256,
        bid_details_hash: B256,
        tx_hash: B256,
        timeout: Duration,
    ) -> Result<Option<NetworkReceipt>> {
        let calldata: Bytes = IOevAuctionHouse::reportFulfillmentCall {
            bidTopic: bid_topic,
            bidDetailsHash: bid_details_hash,
            fulfillmentDetails: encode_fulfillment_details(tx_hash),
        }
        .abi_encode()
        .into();

        let tx = OutgoingTransaction::new(self.auction_house, calldata);
        Ok(self
            .sender
            .submit(tx, timeout)
            .await?
            .map(|submitted| NetworkReceipt {
                tx_hash: submitted.tx_hash,
                success: submitted.success,
            }))
    }
}
