//! OEV auction participation: bidding windows, bids, awards, fulfillment.
//!
//! Auctions for a dApp run back to back in fixed slots. Each slot starts
//! with a bidding phase; bids must commit to signed data no newer than the
//! end of that phase (the cutoff). The slot grid is shifted by an offset
//! derived from the dApp id so different dApps do not share boundaries.

use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use alloy::sol_types::SolValue;
use oev_liquidator_chain::{AuctionHouse, AwardedBid, BidSubmission};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

pub const AUCTION_MAJOR_VERSION: u64 = 1;
pub const AUCTION_LENGTH_SECONDS: u64 = 30;
pub const BIDDING_PHASE_LENGTH_SECONDS: u64 = 25;
/// Minimum time left in a bidding phase to still bid in it.
pub const BIDDING_PHASE_BUFFER_SECONDS: u64 = 3;

/// The auction slot a bid placed at some moment targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuctionWindow {
    pub auction_start: u64,
    pub bidding_phase_end: u64,
    pub signed_data_timestamp_cutoff: u64,
}

impl AuctionWindow {
    /// Window targeted at unix time `now` (seconds).
    pub fn at(now: u64, dapp_id: U256) -> Self {
        let offset = auction_offset(dapp_id);
        // Clamped at zero for times before the first slot boundary.
        let mut auction_start =
            now.saturating_sub((now + AUCTION_LENGTH_SECONDS - offset) % AUCTION_LENGTH_SECONDS);
        let mut bidding_phase_end = auction_start + BIDDING_PHASE_LENGTH_SECONDS;

        if bidding_phase_end.saturating_sub(now) < BIDDING_PHASE_BUFFER_SECONDS {
            auction_start += AUCTION_LENGTH_SECONDS;
            bidding_phase_end += AUCTION_LENGTH_SECONDS;
        }

        Self {
            auction_start,
            bidding_phase_end,
            signed_data_timestamp_cutoff: bidding_phase_end,
        }
    }
}

/// `uint(keccak256(abi.encodePacked(dappId))) % auctionLength`
pub fn auction_offset(dapp_id: U256) -> u64 {
    let hash = U256::from_be_bytes(keccak256(dapp_id.to_be_bytes::<32>()).0);
    (hash % U256::from(AUCTION_LENGTH_SECONDS)).saturating_to::<u64>()
}

/// `keccak256(abi.encodePacked(uint256 majorVersion, uint256 dappId,
/// uint32 auctionLength, uint32 cutoff))`
pub fn derive_bid_topic(dapp_id: U256, signed_data_timestamp_cutoff: u32) -> B256 {
    let mut packed = Vec::with_capacity(72);
    packed.extend_from_slice(&U256::from(AUCTION_MAJOR_VERSION).to_be_bytes::<32>());
    packed.extend_from_slice(&dapp_id.to_be_bytes::<32>());
    packed.extend_from_slice(&(AUCTION_LENGTH_SECONDS as u32).to_be_bytes());
    packed.extend_from_slice(&signed_data_timestamp_cutoff.to_be_bytes());
    keccak256(packed)
}

/// `abi.encode(address liquidator, bytes32 nonce)`
pub fn encode_bid_details(liquidator: Address, nonce: B256) -> Bytes {
    (liquidator, nonce).abi_encode_params().into()
}

/// `keccak256(abi.encodePacked(bidder, bidTopic, keccak256(bidDetails)))`
pub fn derive_bid_id(bidder: Address, bid_topic: B256, bid_details: &[u8]) -> B256 {
    let mut packed = Vec::with_capacity(84);
    packed.extend_from_slice(bidder.as_slice());
    packed.extend_from_slice(bid_topic.as_slice());
    packed.extend_from_slice(keccak256(bid_details).as_slice());
    keccak256(packed)
}

/// A confirmed bid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedBid {
    pub bid_id: B256,
    pub bid_topic: B256,
    pub bid_details: Bytes,
    pub bid_details_hash: B256,
    pub amount: U256,
    pub nonce: B256,
    pub signed_data_timestamp_cutoff: u32,
    pub expiration_timestamp: u32,
}

/// How the auction for a placed bid ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AwardOutcome {
    /// Our bid won. Carries the award signature.
    Won(Bytes),
    /// Another bid won.
    Lost { winning_bid_id: B256 },
    /// No award seen within the polling budget.
    NotAwarded,
}

#[derive(Debug, Clone)]
pub struct AuctionSettings {
    pub dapp_id: U256,
    /// Chain the liquidation will be executed on.
    pub target_chain_id: u64,
    /// Contract that will execute the won update.
    pub liquidator: Address,
    pub transaction_timeout: Duration,
    pub award_poll_retries: u32,
    pub award_poll_delay: Duration,
    pub award_block_range: u64,
}

pub struct AuctionCoordinator {
    house: Arc<dyn AuctionHouse>,
    settings: AuctionSettings,
}

impl AuctionCoordinator {
    pub fn new(house: Arc<dyn AuctionHouse>, settings: AuctionSettings) -> Self {
        Self { house, settings }
    }

    pub fn settings(&self) -> &AuctionSettings {
        &self.settings
    }

    /// Bid `amount` in the auction open now. `None` when the bid was not
    /// confirmed; the reason is logged.
    pub async fn place_bid(&self, amount: U256) -> Option<PlacedBid> {
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        self.place_bid_at(amount, now).await
    }

    #[instrument(skip_all, fields(amount = %amount, now = now))]
    pub async fn place_bid_at(&self, amount: U256, now: u64) -> Option<PlacedBid> {
        let window = AuctionWindow::at(now, self.settings.dapp_id);
        let cutoff = match u32::try_from(window.signed_data_timestamp_cutoff) {
            Ok(cutoff) => cutoff,
            Err(_) => {
                error!(cutoff = window.signed_data_timestamp_cutoff, "Cutoff does not fit in uint32");
                return None;
            }
        };
        let expiration_timestamp = cutoff.saturating_add(AUCTION_LENGTH_SECONDS as u32);

        let nonce = B256::from(rand::random::<[u8; 32]>());
        let bid_topic = derive_bid_topic(self.settings.dapp_id, cutoff);
        let bid_details = encode_bid_details(self.settings.liquidator, nonce);
        let bid_details_hash = keccak256(&bid_details);
        let bid_id = derive_bid_id(self.house.bidder(), bid_topic, &bid_details);

        let submission = BidSubmission {
            bid_topic,
            chain_id: self.settings.target_chain_id,
            amount,
            bid_details: bid_details.clone(),
            expiration_timestamp,
        };

        debug!(
            bid_id = %bid_id,
            bid_topic = %bid_topic,
            auction_start = window.auction_start,
            cutoff,
            "Placing bid"
        );

        match self
            .house
            .place_bid(&submission, self.settings.transaction_timeout)
            .await
        {
            Ok(Some(receipt)) if receipt.success => {
                info!(bid_id = %bid_id, tx_hash = %receipt.tx_hash, cutoff, "Bid placed");
                Some(PlacedBid {
                    bid_id,
                    bid_topic,
                    bid_details,
                    bid_details_hash,
                    amount,
                    nonce,
                    signed_data_timestamp_cutoff: cutoff,
                    expiration_timestamp,
                })
            }
            Ok(Some(receipt)) => {
                error!(bid_id = %bid_id, tx_hash = %receipt.tx_hash, "Bid transaction reverted");
                None
            }
            Ok(None) => {
                error!(bid_id = %bid_id, "Timed out waiting for the bid transaction");
                None
            }
            Err(e) => {
                error!(bid_id = %bid_id, error = %format!("{e:#}"), "Failed to place bid");
                None
            }
        }
    }

    /// Poll for the award of `bid`'s auction.
    ///
    /// A failed query counts as an empty poll.
    #[instrument(skip_all, fields(bid_id = %bid.bid_id))]
    pub async fn poll_award(&self, bid: &PlacedBid) -> AwardOutcome {
        let attempts = self.settings.award_poll_retries + 1;
        for attempt in 1..=attempts {
            match self.find_award(bid.bid_topic).await {
                Ok(Some(award)) if award.bid_id == bid.bid_id => {
                    info!(attempt, "Bid awarded");
                    return AwardOutcome::Won(award.award_details);
                }
                Ok(Some(award)) => {
                    warn!(winning_bid_id = %award.bid_id, "Another bid won the auction");
                    return AwardOutcome::Lost {
                        winning_bid_id: award.bid_id,
                    };
                }
                Ok(None) => debug!(attempt, "No award yet"),
                Err(e) => warn!(attempt, error = %format!("{e:#}"), "Award query failed"),
            }

            if attempt < attempts {
                tokio::time::sleep(self.settings.award_poll_delay).await;
            }
        }

        error!(attempts, "No award found for the bid");
        AwardOutcome::NotAwarded
    }

    async fn find_award(&self, bid_topic: B256) -> anyhow::Result<Option<AwardedBid>> {
        let block = self.house.block_number().await?;
        let from_block = block.saturating_sub(self.settings.award_block_range);
        let awards = self.house.awarded_bids(bid_topic, from_block, block).await?;
        Ok(awards.into_iter().next())
    }

    /// Tell the auction house the award was used in `tx_hash`. Failures are
    /// only logged.
    #[instrument(skip_all, fields(bid_id = %bid.bid_id, tx_hash = %tx_hash))]
    pub async fn report_fulfillment(&self, bid: &PlacedBid, tx_hash: B256) {
        let result = self
            .house
            .report_fulfillment(
                bid.bid_topic,
                bid.bid_details_hash,
                tx_hash,
                self.settings.transaction_timeout,
            )
            .await;

        match result {
            Ok(Some(receipt)) if receipt.success => {
                info!(report_tx = %receipt.tx_hash, "Fulfillment reported")
            }
            Ok(Some(receipt)) => {
                error!(report_tx = %receipt.tx_hash, "Fulfillment report reverted")
            }
            Ok(None) => error!("Timed out waiting for the fulfillment report"),
            Err(e) => error!(error = %format!("{e:#}"), "Failed to report fulfillment"),
        }
    }
}
