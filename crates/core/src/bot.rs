//! The OEV liquidation bot.
//!
//! `OevBot` owns the connectors and the shared state. Its `on_*` methods are
//! the bodies of the periodic loops started by `start`:
//! - fetch and filter new positions from the market's logs
//! - reset the interesting positions from the current ones
//! - reset the current positions from all known ones
//! - look for liquidations under fresh OEV prices, bid and execute

use alloy::primitives::{Address, Bytes, B256, U256};
use anyhow::{Context, Result};
use oev_liquidator_api::SignedDataSource;
use oev_liquidator_chain::{encode_simulate_oev_update, AuctionHouse, LiquidationCall, TargetLedger};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::auction::{AuctionCoordinator, AuctionSettings, AwardOutcome, PlacedBid};
use crate::config::{BotConfig, DeploymentConfig};
use crate::discovery::{
    fetch_positions, filter_positions, find_liquidatable_positions, refresh_data_feeds, Batching,
};
use crate::feeds::{
    derive_oev_feed, encode_oev_update_signed_data, fetch_oev_feed_values, DataFeed, WatchedFeed,
};
use crate::liquidator::Liquidator;
use crate::position::{FilteredPositions, PositionChanges, PositionSet};
use crate::scheduler::{run_in_loop, LoopControl, LoopOptions};
use crate::snapshot::{load_positions_to_watch, save_positions_to_watch, AllPositionsSnapshot};
use crate::state::{BotState, StateStore};
use crate::u256_math::{percentage_value, usd_e18_to_price_factor_scale};

/// Execution of a won bid is abandoned after this.
pub const LIQUIDATION_HARD_TIMEOUT: Duration = Duration::from_secs(60);

pub struct OevBot {
    ledger: Arc<dyn TargetLedger>,
    signed_data: Arc<dyn SignedDataSource>,
    auction: Arc<AuctionCoordinator>,
    liquidator: Arc<Liquidator>,
    state: Arc<StateStore>,
    config: BotConfig,
    dapp_id: U256,
    watched_feeds: Vec<WatchedFeed>,
    /// Minimum collateral on Comet's 8-decimal USD scale.
    min_collateral_usd: U256,
    all_positions_path: PathBuf,
    positions_to_watch_path: PathBuf,
    /// Award polling and execution of the last placed bid.
    post_bid: Mutex<Option<JoinHandle<()>>>,
}

impl OevBot {
    pub fn new(
        ledger: Arc<dyn TargetLedger>,
        auction_house: Arc<dyn AuctionHouse>,
        signed_data: Arc<dyn SignedDataSource>,
        config: BotConfig,
        deployment: &DeploymentConfig,
    ) -> Result<Self> {
        config.validate()?;

        let watched_feeds = deployment
            .feeds
            .iter()
            .map(WatchedFeed::from_config)
            .collect::<Result<Vec<_>>>()?;
        let min_collateral_usd =
            usd_e18_to_price_factor_scale(config.positions.min_position_usd_e18()?);

        let dapp_id = U256::from(deployment.dapp_id);
        let settings = AuctionSettings {
            dapp_id,
            target_chain_id: deployment.target_chain.chain_id,
            liquidator: deployment.target_chain.contracts.oev_liquidator,
            transaction_timeout: config.timing.oev_network_transaction_timeout(),
            award_poll_retries: config.auction.award_poll_retries,
            award_poll_delay: config.timing.oev_poll_award_bid_delay(),
            award_block_range: config.auction.award_block_range,
        };

        Ok(Self {
            liquidator: Arc::new(Liquidator::new(
                ledger.clone(),
                config.timing.liquidation_transaction_timeout(),
            )),
            auction: Arc::new(AuctionCoordinator::new(auction_house, settings)),
            ledger,
            signed_data,
            state: Arc::new(StateStore::new()),
            config,
            dapp_id,
            watched_feeds,
            min_collateral_usd,
            all_positions_path: deployment.snapshots.all_positions.clone(),
            positions_to_watch_path: deployment.snapshots.positions_to_watch.clone(),
            post_bid: Mutex::new(None),
        })
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    fn batching(&self) -> Batching {
        Batching {
            batch_size: self.config.positions.max_borrower_details_multicall,
            rpc_delay: self.config.timing.min_rpc_delay(),
        }
    }

    async fn fetch_positions_since(&self, last_block: u64, current_block: u64) -> Result<PositionSet> {
        fetch_positions(
            self.ledger.as_ref(),
            last_block.saturating_sub(self.config.positions.borrower_logs_lookback_blocks),
            current_block,
            self.config.positions.max_log_range_blocks,
            self.config.timing.min_rpc_delay(),
        )
        .await
    }

    async fn filter(&self, positions: &PositionSet) -> Result<FilteredPositions> {
        filter_positions(
            self.ledger.as_ref(),
            positions,
            self.min_collateral_usd,
            self.batching(),
        )
        .await
    }

    /// Seed the state from the stored snapshot and the logs since.
    ///
    /// A positions-to-watch file, when present and parseable, replaces the
    /// filter pass.
    #[instrument(skip(self))]
    pub async fn initialize_positions(&self) -> Result<()> {
        info!("Initializing positions");
        let started = Instant::now();

        let stored = AllPositionsSnapshot::load_or_default(&self.all_positions_path)?;
        let current_block = self.ledger.block_number().await?;
        let new_positions = self
            .fetch_positions_since(stored.last_block, current_block)
            .await?;
        let all_positions = stored.all_positions.merged(&new_positions);

        let filtered = match load_positions_to_watch(&self.positions_to_watch_path) {
            Ok(Some(filtered)) => {
                info!(path = %self.positions_to_watch_path.display(), "Using positions to watch file");
                filtered
            }
            Ok(None) => self.filter(&all_positions).await?,
            Err(e) => {
                warn!(error = %e, "Ignoring unusable positions to watch file");
                self.filter(&all_positions).await?
            }
        };

        info!(
            all_positions = all_positions.len(),
            current_positions = filtered.current.len(),
            interesting_positions = filtered.interesting.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Watched positions"
        );

        let mut state = BotState::new(self.watched_feeds.clone());
        state.all_positions = all_positions;
        state.current_positions = filtered.current;
        state.interesting_positions = filtered.interesting;
        state.target_chain_last_block = current_block;
        self.state.initialize(state);
        Ok(())
    }

    /// Retry `initialize_positions` until it succeeds.
    pub async fn initialize(self: &Arc<Self>) {
        let bot = self.clone();
        run_in_loop(self.initialize_loop_options(), move || {
            let bot = bot.clone();
            async move {
                bot.initialize_positions().await?;
                Ok::<_, anyhow::Error>(LoopControl::Stop)
            }
        })
        .await;
    }

    fn initialize_loop_options(&self) -> LoopOptions {
        let timing = &self.config.timing;
        LoopOptions::new(
            "initialize-target-chain",
            timing.initialize_target_chain_timeout(),
            timing.run_in_loop_max_wait_time_percentage,
        )
        .with_initial_delay(Duration::ZERO)
    }

    /// Scan the logs since the last scan and merge the new positions in.
    #[instrument(skip(self))]
    pub async fn on_fetch_and_filter_new_positions(&self) -> Result<()> {
        let previous = self.state.snapshot()?;
        let current_block = self.ledger.block_number().await?;
        let new_positions = self
            .fetch_positions_since(previous.target_chain_last_block, current_block)
            .await?;
        let fetched = self.filter(&new_positions).await?;

        let changes = self.state.update(|draft| {
            let all = draft.all_positions.merged(&new_positions);
            let current = draft.current_positions.merged(&fetched.current);
            let interesting = draft.interesting_positions.merged(&fetched.interesting);
            let changes = (
                PositionChanges::between(&draft.all_positions, &all).added,
                PositionChanges::between(&draft.current_positions, &current).added,
                PositionChanges::between(&draft.interesting_positions, &interesting).added,
            );

            draft.all_positions = all;
            draft.current_positions = current;
            draft.interesting_positions = interesting;
            draft.target_chain_last_block = current_block;
            changes
        })?;

        let (added, added_current, added_interesting) = changes;
        info!(
            added_positions = ?added,
            added_current_positions = ?added_current,
            added_interesting_positions = ?added_interesting,
            "New positions after logs refetch"
        );
        Ok(())
    }

    /// Recompute the interesting positions from the current ones.
    #[instrument(skip(self))]
    pub async fn on_reset_interesting_positions(&self) -> Result<()> {
        let snapshot = self.state.snapshot()?;
        let filtered = self.filter(&snapshot.current_positions).await?;

        self.state.update(|draft| {
            let changes = PositionChanges::between(&draft.interesting_positions, &filtered.interesting);
            info!(
                interesting_positions = filtered.interesting.len(),
                added_positions = ?changes.added,
                discarded_positions = ?changes.discarded,
                "Interesting positions after reset"
            );
            draft.interesting_positions = filtered.interesting;
        })?;
        Ok(())
    }

    /// Recompute current and interesting positions from all known ones.
    #[instrument(skip(self))]
    pub async fn on_reset_current_positions(&self) -> Result<()> {
        let snapshot = self.state.snapshot()?;
        let filtered = self.filter(&snapshot.all_positions).await?;

        self.state.update(|draft| {
            let current = PositionChanges::between(&draft.current_positions, &filtered.current);
            let interesting =
                PositionChanges::between(&draft.interesting_positions, &filtered.interesting);
            info!(
                current_positions = filtered.current.len(),
                interesting_positions = filtered.interesting.len(),
                added_current_positions = ?current.added,
                discarded_current_positions = ?current.discarded,
                added_interesting_positions = ?interesting.added,
                discarded_interesting_positions = ?interesting.discarded,
                "Positions after reset"
            );
            // Only positions crossing the minimum size through price moves
            // should show up here.
            if !current.added.is_empty() {
                warn!(added_current_positions = ?current.added, "Found missing current position(s)");
            }

            draft.current_positions = filtered.current;
            draft.interesting_positions = filtered.interesting;
        })?;
        Ok(())
    }

    /// OEV feeds of the watched OEV-enabled dAPIs, paired with their base
    /// feeds. Newly derived OEV feeds are cached.
    fn oev_feeds(&self) -> Result<Vec<(DataFeed, DataFeed)>> {
        let snapshot = self.state.snapshot()?;
        let pairs: Vec<(DataFeed, DataFeed)> = snapshot
            .resolved_feeds(true)
            .into_iter()
            .map(|base| {
                let oev = snapshot
                    .oev_feeds
                    .get(&base.data_feed_id)
                    .cloned()
                    .unwrap_or_else(|| derive_oev_feed(&base));
                (base, oev)
            })
            .collect();

        let uncached: Vec<_> = pairs
            .iter()
            .filter(|(base, _)| !snapshot.oev_feeds.contains_key(&base.data_feed_id))
            .collect();
        if !uncached.is_empty() {
            self.state.update(|draft| {
                for (base, oev) in uncached {
                    draft.oev_feeds.insert(base.data_feed_id, oev.clone());
                }
            })?;
        }
        Ok(pairs)
    }

    /// One liquidation attempt: price the OEV update, find liquidatable
    /// positions, bid on the update and hand the rest to a background task.
    #[instrument(skip(self))]
    pub async fn on_initiate_oev_liquidations(&self) -> Result<()> {
        let snapshot = self.state.snapshot()?;
        if !snapshot.currently_liquidated_positions.is_empty() {
            info!(
                currently_liquidated_positions = ?snapshot.currently_liquidated_positions,
                "Skipping liquidation as another liquidation is in progress"
            );
            return Ok(());
        }

        refresh_data_feeds(self.ledger.as_ref(), &self.state).await?;
        let feeds = self.oev_feeds()?;
        let oev_feeds: Vec<DataFeed> = feeds.iter().map(|(_, oev)| oev.clone()).collect();
        let values = fetch_oev_feed_values(
            self.signed_data.as_ref(),
            &oev_feeds,
            self.config.timing.signed_api_fetch_delay(),
        )
        .await;

        let signed_data: Vec<Vec<Bytes>> = feeds
            .iter()
            .zip(&values)
            .map(|((base, _), oev)| encode_oev_update_signed_data(base, oev))
            .collect();
        let price_updates: Vec<Bytes> = signed_data
            .iter()
            .map(|feed_signed_data| encode_simulate_oev_update(self.dapp_id, feed_signed_data.clone()))
            .collect();

        let interesting = self.state.snapshot()?.interesting_positions.clone();
        let mut liquidatable = find_liquidatable_positions(
            self.ledger.as_ref(),
            &interesting,
            &price_updates,
            self.batching(),
        )
        .await;
        liquidatable.truncate(self.config.positions.max_positions_to_liquidate);

        if liquidatable.is_empty() {
            info!("No liquidations found");
            return Ok(());
        }
        let positions: Vec<Address> = liquidatable.iter().map(|d| d.position).collect();

        if !self.state.try_claim_liquidation(&positions)? {
            info!("Skipping liquidation as another liquidation is in progress");
            return Ok(());
        }

        let bid = match self.bid_for(&positions, &price_updates).await {
            Ok(Some(bid)) => bid,
            Ok(None) => {
                self.state.release_liquidation()?;
                return Ok(());
            }
            Err(e) => {
                self.state.release_liquidation()?;
                return Err(e);
            }
        };

        let task = PostBid {
            auction: self.auction.clone(),
            liquidator: self.liquidator.clone(),
            state: self.state.clone(),
            dapp_id: self.dapp_id,
            positions,
            signed_data,
            bid,
        };
        let handle = tokio::spawn(task.run());
        if let Some(previous) = self.post_bid.lock().replace(handle) {
            if !previous.is_finished() {
                warn!("Previous post-bid task still running");
            }
        }
        Ok(())
    }

    async fn bid_for(&self, positions: &[Address], price_updates: &[Bytes]) -> Result<Option<PlacedBid>> {
        let expected_profit = self
            .ledger
            .expected_profit(positions, price_updates)
            .await
            .context("Failed to simulate expected profit")?;
        let bid_amount = percentage_value(expected_profit, self.config.auction.bid_percentage);
        info!(
            expected_profit = %expected_profit,
            bid_amount = %bid_amount,
            positions = ?positions,
            "Bidding on OEV update"
        );
        Ok(self.auction.place_bid(bid_amount).await)
    }

    /// Wait for the post-bid task of the last placed bid, if any.
    pub async fn wait_for_pending_liquidation(&self) {
        let handle = self.post_bid.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Post-bid task panicked");
            }
        }
    }

    /// Initialize, then run the four loops until the process exits.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        self.initialize().await;

        let timing = &self.config.timing;
        let percentage = timing.run_in_loop_max_wait_time_percentage;
        let loops = [
            (
                LoopOptions::new(
                    "fetch-and-filter-new-positions",
                    timing.fetch_and_filter_new_positions_frequency(),
                    percentage,
                ),
                Handler::FetchNewPositions,
            ),
            (
                LoopOptions::new(
                    "reset-interesting-positions",
                    timing.reset_interesting_positions_frequency(),
                    percentage,
                ),
                Handler::ResetInterestingPositions,
            ),
            (
                LoopOptions::new(
                    "reset-current-positions",
                    timing.reset_current_positions_frequency(),
                    percentage,
                ),
                Handler::ResetCurrentPositions,
            ),
            (
                LoopOptions::new(
                    "initiate-oev-liquidations",
                    timing.initiate_oev_liquidations_frequency(),
                    percentage,
                ),
                Handler::InitiateOevLiquidations,
            ),
        ];

        let mut handles = Vec::with_capacity(loops.len());
        for (options, handler) in loops {
            let bot = self.clone();
            info!(name = options.name, frequency_ms = options.frequency.as_millis() as u64, "Starting loop");
            handles.push(tokio::spawn(async move {
                run_in_loop(options, move || {
                    let bot = bot.clone();
                    async move {
                        bot.handle(handler).await?;
                        Ok::<_, anyhow::Error>(LoopControl::Continue)
                    }
                })
                .await
            }));
        }

        for handle in futures::future::join_all(handles).await {
            handle.context("loop task panicked")?;
        }
        Ok(())
    }

    async fn handle(&self, handler: Handler) -> Result<()> {
        match handler {
            Handler::FetchNewPositions => self.on_fetch_and_filter_new_positions().await,
            Handler::ResetInterestingPositions => self.on_reset_interesting_positions().await,
            Handler::ResetCurrentPositions => self.on_reset_current_positions().await,
            Handler::InitiateOevLiquidations => self.on_initiate_oev_liquidations().await,
        }
    }

    /// Scan from the stored snapshot (or from genesis when `reset`), filter
    /// and write both snapshot files.
    #[instrument(skip(self))]
    pub async fn prepare_positions(&self, reset: bool) -> Result<FilteredPositions> {
        let stored = if reset {
            AllPositionsSnapshot::default()
        } else {
            AllPositionsSnapshot::load_or_default(&self.all_positions_path)?
        };
        let current_block = self.ledger.block_number().await?;
        let fetched = self
            .fetch_positions_since(stored.last_block, current_block)
            .await?;
        let all_positions = stored.all_positions.merged(&fetched);

        let filtered = self.filter(&all_positions).await?;
        info!(
            interesting_positions = filtered.interesting.len(),
            current_positions = filtered.current.len(),
            "Filtered borrowers close to liquidation"
        );

        AllPositionsSnapshot {
            all_positions,
            last_block: current_block,
        }
        .save(&self.all_positions_path)?;
        save_positions_to_watch(&self.positions_to_watch_path, &filtered)?;
        Ok(filtered)
    }
}

#[derive(Debug, Clone, Copy)]
enum Handler {
    FetchNewPositions,
    ResetInterestingPositions,
    ResetCurrentPositions,
    InitiateOevLiquidations,
}

/// Everything that happens after a bid is confirmed.
struct PostBid {
    auction: Arc<AuctionCoordinator>,
    liquidator: Arc<Liquidator>,
    state: Arc<StateStore>,
    dapp_id: U256,
    positions: Vec<Address>,
    signed_data: Vec<Vec<Bytes>>,
    bid: PlacedBid,
}

impl PostBid {
    #[instrument(skip_all, fields(bid_id = %self.bid.bid_id))]
    async fn run(self) {
        let tx_hash = self.execute().await;

        if let Err(e) = self.state.release_liquidation() {
            error!(error = %e, "Failed to release the liquidation guard");
        }

        if let Some(tx_hash) = tx_hash {
            self.auction.report_fulfillment(&self.bid, tx_hash).await;
        }
    }

    /// Hash of the successful liquidation, if there was one.
    async fn execute(&self) -> Option<B256> {
        let award_signature = match self.auction.poll_award(&self.bid).await {
            AwardOutcome::Won(signature) => signature,
            // Already logged by the coordinator.
            AwardOutcome::Lost { .. } | AwardOutcome::NotAwarded => return None,
        };

        info!(positions = ?self.positions, "Attempting liquidation(s)");
        let call = LiquidationCall {
            accounts: self.positions.clone(),
            dapp_id: self.dapp_id,
            bid_amount: self.bid.amount,
            signed_data_timestamp_cutoff: self.bid.signed_data_timestamp_cutoff,
            award_signature,
            signed_data: self.signed_data.clone(),
        };

        match tokio::time::timeout(LIQUIDATION_HARD_TIMEOUT, self.liquidator.liquidate(&call)).await {
            Ok(outcome) => outcome.fulfilled_tx_hash(),
            Err(_) => {
                error!(
                    timeout_ms = LIQUIDATION_HARD_TIMEOUT.as_millis() as u64,
                    "Unexpected liquidation error: hard timeout exceeded"
                );
                None
            }
        }
    }
}
