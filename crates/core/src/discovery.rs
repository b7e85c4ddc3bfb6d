//! Borrower discovery, position filtering and liquidation candidates.

use alloy::primitives::{Address, Bytes, B256, U256};
use anyhow::Result;
use oev_liquidator_chain::TargetLedger;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, error, info, instrument};

use crate::feeds::{Beacon, DataFeed};
use crate::position::{
    classify, close_to_liquidation, rank_liquidatable, FilteredPositions, PositionDetails,
    PositionSet, CLOSE_TO_LIQUIDATION_LOG_SIZE,
};
use crate::state::StateStore;
use crate::u256_math::price_factor_to_usd;

/// How account detail queries are split up.
#[derive(Debug, Clone, Copy)]
pub struct Batching {
    pub batch_size: usize,
    /// Pause after each batch.
    pub rpc_delay: Duration,
}

/// What to do when one batch of account details cannot be fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchFailure {
    Propagate,
    Skip,
}

/// Borrowers that withdrew from the market in `[start_block, end_block]`.
///
/// The range is scanned in steps of `max_log_range` blocks. Any failing
/// step fails the whole scan.
#[instrument(skip(ledger, rpc_delay))]
pub async fn fetch_positions(
    ledger: &dyn TargetLedger,
    start_block: u64,
    end_block: u64,
    max_log_range: u64,
    rpc_delay: Duration,
) -> Result<PositionSet> {
    let step = max_log_range.max(1);
    let mut positions = PositionSet::new();
    let mut from_block = start_block;

    while from_block <= end_block {
        let to_block = from_block.saturating_add(step).min(end_block);
        let withdrawers = ledger.withdrawers(from_block, to_block).await?;
        info!(from_block, to_block, count = withdrawers.len(), "Fetched positions in block range");

        positions = positions.merged(&withdrawers);
        from_block = from_block.saturating_add(step);
        tokio::time::sleep(rpc_delay).await;
    }

    debug!(count = positions.len(), "Fetched unique positions");
    Ok(positions)
}

/// Account details for `positions`, evaluated after `price_updates`.
pub async fn fetch_positions_details(
    ledger: &dyn TargetLedger,
    positions: &[Address],
    price_updates: &[Bytes],
    batching: Batching,
    on_failure: BatchFailure,
) -> Result<Vec<PositionDetails>> {
    let batches: Vec<_> = positions.chunks(batching.batch_size.max(1)).collect();
    let mut details = Vec::with_capacity(positions.len());

    for (index, batch) in batches.iter().enumerate() {
        debug!(index, batches = batches.len(), size = batch.len(), "Fetching account details");
        match ledger.accounts_details(batch, price_updates).await {
            Ok(accounts) => details.extend(accounts.into_iter().map(PositionDetails::from)),
            Err(e) if on_failure == BatchFailure::Skip => {
                error!(index, error = %format!("{e:#}"), "Error getting liquidation info");
            }
            Err(e) => return Err(e),
        }
        tokio::time::sleep(batching.rpc_delay).await;
    }

    Ok(details)
}

/// Split `positions` into significant and interesting ones at current
/// prices.
#[instrument(skip_all, fields(positions = positions.len()))]
pub async fn filter_positions(
    ledger: &dyn TargetLedger,
    positions: &PositionSet,
    min_collateral_usd: U256,
    batching: Batching,
) -> Result<FilteredPositions> {
    info!("Filtering positions");
    let details = fetch_positions_details(
        ledger,
        positions.as_slice(),
        &[],
        batching,
        BatchFailure::Propagate,
    )
    .await?;

    Ok(classify(&details, min_collateral_usd))
}

/// Positions liquidatable once `price_updates` are applied, largest
/// collateral first. Failing batches are left out.
#[instrument(skip_all, fields(positions = positions.len(), updates = price_updates.len()))]
pub async fn find_liquidatable_positions(
    ledger: &dyn TargetLedger,
    positions: &PositionSet,
    price_updates: &[Bytes],
    batching: Batching,
) -> Vec<PositionDetails> {
    let details = match fetch_positions_details(
        ledger,
        positions.as_slice(),
        price_updates,
        batching,
        BatchFailure::Skip,
    )
    .await
    {
        Ok(details) => details,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Failed to fetch liquidation info");
            return Vec::new();
        }
    };

    let close = close_to_liquidation(&details, CLOSE_TO_LIQUIDATION_LOG_SIZE);
    info!(
        borrowers = ?close.iter().map(|d| d.position).collect::<Vec<_>>(),
        loan_to_value_ratios = ?close.iter().map(|d| d.loan_to_value).collect::<Vec<_>>(),
        "Positions close to liquidation"
    );

    let liquidatable = rank_liquidatable(&details);
    info!(
        count = liquidatable.len(),
        borrowers = ?liquidatable.iter().map(|d| d.position).collect::<Vec<_>>(),
        collaterals_usd = ?liquidatable.iter().map(|d| price_factor_to_usd(d.collateral_usd)).collect::<Vec<_>>(),
        "Details for liquidatable borrowers"
    );

    liquidatable
}

/// Resolve the watched dAPIs to data feeds and cache new feeds' beacons.
///
/// A failed lookup leaves the cached mapping in place.
#[instrument(skip_all)]
pub async fn refresh_data_feeds(ledger: &dyn TargetLedger, state: &StateStore) -> Result<()> {
    let snapshot = state.snapshot()?;
    let dapi_name_hashes: Vec<B256> = snapshot
        .watched_feeds
        .iter()
        .map(|feed| feed.dapi_name_hash)
        .collect();

    let data_feed_ids = match ledger.data_feed_ids(&dapi_name_hashes).await {
        Ok(ids) => ids,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Failed to fetch data feed ids, using cached ones");
            return Ok(());
        }
    };

    state.update(|draft| {
        for (hash, id) in dapi_name_hashes.iter().zip(&data_feed_ids) {
            draft.dapi_name_hash_to_data_feed_id.insert(*hash, *id);
        }
    })?;

    let mut seen = HashSet::new();
    let missing: Vec<B256> = data_feed_ids
        .into_iter()
        .filter(|id| !id.is_zero() && !snapshot.data_feeds.contains_key(id) && seen.insert(*id))
        .collect();
    if missing.is_empty() {
        return Ok(());
    }

    let details = match ledger.data_feed_details(&missing).await {
        Ok(details) => details,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Failed to fetch data feed details");
            return Ok(());
        }
    };

    let resolved = state.update(|draft| {
        let mut resolved = 0;
        for (id, beacons) in missing.iter().zip(details) {
            let Some(beacons) = beacons else {
                debug!(data_feed_id = %id, "Data feed is not registered");
                continue;
            };
            let beacons = beacons
                .into_iter()
                .map(|(airnode, template_id)| Beacon::new(airnode, template_id))
                .collect();
            draft.data_feeds.insert(
                *id,
                DataFeed {
                    data_feed_id: *id,
                    beacons,
                },
            );
            resolved += 1;
        }
        resolved
    })?;

    info!(requested = missing.len(), resolved, "Cached data feed details");
    Ok(())
}
