//! OEV liquidator core logic.
//!
//! This crate provides the liquidation pipeline for a Compound III market:
//! - Borrower discovery from market logs and position filtering
//! - Data feed resolution and OEV feed derivation
//! - Signed price collection from the signed APIs
//! - OEV auction bidding, award polling and fulfillment reports
//! - Liquidation execution with the won update
//! - Periodic loops over a shared, atomically swapped state

mod auction;
mod bot;
pub mod config;
mod discovery;
mod feeds;
mod liquidator;
mod position;
mod scheduler;
mod snapshot;
mod state;
#[cfg(test)]
mod testing;
pub mod u256_math;

pub use auction::{
    derive_bid_id, derive_bid_topic, encode_bid_details, AuctionCoordinator, AuctionSettings,
    AuctionWindow, AwardOutcome, PlacedBid,
};
pub use bot::{OevBot, LIQUIDATION_HARD_TIMEOUT};
pub use config::{BotConfig, DeploymentConfig};
pub use discovery::{fetch_positions, filter_positions, find_liquidatable_positions, Batching};
pub use feeds::{derive_oev_feed, Beacon, DataFeed, WatchedFeed};
pub use liquidator::{FailureReason, GasStats, LiquidationOutcome, Liquidator};
pub use position::{FilteredPositions, PositionDetails, PositionSet};
pub use scheduler::{run_in_loop, LoopControl, LoopOptions};
pub use snapshot::{AllPositionsSnapshot, SnapshotError};
pub use state::{BotState, StateError, StateStore};
