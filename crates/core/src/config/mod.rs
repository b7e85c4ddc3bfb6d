//! Configuration for the OEV liquidator.
//!
//! This module provides:
//! - Bot runtime configuration (profiles, thresholds, loop timing, bidding)
//! - Deployment configuration (chains, contracts, watched feeds, snapshot files)

mod bot;
mod deployment;

pub use bot::{AuctionConfig, BotConfig, PositionsConfig, TimingConfig};

pub use deployment::{
    expand_env, hot_wallet_private_key, DeploymentConfig, FeedConfig, OevNetworkConfig,
    SignedApisConfig, SnapshotPaths, TargetChainConfig,
};
