//! Runtime configuration with profile support.
//!
//! Profiles bundle position thresholds, loop timing and auction parameters.
//! `BOT_CONFIG` points at a TOML file; otherwise `BOT_PROFILE` picks a
//! built-in profile (testing, production) or the defaults.

use alloy::primitives::utils::parse_ether;
use alloy::primitives::U256;
use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure containing all bot parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default = "default_profile_name")]
    pub profile: String,

    #[serde(default)]
    pub positions: PositionsConfig,

    #[serde(default)]
    pub timing: TimingConfig,

    #[serde(default)]
    pub auction: AuctionConfig,
}

fn default_profile_name() -> String {
    "default".to_string()
}

/// Position discovery and filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionsConfig {
    /// Positions with less collateral (USD) are ignored.
    #[serde(default = "default_min_position_usd")]
    pub min_position_usd: f64,

    /// How far behind the last processed block each log scan starts.
    #[serde(default = "default_lookback_blocks")]
    pub borrower_logs_lookback_blocks: u64,

    /// Largest block range requested in one `eth_getLogs` call.
    #[serde(default = "default_max_log_range")]
    pub max_log_range_blocks: u64,

    /// Accounts per `getAccountsDetails` call.
    #[serde(default = "default_details_batch")]
    pub max_borrower_details_multicall: usize,

    /// Accounts included in one liquidation transaction.
    #[serde(default = "default_max_positions_to_liquidate")]
    pub max_positions_to_liquidate: usize,
}

fn default_min_position_usd() -> f64 {
    100.0
}
fn default_lookback_blocks() -> u64 {
    1_000
}
fn default_max_log_range() -> u64 {
    10_000
}
fn default_details_batch() -> usize {
    100
}
fn default_max_positions_to_liquidate() -> usize {
    5
}

impl Default for PositionsConfig {
    fn default() -> Self {
        Self {
            min_position_usd: default_min_position_usd(),
            borrower_logs_lookback_blocks: default_lookback_blocks(),
            max_log_range_blocks: default_max_log_range(),
            max_borrower_details_multicall: default_details_batch(),
            max_positions_to_liquidate: default_max_positions_to_liquidate(),
        }
    }
}

impl PositionsConfig {
    /// Minimum position size as an 18-decimal USD amount.
    pub fn min_position_usd_e18(&self) -> Result<U256> {
        parse_ether(&self.min_position_usd.to_string())
            .with_context(|| format!("invalid min_position_usd {}", self.min_position_usd))
    }
}

/// Loop frequencies, delays and timeouts (milliseconds).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_fetch_new_positions")]
    pub fetch_and_filter_new_positions_frequency_ms: u64,

    #[serde(default = "default_reset_interesting")]
    pub reset_interesting_positions_frequency_ms: u64,

    #[serde(default = "default_reset_current")]
    pub reset_current_positions_frequency_ms: u64,

    #[serde(default = "default_initiate_liquidations")]
    pub initiate_oev_liquidations_frequency_ms: u64,

    /// Upper bound for one start-up attempt.
    #[serde(default = "default_initialize_timeout")]
    pub initialize_target_chain_timeout_ms: u64,

    /// Pause between consecutive RPC batches.
    #[serde(default = "default_min_rpc_delay")]
    pub min_rpc_delay_ms: u64,

    /// Stagger between signed API requests for different airnodes.
    #[serde(default = "default_signed_api_delay")]
    pub signed_api_fetch_delay_ms: u64,

    #[serde(default = "default_award_poll_delay")]
    pub oev_poll_award_bid_delay_ms: u64,

    #[serde(default = "default_liquidation_tx_timeout")]
    pub liquidation_transaction_timeout_ms: u64,

    #[serde(default = "default_network_tx_timeout")]
    pub oev_network_transaction_timeout_ms: u64,

    /// Start-of-cycle jitter as a percentage of each loop's frequency.
    #[serde(default = "default_max_wait_percentage")]
    pub run_in_loop_max_wait_time_percentage: u64,
}

fn default_fetch_new_positions() -> u64 {
    60_000
}
fn default_reset_interesting() -> u64 {
    300_000
}
fn default_reset_current() -> u64 {
    1_800_000
}
fn default_initiate_liquidations() -> u64 {
    5_000
}
fn default_initialize_timeout() -> u64 {
    600_000
}
fn default_min_rpc_delay() -> u64 {
    100
}
fn default_signed_api_delay() -> u64 {
    100
}
fn default_award_poll_delay() -> u64 {
    1_000
}
fn default_liquidation_tx_timeout() -> u64 {
    15_000
}
fn default_network_tx_timeout() -> u64 {
    15_000
}
fn default_max_wait_percentage() -> u64 {
    10
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            fetch_and_filter_new_positions_frequency_ms: default_fetch_new_positions(),
            reset_interesting_positions_frequency_ms: default_reset_interesting(),
            reset_current_positions_frequency_ms: default_reset_current(),
            initiate_oev_liquidations_frequency_ms: default_initiate_liquidations(),
            initialize_target_chain_timeout_ms: default_initialize_timeout(),
            min_rpc_delay_ms: default_min_rpc_delay(),
            signed_api_fetch_delay_ms: default_signed_api_delay(),
            oev_poll_award_bid_delay_ms: default_award_poll_delay(),
            liquidation_transaction_timeout_ms: default_liquidation_tx_timeout(),
            oev_network_transaction_timeout_ms: default_network_tx_timeout(),
            run_in_loop_max_wait_time_percentage: default_max_wait_percentage(),
        }
    }
}

impl TimingConfig {
    pub fn fetch_and_filter_new_positions_frequency(&self) -> Duration {
        Duration::from_millis(self.fetch_and_filter_new_positions_frequency_ms)
    }
    pub fn reset_interesting_positions_frequency(&self) -> Duration {
        Duration::from_millis(self.reset_interesting_positions_frequency_ms)
    }
    pub fn reset_current_positions_frequency(&self) -> Duration {
        Duration::from_millis(self.reset_current_positions_frequency_ms)
    }
    pub fn initiate_oev_liquidations_frequency(&self) -> Duration {
        Duration::from_millis(self.initiate_oev_liquidations_frequency_ms)
    }
    pub fn initialize_target_chain_timeout(&self) -> Duration {
        Duration::from_millis(self.initialize_target_chain_timeout_ms)
    }
    pub fn min_rpc_delay(&self) -> Duration {
        Duration::from_millis(self.min_rpc_delay_ms)
    }
    pub fn signed_api_fetch_delay(&self) -> Duration {
        Duration::from_millis(self.signed_api_fetch_delay_ms)
    }
    pub fn oev_poll_award_bid_delay(&self) -> Duration {
        Duration::from_millis(self.oev_poll_award_bid_delay_ms)
    }
    pub fn liquidation_transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.liquidation_transaction_timeout_ms)
    }
    pub fn oev_network_transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.oev_network_transaction_timeout_ms)
    }
}

/// Bidding parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuctionConfig {
    /// Share of the simulated profit offered as the bid.
    #[serde(default = "default_bid_percentage")]
    pub bid_percentage: f64,

    /// Award queries before the bid is given up.
    #[serde(default = "default_award_poll_retries")]
    pub award_poll_retries: u32,

    /// Blocks searched backwards for the `AwardedBid` event.
    #[serde(default = "default_award_block_range")]
    pub award_block_range: u64,
}

fn default_bid_percentage() -> f64 {
    80.0
}
fn default_award_poll_retries() -> u32 {
    25
}
fn default_award_block_range() -> u64 {
    10_000
}

impl Default for AuctionConfig {
    fn default() -> Self {
        Self {
            bid_percentage: default_bid_percentage(),
            award_poll_retries: default_award_poll_retries(),
            award_block_range: default_award_block_range(),
        }
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            profile: default_profile_name(),
            positions: PositionsConfig::default(),
            timing: TimingConfig::default(),
            auction: AuctionConfig::default(),
        }
    }
}

impl BotConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read bot config {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse bot config {}", path.display()))?;
        Ok(config)
    }

    /// Small positions, fast loops. Meant for forks and test deployments.
    pub fn testing() -> Self {
        Self {
            profile: "testing".to_string(),
            positions: PositionsConfig {
                min_position_usd: 0.01,
                borrower_logs_lookback_blocks: 100,
                max_log_range_blocks: 2_000,
                max_borrower_details_multicall: 20,
                max_positions_to_liquidate: 2,
            },
            timing: TimingConfig {
                fetch_and_filter_new_positions_frequency_ms: 10_000,
                reset_interesting_positions_frequency_ms: 30_000,
                reset_current_positions_frequency_ms: 120_000,
                initiate_oev_liquidations_frequency_ms: 5_000,
                initialize_target_chain_timeout_ms: 120_000,
                ..TimingConfig::default()
            },
            auction: AuctionConfig::default(),
        }
    }

    pub fn production() -> Self {
        Self {
            profile: "production".to_string(),
            positions: PositionsConfig {
                min_position_usd: 1_000.0,
                borrower_logs_lookback_blocks: 2_000,
                max_log_range_blocks: 10_000,
                max_borrower_details_multicall: 200,
                max_positions_to_liquidate: 5,
            },
            timing: TimingConfig {
                min_rpc_delay_ms: 50,
                initiate_oev_liquidations_frequency_ms: 2_500,
                ..TimingConfig::default()
            },
            auction: AuctionConfig::default(),
        }
    }

    /// `BOT_CONFIG` (file path) wins over `BOT_PROFILE`.
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = std::env::var("BOT_CONFIG") {
            return Self::from_file(path);
        }
        let profile = std::env::var("BOT_PROFILE").unwrap_or_else(|_| "default".to_string());
        Ok(match profile.to_lowercase().as_str() {
            "testing" | "test" => Self::testing(),
            "production" | "prod" => Self::production(),
            _ => Self::default(),
        })
    }

    /// Reject values that would stall or break the loops.
    pub fn validate(&self) -> Result<()> {
        let p = &self.positions;
        ensure!(p.max_log_range_blocks > 0, "max_log_range_blocks must be positive");
        ensure!(
            p.max_borrower_details_multicall > 0,
            "max_borrower_details_multicall must be positive"
        );
        ensure!(
            p.max_positions_to_liquidate > 0,
            "max_positions_to_liquidate must be positive"
        );
        p.min_position_usd_e18()?;

        let t = &self.timing;
        for (name, value) in [
            ("fetch_and_filter_new_positions_frequency_ms", t.fetch_and_filter_new_positions_frequency_ms),
            ("reset_interesting_positions_frequency_ms", t.reset_interesting_positions_frequency_ms),
            ("reset_current_positions_frequency_ms", t.reset_current_positions_frequency_ms),
            ("initiate_oev_liquidations_frequency_ms", t.initiate_oev_liquidations_frequency_ms),
            ("initialize_target_chain_timeout_ms", t.initialize_target_chain_timeout_ms),
        ] {
            ensure!(value > 0, "{name} must be positive");
        }
        ensure!(
            t.run_in_loop_max_wait_time_percentage <= 100,
            "run_in_loop_max_wait_time_percentage must be at most 100"
        );

        let a = &self.auction;
        ensure!(
            a.bid_percentage > 0.0 && a.bid_percentage <= 100.0,
            "bid_percentage must be in (0, 100]"
        );
        ensure!(a.award_poll_retries > 0, "award_poll_retries must be positive");
        Ok(())
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        tracing::info!(profile = %self.profile, "Bot configuration loaded");
        tracing::info!(
            min_position_usd = self.positions.min_position_usd,
            lookback_blocks = self.positions.borrower_logs_lookback_blocks,
            max_log_range = self.positions.max_log_range_blocks,
            details_batch = self.positions.max_borrower_details_multicall,
            max_to_liquidate = self.positions.max_positions_to_liquidate,
            "Position settings"
        );
        tracing::info!(
            fetch_new_ms = self.timing.fetch_and_filter_new_positions_frequency_ms,
            reset_interesting_ms = self.timing.reset_interesting_positions_frequency_ms,
            reset_current_ms = self.timing.reset_current_positions_frequency_ms,
            liquidations_ms = self.timing.initiate_oev_liquidations_frequency_ms,
            max_wait_pct = self.timing.run_in_loop_max_wait_time_percentage,
            "Loop timing"
        );
        tracing::info!(
            bid_percentage = self.auction.bid_percentage,
            award_poll_retries = self.auction.award_poll_retries,
            "Auction parameters"
        );
    }
}
