//! OEV Liquidation Bot
//!
//! Liquidation bot for the Compound III USDC market on Base, gated by the
//! API3 OEV auction.
//! Features:
//! - Borrower discovery from Comet logs with periodic filter passes
//! - Liquidation checks against simulated OEV price updates
//! - Sealed bids on the OEV network for the right to update prices
//! - Liquidation with the won update and fulfillment reports

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use oev_liquidator_api::SignedApiClient;
use oev_liquidator_chain::{OevNetworkClient, TargetChainClient};
use oev_liquidator_core::config::hot_wallet_private_key;
use oev_liquidator_core::{BotConfig, DeploymentConfig, OevBot};

const DEFAULT_LOG_FILTER: &str = "info,oev_liquidator_core=debug,oev_liquidator_chain=debug";

#[derive(Debug, Parser)]
#[command(name = "oev-liquidator", version, about = "OEV auction-gated Compound III liquidator")]
struct Cli {
    /// Deployment file. Defaults to `DEPLOYMENT_CONFIG` or the bundled Base deployment.
    #[arg(long, env = "DEPLOYMENT_CONFIG")]
    deployment: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the liquidation loops (default).
    Run,
    /// Scan new logs from the stored snapshot and rewrite both position files.
    PreparePositions,
    /// Scan all logs from genesis and rewrite both position files.
    ResetPositions,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Print startup banner
    print_banner();

    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    let cli = Cli::parse();

    // BOT_CONFIG (file) or BOT_PROFILE selects the runtime settings
    let bot_config = BotConfig::from_env()?;
    bot_config.log_config();

    let deployment = match &cli.deployment {
        Some(path) => DeploymentConfig::from_file(path)?,
        None => DeploymentConfig::from_env()?,
    }
    .resolve()?;
    deployment.log_config();

    let bot = Arc::new(initialize_components(bot_config, &deployment).await?);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            info!("Starting OEV liquidation bot");
            bot.start().await?;
        }
        Command::PreparePositions => {
            bot.prepare_positions(false).await?;
        }
        Command::ResetPositions => {
            bot.prepare_positions(true).await?;
        }
    }

    Ok(())
}

/// Plain text by default, JSON lines with `LOG_FORMAT=json`.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
}

async fn initialize_components(bot_config: BotConfig, deployment: &DeploymentConfig) -> Result<OevBot> {
    info!("Initializing components...");

    let private_key = hot_wallet_private_key()?;

    // Target chain (Comet market, API3 contracts, liquidator)
    let target = &deployment.target_chain;
    let ledger = TargetChainClient::connect(
        &target.rpc_url,
        target.chain_id,
        target.contracts.clone(),
        &private_key,
        &target.gas,
    )
    .await
    .context("Failed to connect to the target chain")?;

    // OEV network (auction house)
    let network = &deployment.oev_network;
    let auction_house = OevNetworkClient::connect(
        &network.rpc_url,
        network.chain_id,
        network.auction_house,
        &private_key,
        &network.gas,
    )
    .await
    .context("Failed to connect to the OEV network")?;

    // Signed APIs
    let signed_apis = SignedApiClient::new(
        deployment.signed_apis.urls.clone(),
        std::time::Duration::from_millis(deployment.signed_apis.timeout_ms),
    )?;
    info!(urls = ?deployment.signed_apis.urls, "Signed API client initialized");

    let bot = OevBot::new(
        Arc::new(ledger),
        Arc::new(auction_house),
        Arc::new(signed_apis),
        bot_config,
        deployment,
    )?;

    info!("All components initialized");
    Ok(bot)
}

/// Print startup banner.
fn print_banner() {
    println!(
        r#"
    ╔═╗╔═╗╦  ╦  ╦  ┬┌─┐ ┬ ┬┬┌┬┐┌─┐┌┬┐┌─┐┬─┐
    ║ ║║╣ ╚╗╔╝  ║  ││─┼┐│ ││ ││├─┤ │ │ │├┬┘
    ╚═╝╚═╝ ╚╝   ╩═╝┴└─┘└└─┘┴─┴┘┴ ┴ ┴ └─┘┴└─
    OEV Liquidation Bot v0.1.0
    "#
    );
}
