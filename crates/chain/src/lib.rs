//! Chain interaction layer for the OEV liquidator.
//!
//! This crate provides:
//! - Contract bindings for Comet, the API3 feed contracts, the OEV liquidator
//!   and the OEV auction house
//! - `TargetLedger`: reads, simulations and liquidation submission on the
//!   chain hosting the Comet market
//! - `AuctionHouse`: bidding, award queries and fulfillment reports on the
//!   OEV network
//! - Transaction signing with a local nonce counter
//! - Gas strategy abstraction (Legacy + EIP-1559)

mod bindings;
pub mod gas;
mod ledger;
mod oev_network;
mod provider;
mod signer;

pub use bindings::{decode_data_feed_details, encode_fulfillment_details, encode_simulate_oev_update};
pub use gas::{GasPricing, GasSettings};
pub use ledger::{AccountDetails, LiquidationCall, LiquidationReceipt, TargetLedger};
pub use oev_network::{AuctionHouse, AwardedBid, BidSubmission, NetworkReceipt, OevNetworkClient};
pub use provider::{absorbed_borrowers, TargetChainClient, TargetContracts};
pub use signer::{
    NonceManager, OutgoingTransaction, SubmittedTransaction, TransactionSender,
    TransactionSenderBuilder,
};
