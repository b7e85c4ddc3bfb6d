//! Alloy-backed `TargetLedger` for the chain hosting the Comet market.

use crate::bindings::{
    decode_data_feed_details, IAirseekerRegistry, IApi3ServerV1, IComet,
    IExternalMulticallSimulator, IOevLiquidator, LiquidateParams, PayOevBidParams,
};
use crate::gas::{GasPricing, GasSettings};
use crate::ledger::{AccountDetails, LiquidationCall, LiquidationReceipt, TargetLedger};
use crate::signer::{OutgoingTransaction, TransactionSender, TransactionSenderBuilder};
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::Filter;
use alloy::sol_types::{SolCall, SolEvent};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Number of collateral assets the liquidator may buy per account.
const COLLATERAL_ASSET_SLOTS: usize = 3;

/// Contract addresses on the target chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetContracts {
    pub comet: Address,
    pub oev_liquidator: Address,
    pub api3_server_v1: Address,
    pub api3_server_v1_oev_extension: Address,
    pub airseeker_registry: Address,
    pub external_multicall_simulator: Address,
}

pub struct TargetChainClient {
    rpc_url: String,
    contracts: TargetContracts,
    sender: TransactionSender,
}

impl TargetChainClient {
    /// Connect to the target chain and load the hot wallet's nonce.
    pub async fn connect(
        rpc_url: &str,
        chain_id: u64,
        contracts: TargetContracts,
        private_key: &str,
        gas: &GasSettings,
    ) -> Result<Self> {
        if gas.pricing != GasPricing::Legacy {
            warn!(pricing = ?gas.pricing, "Target chain usually expects legacy gas pricing");
        }

        let provider = ProviderBuilder::new().on_http(rpc_url.parse()?);
        let block = provider
            .get_block_number()
            .await
            .context("target chain RPC unreachable")?;

        let sender = TransactionSenderBuilder::new(rpc_url, chain_id)
            .gas_settings(gas)
            .build(private_key)
            .await?;

        info!(
            block,
            chain_id,
            comet = %contracts.comet,
            liquidator = %contracts.oev_liquidator,
            "Target chain client connected"
        );

        Ok(Self {
            rpc_url: rpc_url.to_string(),
            contracts,
            sender,
        })
    }

    pub fn contracts(&self) -> &TargetContracts {
        &self.contracts
    }

    fn read_provider(&self) -> Result<impl Provider> {
        Ok(ProviderBuilder::new().on_http(self.rpc_url.parse()?))
    }

    /// Run `call` on the liquidator after the simulated `price_updates`,
    /// returning the liquidator's raw return data.
    async fn simulate_on_liquidator(&self, price_updates: &[Bytes], call: Bytes) -> Result<Bytes> {
        let provider = self.read_provider()?;
        let simulator =
            IExternalMulticallSimulator::new(self.contracts.external_multicall_simulator, &provider);

        let mut targets = vec![self.contracts.api3_server_v1_oev_extension; price_updates.len()];
        targets.push(self.contracts.oev_liquidator);
        let mut data = price_updates.to_vec();
        data.push(call);

        let mut returndata = simulator.multicall(targets, data).call().await?.returndata;
        returndata
            .pop()
            .context("simulator returned no data for the liquidator call")
    }

    fn liquidate_calldata(call: &LiquidationCall) -> Bytes {
        IOevLiquidator::liquidateCall {
            params: LiquidateParams {
                liquidatableAccounts: call.accounts.clone(),
                maxAmountsToPurchase: vec![U256::MAX; COLLATERAL_ASSET_SLOTS],
                liquidationThreshold: U256::ZERO,
            },
            oevBid: PayOevBidParams {
                dappId: call.dapp_id,
                bidAmount: call.bid_amount,
                signedDataTimestampCutoff: call.signed_data_timestamp_cutoff,
                awardSignature: call.award_signature.clone(),
                signedData: call.signed_data.clone(),
            },
        }
        .abi_encode()
        .into()
    }

    fn outgoing_liquidation(&self, call: &LiquidationCall) -> OutgoingTransaction {
        OutgoingTransaction::new(self.contracts.oev_liquidator, Self::liquidate_calldata(call))
            .with_value(call.bid_amount)
    }
}

/// Borrowers named in the market's `AbsorbCollateral` logs.
pub fn absorbed_borrowers(comet: Address, logs: &[alloy::rpc::types::Log]) -> Vec<Address> {
    logs.iter()
        .filter(|log| log.address() == comet)
        .filter_map(|log| log.log_decode::<IComet::AbsorbCollateral>().ok())
        .map(|decoded| decoded.inner.data.borrower)
        .collect()
}

#[async_trait]
impl TargetLedger for TargetChainClient {
    async fn block_number(&self) -> Result<u64> {
        Ok(self.read_provider()?.get_block_number().await?)
    }

    #[instrument(skip(self), level = "debug")]
    async fn withdrawers(&self, from_block: u64, to_block: u64) -> Result<Vec<Address>> {
        let filter = Filter::new()
            .address(self.contracts.comet)
            .event_signature(IComet::Withdraw::SIGNATURE_HASH)
            .from_block(from_block)
            .to_block(to_block);

        let logs = self.read_provider()?.get_logs(&filter).await?;
        let withdrawers: Vec<Address> = logs
            .iter()
            .filter_map(|log| log.log_decode::<IComet::Withdraw>().ok())
            .map(|decoded| decoded.inner.data.src)
            .collect();

        debug!(
            from_block,
            to_block,
            logs = logs.len(),
            "Fetched Withdraw logs"
        );
        Ok(withdrawers)
    }

    async fn data_feed_ids(&self, dapi_name_hashes: &[B256]) -> Result<Vec<B256>> {
        let provider = self.read_provider()?;
        let server = IApi3ServerV1::new(self.contracts.api3_server_v1, &provider);

        let calls: Vec<Bytes> = dapi_name_hashes
            .iter()
            .map(|hash| {
                IApi3ServerV1::dapiNameHashToDataFeedIdCall { dapiNameHash: *hash }
                    .abi_encode()
                    .into()
            })
            .collect();

        let returndata = server.multicall(calls).call().await?.returndata;
        returndata
            .iter()
            .map(|data| {
                Ok(
                    IApi3ServerV1::dapiNameHashToDataFeedIdCall::abi_decode_returns(data, true)?
                        .dataFeedId,
                )
            })
            .collect()
    }

    async fn data_feed_details(
        &self,
        data_feed_ids: &[B256],
    ) -> Result<Vec<Option<Vec<(Address, B256)>>>> {
        let provider = self.read_provider()?;
        let registry = IAirseekerRegistry::new(self.contracts.airseeker_registry, &provider);

        let calls: Vec<Bytes> = data_feed_ids
            .iter()
            .map(|id| {
                IAirseekerRegistry::dataFeedIdToDetailsCall { dataFeedId: *id }
                    .abi_encode()
                    .into()
            })
            .collect();

        let returndata = registry.multicall(calls).call().await?.returndata;
        returndata
            .iter()
            .map(|data| {
                let details =
                    IAirseekerRegistry::dataFeedIdToDetailsCall::abi_decode_returns(data, true)?
                        .dataFeedDetails;
                Ok(decode_data_feed_details(&details))
            })
            .collect()
    }

    async fn accounts_details(
        &self,
        accounts: &[Address],
        price_updates: &[Bytes],
    ) -> Result<Vec<AccountDetails>> {
        let details = if price_updates.is_empty() {
            let provider = self.read_provider()?;
            IOevLiquidator::new(self.contracts.oev_liquidator, &provider)
                .getAccountsDetails(accounts.to_vec())
                .call()
                .await?
        } else {
            let call = IOevLiquidator::getAccountsDetailsCall {
                accounts: accounts.to_vec(),
            };
            let data = self
                .simulate_on_liquidator(price_updates, call.abi_encode().into())
                .await?;
            IOevLiquidator::getAccountsDetailsCall::abi_decode_returns(&data, true)?
        };

        let n = accounts.len();
        if details.borrowsUsd.len() != n
            || details.maxBorrowsUsd.len() != n
            || details.collateralsUsd.len() != n
            || details.areLiquidatable.len() != n
        {
            bail!("getAccountsDetails returned {} rows for {} accounts", details.borrowsUsd.len(), n);
        }

        Ok((0..n)
            .map(|i| AccountDetails {
                account: accounts[i],
                borrow_usd: details.borrowsUsd[i],
                max_borrow_usd: details.maxBorrowsUsd[i],
                collateral_usd: details.collateralsUsd[i],
                is_liquidatable: details.areLiquidatable[i],
            })
            .collect())
    }

    async fn expected_profit(
        &self,
        accounts: &[Address],
        price_updates: &[Bytes],
    ) -> Result<U256> {
        let call = IOevLiquidator::getExpectedProfitCall {
            accounts: accounts.to_vec(),
        };
        let data = self
            .simulate_on_liquidator(price_updates, call.abi_encode().into())
            .await?;
        Ok(IOevLiquidator::getExpectedProfitCall::abi_decode_returns(&data, true)?.profit)
    }

    async fn estimate_liquidation_gas(&self, call: &LiquidationCall) -> Result<u64> {
        self.sender
            .estimate_gas(&self.outgoing_liquidation(call))
            .await
    }

    #[instrument(skip(self, call), fields(accounts = call.accounts.len()))]
    async fn submit_liquidation(
        &self,
        call: &LiquidationCall,
        gas_limit: u64,
        timeout: Duration,
    ) -> Result<Option<LiquidationReceipt>> {
        let tx = self.outgoing_liquidation(call).with_gas_limit(gas_limit);
        let Some(submitted) = self.sender.submit(tx, timeout).await? else {
            return Ok(None);
        };

        Ok(Some(LiquidationReceipt {
            tx_hash: submitted.tx_hash,
            success: submitted.success,
            gas_limit: submitted.gas_limit,
            gas_used: submitted.gas_used,
            gas_price: submitted.gas_price,
            absorbed_borrowers: absorbed_borrowers(self.contracts.comet, &submitted.logs),
        }))
    }
}
