//! Contract bindings for Compound III, the API3 feed contracts, the OEV
//! liquidator and the OEV auction house, plus the small ABI helpers built
//! on top of them.

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol;
use alloy::sol_types::{SolCall, SolValue};

sol! {
    /// Compound III market (only the events the bot reads).
    #[sol(rpc)]
    interface IComet {
        event Withdraw(address indexed src, address indexed to, uint256 amount);
        event AbsorbCollateral(
            address indexed absorber,
            address indexed borrower,
            address indexed asset,
            uint256 collateralAbsorbed,
            uint256 usdValue
        );
    }

    #[sol(rpc)]
    interface IApi3ServerV1 {
        function dapiNameHashToDataFeedId(bytes32 dapiNameHash) external view returns (bytes32 dataFeedId);
        function multicall(bytes[] calldata data) external returns (bytes[] memory returndata);
    }

    #[sol(rpc)]
    interface IAirseekerRegistry {
        function dataFeedIdToDetails(bytes32 dataFeedId) external view returns (bytes memory dataFeedDetails);
        function multicall(bytes[] calldata data) external returns (bytes[] memory returndata);
    }

    interface IApi3ServerV1OevExtension {
        function simulateDappOevDataFeedUpdate(uint256 dappId, bytes[] calldata signedData)
            external
            returns (bytes32 baseDataFeedId, int224 updatedValue, uint32 updatedTimestamp);
    }

    /// Executes calls against simulated state; only ever used through `eth_call`.
    #[sol(rpc)]
    interface IExternalMulticallSimulator {
        function multicall(address[] calldata targets, bytes[] calldata data)
            external
            returns (bytes[] memory returndata);
    }

    #[derive(Debug)]
    struct LiquidateParams {
        address[] liquidatableAccounts;
        uint256[] maxAmountsToPurchase;
        uint256 liquidationThreshold;
    }

    #[derive(Debug)]
    struct PayOevBidParams {
        uint256 dappId;
        uint256 bidAmount;
        uint32 signedDataTimestampCutoff;
        bytes awardSignature;
        bytes[][] signedData;
    }

    #[sol(rpc)]
    interface IOevLiquidator {
        function getAccountsDetails(address[] calldata accounts)
            external
            returns (
                uint256[] memory borrowsUsd,
                uint256[] memory maxBorrowsUsd,
                uint256[] memory collateralsUsd,
                bool[] memory areLiquidatable
            );
        function getExpectedProfit(address[] calldata accounts) external returns (uint256 profit);
        function liquidate(LiquidateParams calldata params, PayOevBidParams calldata oevBid)
            external
            payable
            returns (uint256 profit);
    }

    #[sol(rpc)]
    interface IOevAuctionHouse {
        event AwardedBid(
            address indexed bidder,
            bytes32 indexed bidTopic,
            bytes32 indexed bidId,
            bytes awardDetails,
            uint256 bidderBalance
        );
        function placeBidWithExpiration(
            bytes32 bidTopic,
            uint256 chainId,
            uint256 bidAmount,
            bytes calldata bidDetails,
            uint256 maxCollateralAmount,
            uint256 maxProtocolFeeAmount,
            uint32 expirationTimestamp
        ) external returns (uint256 collateralAmount, uint256 protocolFeeAmount);
        function reportFulfillment(bytes32 bidTopic, bytes32 bidDetailsHash, bytes calldata fulfillmentDetails) external;
    }
}

/// Calldata for a simulated OEV update of one feed, to be executed through
/// the multicall simulator against the OEV extension.
pub fn encode_simulate_oev_update(dapp_id: U256, signed_data: Vec<Bytes>) -> Bytes {
    IApi3ServerV1OevExtension::simulateDappOevDataFeedUpdateCall {
        dappId: dapp_id,
        signedData: signed_data,
    }
    .abi_encode()
    .into()
}

/// Decode the registry's `dataFeedIdToDetails` payload into
/// `(airnode, template_id)` pairs.
///
/// Empty details mean the feed is not registered. Exactly 64 bytes is a
/// single beacon; anything longer is a beacon set.
pub fn decode_data_feed_details(details: &[u8]) -> Option<Vec<(Address, B256)>> {
    match details.len() {
        0 => None,
        64 => <(Address, B256)>::abi_decode_params(details, true)
            .ok()
            .map(|beacon| vec![beacon]),
        _ => <(Vec<Address>, Vec<B256>)>::abi_decode_params(details, true)
            .ok()
            .filter(|(airnodes, templates)| airnodes.len() == templates.len())
            .map(|(airnodes, templates)| airnodes.into_iter().zip(templates).collect()),
    }
}

/// `abi.encode(txHash)`, the fulfillment proof sent to the auction house.
pub fn encode_fulfillment_details(tx_hash: B256) -> Bytes {
    tx_hash.abi_encode().into()
}
