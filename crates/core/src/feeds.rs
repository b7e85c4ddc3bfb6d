//! API3 data feeds: identifiers, OEV feed derivation and signed values.
//!
//! A data feed is either a single beacon or a beacon set. Each beacon has an
//! OEV twin signed by the same airnode over `keccak256(templateId)`; the
//! OEV feed is built from those twins the same way the base feed is built
//! from its beacons.

use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use alloy::sol_types::SolValue;
use anyhow::{bail, Result};
use futures::future::join_all;
use oev_liquidator_api::{SignedData, SignedDataSource};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::FeedConfig;

/// One airnode/template pair and its on-chain id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Beacon {
    pub airnode: Address,
    pub template_id: B256,
    pub beacon_id: B256,
}

impl Beacon {
    pub fn new(airnode: Address, template_id: B256) -> Self {
        Self {
            airnode,
            template_id,
            beacon_id: derive_beacon_id(airnode, template_id),
        }
    }

    /// The beacon the same airnode signs for OEV updates.
    pub fn oev_twin(&self) -> Self {
        Self::new(self.airnode, derive_oev_template_id(self.template_id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFeed {
    pub data_feed_id: B256,
    pub beacons: Vec<Beacon>,
}

impl DataFeed {
    /// Build from registry details. The id is derived from the beacons.
    pub fn from_beacons(beacons: Vec<Beacon>) -> Self {
        let data_feed_id = match beacons.as_slice() {
            [single] => single.beacon_id,
            many => derive_beacon_set_id(&many.iter().map(|b| b.beacon_id).collect::<Vec<_>>()),
        };
        Self {
            data_feed_id,
            beacons,
        }
    }

    pub fn from_details(details: &[(Address, B256)]) -> Self {
        Self::from_beacons(
            details
                .iter()
                .map(|(airnode, template_id)| Beacon::new(*airnode, *template_id))
                .collect(),
        )
    }
}

/// A dAPI the market reads through a proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedFeed {
    pub dapi_name: String,
    pub encoded_dapi_name: B256,
    pub dapi_name_hash: B256,
    pub proxy: Address,
    pub oev_enabled: bool,
}

impl WatchedFeed {
    pub fn from_config(config: &FeedConfig) -> Result<Self> {
        let encoded_dapi_name = encode_bytes32_string(&config.dapi_name)?;
        Ok(Self {
            dapi_name: config.dapi_name.clone(),
            encoded_dapi_name,
            dapi_name_hash: derive_dapi_name_hash(encoded_dapi_name),
            proxy: config.proxy,
            oev_enabled: config.oev_enabled,
        })
    }
}

/// UTF-8 bytes right-padded to 32. At most 31 bytes so the value stays
/// null-terminated.
pub fn encode_bytes32_string(value: &str) -> Result<B256> {
    let bytes = value.as_bytes();
    if bytes.len() > 31 {
        bail!("string {value:?} is too long for bytes32");
    }
    let mut encoded = [0u8; 32];
    encoded[..bytes.len()].copy_from_slice(bytes);
    Ok(B256::from(encoded))
}

pub fn derive_dapi_name_hash(encoded_dapi_name: B256) -> B256 {
    keccak256(encoded_dapi_name)
}

/// `keccak256(abi.encodePacked(airnode, templateId))`
pub fn derive_beacon_id(airnode: Address, template_id: B256) -> B256 {
    let mut packed = [0u8; 52];
    packed[..20].copy_from_slice(airnode.as_slice());
    packed[20..].copy_from_slice(template_id.as_slice());
    keccak256(packed)
}

/// `keccak256(abi.encode(beaconIds))`
pub fn derive_beacon_set_id(beacon_ids: &[B256]) -> B256 {
    keccak256(beacon_ids.to_vec().abi_encode())
}

pub fn derive_oev_template_id(template_id: B256) -> B256 {
    keccak256(template_id)
}

/// The OEV feed mirroring `feed`.
pub fn derive_oev_feed(feed: &DataFeed) -> DataFeed {
    DataFeed::from_beacons(feed.beacons.iter().map(Beacon::oev_twin).collect())
}

/// An OEV feed and the freshest signed value of each of its beacons.
#[derive(Debug, Clone)]
pub struct OevFeedValues {
    pub feed: DataFeed,
    /// Same order as `feed.beacons`. `None` when no value was served.
    pub values: Vec<Option<SignedData>>,
}

/// Airnodes in first-seen order and the distinct beacon ids each serves.
/// Feeds sharing a beacon ask for it once.
fn group_beacons_by_airnode(oev_feeds: &[DataFeed]) -> (Vec<Address>, HashMap<Address, Vec<B256>>) {
    let mut airnodes: Vec<Address> = Vec::new();
    let mut beacons_by_airnode: HashMap<Address, Vec<B256>> = HashMap::new();
    let mut seen: HashSet<B256> = HashSet::new();
    for beacon in oev_feeds.iter().flat_map(|feed| &feed.beacons) {
        if !seen.insert(beacon.beacon_id) {
            continue;
        }
        beacons_by_airnode
            .entry(beacon.airnode)
            .or_insert_with(|| {
                airnodes.push(beacon.airnode);
                Vec::new()
            })
            .push(beacon.beacon_id);
    }
    (airnodes, beacons_by_airnode)
}

/// Fetch signed values for every beacon of `oev_feeds`.
///
/// One request per airnode, started `index * fetch_delay` apart. A failed
/// request or a beacon missing from the response leaves that value empty.
pub async fn fetch_oev_feed_values(
    source: &dyn SignedDataSource,
    oev_feeds: &[DataFeed],
    fetch_delay: Duration,
) -> Vec<OevFeedValues> {
    let (airnodes, beacons_by_airnode) = group_beacons_by_airnode(oev_feeds);

    info!(airnodes = airnodes.len(), "Fetching signed data from signed APIs");

    let responses = join_all(airnodes.iter().enumerate().map(|(index, airnode)| async move {
        tokio::time::sleep(fetch_delay * index as u32).await;
        match source.fetch_signed_data(*airnode).await {
            Ok(values) => values,
            Err(e) => {
                warn!(airnode = %airnode, error = %e, "Failed to fetch signed data");
                HashMap::new()
            }
        }
    }))
    .await;

    let mut values_by_beacon: HashMap<B256, SignedData> = HashMap::new();
    for (airnode, mut response) in airnodes.iter().zip(responses) {
        for beacon_id in &beacons_by_airnode[airnode] {
            match response.remove(beacon_id) {
                Some(value) => {
                    values_by_beacon.insert(*beacon_id, value);
                }
                None => {
                    warn!(airnode = %airnode, beacon_id = %beacon_id, "Beacon not found in signed data")
                }
            }
        }
    }
    debug!(values = values_by_beacon.len(), "Collected signed values");

    oev_feeds
        .iter()
        .map(|feed| OevFeedValues {
            values: feed
                .beacons
                .iter()
                .map(|beacon| values_by_beacon.get(&beacon.beacon_id).cloned())
                .collect(),
            feed: feed.clone(),
        })
        .collect()
}

/// `abi.encode(airnode, templateId, timestamp, encodedValue, signature)`
pub fn encode_signed_data(
    airnode: Address,
    template_id: B256,
    timestamp: u64,
    encoded_value: Bytes,
    signature: Bytes,
) -> Bytes {
    (airnode, template_id, U256::from(timestamp), encoded_value, signature)
        .abi_encode_params()
        .into()
}

/// Signed data for one OEV update of `base`, one entry per beacon.
///
/// Entries pair the OEV airnode with the base template id. Beacons without
/// a value are encoded with a zero timestamp and empty value and signature.
pub fn encode_oev_update_signed_data(base: &DataFeed, oev: &OevFeedValues) -> Vec<Bytes> {
    base.beacons
        .iter()
        .zip(&oev.feed.beacons)
        .zip(&oev.values)
        .map(|((beacon, oev_beacon), value)| match value {
            Some(signed) => encode_signed_data(
                oev_beacon.airnode,
                beacon.template_id,
                signed.timestamp,
                signed.encoded_value.clone(),
                signed.signature.clone(),
            ),
            None => encode_signed_data(
                oev_beacon.airnode,
                beacon.template_id,
                0,
                Bytes::new(),
                Bytes::new(),
            ),
        })
        .collect()
}
