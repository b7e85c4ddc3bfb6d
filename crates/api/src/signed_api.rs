//! Signed API client for airnode-signed price data.
//!
//! Every airnode's data is served by more than one signed API. Requests go
//! to all of them at once and the first successful response wins.

use alloy::primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use futures::future::select_ok;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};

pub const API3_SIGNED_API_URL: &str = "https://signed-api.api3.org/public";
pub const NODARY_SIGNED_API_URL: &str = "https://signed-api.nodary.io/public";

/// One airnode-signed beacon value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedData {
    pub airnode: Address,
    pub template_id: B256,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: u64,
    pub encoded_value: Bytes,
    pub signature: Bytes,
}

/// Signed APIs serve the timestamp as a decimal string.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Timestamp {
        Text(String),
        Number(u64),
    }

    match Timestamp::deserialize(deserializer)? {
        Timestamp::Number(value) => Ok(value),
        Timestamp::Text(text) => text.parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Deserialize)]
struct SignedApiResponse {
    data: HashMap<String, SignedData>,
}

impl SignedApiResponse {
    /// Key the values by beacon id, dropping keys that are not bytes32.
    fn into_beacons(self) -> HashMap<B256, SignedData> {
        self.data
            .into_iter()
            .filter_map(|(beacon_id, data)| match B256::from_str(&beacon_id) {
                Ok(id) => Some((id, data)),
                Err(_) => {
                    warn!(beacon_id, "Skipping malformed beacon id in signed API response");
                    None
                }
            })
            .collect()
    }
}

#[derive(Debug, Error)]
pub enum SignedApiError {
    #[error("no signed API endpoints configured")]
    NoEndpoints,
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} responded with status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("invalid response body from {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Source of signed beacon values for an airnode.
#[async_trait]
pub trait SignedDataSource: Send + Sync {
    /// All values currently served for `airnode`, keyed by beacon id.
    async fn fetch_signed_data(
        &self,
        airnode: Address,
    ) -> Result<HashMap<B256, SignedData>, SignedApiError>;
}

#[derive(Debug, Clone)]
pub struct SignedApiClient {
    client: reqwest::Client,
    base_urls: Vec<String>,
}

impl SignedApiClient {
    pub fn new(base_urls: Vec<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_urls: base_urls
                .into_iter()
                .map(|url| url.trim_end_matches('/').to_string())
                .collect(),
        })
    }

    /// API3 and Nodary public endpoints.
    pub fn public(timeout: Duration) -> anyhow::Result<Self> {
        Self::new(
            vec![
                API3_SIGNED_API_URL.to_string(),
                NODARY_SIGNED_API_URL.to_string(),
            ],
            timeout,
        )
    }

    pub fn base_urls(&self) -> &[String] {
        &self.base_urls
    }

    async fn fetch_from(
        &self,
        base_url: &str,
        airnode: Address,
    ) -> Result<HashMap<B256, SignedData>, SignedApiError> {
        let url = format!("{base_url}/{airnode}");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| SignedApiError::Request {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SignedApiError::Status { url, status });
        }

        let body: SignedApiResponse = response
            .json()
            .await
            .map_err(|source| SignedApiError::Body {
                url: url.clone(),
                source,
            })?;

        let beacons = body.into_beacons();
        debug!(url, beacons = beacons.len(), "Signed API responded");
        Ok(beacons)
    }
}

#[async_trait]
impl SignedDataSource for SignedApiClient {
    #[instrument(skip(self), level = "debug")]
    async fn fetch_signed_data(
        &self,
        airnode: Address,
    ) -> Result<HashMap<B256, SignedData>, SignedApiError> {
        if self.base_urls.is_empty() {
            return Err(SignedApiError::NoEndpoints);
        }

        let requests: Vec<_> = self
            .base_urls
            .iter()
            .map(|base_url| Box::pin(self.fetch_from(base_url, airnode)))
            .collect();

        let (beacons, _pending) = select_ok(requests).await?;
        Ok(beacons)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, b256};

    const RESPONSE: &str = r#"{
        "count": 2,
        "data": {
            "0x4385954e058fbe6b6a744f32a4f89d67aad099f8fb8b23e7ea8dd366ae88151d": {
                "airnode": "0xc52EeA00154B4fF1EbbF8Ba39FDe37F1AC3B9Fd4",
                "templateId": "0x96504241fb9ae9a5941f97c9561dcfcd7cee77ee9486a58c8e78551c1268ddf9",
                "timestamp": "1718805000",
                "encodedValue": "0x00000000000000000000000000000000000000000000000b5b2e0a1c3e4c0000",
                "signature": "0xaa"
            },
            "not-a-beacon-id": {
                "airnode": "0xc52EeA00154B4fF1EbbF8Ba39FDe37F1AC3B9Fd4",
                "templateId": "0x96504241fb9ae9a5941f97c9561dcfcd7cee77ee9486a58c8e78551c1268ddf9",
                "timestamp": 1718805000,
                "encodedValue": "0x01",
                "signature": "0xbb"
            }
        }
    }"#;

    #[test]
    fn test_parse_response() {
        let response: SignedApiResponse = serde_json::from_str(RESPONSE).unwrap();
        let beacons = response.into_beacons();

        assert_eq!(beacons.len(), 1);
        let beacon_id = b256!("0x4385954e058fbe6b6a744f32a4f89d67aad099f8fb8b23e7ea8dd366ae88151d");
        let data = &beacons[&beacon_id];
        assert_eq!(data.airnode, address!("c52EeA00154B4fF1EbbF8Ba39FDe37F1AC3B9Fd4"));
        assert_eq!(data.timestamp, 1_718_805_000);
        assert_eq!(data.encoded_value.len(), 32);
        assert_eq!(data.signature, Bytes::from_static(&[0xaa]));
    }

    #[test]
    fn test_numeric_timestamp() {
        let json = r#"{
            "airnode": "0xc52EeA00154B4fF1EbbF8Ba39FDe37F1AC3B9Fd4",
            "templateId": "0x96504241fb9ae9a5941f97c9561dcfcd7cee77ee9486a58c8e78551c1268ddf9",
            "timestamp": 42,
            "encodedValue": "0x01",
            "signature": "0x02"
        }"#;
        let data: SignedData = serde_json::from_str(json).unwrap();
        assert_eq!(data.timestamp, 42);
    }

    #[test]
    fn test_client_trims_base_urls() {
        let client = SignedApiClient::new(
            vec!["https://example.org/public/".to_string()],
            Duration::from_secs(10),
        )
        .unwrap();
        assert_eq!(client.base_urls(), &["https://example.org/public".to_string()]);
    }

    #[tokio::test]
    async fn test_no_endpoints() {
        let client = SignedApiClient::new(vec![], Duration::from_secs(1)).unwrap();
        let result = client.fetch_signed_data(Address::ZERO).await;
        assert!(matches!(result, Err(SignedApiError::NoEndpoints)));
    }

    #[tokio::test]
    async fn test_all_endpoints_failing() {
        // Nothing listens on the discard port, so both requests fail.
        let client = SignedApiClient::new(
            vec![
                "http://127.0.0.1:9".to_string(),
                "http://127.0.0.1:9/other".to_string(),
            ],
            Duration::from_secs(2),
        )
        .unwrap();
        let result = client.fetch_signed_data(Address::ZERO).await;
        assert!(matches!(result, Err(SignedApiError::Request { .. })));
    }

    #[tokio::test]
    #[ignore] // Requires network
    async fn test_fetch_public_signed_data() {
        let client = SignedApiClient::public(Duration::from_secs(10)).unwrap();
        let beacons = client
            .fetch_signed_data(address!("c52EeA00154B4fF1EbbF8Ba39FDe37F1AC3B9Fd4"))
            .await
            .unwrap();
        assert!(!beacons.is_empty());
    }
}
