//! External HTTP services used by the OEV liquidator.
//!
//! This crate provides the signed API client that serves airnode-signed
//! beacon values used to build OEV feed updates.

mod signed_api;

pub use signed_api::{
    SignedApiClient, SignedApiError, SignedData, SignedDataSource, API3_SIGNED_API_URL,
    NODARY_SIGNED_API_URL,
};
