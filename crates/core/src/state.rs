//! Process-wide bot state.
//!
//! Readers take an `Arc` snapshot without locking. Writers go through
//! `StateStore::update`, which clones the current state, applies the change
//! and swaps the result in while holding the single writer lock.

use alloy::primitives::{Address, B256};
use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use crate::feeds::{DataFeed, WatchedFeed};
use crate::position::PositionSet;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("bot state accessed before initialization")]
    Uninitialized,
}

#[derive(Debug, Clone, Default)]
pub struct BotState {
    pub watched_feeds: Vec<WatchedFeed>,

    /// Every borrower seen in the market's logs.
    pub all_positions: PositionSet,
    /// Significant positions.
    pub current_positions: PositionSet,
    /// Significant positions close to liquidation.
    pub interesting_positions: PositionSet,
    /// Last target chain block the log scan covered.
    pub target_chain_last_block: u64,

    /// Positions of the liquidation in flight. Non-empty blocks new attempts.
    pub currently_liquidated_positions: Vec<Address>,

    pub dapi_name_hash_to_data_feed_id: HashMap<B256, B256>,
    /// Base data feeds by id. Entries are never evicted.
    pub data_feeds: HashMap<B256, DataFeed>,
    /// OEV feeds by base data feed id.
    pub oev_feeds: HashMap<B256, DataFeed>,
}

impl BotState {
    pub fn new(watched_feeds: Vec<WatchedFeed>) -> Self {
        Self {
            watched_feeds,
            ..Self::default()
        }
    }

    /// Base data feeds of the watched dAPIs, in watch order. Feeds that
    /// are not resolved yet are skipped.
    pub fn resolved_feeds(&self, oev_only: bool) -> Vec<DataFeed> {
        self.watched_feeds
            .iter()
            .filter(|feed| !oev_only || feed.oev_enabled)
            .filter_map(|feed| {
                let data_feed_id = self.dapi_name_hash_to_data_feed_id.get(&feed.dapi_name_hash);
                let data_feed = data_feed_id.and_then(|id| self.data_feeds.get(id));
                if data_feed.is_none() {
                    warn!(
                        dapi_name = %feed.dapi_name,
                        data_feed_id = ?data_feed_id,
                        "Watched dAPI is not resolved"
                    );
                }
                data_feed.cloned()
            })
            .collect()
    }
}

pub struct StateStore {
    current: ArcSwapOption<BotState>,
    writer: Mutex<()>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            current: ArcSwapOption::empty(),
            writer: Mutex::new(()),
        }
    }

    pub fn initialize(&self, state: BotState) {
        let _guard = self.writer.lock();
        self.current.store(Some(Arc::new(state)));
    }

    pub fn is_initialized(&self) -> bool {
        self.current.load().is_some()
    }

    pub fn snapshot(&self) -> Result<Arc<BotState>, StateError> {
        self.current.load_full().ok_or(StateError::Uninitialized)
    }

    /// Apply `f` to a copy of the state and publish the copy.
    pub fn update<R>(&self, f: impl FnOnce(&mut BotState) -> R) -> Result<R, StateError> {
        let _guard = self.writer.lock();
        let current = self.current.load_full().ok_or(StateError::Uninitialized)?;
        let mut next = BotState::clone(&current);
        let result = f(&mut next);
        self.current.store(Some(Arc::new(next)));
        Ok(result)
    }

    /// Mark `positions` as being liquidated unless another liquidation is
    /// in flight. Returns whether the claim succeeded.
    pub fn try_claim_liquidation(&self, positions: &[Address]) -> Result<bool, StateError> {
        self.update(|state| {
            if !state.currently_liquidated_positions.is_empty() {
                return false;
            }
            state.currently_liquidated_positions = positions.to_vec();
            true
        })
    }

    pub fn release_liquidation(&self) -> Result<(), StateError> {
        self.update(|state| state.currently_liquidated_positions.clear())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeedConfig;

    fn watched(name: &str, oev_enabled: bool) -> WatchedFeed {
        WatchedFeed::from_config(&FeedConfig {
            dapi_name: name.to_string(),
            proxy: Address::ZERO,
            oev_enabled,
        })
        .unwrap()
    }

    #[test]
    fn test_uninitialized_access() {
        let store = StateStore::new();
        assert!(!store.is_initialized());
        assert_eq!(store.snapshot().unwrap_err(), StateError::Uninitialized);
        assert_eq!(
            store.update(|_| ()).unwrap_err(),
            StateError::Uninitialized
        );
    }

    #[test]
    fn test_update_replaces_snapshot() {
        let store = StateStore::new();
        store.initialize(BotState::default());

        let before = store.snapshot().unwrap();
        store
            .update(|state| state.target_chain_last_block = 42)
            .unwrap();
        let after = store.snapshot().unwrap();

        // Earlier snapshots are unaffected.
        assert_eq!(before.target_chain_last_block, 0);
        assert_eq!(after.target_chain_last_block, 42);
    }

    #[test]
    fn test_liquidation_guard() {
        let store = StateStore::new();
        store.initialize(BotState::default());
        let first = [Address::repeat_byte(1)];
        let second = [Address::repeat_byte(2)];

        assert!(store.try_claim_liquidation(&first).unwrap());
        assert!(!store.try_claim_liquidation(&second).unwrap());
        assert_eq!(
            store.snapshot().unwrap().currently_liquidated_positions,
            first.to_vec()
        );

        store.release_liquidation().unwrap();
        assert!(store.snapshot().unwrap().currently_liquidated_positions.is_empty());
        assert!(store.try_claim_liquidation(&second).unwrap());
    }

    #[test]
    fn test_concurrent_updates_are_serialized() {
        let store = Arc::new(StateStore::new());
        store.initialize(BotState::default());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        store.update(|state| state.target_chain_last_block += 1).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.snapshot().unwrap().target_chain_last_block, 800);
    }

    #[test]
    fn test_resolved_feeds() {
        let eth = watched("ETH/USD", true);
        let usdc = watched("USDC/USD", false);
        let mut state = BotState::new(vec![eth.clone(), usdc.clone()]);

        let eth_feed = DataFeed::from_details(&[(Address::repeat_byte(1), B256::repeat_byte(2))]);
        let usdc_feed = DataFeed::from_details(&[(Address::repeat_byte(3), B256::repeat_byte(4))]);
        state
            .dapi_name_hash_to_data_feed_id
            .insert(eth.dapi_name_hash, eth_feed.data_feed_id);
        state.data_feeds.insert(eth_feed.data_feed_id, eth_feed.clone());

        // USDC/USD is not resolved yet
        assert_eq!(state.resolved_feeds(false), vec![eth_feed.clone()]);

        state
            .dapi_name_hash_to_data_feed_id
            .insert(usdc.dapi_name_hash, usdc_feed.data_feed_id);
        state.data_feeds.insert(usdc_feed.data_feed_id, usdc_feed.clone());
        assert_eq!(state.resolved_feeds(false), vec![eth_feed.clone(), usdc_feed]);
        assert_eq!(state.resolved_feeds(true), vec![eth_feed]);
    }
}
