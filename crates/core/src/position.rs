//! Borrower position sets and per-position classification.

use alloy::primitives::{Address, U256};
use oev_liquidator_chain::AccountDetails;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::u256_math;

/// Loan-to-value (percent) from which a significant position is watched closely.
pub const INTERESTING_LOAN_TO_VALUE: f64 = 80.0;

/// Positions reported in the "close to liquidation" diagnostic.
pub const CLOSE_TO_LIQUIDATION_LOG_SIZE: usize = 10;

/// Deduplicated borrower addresses in first-seen order.
///
/// Serializes as a plain JSON array so snapshot files stay readable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Address>", into = "Vec<Address>")]
pub struct PositionSet {
    order: Vec<Address>,
    members: HashSet<Address>,
}

impl PositionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `position` unless already present. Returns whether it was added.
    pub fn insert(&mut self, position: Address) -> bool {
        if self.members.insert(position) {
            self.order.push(position);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, position: &Address) -> bool {
        self.members.contains(position)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Address> {
        self.order.iter()
    }

    pub fn as_slice(&self) -> &[Address] {
        &self.order
    }

    /// Union with `incoming`. Existing members keep their position, new ones
    /// are appended in the order they arrive.
    pub fn merged<'a>(&self, incoming: impl IntoIterator<Item = &'a Address>) -> Self {
        let mut merged = self.clone();
        for position in incoming {
            merged.insert(*position);
        }
        merged
    }

    /// Members of `self` that `other` lacks.
    pub fn difference(&self, other: &PositionSet) -> Vec<Address> {
        self.order
            .iter()
            .filter(|position| !other.contains(position))
            .copied()
            .collect()
    }
}

impl PartialEq for PositionSet {
    fn eq(&self, other: &Self) -> bool {
        self.order == other.order
    }
}

impl Eq for PositionSet {}

impl FromIterator<Address> for PositionSet {
    fn from_iter<I: IntoIterator<Item = Address>>(iter: I) -> Self {
        let mut set = Self::new();
        for position in iter {
            set.insert(position);
        }
        set
    }
}

impl From<Vec<Address>> for PositionSet {
    fn from(positions: Vec<Address>) -> Self {
        positions.into_iter().collect()
    }
}

impl From<PositionSet> for Vec<Address> {
    fn from(set: PositionSet) -> Self {
        set.order
    }
}

impl<'a> IntoIterator for &'a PositionSet {
    type Item = &'a Address;
    type IntoIter = std::slice::Iter<'a, Address>;

    fn into_iter(self) -> Self::IntoIter {
        self.order.iter()
    }
}

/// Members gained and lost between two versions of a set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PositionChanges {
    pub added: Vec<Address>,
    pub discarded: Vec<Address>,
}

impl PositionChanges {
    pub fn between(previous: &PositionSet, next: &PositionSet) -> Self {
        Self {
            added: next.difference(previous),
            discarded: previous.difference(next),
        }
    }
}

/// Account figures with the derived loan-to-value ratio.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionDetails {
    pub position: Address,
    pub borrow_usd: U256,
    pub max_borrow_usd: U256,
    pub collateral_usd: U256,
    pub is_liquidatable: bool,
    /// `borrow / max_borrow * 100`, 0 when nothing can be borrowed.
    pub loan_to_value: f64,
}

impl From<AccountDetails> for PositionDetails {
    fn from(details: AccountDetails) -> Self {
        Self {
            position: details.account,
            loan_to_value: u256_math::ratio_percentage(details.borrow_usd, details.max_borrow_usd),
            borrow_usd: details.borrow_usd,
            max_borrow_usd: details.max_borrow_usd,
            collateral_usd: details.collateral_usd,
            is_liquidatable: details.is_liquidatable,
        }
    }
}

impl PositionDetails {
    /// Large enough to matter and actually borrowing.
    pub fn is_significant(&self, min_collateral_usd: U256) -> bool {
        self.collateral_usd >= min_collateral_usd && self.borrow_usd > U256::ZERO
    }

    pub fn is_interesting(&self, min_collateral_usd: U256) -> bool {
        self.is_significant(min_collateral_usd) && self.loan_to_value >= INTERESTING_LOAN_TO_VALUE
    }
}

/// Result of one filter pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilteredPositions {
    #[serde(rename = "currentPositions")]
    pub current: PositionSet,
    #[serde(rename = "interestingPositions")]
    pub interesting: PositionSet,
}

/// Split `details` into significant (current) and interesting positions.
/// `min_collateral_usd` uses Comet's 8-decimal USD scale.
pub fn classify(details: &[PositionDetails], min_collateral_usd: U256) -> FilteredPositions {
    let mut filtered = FilteredPositions::default();
    for detail in details {
        if detail.is_significant(min_collateral_usd) {
            filtered.current.insert(detail.position);
            if detail.loan_to_value >= INTERESTING_LOAN_TO_VALUE {
                filtered.interesting.insert(detail.position);
            }
        }
    }
    filtered
}

/// Liquidatable positions, largest collateral first. Ties keep input order.
pub fn rank_liquidatable(details: &[PositionDetails]) -> Vec<PositionDetails> {
    let mut liquidatable: Vec<_> = details
        .iter()
        .filter(|detail| detail.is_liquidatable)
        .cloned()
        .collect();
    liquidatable.sort_by(|a, b| b.collateral_usd.cmp(&a.collateral_usd));
    liquidatable
}

/// Up to `limit` healthy positions ordered by ascending loan-to-value.
pub fn close_to_liquidation(details: &[PositionDetails], limit: usize) -> Vec<&PositionDetails> {
    let mut healthy: Vec<_> = details.iter().filter(|detail| !detail.is_liquidatable).collect();
    healthy.sort_by(|a, b| a.loan_to_value.total_cmp(&b.loan_to_value));
    healthy.truncate(limit);
    healthy
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details(byte: u8, borrow: u64, max_borrow: u64, collateral: u64) -> PositionDetails {
        AccountDetails {
            account: Address::repeat_byte(byte),
            borrow_usd: U256::from(borrow),
            max_borrow_usd: U256::from(max_borrow),
            collateral_usd: U256::from(collateral),
            is_liquidatable: false,
        }
        .into()
    }

    fn liquidatable(mut detail: PositionDetails) -> PositionDetails {
        detail.is_liquidatable = true;
        detail
    }

    #[test]
    fn test_merge_deduplicates_and_keeps_order() {
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);
        let c = Address::repeat_byte(3);

        let existing: PositionSet = vec![a, b].into();
        let merged = existing.merged(&[b, c, c]);

        assert_eq!(merged.as_slice(), &[a, b, c]);
        assert!(merged.contains(&a) && merged.contains(&c));
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn test_from_vec_deduplicates() {
        let a = Address::repeat_byte(1);
        let set: PositionSet = vec![a, a, a].into();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_changes_between() {
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);
        let c = Address::repeat_byte(3);

        let previous: PositionSet = vec![a, b].into();
        let next: PositionSet = vec![b, c].into();
        let changes = PositionChanges::between(&previous, &next);

        assert_eq!(changes.added, vec![c]);
        assert_eq!(changes.discarded, vec![a]);
    }

    #[test]
    fn test_serializes_as_array() {
        let set: PositionSet = vec![Address::repeat_byte(0xab)].into();
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, format!("[\"{}\"]", Address::repeat_byte(0xab)));

        let parsed: PositionSet = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, set);
    }

    #[test]
    fn test_loan_to_value() {
        assert_eq!(details(1, 80, 0, 1_000).loan_to_value, 0.0);
        assert!((details(1, 80, 100, 1_000).loan_to_value - 80.0).abs() < 1e-9);
        assert!((details(1, 120, 100, 1_000).loan_to_value - 120.0).abs() < 1e-9);
    }

    #[test]
    fn test_significant_and_interesting() {
        let min = U256::from(500u64);

        let position = details(1, 80, 100, 1_000);
        assert!(position.is_significant(min));
        assert!(position.is_interesting(min));

        // Healthy but significant
        let healthy = details(2, 10, 100, 1_000);
        assert!(healthy.is_significant(min));
        assert!(!healthy.is_interesting(min));

        // Too small
        let small = details(3, 90, 100, 499);
        assert!(!small.is_significant(min));
        assert!(!small.is_interesting(min));

        // Nothing borrowed
        let idle = details(4, 0, 100, 10_000);
        assert!(!idle.is_significant(min));
    }

    #[test]
    fn test_classify() {
        let min = U256::from(500u64);
        let all = vec![
            details(1, 80, 100, 1_000),
            details(2, 10, 100, 1_000),
            details(3, 90, 100, 100),
        ];

        let filtered = classify(&all, min);
        assert_eq!(
            filtered.current.as_slice(),
            &[Address::repeat_byte(1), Address::repeat_byte(2)]
        );
        assert_eq!(filtered.interesting.as_slice(), &[Address::repeat_byte(1)]);
        assert!(filtered.interesting.iter().all(|p| filtered.current.contains(p)));
    }

    #[test]
    fn test_rank_liquidatable_by_collateral() {
        let all = vec![
            liquidatable(details(1, 90, 80, 500)),
            details(2, 10, 100, 9_000),
            liquidatable(details(3, 90, 80, 2_000)),
            liquidatable(details(4, 90, 80, 500)),
        ];

        let ranked: Vec<_> = rank_liquidatable(&all).iter().map(|d| d.position).collect();
        assert_eq!(
            ranked,
            vec![
                Address::repeat_byte(3),
                Address::repeat_byte(1),
                Address::repeat_byte(4)
            ]
        );
    }

    #[test]
    fn test_close_to_liquidation_order_and_cap() {
        let mut all: Vec<_> = (1..=12u8)
            .map(|i| details(i, 100 - i as u64, 100, 1_000))
            .collect();
        all.push(liquidatable(details(13, 99, 90, 1_000)));

        let close = close_to_liquidation(&all, CLOSE_TO_LIQUIDATION_LOG_SIZE);
        assert_eq!(close.len(), 10);
        assert!(close.iter().all(|d| !d.is_liquidatable));
        assert!(close.windows(2).all(|w| w[0].loan_to_value <= w[1].loan_to_value));
        assert_eq!(close[0].position, Address::repeat_byte(12));
    }

    #[test]
    fn test_merge_with_empty_sets() {
        let a = Address::repeat_byte(1);
        let empty = PositionSet::new();

        assert!(empty.merged(&[]).is_empty());
        assert_eq!(empty.merged(&[a, a]).as_slice(), &[a]);

        let existing: PositionSet = vec![a].into();
        assert_eq!(existing.merged(&empty), existing);
        assert!(PositionChanges::between(&existing, &existing.merged(&empty)).added.is_empty());
    }

    #[test]
    fn test_merge_is_ordered_union() {
        use rand::{rngs::StdRng, Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            // Small byte range so the sides overlap and repeat.
            let existing: Vec<Address> = (0..rng.gen_range(0..8))
                .map(|_| Address::repeat_byte(rng.gen_range(0..6)))
                .collect();
            let incoming: Vec<Address> = (0..rng.gen_range(0..8))
                .map(|_| Address::repeat_byte(rng.gen_range(0..6)))
                .collect();

            let base = PositionSet::from(existing.clone());
            let merged = base.merged(&incoming);

            let unique: HashSet<_> = merged.iter().collect();
            assert_eq!(unique.len(), merged.len());
            assert!(existing.iter().chain(&incoming).all(|p| merged.contains(p)));
            assert!(merged.iter().all(|p| existing.contains(p) || incoming.contains(p)));
            assert_eq!(&merged.as_slice()[..base.len()], base.as_slice());
        }
    }

    #[test]
    fn test_zero_figures() {
        let min = U256::from(500u64);

        // No collateral: LTV still defined, never significant.
        let no_collateral = details(1, 50, 100, 0);
        assert!((no_collateral.loan_to_value - 50.0).abs() < 1e-9);
        assert!(!no_collateral.is_significant(min));

        let nothing = details(2, 0, 0, 0);
        assert_eq!(nothing.loan_to_value, 0.0);
        assert!(!nothing.is_significant(U256::ZERO));

        // Borrowing against nothing borrowable.
        let underwater = details(3, 50, 0, 1_000);
        assert_eq!(underwater.loan_to_value, 0.0);
        assert!(underwater.is_significant(min));
        assert!(!underwater.is_interesting(min));
    }

    #[test]
    fn test_classification_is_exclusive() {
        let min = U256::from(500u64);
        let mut all = Vec::new();
        let mut byte = 0u8;
        for borrow in [0u64, 1, 79, 80, 81, 100, 150] {
            for max_borrow in [0u64, 100] {
                for collateral in [0u64, 499, 500, 10_000] {
                    byte += 1;
                    all.push(details(byte, borrow, max_borrow, collateral));
                }
            }
        }

        let filtered = classify(&all, min);
        for detail in &all {
            let significant = detail.collateral_usd >= min && detail.borrow_usd > U256::ZERO;
            let interesting = significant && detail.loan_to_value >= INTERESTING_LOAN_TO_VALUE;
            assert_eq!(filtered.current.contains(&detail.position), significant);
            assert_eq!(filtered.interesting.contains(&detail.position), interesting);
            assert_eq!(detail.is_interesting(min), interesting);
        }
        assert!(filtered.interesting.iter().all(|p| filtered.current.contains(p)));
        assert!(classify(&[], min).current.is_empty());
    }

    #[test]
    fn test_rank_liquidatable_ties_and_empty() {
        assert!(rank_liquidatable(&[]).is_empty());
        assert!(rank_liquidatable(&[details(1, 10, 100, 1_000)]).is_empty());

        let all: Vec<_> = (1..=5u8)
            .map(|i| liquidatable(details(i, 90, 80, 1_000)))
            .collect();
        let ranked: Vec<_> = rank_liquidatable(&all).iter().map(|d| d.position).collect();
        let input: Vec<_> = all.iter().map(|d| d.position).collect();
        assert_eq!(ranked, input);
    }

    #[test]
    fn test_close_to_liquidation_ties_keep_input_order() {
        let all = vec![
            details(1, 85, 100, 1_000),
            details(2, 70, 100, 1_000),
            details(3, 85, 100, 1_000),
            details(4, 70, 100, 1_000),
        ];
        let order: Vec<_> = close_to_liquidation(&all, CLOSE_TO_LIQUIDATION_LOG_SIZE)
            .iter()
            .map(|d| d.position)
            .collect();
        assert_eq!(
            order,
            vec![
                Address::repeat_byte(2),
                Address::repeat_byte(4),
                Address::repeat_byte(1),
                Address::repeat_byte(3)
            ]
        );
    }

    #[test]
    fn test_close_to_liquidation_cap_boundary() {
        let healthy = |count: u8| -> Vec<PositionDetails> {
            (1..=count).map(|i| details(i, i as u64, 100, 1_000)).collect()
        };

        assert!(close_to_liquidation(&[], CLOSE_TO_LIQUIDATION_LOG_SIZE).is_empty());
        assert_eq!(close_to_liquidation(&healthy(10), CLOSE_TO_LIQUIDATION_LOG_SIZE).len(), 10);

        let eleven = healthy(11);
        let close = close_to_liquidation(&eleven, CLOSE_TO_LIQUIDATION_LOG_SIZE);
        assert_eq!(close.len(), 10);
        // The highest LTV is the one cut.
        assert!(close.iter().all(|d| d.position != Address::repeat_byte(11)));
    }
}
