//! Listing equivalence and deterministic clustering.
//!
//! Two listings match iff their normalized names are equal and non-empty and
//! their quantities are equivalent. There is no fuzzy scoring; manual curation
//! is the correction path for missed matches.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use shelfmatch_core::{GroupId, Platform};
use shelfmatch_normalize::quantity_equivalent;

use crate::disjoint_set::DisjointSet;
use crate::listing::SourceProduct;

/// Result of comparing two listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchOutcome {
    Matched,
    /// At least one side normalized to an empty name.
    EmptyName,
    NameMismatch,
    QuantityMismatch,
}

impl MatchOutcome {
    pub fn is_match(self) -> bool {
        self == MatchOutcome::Matched
    }
}

/// A compared pair and its outcome. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchCandidate<'a> {
    pub left: &'a SourceProduct,
    pub right: &'a SourceProduct,
    pub outcome: MatchOutcome,
}

/// Compare already-normalized names and raw quantity strings.
pub fn compare_normalized(
    left_name: &str,
    left_quantity: &str,
    right_name: &str,
    right_quantity: &str,
) -> MatchOutcome {
    if left_name.is_empty() || right_name.is_empty() {
        MatchOutcome::EmptyName
    } else if left_name != right_name {
        MatchOutcome::NameMismatch
    } else if !quantity_equivalent(left_quantity, right_quantity) {
        MatchOutcome::QuantityMismatch
    } else {
        MatchOutcome::Matched
    }
}

pub fn evaluate<'a>(left: &'a SourceProduct, right: &'a SourceProduct) -> MatchCandidate<'a> {
    let outcome = compare_normalized(
        &left.normalized_name(),
        &left.quantity,
        &right.normalized_name(),
        &right.quantity,
    );
    MatchCandidate { left, right, outcome }
}

pub fn is_match(left: &SourceProduct, right: &SourceProduct) -> bool {
    evaluate(left, right).outcome.is_match()
}

fn identity_key(listing: &SourceProduct) -> (&str, &str, chrono::DateTime<chrono::Utc>) {
    (
        listing.platform.as_str(),
        listing.source_product_id.trim(),
        listing.observed_at,
    )
}

/// Fold a multi-platform batch into clusters of matching listings.
///
/// Matches are transitive (A~B and B~C puts A, B, C together). Comparisons are
/// restricted to listings sharing a normalized name; repeated observations of
/// the same member always share a cluster. Each cluster's indices are sorted
/// by listing identity and clusters are ordered by their smallest listing, so
/// the membership does not depend on the order of `listings`.
pub fn cluster_batch(listings: &[SourceProduct]) -> Vec<Vec<usize>> {
    let mut set = DisjointSet::new(listings.len());

    let mut by_name: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    let mut by_member: BTreeMap<(&str, &str), usize> = BTreeMap::new();
    for (idx, listing) in listings.iter().enumerate() {
        let name = listing.normalized_name();
        if !name.is_empty() {
            by_name.entry(name).or_default().push(idx);
        }
        let member = (listing.platform.as_str(), listing.source_product_id.trim());
        match by_member.get(&member) {
            Some(first) => {
                set.union(*first, idx);
            }
            None => {
                by_member.insert(member, idx);
            }
        }
    }

    for bucket in by_name.values() {
        for (i, &a) in bucket.iter().enumerate() {
            for &b in &bucket[i + 1..] {
                if quantity_equivalent(&listings[a].quantity, &listings[b].quantity) {
                    set.union(a, b);
                }
            }
        }
    }

    let mut clusters = set.groups();
    for cluster in &mut clusters {
        cluster.sort_by(|&a, &b| {
            identity_key(&listings[a])
                .cmp(&identity_key(&listings[b]))
                .then(a.cmp(&b))
        });
    }
    clusters.sort_by(|a, b| identity_key(&listings[a[0]]).cmp(&identity_key(&listings[b[0]])));
    clusters
}

/// An existing group that a listing could join.
pub trait Candidate {
    fn group_id(&self) -> GroupId;

    /// Whether the group is known under this normalized name.
    fn matches_name(&self, normalized_name: &str) -> bool;

    fn canonical_quantity(&self) -> &str;

    fn covers_platform(&self, platform: &Platform) -> bool;
}

/// Choose the group a listing joins among `candidates`, given in the fixed
/// iteration order.
///
/// Only candidates with the same name and an equivalent quantity qualify. A
/// candidate already holding a member from the listing's platform wins;
/// otherwise the first qualifying candidate does.
pub fn pick_candidate<'c, C, I>(listing: &SourceProduct, candidates: I) -> Option<&'c C>
where
    C: Candidate + 'c,
    I: IntoIterator<Item = &'c C>,
{
    let name = listing.normalized_name();
    if name.is_empty() {
        return None;
    }

    let mut first = None;
    for candidate in candidates {
        if !candidate.matches_name(&name)
            || !quantity_equivalent(&listing.quantity, candidate.canonical_quantity())
        {
            continue;
        }
        if candidate.covers_platform(&listing.platform) {
            return Some(candidate);
        }
        first.get_or_insert(candidate);
    }
    first
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 9, minute, 0).unwrap()
    }

    fn listing(platform: &str, id: &str, name: &str, quantity: &str) -> SourceProduct {
        SourceProduct::new(Platform::new(platform).unwrap(), id, name, quantity, at(0))
    }

    #[test]
    fn different_quantities_do_not_match() {
        let a = listing("blinkit", "b-1", "Fresh Onion", "1 kg");
        let b = listing("zepto", "z-1", "Fresh Onion", "500 g");
        assert_eq!(evaluate(&a, &b).outcome, MatchOutcome::QuantityMismatch);
    }

    #[test]
    fn same_name_and_quantity_match_across_platforms() {
        let a = listing("zepto", "z-1", "Nutroactive Keto Atta", "1 kg");
        let b = listing("blinkit", "b-1", "Nutroactive Keto Atta", "1000 g");
        assert!(is_match(&a, &b));
    }

    #[test]
    fn empty_names_never_match() {
        let a = listing("zepto", "z-1", "(1 kg) Pack", "1 kg");
        let b = listing("blinkit", "b-1", "(1 kg) Pack", "1 kg");
        assert_eq!(evaluate(&a, &b).outcome, MatchOutcome::EmptyName);
    }

    #[test]
    fn names_must_match_exactly() {
        let a = listing("zepto", "z-1", "Keto Atta", "1 kg");
        let b = listing("blinkit", "b-1", "Keto Atta Flour", "1 kg");
        assert_eq!(evaluate(&a, &b).outcome, MatchOutcome::NameMismatch);
    }

    #[test]
    fn cluster_batch_folds_transitively() {
        let batch = vec![
            listing("zepto", "z-1", "Toned Milk", "500 ml"),
            listing("blinkit", "b-1", "Toned Milk", ""),
            listing("instamart", "i-1", "Toned Milk", "0.5 l"),
            listing("zepto", "z-2", "Fresh Onion", "1 kg"),
        ];
        let clusters = cluster_batch(&batch);
        assert_eq!(clusters.len(), 2);
        assert!(clusters.iter().any(|c| c.len() == 3));
    }

    #[test]
    fn unknown_quantity_bridges_different_sizes() {
        let batch = vec![
            listing("zepto", "z-1", "Fresh Onion", "1 kg"),
            listing("blinkit", "b-1", "Fresh Onion", "500 g"),
            listing("instamart", "i-1", "Fresh Onion", "loose"),
        ];
        assert_eq!(cluster_batch(&batch).len(), 1);
    }

    #[test]
    fn cluster_batch_keeps_repeated_member_together() {
        let mut later = listing("zepto", "z-1", "Renamed Onion", "1 kg");
        later.observed_at = at(30);
        let batch = vec![listing("zepto", "z-1", "Fresh Onion", "1 kg"), later];
        assert_eq!(cluster_batch(&batch), vec![vec![0, 1]]);
    }

    struct Group {
        id: GroupId,
        name: &'static str,
        quantity: &'static str,
        platforms: Vec<Platform>,
    }

    impl Candidate for Group {
        fn group_id(&self) -> GroupId {
            self.id
        }
        fn matches_name(&self, normalized_name: &str) -> bool {
            self.name == normalized_name
        }
        fn canonical_quantity(&self) -> &str {
            self.quantity
        }
        fn covers_platform(&self, platform: &Platform) -> bool {
            self.platforms.contains(platform)
        }
    }

    #[test]
    fn pick_candidate_prefers_same_platform_then_first() {
        let zepto = Platform::new("zepto").unwrap();
        let blinkit = Platform::new("blinkit").unwrap();
        let groups = [
            Group { id: GroupId::new(), name: "keto atta", quantity: "1 kg", platforms: vec![blinkit.clone()] },
            Group { id: GroupId::new(), name: "keto atta", quantity: "1000 g", platforms: vec![zepto] },
            Group { id: GroupId::new(), name: "keto atta", quantity: "1 kg", platforms: vec![blinkit] },
        ];

        let from_zepto = listing("zepto", "z-9", "Keto Atta", "1 kg");
        assert_eq!(pick_candidate(&from_zepto, &groups).map(|g| g.id), Some(groups[1].id));

        let from_instamart = listing("instamart", "i-9", "Keto Atta", "1 kg");
        assert_eq!(pick_candidate(&from_instamart, &groups).map(|g| g.id), Some(groups[0].id));

        let wrong_size = listing("instamart", "i-9", "Keto Atta", "5 kg");
        assert!(pick_candidate(&wrong_size, &groups).is_none());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_listing() -> impl Strategy<Value = SourceProduct> {
            let platform = prop_oneof![Just("zepto"), Just("blinkit"), Just("instamart")];
            let name = prop_oneof![Just("Fresh Onion"), Just("Toned Milk (Pouch)"), Just("Keto Atta")];
            let quantity = prop_oneof![Just("1 kg"), Just("1000 g"), Just("500 g"), Just(""), Just("0.5 l")];
            (platform, 0u8..6, name, quantity)
                .prop_map(|(p, id, n, q)| listing(p, &format!("{p}-{id}"), n, q))
        }

        fn membership(batch: &[SourceProduct]) -> Vec<Vec<(String, String)>> {
            cluster_batch(batch)
                .into_iter()
                .map(|cluster| {
                    let mut members: Vec<_> = cluster
                        .into_iter()
                        .map(|i| (batch[i].platform.to_string(), batch[i].source_product_id.clone()))
                        .collect();
                    members.dedup();
                    members
                })
                .collect()
        }

        proptest! {
            /// Property: cluster membership is independent of input order.
            #[test]
            fn clustering_is_order_independent(
                batch in prop::collection::vec(arb_listing(), 0..16),
                seed in any::<u64>(),
            ) {
                let mut shuffled = batch.clone();
                let len = shuffled.len();
                if len > 1 {
                    for i in 0..len {
                        let j = ((seed.wrapping_mul(i as u64 + 1)) % len as u64) as usize;
                        shuffled.swap(i, j);
                    }
                }
                prop_assert_eq!(membership(&batch), membership(&shuffled));
            }
        }
    }
}
