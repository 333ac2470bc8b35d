//! Cross-platform comparison rows.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use shelfmatch_core::{GroupId, MemberRef, Platform};

use crate::group::ProductGroup;
use crate::listing::SourceProduct;

/// One platform's listing inside a comparison row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformCell {
    pub source_product_id: String,
    pub name: String,
    pub quantity: String,
    pub price: Option<u64>,
    pub rank: Option<u32>,
    pub image: Option<String>,
}

impl PlatformCell {
    fn from_listing(listing: &SourceProduct) -> Self {
        Self {
            source_product_id: listing.source_product_id.clone(),
            name: listing.name.clone(),
            quantity: listing.quantity.clone(),
            price: listing.price,
            rank: listing.rank,
            image: listing.image.clone(),
        }
    }
}

/// One row per active group, one optional column per platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonRow {
    pub group_id: GroupId,
    pub name: String,
    pub quantity: String,
    pub columns: BTreeMap<Platform, Option<PlatformCell>>,
}

impl ComparisonRow {
    pub fn cell(&self, platform: &Platform) -> Option<&PlatformCell> {
        self.columns.get(platform).and_then(Option::as_ref)
    }

    pub fn populated_platforms(&self) -> usize {
        self.columns.values().filter(|c| c.is_some()).count()
    }

    fn best_rank(&self) -> u32 {
        self.columns
            .values()
            .flatten()
            .filter_map(|c| c.rank)
            .min()
            .unwrap_or(u32::MAX)
    }
}

/// Ordering of listings competing for one cell: lowest rank, then lowest price.
fn cell_key(listing: &SourceProduct) -> (u32, u64, &str) {
    (
        listing.rank.unwrap_or(u32::MAX),
        listing.price.unwrap_or(u64::MAX),
        listing.source_product_id.as_str(),
    )
}

/// Build comparison rows from the latest listings and their group assignments.
///
/// Every platform seen in `listings` gets a column in every row. Listings
/// without an assignment are left out. `groups` supplies canonical name and
/// quantity when present; otherwise the best listing's own values are used.
pub fn merge_rows(
    listings: &[SourceProduct],
    assignments: &HashMap<MemberRef, GroupId>,
    groups: &HashMap<GroupId, ProductGroup>,
) -> Vec<ComparisonRow> {
    // Latest observation per member.
    let mut latest: BTreeMap<MemberRef, &SourceProduct> = BTreeMap::new();
    for listing in listings {
        let Ok(member) = listing.member() else {
            debug!(platform = %listing.platform, "skipping listing with malformed id");
            continue;
        };
        latest
            .entry(member)
            .and_modify(|current| {
                if listing.observed_at > current.observed_at {
                    *current = listing;
                }
            })
            .or_insert(listing);
    }

    let mut platforms: Vec<Platform> = latest.keys().map(|m| m.platform.clone()).collect();
    platforms.dedup();

    let mut by_group: BTreeMap<GroupId, BTreeMap<Platform, &SourceProduct>> = BTreeMap::new();
    for (member, &listing) in &latest {
        let Some(group_id) = assignments.get(member) else {
            debug!(%member, "listing has no group assignment, left out of comparison");
            continue;
        };
        by_group
            .entry(*group_id)
            .or_default()
            .entry(member.platform.clone())
            .and_modify(|current| {
                if cell_key(listing) < cell_key(current) {
                    *current = listing;
                }
            })
            .or_insert(listing);
    }

    let mut rows: Vec<ComparisonRow> = by_group
        .into_iter()
        .map(|(group_id, cells)| {
            let (name, quantity) = match groups.get(&group_id) {
                Some(group) => (group.name().to_string(), group.quantity().to_string()),
                None => {
                    let best = cells.values().min_by(|a, b| cell_key(a).cmp(&cell_key(b)));
                    best.map(|l| (l.name.clone(), l.quantity.clone()))
                        .unwrap_or_default()
                }
            };
            let columns = platforms
                .iter()
                .map(|p| (p.clone(), cells.get(p).map(|l| PlatformCell::from_listing(l))))
                .collect();
            ComparisonRow {
                group_id,
                name,
                quantity,
                columns,
            }
        })
        .collect();

    rows.sort_by_key(|row| (row.best_rank(), row.group_id));
    rows
}
