use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shelfmatch_core::{DomainResult, GroupId, MemberRef, Platform};
use shelfmatch_normalize::{normalize_name, parse_quantity, Quantity};

/// One scraped listing for one product on one platform at one point in time.
///
/// Supplied by the ingestion collaborator and read-only to the grouping core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceProduct {
    pub platform: Platform,
    pub source_product_id: String,
    pub name: String,
    #[serde(default)]
    pub quantity: String,
    /// Price in the smallest currency unit (e.g. paise).
    #[serde(default)]
    pub price: Option<u64>,
    /// Position in the platform's listing for the scraped category.
    #[serde(default)]
    pub rank: Option<u32>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub pincode: Option<String>,
    pub observed_at: DateTime<Utc>,
}

impl SourceProduct {
    pub fn new(
        platform: Platform,
        source_product_id: impl Into<String>,
        name: impl Into<String>,
        quantity: impl Into<String>,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            platform,
            source_product_id: source_product_id.into(),
            name: name.into(),
            quantity: quantity.into(),
            price: None,
            rank: None,
            image: None,
            category: None,
            pincode: None,
            observed_at,
        }
    }

    pub fn with_price(mut self, price: u64) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_rank(mut self, rank: u32) -> Self {
        self.rank = Some(rank);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_pincode(mut self, pincode: impl Into<String>) -> Self {
        self.pincode = Some(pincode.into());
        self
    }

    /// The listing's identity. Fails on a malformed (blank) source product id.
    pub fn member(&self) -> DomainResult<MemberRef> {
        MemberRef::new(self.platform.clone(), self.source_product_id.clone())
    }

    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }

    pub fn parsed_quantity(&self) -> Option<Quantity> {
        parse_quantity(&self.quantity)
    }
}

/// Identifier of a persisted listing record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl core::fmt::Display for RecordId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A historical listing as persisted, tagged with the group it resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingRecord {
    pub id: RecordId,
    pub listing: SourceProduct,
    pub group_id: Option<GroupId>,
}

impl ListingRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            platform: self.listing.platform.clone(),
            source_product_id: self.listing.source_product_id.clone(),
            observed_at: self.listing.observed_at,
            record_id: self.id,
        }
    }
}

/// Total order over listing records, independent of storage or arrival order.
///
/// Batch regroup processes records in this order and checkpoints on it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub platform: Platform,
    pub source_product_id: String,
    pub observed_at: DateTime<Utc>,
    pub record_id: RecordId,
}
