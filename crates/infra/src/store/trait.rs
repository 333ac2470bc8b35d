use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use shelfmatch_catalog::{ListingRecord, ProductGroup, RecordId, SourceProduct};
use shelfmatch_core::{ExpectedVersion, GroupId, MemberRef, Platform};

/// Persistence errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Optimistic concurrency check failed.
    #[error("concurrency conflict: {0}")]
    Concurrency(String),

    /// A write attempted to reuse a retired group id.
    #[error("group id {0} is retired and cannot be reused")]
    RetiredId(GroupId),

    /// The change set would break a store-level invariant
    /// (one group per member, no reference to a deleted group).
    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("store lock poisoned")]
    Poisoned,

    #[error("backend error: {0}")]
    Backend(String),
}

/// Selects the listing records of one snapshot (or a range of snapshots).
///
/// Every `None` field matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotFilter {
    pub category: Option<String>,
    pub pincode: Option<String>,
    pub platform: Option<Platform>,
    /// Inclusive lower bound on `observed_at`.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `observed_at`.
    pub to: Option<DateTime<Utc>>,
}

impl SnapshotFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_pincode(mut self, pincode: impl Into<String>) -> Self {
        self.pincode = Some(pincode.into());
        self
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn matches(&self, listing: &SourceProduct) -> bool {
        let eq = |want: &Option<String>, have: &Option<String>| {
            want.as_ref().is_none_or(|w| have.as_deref() == Some(w.as_str()))
        };
        eq(&self.category, &listing.category)
            && eq(&self.pincode, &listing.pincode)
            && self.platform.as_ref().is_none_or(|p| *p == listing.platform)
            && self.from.is_none_or(|from| listing.observed_at >= from)
            && self.to.is_none_or(|to| listing.observed_at < to)
    }
}

/// All writes of one grouping operation, applied atomically by
/// [`GroupRepository::commit`].
///
/// Either every part is applied or none is.
#[derive(Debug, Clone, Default)]
pub struct GroupChangeSet {
    /// Version expectations checked before anything is written.
    pub expected: Vec<(GroupId, ExpectedVersion)>,
    /// Full group states to write (insert or replace).
    pub upserts: Vec<ProductGroup>,
    /// Groups to delete. Their ids are retired.
    pub deletes: Vec<GroupId>,
    /// Retag every record of a member ("update many by member").
    pub rewrites: Vec<(MemberRef, GroupId)>,
    /// Retag a single record.
    pub assignments: Vec<(RecordId, GroupId)>,
    /// New listing records, already tagged.
    pub inserts: Vec<(SourceProduct, GroupId)>,
    /// Clear the tag on every record of a member.
    pub detach: Vec<MemberRef>,
    /// Delete every record of a member.
    pub purge: Vec<MemberRef>,
}

impl GroupChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect(&mut self, group_id: GroupId, version: ExpectedVersion) -> &mut Self {
        self.expected.push((group_id, version));
        self
    }

    pub fn upsert(&mut self, group: ProductGroup) -> &mut Self {
        self.upserts.push(group);
        self
    }

    pub fn delete(&mut self, group_id: GroupId) -> &mut Self {
        self.deletes.push(group_id);
        self
    }

    pub fn rewrite_history(&mut self, member: MemberRef, group_id: GroupId) -> &mut Self {
        self.rewrites.push((member, group_id));
        self
    }

    pub fn assign(&mut self, record: RecordId, group_id: GroupId) -> &mut Self {
        self.assignments.push((record, group_id));
        self
    }

    pub fn insert_record(&mut self, listing: SourceProduct, group_id: GroupId) -> &mut Self {
        self.inserts.push((listing, group_id));
        self
    }

    pub fn detach_history(&mut self, member: MemberRef) -> &mut Self {
        self.detach.push(member);
        self
    }

    pub fn purge_history(&mut self, member: MemberRef) -> &mut Self {
        self.purge.push(member);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty()
            && self.deletes.is_empty()
            && self.rewrites.is_empty()
            && self.assignments.is_empty()
            && self.inserts.is_empty()
            && self.detach.is_empty()
            && self.purge.is_empty()
    }
}

/// What a commit changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CommitReceipt {
    pub groups_written: usize,
    pub groups_deleted: usize,
    pub records_retagged: usize,
    pub records_inserted: usize,
    pub records_detached: usize,
    pub records_purged: usize,
}

/// Durable source of truth for groups and listing history.
///
/// Reads never return deleted groups. `commit` is atomic.
pub trait GroupRepository: Send + Sync {
    fn load_group(&self, group_id: GroupId) -> Result<Option<ProductGroup>, StoreError>;

    /// The existing group that owns `member`, if any.
    fn find_owner(&self, member: &MemberRef) -> Result<Option<ProductGroup>, StoreError>;

    /// Groups whose canonical normalized name equals `normalized_name`,
    /// ordered by ascending group id.
    fn find_by_normalized_name(&self, normalized_name: &str)
        -> Result<Vec<ProductGroup>, StoreError>;

    /// All existing groups, ordered by ascending group id.
    fn list_groups(&self) -> Result<Vec<ProductGroup>, StoreError>;

    fn is_retired(&self, group_id: GroupId) -> Result<bool, StoreError>;

    /// Persist raw (untagged) listings, e.g. a snapshot awaiting regroup.
    fn insert_records(&self, listings: Vec<SourceProduct>) -> Result<Vec<ListingRecord>, StoreError>;

    fn find_records(&self, filter: &SnapshotFilter) -> Result<Vec<ListingRecord>, StoreError>;

    fn records_for_member(&self, member: &MemberRef) -> Result<Vec<ListingRecord>, StoreError>;

    fn commit(&self, changes: GroupChangeSet) -> Result<CommitReceipt, StoreError>;
}

impl<T: GroupRepository + ?Sized> GroupRepository for Arc<T> {
    fn load_group(&self, group_id: GroupId) -> Result<Option<ProductGroup>, StoreError> {
        (**self).load_group(group_id)
    }

    fn find_owner(&self, member: &MemberRef) -> Result<Option<ProductGroup>, StoreError> {
        (**self).find_owner(member)
    }

    fn find_by_normalized_name(
        &self,
        normalized_name: &str,
    ) -> Result<Vec<ProductGroup>, StoreError> {
        (**self).find_by_normalized_name(normalized_name)
    }

    fn list_groups(&self) -> Result<Vec<ProductGroup>, StoreError> {
        (**self).list_groups()
    }

    fn is_retired(&self, group_id: GroupId) -> Result<bool, StoreError> {
        (**self).is_retired(group_id)
    }

    fn insert_records(&self, listings: Vec<SourceProduct>) -> Result<Vec<ListingRecord>, StoreError> {
        (**self).insert_records(listings)
    }

    fn find_records(&self, filter: &SnapshotFilter) -> Result<Vec<ListingRecord>, StoreError> {
        (**self).find_records(filter)
    }

    fn records_for_member(&self, member: &MemberRef) -> Result<Vec<ListingRecord>, StoreError> {
        (**self).records_for_member(member)
    }

    fn commit(&self, changes: GroupChangeSet) -> Result<CommitReceipt, StoreError> {
        (**self).commit(changes)
    }
}
