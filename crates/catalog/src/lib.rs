//! Catalog domain for product grouping (event-sourced aggregate + matching).
//!
//! This crate contains the business rules for deciding which listings are the
//! same real product, implemented purely as deterministic domain logic (no IO,
//! no storage).

pub mod disjoint_set;
pub mod group;
pub mod listing;
pub mod matcher;
pub mod meta;
pub mod presentation;

pub use disjoint_set::DisjointSet;
pub use group::{
    AddMember, CreateGroup, DeleteGroup, GroupCommand, GroupCreated, GroupDeleted, GroupEvent,
    MemberAdded, MemberRemoved, MetaUpdated, ProductGroup, RemoveMember, UpdateMeta,
};
pub use listing::{ListingRecord, RecordId, RecordKey, SourceProduct};
pub use matcher::{
    Candidate, MatchCandidate, MatchOutcome, cluster_batch, compare_normalized, evaluate,
    is_match, pick_candidate,
};
pub use meta::{GroupMeta, GroupMetaPatch};
pub use presentation::{ComparisonRow, PlatformCell, merge_rows};
