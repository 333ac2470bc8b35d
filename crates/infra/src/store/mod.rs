//! Persistence boundary for groups and listing history.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryGroupRepository;
pub use r#trait::{CommitReceipt, GroupChangeSet, GroupRepository, SnapshotFilter, StoreError};
