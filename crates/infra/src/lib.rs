//! Infrastructure layer: persistence boundary, grouping service, batch regroup
//! and configuration.

pub mod config;
pub mod grouping;
pub mod regroup;
pub mod store;

#[cfg(test)]
mod integration_tests;

pub use config::GroupingConfig;
pub use grouping::{CascadeMode, GroupResolver, GroupingError, GroupingIndex, GroupingStore};
pub use regroup::{RegroupHandle, RegroupReport, RegroupRunner, RegroupStatus};
pub use store::{GroupChangeSet, GroupRepository, InMemoryGroupRepository, SnapshotFilter, StoreError};
