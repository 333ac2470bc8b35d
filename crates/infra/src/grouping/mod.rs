//! Grouping service: curated mutations, ingestion-time resolution and the
//! per-batch lookup index.

pub mod index;
pub mod locks;
pub mod resolver;
pub mod store;

use thiserror::Error;

use shelfmatch_core::DomainError;

use crate::store::StoreError;

pub use index::{GroupingIndex, IndexEntry};
pub use locks::{LockGuard, LockKey, LockTable};
pub use resolver::GroupResolver;
pub use store::{CascadeMode, GroupingStore};

/// Error of a grouping operation. Nothing is applied when one is returned.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GroupingError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl GroupingError {
    /// Stale version or lock timeout: the caller may retry.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            GroupingError::Domain(DomainError::Conflict(_))
                | GroupingError::Store(StoreError::Concurrency(_))
        )
    }
}
