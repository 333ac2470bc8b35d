//! Regroup checkpoints.
//!
//! A checkpoint stores the key of the last record of the last committed chunk.
//! Records sort by that key, so a resumed run skips everything up to it.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use shelfmatch_catalog::RecordKey;
use shelfmatch_core::JobId;

use crate::store::SnapshotFilter;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegroupCheckpoint {
    pub job_id: JobId,
    pub filter: SnapshotFilter,
    pub cursor: RecordKey,
    pub chunks_committed: u64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CheckpointError {
    #[error("checkpoint store lock poisoned")]
    Poisoned,

    #[error("checkpoint backend error: {0}")]
    Backend(String),
}

/// Persistence for regroup checkpoints, keyed by job name.
pub trait CheckpointStore: Send + Sync {
    fn load(&self, job_name: &str) -> Result<Option<RegroupCheckpoint>, CheckpointError>;

    fn save(&self, job_name: &str, checkpoint: RegroupCheckpoint) -> Result<(), CheckpointError>;

    /// Forget the checkpoint (for a fresh run).
    fn clear(&self, job_name: &str) -> Result<(), CheckpointError>;
}

impl<T: CheckpointStore + ?Sized> CheckpointStore for std::sync::Arc<T> {
    fn load(&self, job_name: &str) -> Result<Option<RegroupCheckpoint>, CheckpointError> {
        (**self).load(job_name)
    }

    fn save(&self, job_name: &str, checkpoint: RegroupCheckpoint) -> Result<(), CheckpointError> {
        (**self).save(job_name, checkpoint)
    }

    fn clear(&self, job_name: &str) -> Result<(), CheckpointError> {
        (**self).clear(job_name)
    }
}

/// In-memory checkpoint store (tests/dev).
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    inner: RwLock<HashMap<String, RegroupCheckpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn load(&self, job_name: &str) -> Result<Option<RegroupCheckpoint>, CheckpointError> {
        let map = self.inner.read().map_err(|_| CheckpointError::Poisoned)?;
        Ok(map.get(job_name).cloned())
    }

    fn save(&self, job_name: &str, checkpoint: RegroupCheckpoint) -> Result<(), CheckpointError> {
        let mut map = self.inner.write().map_err(|_| CheckpointError::Poisoned)?;
        map.insert(job_name.to_string(), checkpoint);
        Ok(())
    }

    fn clear(&self, job_name: &str) -> Result<(), CheckpointError> {
        let mut map = self.inner.write().map_err(|_| CheckpointError::Poisoned)?;
        map.remove(job_name);
        Ok(())
    }
}
