//! Regroup job status, progress and report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shelfmatch_core::JobId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegroupStatus {
    Pending,
    /// Reading and sorting the snapshot.
    Loading,
    Running,
    Completed,
    /// Stopped between chunks on request; resumable.
    Cancelled,
    /// A chunk commit failed; resumable from the last checkpoint.
    Failed { error: String },
}

impl RegroupStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RegroupStatus::Completed | RegroupStatus::Cancelled | RegroupStatus::Failed { .. }
        )
    }
}

/// Live counters of a running job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegroupProgress {
    pub status: RegroupStatus,
    /// Records selected by the snapshot filter.
    pub total: u64,
    pub processed: u64,
    /// Records already covered by a previous run's checkpoint.
    pub skipped: u64,
    pub errored: u64,
    pub chunks_committed: u64,
}

impl Default for RegroupProgress {
    fn default() -> Self {
        Self {
            status: RegroupStatus::Pending,
            total: 0,
            processed: 0,
            skipped: 0,
            errored: 0,
            chunks_committed: 0,
        }
    }
}

/// Final result of a regroup run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegroupReport {
    pub job_id: JobId,
    pub job_name: String,
    /// Run whose checkpoint this run continued from.
    pub resumed_from: Option<JobId>,
    pub status: RegroupStatus,
    pub total: u64,
    pub processed: u64,
    pub skipped: u64,
    pub errored: u64,
    pub groups_created: u64,
    pub members_joined: u64,
    pub chunks_committed: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
