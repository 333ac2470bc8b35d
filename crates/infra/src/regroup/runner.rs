//! Batch regroup over a historical snapshot.
//!
//! The snapshot is sorted by record key and processed in chunks. Each chunk is
//! one atomic commit followed by a checkpoint, so a failed or cancelled run can
//! resume where it stopped. A single bad record is logged and counted, never
//! fatal.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use shelfmatch_catalog::{
    pick_candidate, AddMember, GroupCommand, GroupMeta, ListingRecord, ProductGroup,
};
use shelfmatch_core::{Aggregate, AggregateRoot, ExpectedVersion, GroupId, JobId};

use super::checkpoint::{CheckpointError, CheckpointStore, RegroupCheckpoint};
use super::types::{RegroupProgress, RegroupReport, RegroupStatus};
use crate::config::GroupingConfig;
use crate::grouping::store::{load_active, new_group};
use crate::grouping::{GroupingError, GroupingIndex};
use crate::store::{GroupChangeSet, GroupRepository, SnapshotFilter, StoreError};

#[derive(Debug, Error)]
pub enum RegroupError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("failed to spawn regroup thread: {0}")]
    Spawn(String),

    #[error("regroup thread panicked")]
    Panicked,
}

/// Shared between a running job and its [`RegroupHandle`].
#[derive(Debug, Clone, Default)]
struct Control {
    progress: Arc<Mutex<RegroupProgress>>,
    cancellation: Arc<AtomicBool>,
}

impl Control {
    fn update(&self, f: impl FnOnce(&mut RegroupProgress)) {
        if let Ok(mut progress) = self.progress.lock() {
            f(&mut progress);
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation.load(Ordering::Relaxed)
    }
}

/// Handle to a regroup running on a background thread.
#[derive(Debug)]
pub struct RegroupHandle {
    job_id: JobId,
    control: Control,
    join: thread::JoinHandle<Result<RegroupReport, RegroupError>>,
}

impl RegroupHandle {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn progress(&self) -> RegroupProgress {
        self.control
            .progress
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    /// Stop after the chunk in flight. The checkpoint is kept for `resume`.
    pub fn cancel(&self) {
        self.control.cancellation.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.control.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the job and return its report.
    pub fn join(self) -> Result<RegroupReport, RegroupError> {
        self.join.join().map_err(|_| RegroupError::Panicked)?
    }
}

/// Per-chunk tallies.
#[derive(Debug, Default)]
struct ChunkOutcome {
    processed: u64,
    errored: u64,
    groups_created: u64,
    members_joined: u64,
}

pub struct RegroupRunner<R: GroupRepository, C: CheckpointStore> {
    repo: R,
    checkpoints: C,
    config: GroupingConfig,
}

impl<R: GroupRepository, C: CheckpointStore> RegroupRunner<R, C> {
    pub fn new(repo: R, checkpoints: C, config: GroupingConfig) -> Self {
        Self {
            repo,
            checkpoints,
            config,
        }
    }

    pub fn config(&self) -> &GroupingConfig {
        &self.config
    }

    /// Regroup the snapshot from the beginning, discarding any checkpoint.
    pub fn run(&self, filter: &SnapshotFilter) -> Result<RegroupReport, RegroupError> {
        self.checkpoints.clear(&self.config.regroup_job_name)?;
        self.execute(filter, false, JobId::new(), &Control::default())
    }

    /// Continue from the stored checkpoint, or start fresh if there is none.
    pub fn resume(&self, filter: &SnapshotFilter) -> Result<RegroupReport, RegroupError> {
        self.execute(filter, true, JobId::new(), &Control::default())
    }

    /// Run on a background thread.
    pub fn spawn(self, filter: SnapshotFilter, resume: bool) -> Result<RegroupHandle, RegroupError>
    where
        R: 'static,
        C: 'static,
    {
        let job_id = JobId::new();
        let control = Control::default();
        let thread_control = control.clone();

        let join = thread::Builder::new()
            .name(self.config.regroup_job_name.clone())
            .spawn(move || {
                if !resume {
                    self.checkpoints.clear(&self.config.regroup_job_name)?;
                }
                self.execute(&filter, resume, job_id, &thread_control)
            })
            .map_err(|e| RegroupError::Spawn(e.to_string()))?;

        Ok(RegroupHandle {
            job_id,
            control,
            join,
        })
    }

    fn execute(
        &self,
        filter: &SnapshotFilter,
        resume: bool,
        job_id: JobId,
        control: &Control,
    ) -> Result<RegroupReport, RegroupError> {
        let job_name = self.config.regroup_job_name.clone();
        let started_at = Utc::now();
        control.update(|p| p.status = RegroupStatus::Loading);

        let checkpoint = if resume {
            match self.checkpoints.load(&job_name)? {
                Some(cp) if cp.filter == *filter => Some(cp),
                Some(_) => {
                    warn!(job = %job_name, "checkpoint belongs to a different snapshot filter; starting over");
                    None
                }
                None => None,
            }
        } else {
            None
        };

        let mut records = self.repo.find_records(filter)?;
        records.sort_by_cached_key(ListingRecord::key);
        let total = records.len() as u64;

        let pending: Vec<ListingRecord> = match &checkpoint {
            Some(cp) => records.into_iter().filter(|r| r.key() > cp.cursor).collect(),
            None => records,
        };
        let skipped = total - pending.len() as u64;

        let mut index = GroupingIndex::seed(self.repo.list_groups()?);
        let mut report = RegroupReport {
            job_id,
            job_name: job_name.clone(),
            resumed_from: checkpoint.as_ref().map(|cp| cp.job_id),
            status: RegroupStatus::Running,
            total,
            processed: 0,
            skipped,
            errored: 0,
            groups_created: 0,
            members_joined: 0,
            chunks_committed: checkpoint.as_ref().map_or(0, |cp| cp.chunks_committed),
            started_at,
            finished_at: started_at,
        };
        control.update(|p| {
            p.status = RegroupStatus::Running;
            p.total = total;
            p.skipped = skipped;
            p.chunks_committed = report.chunks_committed;
        });
        info!(
            %job_id,
            job = %job_name,
            total,
            skipped,
            known_groups = index.len(),
            "regroup started"
        );

        let chunk_size = self.config.regroup_chunk_size.max(1);
        for chunk in pending.chunks(chunk_size) {
            if control.is_cancelled() {
                report.status = RegroupStatus::Cancelled;
                break;
            }

            let (changes, outcome) = self.plan_chunk(chunk, &mut index);
            report.processed += outcome.processed;
            report.errored += outcome.errored;

            if let Err(err) = self.commit_chunk(changes, chunk, job_id, filter, &report) {
                error!(%job_id, job = %job_name, error = %err, "chunk commit failed; stopping");
                report.status = RegroupStatus::Failed {
                    error: err.to_string(),
                };
                break;
            }

            report.groups_created += outcome.groups_created;
            report.members_joined += outcome.members_joined;
            report.chunks_committed += 1;
            debug!(
                %job_id,
                chunk = report.chunks_committed,
                records = chunk.len(),
                "chunk committed"
            );
            control.update(|p| {
                p.processed = report.processed;
                p.errored = report.errored;
                p.chunks_committed = report.chunks_committed;
            });
        }

        if report.status == RegroupStatus::Running {
            report.status = RegroupStatus::Completed;
        }
        report.finished_at = Utc::now();
        control.update(|p| {
            p.status = report.status.clone();
            p.processed = report.processed;
            p.errored = report.errored;
        });

        info!(
            %job_id,
            job = %job_name,
            status = ?report.status,
            processed = report.processed,
            skipped = report.skipped,
            errored = report.errored,
            groups_created = report.groups_created,
            "regroup finished"
        );
        Ok(report)
    }

    fn commit_chunk(
        &self,
        changes: GroupChangeSet,
        chunk: &[ListingRecord],
        job_id: JobId,
        filter: &SnapshotFilter,
        report: &RegroupReport,
    ) -> Result<(), RegroupError> {
        if !changes.is_empty() {
            self.repo.commit(changes)?;
        }
        if let Some(last) = chunk.last() {
            self.checkpoints.save(
                &self.config.regroup_job_name,
                RegroupCheckpoint {
                    job_id,
                    filter: filter.clone(),
                    cursor: last.key(),
                    chunks_committed: report.chunks_committed + 1,
                    updated_at: Utc::now(),
                },
            )?;
        }
        Ok(())
    }

    /// Resolve every record of a chunk against the index and collect the
    /// writes. The index is updated as records are resolved.
    fn plan_chunk(
        &self,
        chunk: &[ListingRecord],
        index: &mut GroupingIndex,
    ) -> (GroupChangeSet, ChunkOutcome) {
        let mut outcome = ChunkOutcome::default();
        let mut staged: BTreeMap<GroupId, ProductGroup> = BTreeMap::new();
        let mut expected: BTreeMap<GroupId, ExpectedVersion> = BTreeMap::new();
        let mut changes = GroupChangeSet::new();

        for record in chunk {
            match self.resolve_record(record, index, &mut staged, &mut expected, &mut changes) {
                Ok(resolution) => {
                    outcome.processed += 1;
                    match resolution {
                        Resolution::Created => outcome.groups_created += 1,
                        Resolution::Joined => outcome.members_joined += 1,
                        Resolution::Known => {}
                    }
                }
                Err(err) => {
                    outcome.errored += 1;
                    warn!(record = %record.id, platform = %record.listing.platform, error = %err, "skipping record");
                }
            }
        }

        for (group_id, version) in expected {
            changes.expect(group_id, version);
        }
        for group in staged.into_values() {
            changes.upsert(group);
        }
        (changes, outcome)
    }

    fn resolve_record(
        &self,
        record: &ListingRecord,
        index: &mut GroupingIndex,
        staged: &mut BTreeMap<GroupId, ProductGroup>,
        expected: &mut BTreeMap<GroupId, ExpectedVersion>,
        changes: &mut GroupChangeSet,
    ) -> Result<Resolution, GroupingError> {
        let listing = &record.listing;
        let member = listing.member()?;
        let name = listing.normalized_name();

        if let Some(owner) = index.owner(&member) {
            index.assign(member, owner, &name);
            if record.group_id != Some(owner) {
                changes.assign(record.id, owner);
            }
            return Ok(Resolution::Known);
        }

        let picked = pick_candidate(listing, index.shortlist(&name)).map(|c| c.group_id);
        match picked {
            Some(group_id) => {
                if !staged.contains_key(&group_id) {
                    let group = load_active(&self.repo, group_id)?;
                    expected.insert(group_id, ExpectedVersion::Exact(group.version()));
                    staged.insert(group_id, group);
                }
                if let Some(group) = staged.get_mut(&group_id) {
                    group.execute(&GroupCommand::AddMember(AddMember {
                        group_id,
                        member: member.clone(),
                        manual: false,
                        occurred_at: listing.observed_at,
                    }))?;
                }
                index.assign(member.clone(), group_id, &name);
                changes.rewrite_history(member, group_id);
                Ok(Resolution::Joined)
            }
            None => {
                let group = new_group(&member, GroupMeta::from_listing(listing), false, listing.observed_at)?;
                let group_id = group.id_typed();
                index.register(group_id, group.normalized_name(), group.quantity());
                index.assign(member.clone(), group_id, &name);
                expected.insert(group_id, ExpectedVersion::Absent);
                staged.insert(group_id, group);
                changes.rewrite_history(member, group_id);
                Ok(Resolution::Created)
            }
        }
    }
}

enum Resolution {
    Known,
    Joined,
    Created,
}
