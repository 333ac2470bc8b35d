//! Ingestion-time group resolution.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use shelfmatch_catalog::{
    cluster_batch, pick_candidate, AddMember, GroupCommand, GroupMeta, ProductGroup,
    SourceProduct,
};
use shelfmatch_core::{Aggregate, AggregateRoot, ExpectedVersion, GroupId, MemberRef};

use super::GroupingError;
use super::locks::{LockKey, LockTable};
use super::store::new_group;
use crate::config::GroupingConfig;
use crate::store::{GroupChangeSet, GroupRepository};

/// Resolves incoming listings to group ids, joining an equivalent existing
/// group or creating a new one, and records the observations.
///
/// Existing membership always wins: a listing whose member is already grouped
/// resolves to that group without re-matching.
pub struct GroupResolver<R: GroupRepository> {
    repo: R,
    locks: LockTable,
}

impl<R: GroupRepository> GroupResolver<R> {
    pub fn new(repo: R, config: &GroupingConfig) -> Self {
        Self::with_locks(repo, LockTable::new(config.lock_timeout))
    }

    pub fn with_locks(repo: R, locks: LockTable) -> Self {
        Self { repo, locks }
    }

    /// Resolve one listing observed at `observed_at`.
    ///
    /// `category_hint` is used as the new group's category when the listing
    /// carries none.
    pub fn resolve_group_id(
        &self,
        listing: &SourceProduct,
        observed_at: DateTime<Utc>,
        category_hint: Option<&str>,
    ) -> Result<GroupId, GroupingError> {
        let member = listing.member()?;
        let _guard = self.locks.acquire([LockKey::Member(member.clone())])?;

        let mut observation = listing.clone();
        observation.observed_at = observed_at;
        if observation.category.is_none() {
            observation.category = category_hint.map(str::to_string);
        }

        let mut changes = GroupChangeSet::new();
        let group_id = if let Some(owner) = self.repo.find_owner(&member)? {
            owner.id_typed()
        } else {
            let candidates = self.repo.find_by_normalized_name(&listing.normalized_name())?;
            match pick_candidate(listing, &candidates) {
                Some(candidate) => {
                    let mut group = candidate.clone();
                    let group_id = group.id_typed();
                    changes.expect(group_id, ExpectedVersion::Exact(group.version()));
                    group.execute(&GroupCommand::AddMember(AddMember {
                        group_id,
                        member: member.clone(),
                        manual: false,
                        occurred_at: observed_at,
                    }))?;
                    changes.upsert(group);
                    debug!(%group_id, %member, "listing joined existing group");
                    group_id
                }
                None => {
                    let group = new_group(&member, GroupMeta::from_listing(&observation), false, observed_at)?;
                    let group_id = group.id_typed();
                    changes.expect(group_id, ExpectedVersion::Absent).upsert(group);
                    debug!(%group_id, %member, "listing started a new group");
                    group_id
                }
            }
        };

        if !changes.upserts.is_empty() {
            changes.rewrite_history(member, group_id);
        }
        changes.insert_record(observation, group_id);
        self.repo.commit(changes)?;
        Ok(group_id)
    }

    /// Resolve a multi-platform batch in one atomic commit.
    ///
    /// Matching listings are folded transitively before resolution, so the
    /// outcome does not depend on the order of `listings`. Listings with a
    /// malformed member reference are skipped and logged.
    pub fn resolve_batch(
        &self,
        listings: &[SourceProduct],
    ) -> Result<HashMap<MemberRef, GroupId>, GroupingError> {
        let mut valid: Vec<SourceProduct> = Vec::with_capacity(listings.len());
        let mut members: Vec<MemberRef> = Vec::with_capacity(listings.len());
        for listing in listings {
            match listing.member() {
                Ok(member) => {
                    members.push(member);
                    valid.push(listing.clone());
                }
                Err(err) => warn!(platform = %listing.platform, error = %err, "skipping listing"),
            }
        }

        let _guard = self
            .locks
            .acquire(members.iter().cloned().map(LockKey::Member))?;

        let mut staged: BTreeMap<GroupId, ProductGroup> = BTreeMap::new();
        let mut expected: BTreeMap<GroupId, ExpectedVersion> = BTreeMap::new();
        let mut assignments: HashMap<MemberRef, GroupId> = HashMap::new();
        let mut joined: Vec<MemberRef> = Vec::new();
        let mut created = 0usize;

        for cluster in cluster_batch(&valid) {
            let mut target: Option<GroupId> = None;
            let mut unowned: Vec<usize> = Vec::new();
            for &i in &cluster {
                if assignments.contains_key(&members[i]) {
                    continue;
                }
                match self.repo.find_owner(&members[i])? {
                    Some(owner) => {
                        target.get_or_insert(owner.id_typed());
                        assignments.insert(members[i].clone(), owner.id_typed());
                    }
                    None if !unowned.iter().any(|&u| members[u] == members[i]) => unowned.push(i),
                    None => {}
                }
            }
            let Some(&first) = unowned.first() else {
                continue;
            };

            if target.is_none() {
                let candidates: Vec<ProductGroup> = self
                    .repo
                    .find_by_normalized_name(&valid[first].normalized_name())?
                    .into_iter()
                    .map(|g| staged.get(&g.id_typed()).cloned().unwrap_or(g))
                    .collect();
                target = pick_candidate(&valid[first], &candidates).map(|g| g.id_typed());
            }

            let group_id = match target {
                Some(group_id) => group_id,
                None => {
                    let group = new_group(
                        &members[first],
                        GroupMeta::from_listing(&valid[first]),
                        false,
                        valid[first].observed_at,
                    )?;
                    let group_id = group.id_typed();
                    expected.insert(group_id, ExpectedVersion::Absent);
                    staged.insert(group_id, group);
                    created += 1;
                    group_id
                }
            };

            if !staged.contains_key(&group_id) {
                let group = super::store::load_active(&self.repo, group_id)?;
                expected.insert(group_id, ExpectedVersion::Exact(group.version()));
                staged.insert(group_id, group);
            }
            let Some(group) = staged.get_mut(&group_id) else {
                continue;
            };
            for &i in &unowned {
                group.execute(&GroupCommand::AddMember(AddMember {
                    group_id,
                    member: members[i].clone(),
                    manual: false,
                    occurred_at: valid[i].observed_at,
                }))?;
                assignments.insert(members[i].clone(), group_id);
                joined.push(members[i].clone());
            }
        }

        let mut changes = GroupChangeSet::new();
        for (group_id, version) in expected {
            changes.expect(group_id, version);
        }
        for group in staged.into_values() {
            changes.upsert(group);
        }
        for member in &joined {
            if let Some(group_id) = assignments.get(member) {
                changes.rewrite_history(member.clone(), *group_id);
            }
        }
        for (listing, member) in valid.into_iter().zip(&members) {
            if let Some(group_id) = assignments.get(member) {
                changes.insert_record(listing, *group_id);
            }
        }
        self.repo.commit(changes)?;

        info!(
            listings = listings.len(),
            groups_created = created,
            members_joined = joined.len(),
            "batch resolved"
        );
        Ok(assignments)
    }
}
