//! Curated group mutations.
//!
//! Every operation loads the groups it touches, decides through the
//! `ProductGroup` aggregate, and writes one `GroupChangeSet`. Either the whole
//! change set is committed or nothing is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use shelfmatch_catalog::{
    AddMember, CreateGroup, DeleteGroup, GroupCommand, GroupMeta, GroupMetaPatch, ProductGroup,
    RemoveMember, UpdateMeta,
};
use shelfmatch_core::{Aggregate, AggregateRoot, DomainError, ExpectedVersion, GroupId, MemberRef};

use super::GroupingError;
use super::locks::{LockGuard, LockKey, LockTable};
use crate::config::GroupingConfig;
use crate::store::{GroupChangeSet, GroupRepository};

/// What happens to the listing history of a group's members on cascade delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeMode {
    /// Delete the members' listing records.
    PurgeHistory,
    /// Keep the records but clear their group tag; the members are resolved
    /// again by the next ingestion or regroup.
    DetachHistory,
}

pub struct GroupingStore<R: GroupRepository> {
    repo: R,
    locks: LockTable,
}

impl<R: GroupRepository> GroupingStore<R> {
    pub fn new(repo: R, config: &GroupingConfig) -> Self {
        Self::with_locks(repo, LockTable::new(config.lock_timeout))
    }

    /// Share a lock table with other writers (e.g. a [`super::GroupResolver`]).
    pub fn with_locks(repo: R, locks: LockTable) -> Self {
        Self { repo, locks }
    }

    pub fn locks(&self) -> &LockTable {
        &self.locks
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    /// Read an existing group.
    pub fn group(&self, group_id: GroupId) -> Result<ProductGroup, GroupingError> {
        load_active(&self.repo, group_id)
    }

    /// The group that currently owns `member`.
    pub fn owner_of(&self, member: &MemberRef) -> Result<Option<GroupId>, GroupingError> {
        Ok(self.repo.find_owner(member)?.map(|g| g.id_typed()))
    }

    /// Create a single-member group. The member's existing history is tagged
    /// with the new id.
    pub fn create_group(&self, member: MemberRef, meta: GroupMeta) -> Result<GroupId, GroupingError> {
        member.validate()?;
        let _guard = self.locks.acquire([LockKey::Member(member.clone())])?;

        if let Some(owner) = self.repo.find_owner(&member)? {
            return Err(DomainError::already_grouped(&member, owner.id_typed()).into());
        }

        let group = new_group(&member, meta, false, Utc::now())?;
        let group_id = group.id_typed();

        let mut changes = GroupChangeSet::new();
        changes
            .expect(group_id, ExpectedVersion::Absent)
            .upsert(group)
            .rewrite_history(member.clone(), group_id);
        self.repo.commit(changes)?;

        info!(%group_id, %member, "group created");
        Ok(group_id)
    }

    /// Add `member` to `group_id`.
    ///
    /// A member parked in its own singleton group is absorbed: the singleton is
    /// deleted and the member's history follows it into `group_id`. A member of
    /// any other multi-member group fails with `AlreadyGrouped`.
    pub fn add_member(&self, group_id: GroupId, member: MemberRef) -> Result<(), GroupingError> {
        member.validate()?;
        let _guard = self
            .locks
            .acquire([LockKey::Group(group_id), LockKey::Member(member.clone())])?;

        let mut target = load_active(&self.repo, group_id)?;
        let mut changes = GroupChangeSet::new();
        changes.expect(group_id, ExpectedVersion::Exact(target.version()));

        match self.repo.find_owner(&member)? {
            Some(owner) if owner.id_typed() == group_id => {
                debug!(%group_id, %member, "member already in group");
                return Ok(());
            }
            Some(owner) if owner.is_singleton() => {
                let owner_version = owner.version();
                let retired = retire(owner, Utc::now())?;
                debug!(%group_id, %member, absorbed = %retired, "absorbing singleton group");
                changes
                    .expect(retired, ExpectedVersion::Exact(owner_version))
                    .delete(retired);
            }
            Some(owner) => {
                return Err(DomainError::already_grouped(&member, owner.id_typed()).into());
            }
            None => {}
        }

        target.execute(&GroupCommand::AddMember(AddMember {
            group_id,
            member: member.clone(),
            manual: true,
            occurred_at: Utc::now(),
        }))?;

        changes
            .upsert(target)
            .rewrite_history(member.clone(), group_id);
        self.repo.commit(changes)?;

        info!(%group_id, %member, "member added");
        Ok(())
    }

    /// Remove `member` from `group_id` and park it in a fresh singleton group.
    ///
    /// Returns the new group's id.
    pub fn remove_member(
        &self,
        group_id: GroupId,
        member: MemberRef,
    ) -> Result<GroupId, GroupingError> {
        let _guard = self
            .locks
            .acquire([LockKey::Group(group_id), LockKey::Member(member.clone())])?;

        let mut source = load_active(&self.repo, group_id)?;
        let expected = source.version();
        let now = Utc::now();

        source.execute(&GroupCommand::RemoveMember(RemoveMember {
            group_id,
            member: member.clone(),
            manual: true,
            occurred_at: now,
        }))?;

        let meta = latest_meta(&self.repo, &member, &source)?;
        let singleton = new_group(&member, meta, true, now)?;
        let singleton_id = singleton.id_typed();

        let mut changes = GroupChangeSet::new();
        changes
            .expect(group_id, ExpectedVersion::Exact(expected))
            .expect(singleton_id, ExpectedVersion::Absent)
            .upsert(source)
            .upsert(singleton)
            .rewrite_history(member.clone(), singleton_id);
        self.repo.commit(changes)?;

        info!(%group_id, %member, new_group_id = %singleton_id, "member removed");
        Ok(singleton_id)
    }

    /// Delete `group_id` and give every former member its own singleton group,
    /// moving each member's history to its new id.
    pub fn explode_group(
        &self,
        group_id: GroupId,
    ) -> Result<Vec<(MemberRef, GroupId)>, GroupingError> {
        let (group, _guard) = self.load_locked_with_members(group_id)?;
        let now = Utc::now();

        let mut changes = GroupChangeSet::new();
        changes
            .expect(group_id, ExpectedVersion::Exact(group.version()))
            .delete(group_id);

        let mut successors = Vec::with_capacity(group.members().len());
        for member in group.members() {
            let meta = latest_meta(&self.repo, member, &group)?;
            let singleton = new_group(member, meta, true, now)?;
            let singleton_id = singleton.id_typed();
            changes
                .expect(singleton_id, ExpectedVersion::Absent)
                .upsert(singleton)
                .rewrite_history(member.clone(), singleton_id);
            successors.push((member.clone(), singleton_id));
        }

        let receipt = self.repo.commit(changes)?;
        info!(
            %group_id,
            members = successors.len(),
            records_retagged = receipt.records_retagged,
            "group exploded"
        );
        Ok(successors)
    }

    /// Edit the canonical name/quantity. Membership is untouched.
    pub fn update_meta(
        &self,
        group_id: GroupId,
        patch: GroupMetaPatch,
    ) -> Result<ProductGroup, GroupingError> {
        patch.validate()?;
        let _guard = self.locks.acquire([LockKey::Group(group_id)])?;

        let mut group = load_active(&self.repo, group_id)?;
        let expected = group.version();
        group.execute(&GroupCommand::UpdateMeta(UpdateMeta {
            group_id,
            patch,
            occurred_at: Utc::now(),
        }))?;

        let mut changes = GroupChangeSet::new();
        changes
            .expect(group_id, ExpectedVersion::Exact(expected))
            .upsert(group.clone());
        self.repo.commit(changes)?;

        info!(%group_id, name = group.name(), quantity = group.quantity(), "group metadata updated");
        Ok(group)
    }

    /// Administrative delete. The members' history is purged or detached so
    /// that nothing references the deleted id.
    pub fn delete_group_cascade(
        &self,
        group_id: GroupId,
        mode: CascadeMode,
    ) -> Result<(), GroupingError> {
        let (group, _guard) = self.load_locked_with_members(group_id)?;

        let mut changes = GroupChangeSet::new();
        changes
            .expect(group_id, ExpectedVersion::Exact(group.version()))
            .delete(group_id);
        for member in group.members() {
            match mode {
                CascadeMode::PurgeHistory => changes.purge_history(member.clone()),
                CascadeMode::DetachHistory => changes.detach_history(member.clone()),
            };
        }

        let receipt = self.repo.commit(changes)?;
        info!(
            %group_id,
            ?mode,
            records_purged = receipt.records_purged,
            records_detached = receipt.records_detached,
            "group deleted"
        );
        Ok(())
    }

    /// Lock a group and all of its members, then re-read it under the lock.
    fn load_locked_with_members(
        &self,
        group_id: GroupId,
    ) -> Result<(ProductGroup, LockGuard), GroupingError> {
        let group = load_active(&self.repo, group_id)?;
        let keys = std::iter::once(LockKey::Group(group_id))
            .chain(group.members().iter().cloned().map(LockKey::Member));
        let guard = self.locks.acquire(keys)?;

        let current = load_active(&self.repo, group_id)?;
        if current.members() != group.members() {
            return Err(DomainError::conflict(format!(
                "membership of group {group_id} changed while acquiring locks"
            ))
            .into());
        }
        Ok((current, guard))
    }
}

pub(crate) fn load_active<R: GroupRepository + ?Sized>(
    repo: &R,
    group_id: GroupId,
) -> Result<ProductGroup, GroupingError> {
    repo.load_group(group_id)?
        .filter(ProductGroup::is_active)
        .ok_or_else(|| DomainError::not_found(format!("group {group_id}")).into())
}

/// A freshly created single-member group with a new id.
pub(crate) fn new_group(
    member: &MemberRef,
    meta: GroupMeta,
    verified: bool,
    occurred_at: DateTime<Utc>,
) -> Result<ProductGroup, DomainError> {
    let group_id = GroupId::new();
    let mut group = ProductGroup::empty(group_id);
    group.execute(&GroupCommand::CreateGroup(CreateGroup {
        group_id,
        member: member.clone(),
        meta,
        verified,
        occurred_at,
    }))?;
    Ok(group)
}

/// Metadata for a member split out of `from`: its latest listing, falling
/// back to the group's own metadata when no history is stored.
fn latest_meta<R: GroupRepository + ?Sized>(
    repo: &R,
    member: &MemberRef,
    from: &ProductGroup,
) -> Result<GroupMeta, GroupingError> {
    let latest = repo
        .records_for_member(member)?
        .into_iter()
        .max_by_key(|r| (r.listing.observed_at, r.id));
    Ok(match latest {
        Some(record) if !record.listing.name.trim().is_empty() => {
            GroupMeta::from_listing(&record.listing)
        }
        _ => from.meta(),
    })
}

/// Apply `DeleteGroup` to a group and return its id.
fn retire(mut group: ProductGroup, occurred_at: DateTime<Utc>) -> Result<GroupId, DomainError> {
    let group_id = group.id_typed();
    group.execute(&GroupCommand::DeleteGroup(DeleteGroup {
        group_id,
        occurred_at,
    }))?;
    Ok(group_id)
}
