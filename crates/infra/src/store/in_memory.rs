use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::RwLock;

use shelfmatch_catalog::{ListingRecord, ProductGroup, RecordId, SourceProduct};
use shelfmatch_core::{AggregateRoot, GroupId, MemberRef};

use super::r#trait::{CommitReceipt, GroupChangeSet, GroupRepository, SnapshotFilter, StoreError};

#[derive(Debug, Default, Clone)]
struct State {
    groups: HashMap<GroupId, ProductGroup>,
    owners: HashMap<MemberRef, GroupId>,
    records: BTreeMap<RecordId, ListingRecord>,
    records_by_member: HashMap<MemberRef, BTreeSet<RecordId>>,
    retired: HashSet<GroupId>,
    next_record: u64,
}

impl State {
    fn push_record(&mut self, listing: SourceProduct, group_id: Option<GroupId>) -> ListingRecord {
        self.next_record += 1;
        let record = ListingRecord {
            id: RecordId(self.next_record),
            listing,
            group_id,
        };
        if let Ok(member) = record.listing.member() {
            self.records_by_member.entry(member).or_default().insert(record.id);
        }
        self.records.insert(record.id, record.clone());
        record
    }

    fn member_record_ids(&self, member: &MemberRef) -> Vec<RecordId> {
        self.records_by_member
            .get(member)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    fn ensure_group(&self, group_id: GroupId, what: &str) -> Result<(), StoreError> {
        if self.groups.contains_key(&group_id) {
            Ok(())
        } else {
            Err(StoreError::Integrity(format!(
                "{what} would reference group {group_id}, which does not exist"
            )))
        }
    }

    /// A record may only be tagged with the group that owns its member.
    fn ensure_owner(&self, member: &MemberRef, group_id: GroupId, what: &str) -> Result<(), StoreError> {
        self.ensure_group(group_id, what)?;
        match self.owners.get(member) {
            Some(owner) if *owner == group_id => Ok(()),
            owner => Err(StoreError::Integrity(format!(
                "{what} would tag {member} with {group_id}, but its owner is {}",
                owner.map(|g| g.to_string()).unwrap_or_else(|| "none".to_string())
            ))),
        }
    }

    fn apply(&mut self, changes: GroupChangeSet) -> Result<CommitReceipt, StoreError> {
        let mut receipt = CommitReceipt::default();

        // Groups: deletes first, then drop old memberships of every upserted
        // group, then claim the new memberships.
        let deleted: HashSet<GroupId> = changes.deletes.iter().copied().collect();
        for group_id in &changes.deletes {
            let group = self
                .groups
                .remove(group_id)
                .ok_or_else(|| StoreError::NotFound(format!("group {group_id}")))?;
            for member in group.members() {
                if self.owners.get(member) == Some(group_id) {
                    self.owners.remove(member);
                }
            }
            self.retired.insert(*group_id);
            receipt.groups_deleted += 1;
        }

        for group in &changes.upserts {
            let group_id = group.id_typed();
            if self.retired.contains(&group_id) {
                return Err(StoreError::RetiredId(group_id));
            }
            if !group.is_active() {
                return Err(StoreError::Integrity(format!(
                    "group {group_id} must be created and not deleted to be written"
                )));
            }
            if let Some(previous) = self.groups.get(&group_id) {
                for member in previous.members() {
                    if self.owners.get(member) == Some(&group_id) {
                        self.owners.remove(member);
                    }
                }
            }
        }

        for group in changes.upserts {
            let group_id = group.id_typed();
            for member in group.members() {
                match self.owners.get(member) {
                    Some(owner) if *owner != group_id => {
                        return Err(StoreError::Integrity(format!(
                            "member {member} would belong to both {owner} and {group_id}"
                        )));
                    }
                    _ => {
                        self.owners.insert(member.clone(), group_id);
                    }
                }
            }
            self.groups.insert(group_id, group);
            receipt.groups_written += 1;
        }

        // History.
        for member in &changes.purge {
            for record_id in self.member_record_ids(member) {
                self.records.remove(&record_id);
                receipt.records_purged += 1;
            }
            self.records_by_member.remove(member);
        }

        for member in &changes.detach {
            for record_id in self.member_record_ids(member) {
                if let Some(record) = self.records.get_mut(&record_id) {
                    record.group_id = None;
                    receipt.records_detached += 1;
                }
            }
        }

        for (member, group_id) in &changes.rewrites {
            self.ensure_owner(member, *group_id, "history rewrite")?;
            for record_id in self.member_record_ids(member) {
                if let Some(record) = self.records.get_mut(&record_id) {
                    record.group_id = Some(*group_id);
                    receipt.records_retagged += 1;
                }
            }
        }

        for (record_id, group_id) in &changes.assignments {
            let member = self
                .records
                .get(record_id)
                .ok_or_else(|| StoreError::NotFound(format!("record {record_id}")))?
                .listing
                .member();
            match member {
                Ok(member) => self.ensure_owner(&member, *group_id, "record assignment")?,
                Err(_) => self.ensure_group(*group_id, "record assignment")?,
            }
            let Some(record) = self.records.get_mut(record_id) else {
                continue;
            };
            record.group_id = Some(*group_id);
            receipt.records_retagged += 1;
        }

        for (listing, group_id) in changes.inserts {
            match listing.member() {
                Ok(member) => self.ensure_owner(&member, group_id, "record insert")?,
                Err(_) => self.ensure_group(group_id, "record insert")?,
            }
            self.push_record(listing, Some(group_id));
            receipt.records_inserted += 1;
        }

        if !deleted.is_empty() {
            if let Some(orphan) = self
                .records
                .values()
                .find(|r| r.group_id.is_some_and(|g| deleted.contains(&g)))
            {
                return Err(StoreError::Integrity(format!(
                    "record {} would still reference deleted group {}",
                    orphan.id,
                    orphan.group_id.map(|g| g.to_string()).unwrap_or_default()
                )));
            }
        }

        Ok(receipt)
    }
}

/// In-memory group repository.
///
/// Intended for tests/dev. Not optimized for performance: every commit is
/// staged on a copy of the state and swapped in only if it fully succeeds.
#[derive(Debug, Default)]
pub struct InMemoryGroupRepository {
    state: RwLock<State>,
}

impl InMemoryGroupRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, State>, StoreError> {
        self.state.read().map_err(|_| StoreError::Poisoned)
    }
}

impl GroupRepository for InMemoryGroupRepository {
    fn load_group(&self, group_id: GroupId) -> Result<Option<ProductGroup>, StoreError> {
        Ok(self.read()?.groups.get(&group_id).cloned())
    }

    fn find_owner(&self, member: &MemberRef) -> Result<Option<ProductGroup>, StoreError> {
        let state = self.read()?;
        Ok(state
            .owners
            .get(member)
            .and_then(|id| state.groups.get(id))
            .cloned())
    }

    fn find_by_normalized_name(
        &self,
        normalized_name: &str,
    ) -> Result<Vec<ProductGroup>, StoreError> {
        let state = self.read()?;
        let mut groups: Vec<ProductGroup> = state
            .groups
            .values()
            .filter(|g| g.normalized_name() == normalized_name)
            .cloned()
            .collect();
        groups.sort_by_key(|g| g.id_typed());
        Ok(groups)
    }

    fn list_groups(&self) -> Result<Vec<ProductGroup>, StoreError> {
        let state = self.read()?;
        let mut groups: Vec<ProductGroup> = state.groups.values().cloned().collect();
        groups.sort_by_key(|g| *g.id());
        Ok(groups)
    }

    fn is_retired(&self, group_id: GroupId) -> Result<bool, StoreError> {
        Ok(self.read()?.retired.contains(&group_id))
    }

    fn insert_records(&self, listings: Vec<SourceProduct>) -> Result<Vec<ListingRecord>, StoreError> {
        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;
        Ok(listings
            .into_iter()
            .map(|listing| state.push_record(listing, None))
            .collect())
    }

    fn find_records(&self, filter: &SnapshotFilter) -> Result<Vec<ListingRecord>, StoreError> {
        Ok(self
            .read()?
            .records
            .values()
            .filter(|r| filter.matches(&r.listing))
            .cloned()
            .collect())
    }

    fn records_for_member(&self, member: &MemberRef) -> Result<Vec<ListingRecord>, StoreError> {
        let state = self.read()?;
        Ok(state
            .member_record_ids(member)
            .into_iter()
            .filter_map(|id| state.records.get(&id).cloned())
            .collect())
    }

    fn commit(&self, changes: GroupChangeSet) -> Result<CommitReceipt, StoreError> {
        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;

        for (group_id, expected) in &changes.expected {
            let actual = state.groups.get(group_id).map(|g| g.version());
            if !expected.matches(actual) {
                return Err(StoreError::Concurrency(format!(
                    "group {group_id}: expected {expected:?}, found {actual:?}"
                )));
            }
        }

        let mut staged = state.clone();
        let receipt = staged.apply(changes)?;
        *state = staged;
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use shelfmatch_catalog::{AddMember, CreateGroup, GroupCommand, GroupMeta};
    use shelfmatch_core::{Aggregate, ExpectedVersion, Platform};

    fn listing(platform: &str, id: &str) -> SourceProduct {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
        SourceProduct::new(Platform::new(platform).unwrap(), id, "Fresh Onion", "1 kg", at)
    }

    fn member(platform: &str, id: &str) -> MemberRef {
        MemberRef::parse(platform, id).unwrap()
    }

    fn new_group(m: MemberRef) -> ProductGroup {
        let id = GroupId::new();
        let mut group = ProductGroup::empty(id);
        group
            .execute(&GroupCommand::CreateGroup(CreateGroup {
                group_id: id,
                member: m,
                meta: GroupMeta::new("Fresh Onion", "1 kg"),
                verified: false,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        group
    }

    fn create(repo: &InMemoryGroupRepository, m: MemberRef) -> ProductGroup {
        let group = new_group(m);
        let mut changes = GroupChangeSet::new();
        changes.expect(group.id_typed(), ExpectedVersion::Absent).upsert(group.clone());
        repo.commit(changes).unwrap();
        group
    }

    #[test]
    fn commit_indexes_owners() {
        let repo = InMemoryGroupRepository::new();
        let group = create(&repo, member("zepto", "z-1"));

        let owner = repo.find_owner(&member("zepto", "z-1")).unwrap().unwrap();
        assert_eq!(owner.id_typed(), group.id_typed());
        assert_eq!(repo.find_by_normalized_name("fresh onion").unwrap().len(), 1);
    }

    #[test]
    fn stale_version_is_rejected() {
        let repo = InMemoryGroupRepository::new();
        let group = create(&repo, member("zepto", "z-1"));

        let mut changes = GroupChangeSet::new();
        changes.expect(group.id_typed(), ExpectedVersion::Exact(7)).upsert(group);
        assert!(matches!(repo.commit(changes), Err(StoreError::Concurrency(_))));
    }

    #[test]
    fn member_cannot_belong_to_two_groups() {
        let repo = InMemoryGroupRepository::new();
        create(&repo, member("zepto", "z-1"));

        let mut changes = GroupChangeSet::new();
        changes.upsert(new_group(member("zepto", "z-1")));
        assert!(matches!(repo.commit(changes), Err(StoreError::Integrity(_))));
    }

    #[test]
    fn failed_commit_applies_nothing() {
        let repo = InMemoryGroupRepository::new();
        let existing = create(&repo, member("zepto", "z-1"));

        let fresh = new_group(member("blinkit", "b-1"));
        let mut changes = GroupChangeSet::new();
        changes
            .upsert(fresh.clone())
            .rewrite_history(member("blinkit", "b-1"), GroupId::new());
        assert!(repo.commit(changes).is_err());

        assert!(repo.load_group(fresh.id_typed()).unwrap().is_none());
        assert_eq!(repo.list_groups().unwrap(), vec![existing]);
    }

    #[test]
    fn deleted_ids_are_retired_forever() {
        let repo = InMemoryGroupRepository::new();
        let group = create(&repo, member("zepto", "z-1"));

        let mut changes = GroupChangeSet::new();
        changes.delete(group.id_typed());
        repo.commit(changes).unwrap();
        assert!(repo.is_retired(group.id_typed()).unwrap());

        let mut reuse = GroupChangeSet::new();
        reuse.upsert(group.clone());
        assert_eq!(repo.commit(reuse), Err(StoreError::RetiredId(group.id_typed())));
    }

    #[test]
    fn delete_is_refused_while_history_points_at_group() {
        let repo = InMemoryGroupRepository::new();
        let group = create(&repo, member("zepto", "z-1"));
        let records = repo.insert_records(vec![listing("zepto", "z-1")]).unwrap();

        let mut tag = GroupChangeSet::new();
        tag.assign(records[0].id, group.id_typed());
        repo.commit(tag).unwrap();

        let mut delete = GroupChangeSet::new();
        delete.delete(group.id_typed());
        assert!(matches!(repo.commit(delete), Err(StoreError::Integrity(_))));

        let mut delete_and_detach = GroupChangeSet::new();
        delete_and_detach
            .delete(group.id_typed())
            .detach_history(member("zepto", "z-1"));
        let receipt = repo.commit(delete_and_detach).unwrap();
        assert_eq!(receipt.records_detached, 1);
        assert_eq!(repo.records_for_member(&member("zepto", "z-1")).unwrap()[0].group_id, None);
    }

    #[test]
    fn records_can_only_be_tagged_with_their_owner() {
        let repo = InMemoryGroupRepository::new();
        let zepto = create(&repo, member("zepto", "z-1"));
        let blinkit = create(&repo, member("blinkit", "b-1"));
        let records = repo.insert_records(vec![listing("blinkit", "b-1")]).unwrap();

        let mut wrong = GroupChangeSet::new();
        wrong.assign(records[0].id, zepto.id_typed());
        assert!(matches!(repo.commit(wrong), Err(StoreError::Integrity(_))));

        let mut wrong_insert = GroupChangeSet::new();
        wrong_insert.insert_record(listing("blinkit", "b-1"), zepto.id_typed());
        assert!(matches!(repo.commit(wrong_insert), Err(StoreError::Integrity(_))));

        let mut wrong_rewrite = GroupChangeSet::new();
        wrong_rewrite.rewrite_history(member("blinkit", "b-1"), zepto.id_typed());
        assert!(matches!(repo.commit(wrong_rewrite), Err(StoreError::Integrity(_))));
        assert_eq!(repo.records_for_member(&member("blinkit", "b-1")).unwrap()[0].group_id, None);

        let mut right = GroupChangeSet::new();
        right.assign(records[0].id, blinkit.id_typed());
        assert_eq!(repo.commit(right).unwrap().records_retagged, 1);
    }

    #[test]
    fn membership_can_move_between_groups_in_one_commit() {
        let repo = InMemoryGroupRepository::new();
        let mut a = create(&repo, member("zepto", "z-1"));
        let b = create(&repo, member("blinkit", "b-1"));

        // Move b-1 into a: delete b, grow a.
        a.execute(&GroupCommand::AddMember(AddMember {
            group_id: a.id_typed(),
            member: member("blinkit", "b-1"),
            manual: true,
            occurred_at: Utc::now(),
        }))
        .unwrap();

        let mut changes = GroupChangeSet::new();
        changes
            .expect(a.id_typed(), ExpectedVersion::Exact(1))
            .expect(b.id_typed(), ExpectedVersion::Exact(1))
            .delete(b.id_typed())
            .upsert(a.clone());
        repo.commit(changes).unwrap();

        assert!(repo.is_retired(b.id_typed()).unwrap());
        assert_eq!(
            repo.find_owner(&member("blinkit", "b-1")).unwrap().map(|g| g.id_typed()),
            Some(a.id_typed())
        );
    }
}
