use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shelfmatch_core::{Aggregate, AggregateRoot, DomainError, GroupId, MemberRef, Platform};
use shelfmatch_normalize::{normalize_name, parse_quantity, Quantity};

use crate::matcher::Candidate;
use crate::meta::{GroupMeta, GroupMetaPatch};

/// Aggregate root: the persistent canonical identity of one real product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductGroup {
    id: GroupId,
    name: String,
    normalized_name: String,
    quantity: String,
    category: Option<String>,
    members: BTreeSet<MemberRef>,
    verified: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: u64,
    created: bool,
    deleted: bool,
}

impl ProductGroup {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: GroupId) -> Self {
        Self {
            id,
            name: String::new(),
            normalized_name: String::new(),
            quantity: String::new(),
            category: None,
            members: BTreeSet::new(),
            verified: false,
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
            version: 0,
            created: false,
            deleted: false,
        }
    }

    pub fn id_typed(&self) -> GroupId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn normalized_name(&self) -> &str {
        &self.normalized_name
    }

    pub fn quantity(&self) -> &str {
        &self.quantity
    }

    pub fn parsed_quantity(&self) -> Option<Quantity> {
        parse_quantity(&self.quantity)
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    pub fn members(&self) -> &BTreeSet<MemberRef> {
        &self.members
    }

    pub fn contains(&self, member: &MemberRef) -> bool {
        self.members.contains(member)
    }

    pub fn is_singleton(&self) -> bool {
        self.members.len() == 1
    }

    /// Platforms with at least one member in this group.
    pub fn platforms(&self) -> BTreeSet<&Platform> {
        self.members.iter().map(|m| &m.platform).collect()
    }

    pub fn is_verified(&self) -> bool {
        self.verified
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Created and not deleted.
    pub fn is_active(&self) -> bool {
        self.created && !self.deleted
    }

    pub fn meta(&self) -> GroupMeta {
        GroupMeta {
            name: self.name.clone(),
            quantity: self.quantity.clone(),
            category: self.category.clone(),
        }
    }
}

impl AggregateRoot for ProductGroup {
    type Id = GroupId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Candidate for ProductGroup {
    fn group_id(&self) -> GroupId {
        self.id
    }

    fn matches_name(&self, normalized_name: &str) -> bool {
        self.is_active() && self.normalized_name == normalized_name
    }

    fn canonical_quantity(&self) -> &str {
        &self.quantity
    }

    fn covers_platform(&self, platform: &Platform) -> bool {
        self.members.iter().any(|m| &m.platform == platform)
    }
}

/// Command: CreateGroup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateGroup {
    pub group_id: GroupId,
    pub member: MemberRef,
    pub meta: GroupMeta,
    pub verified: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddMember.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddMember {
    pub group_id: GroupId,
    pub member: MemberRef,
    /// Manual curation marks the group as verified.
    pub manual: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveMember.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveMember {
    pub group_id: GroupId,
    pub member: MemberRef,
    pub manual: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateMeta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateMeta {
    pub group_id: GroupId,
    pub patch: GroupMetaPatch,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeleteGroup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteGroup {
    pub group_id: GroupId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupCommand {
    CreateGroup(CreateGroup),
    AddMember(AddMember),
    RemoveMember(RemoveMember),
    UpdateMeta(UpdateMeta),
    DeleteGroup(DeleteGroup),
}

/// Event: GroupCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCreated {
    pub group_id: GroupId,
    pub member: MemberRef,
    pub meta: GroupMeta,
    pub normalized_name: String,
    pub verified: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MemberAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberAdded {
    pub group_id: GroupId,
    pub member: MemberRef,
    pub manual: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MemberRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRemoved {
    pub group_id: GroupId,
    pub member: MemberRef,
    pub manual: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MetaUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaUpdated {
    pub group_id: GroupId,
    pub name: Option<String>,
    pub normalized_name: Option<String>,
    pub quantity: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: GroupDeleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDeleted {
    pub group_id: GroupId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupEvent {
    GroupCreated(GroupCreated),
    MemberAdded(MemberAdded),
    MemberRemoved(MemberRemoved),
    MetaUpdated(MetaUpdated),
    GroupDeleted(GroupDeleted),
}

impl GroupEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            GroupEvent::GroupCreated(_) => "grouping.group.created",
            GroupEvent::MemberAdded(_) => "grouping.group.member_added",
            GroupEvent::MemberRemoved(_) => "grouping.group.member_removed",
            GroupEvent::MetaUpdated(_) => "grouping.group.meta_updated",
            GroupEvent::GroupDeleted(_) => "grouping.group.deleted",
        }
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            GroupEvent::GroupCreated(e) => e.occurred_at,
            GroupEvent::MemberAdded(e) => e.occurred_at,
            GroupEvent::MemberRemoved(e) => e.occurred_at,
            GroupEvent::MetaUpdated(e) => e.occurred_at,
            GroupEvent::GroupDeleted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for ProductGroup {
    type Command = GroupCommand;
    type Event = GroupEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            GroupEvent::GroupCreated(e) => {
                self.id = e.group_id;
                self.name = e.meta.name.clone();
                self.normalized_name = e.normalized_name.clone();
                self.quantity = e.meta.quantity.clone();
                self.category = e.meta.category.clone();
                self.members = BTreeSet::from([e.member.clone()]);
                self.verified = e.verified;
                self.created_at = e.occurred_at;
                self.created = true;
            }
            GroupEvent::MemberAdded(e) => {
                self.members.insert(e.member.clone());
                self.verified |= e.manual;
            }
            GroupEvent::MemberRemoved(e) => {
                self.members.remove(&e.member);
                self.verified |= e.manual;
            }
            GroupEvent::MetaUpdated(e) => {
                if let Some(name) = &e.name {
                    self.name = name.clone();
                }
                if let Some(normalized) = &e.normalized_name {
                    self.normalized_name = normalized.clone();
                }
                if let Some(quantity) = &e.quantity {
                    self.quantity = quantity.clone();
                }
                self.verified = true;
            }
            GroupEvent::GroupDeleted(_) => {
                self.deleted = true;
            }
        }

        self.updated_at = event.occurred_at();
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            GroupCommand::CreateGroup(cmd) => self.handle_create(cmd),
            GroupCommand::AddMember(cmd) => self.handle_add(cmd),
            GroupCommand::RemoveMember(cmd) => self.handle_remove(cmd),
            GroupCommand::UpdateMeta(cmd) => self.handle_update_meta(cmd),
            GroupCommand::DeleteGroup(cmd) => self.handle_delete(cmd),
        }
    }
}

impl ProductGroup {
    fn ensure_active(&self, group_id: GroupId) -> Result<(), DomainError> {
        if self.id != group_id {
            return Err(DomainError::integrity(format!(
                "group_id mismatch (aggregate {}, command {group_id})",
                self.id
            )));
        }
        if !self.is_active() {
            return Err(DomainError::not_found(format!("group {group_id}")));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateGroup) -> Result<Vec<GroupEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict(format!("group {} already exists", cmd.group_id)));
        }
        cmd.member.validate()?;
        if cmd.meta.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }

        Ok(vec![GroupEvent::GroupCreated(GroupCreated {
            group_id: cmd.group_id,
            member: cmd.member.clone(),
            meta: cmd.meta.clone(),
            normalized_name: normalize_name(&cmd.meta.name),
            verified: cmd.verified,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add(&self, cmd: &AddMember) -> Result<Vec<GroupEvent>, DomainError> {
        self.ensure_active(cmd.group_id)?;
        cmd.member.validate()?;

        if self.members.contains(&cmd.member) {
            return Ok(vec![]);
        }

        Ok(vec![GroupEvent::MemberAdded(MemberAdded {
            group_id: cmd.group_id,
            member: cmd.member.clone(),
            manual: cmd.manual,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove(&self, cmd: &RemoveMember) -> Result<Vec<GroupEvent>, DomainError> {
        self.ensure_active(cmd.group_id)?;

        if !self.members.contains(&cmd.member) {
            return Err(DomainError::validation(format!(
                "member {} is not in group {}",
                cmd.member, cmd.group_id
            )));
        }
        if self.members.len() == 1 {
            return Err(DomainError::integrity(format!(
                "cannot remove the only member of group {}; explode or delete the group instead",
                cmd.group_id
            )));
        }

        Ok(vec![GroupEvent::MemberRemoved(MemberRemoved {
            group_id: cmd.group_id,
            member: cmd.member.clone(),
            manual: cmd.manual,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_meta(&self, cmd: &UpdateMeta) -> Result<Vec<GroupEvent>, DomainError> {
        self.ensure_active(cmd.group_id)?;
        cmd.patch.validate()?;

        let name = cmd.patch.name.as_ref().map(|n| n.trim().to_string());
        Ok(vec![GroupEvent::MetaUpdated(MetaUpdated {
            group_id: cmd.group_id,
            normalized_name: name.as_deref().map(normalize_name),
            name,
            quantity: cmd.patch.quantity.as_ref().map(|q| q.trim().to_string()),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delete(&self, cmd: &DeleteGroup) -> Result<Vec<GroupEvent>, DomainError> {
        self.ensure_active(cmd.group_id)?;

        Ok(vec![GroupEvent::GroupDeleted(GroupDeleted {
            group_id: cmd.group_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
