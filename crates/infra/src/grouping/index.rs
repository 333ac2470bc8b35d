//! Per-batch lookup index for bulk regrouping.
//!
//! Built once for a batch run and dropped with it. The store stays the only
//! durable source of truth.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use shelfmatch_catalog::{Candidate, ProductGroup};
use shelfmatch_core::{GroupId, MemberRef, Platform};

/// What the index knows about one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub group_id: GroupId,
    /// Registration ordinal; candidate iteration order.
    pub ordinal: u64,
    /// Normalized names the group is known under.
    pub names: BTreeSet<String>,
    pub quantity: String,
    pub platforms: BTreeSet<Platform>,
}

impl Candidate for IndexEntry {
    fn group_id(&self) -> GroupId {
        self.group_id
    }

    fn matches_name(&self, normalized_name: &str) -> bool {
        self.names.contains(normalized_name)
    }

    fn canonical_quantity(&self) -> &str {
        &self.quantity
    }

    fn covers_platform(&self, platform: &Platform) -> bool {
        self.platforms.contains(platform)
    }
}

#[derive(Debug, Default)]
pub struct GroupingIndex {
    direct: HashMap<MemberRef, GroupId>,
    inverted: HashMap<String, BTreeSet<u64>>,
    entries: BTreeMap<u64, IndexEntry>,
    ordinals: HashMap<GroupId, u64>,
    next_ordinal: u64,
}

impl GroupingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index existing groups, registering them in ascending id order.
    pub fn seed(groups: impl IntoIterator<Item = ProductGroup>) -> Self {
        let mut groups: Vec<ProductGroup> = groups.into_iter().filter(|g| g.is_active()).collect();
        groups.sort_by_key(|g| g.id_typed());

        let mut index = Self::new();
        for group in &groups {
            index.register(group.id_typed(), group.normalized_name(), group.quantity());
            for member in group.members() {
                index.assign(member.clone(), group.id_typed(), group.normalized_name());
            }
        }
        index
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Direct lookup: the group currently holding `member`.
    pub fn owner(&self, member: &MemberRef) -> Option<GroupId> {
        self.direct.get(member).copied()
    }

    pub fn entry(&self, group_id: GroupId) -> Option<&IndexEntry> {
        self.ordinals.get(&group_id).and_then(|o| self.entries.get(o))
    }

    /// Register a group. Re-registering keeps its original ordinal.
    pub fn register(&mut self, group_id: GroupId, normalized_name: &str, quantity: &str) -> u64 {
        if let Some(ordinal) = self.ordinals.get(&group_id) {
            return *ordinal;
        }
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        self.ordinals.insert(group_id, ordinal);
        self.entries.insert(
            ordinal,
            IndexEntry {
                group_id,
                ordinal,
                names: BTreeSet::new(),
                quantity: quantity.to_string(),
                platforms: BTreeSet::new(),
            },
        );
        self.add_name(ordinal, normalized_name);
        ordinal
    }

    /// Record that `member` (listed under `normalized_name`) belongs to
    /// `group_id`. The group must be registered.
    pub fn assign(&mut self, member: MemberRef, group_id: GroupId, normalized_name: &str) {
        let Some(&ordinal) = self.ordinals.get(&group_id) else {
            return;
        };
        if let Some(entry) = self.entries.get_mut(&ordinal) {
            entry.platforms.insert(member.platform.clone());
        }
        self.add_name(ordinal, normalized_name);
        self.direct.insert(member, group_id);
    }

    /// Candidate groups for a normalized name, in registration order.
    ///
    /// A group qualifies when it is posted under every token of the name.
    pub fn shortlist(&self, normalized_name: &str) -> Vec<&IndexEntry> {
        let mut postings: Vec<&BTreeSet<u64>> = Vec::new();
        for token in normalized_name.split_whitespace() {
            match self.inverted.get(token) {
                Some(posting) => postings.push(posting),
                None => return Vec::new(),
            }
        }
        postings.sort_by_key(|p| p.len());

        let Some((smallest, rest)) = postings.split_first() else {
            return Vec::new();
        };
        smallest
            .iter()
            .filter(|ordinal| rest.iter().all(|p| p.contains(ordinal)))
            .filter_map(|ordinal| self.entries.get(ordinal))
            .collect()
    }

    fn add_name(&mut self, ordinal: u64, normalized_name: &str) {
        if normalized_name.is_empty() {
            return;
        }
        let Some(entry) = self.entries.get_mut(&ordinal) else {
            return;
        };
        if entry.names.insert(normalized_name.to_string()) {
            for token in normalized_name.split_whitespace() {
                self.inverted.entry(token.to_string()).or_default().insert(ordinal);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use shelfmatch_catalog::{CreateGroup, GroupCommand, GroupMeta};
    use shelfmatch_core::Aggregate;

    fn member(platform: &str, id: &str) -> MemberRef {
        MemberRef::parse(platform, id).unwrap()
    }

    fn group(m: MemberRef, name: &str, quantity: &str) -> ProductGroup {
        let id = GroupId::new();
        let mut g = ProductGroup::empty(id);
        g.execute(&GroupCommand::CreateGroup(CreateGroup {
            group_id: id,
            member: m,
            meta: GroupMeta::new(name, quantity),
            verified: false,
            occurred_at: Utc::now(),
        }))
        .unwrap();
        g
    }

    #[test]
    fn seed_orders_by_group_id_and_indexes_members() {
        let a = group(member("zepto", "z-1"), "Keto Atta", "1 kg");
        let b = group(member("blinkit", "b-1"), "Keto Atta", "1 kg");
        let index = GroupingIndex::seed(vec![b.clone(), a.clone()]);

        assert_eq!(index.len(), 2);
        assert_eq!(index.owner(&member("blinkit", "b-1")), Some(b.id_typed()));
        let shortlist: Vec<GroupId> = index.shortlist("keto atta").iter().map(|e| e.group_id).collect();
        assert_eq!(shortlist, vec![a.id_typed(), b.id_typed()]);
    }

    #[test]
    fn shortlist_intersects_token_postings() {
        let mut index = GroupingIndex::new();
        let atta = GroupId::new();
        let flour = GroupId::new();
        index.register(atta, "keto atta", "1 kg");
        index.register(flour, "keto flour", "1 kg");

        let hits: Vec<GroupId> = index.shortlist("keto atta").iter().map(|e| e.group_id).collect();
        assert_eq!(hits, vec![atta]);
        assert!(index.shortlist("rice").is_empty());
        assert!(index.shortlist("").is_empty());
    }

    #[test]
    fn assign_tracks_platforms_and_alias_names() {
        let mut index = GroupingIndex::new();
        let id = GroupId::new();
        index.register(id, "toned milk", "500 ml");
        index.assign(member("zepto", "z-1"), id, "amul toned milk");

        let entry = index.entry(id).unwrap();
        assert!(entry.covers_platform(&Platform::new("zepto").unwrap()));
        assert!(entry.matches_name("amul toned milk"));
        assert_eq!(index.shortlist("amul toned milk").len(), 1);
    }
}
