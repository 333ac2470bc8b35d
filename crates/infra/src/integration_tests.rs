//! Integration tests for the full grouping pipeline.
//!
//! Tests: listings → resolver / regroup → repository → comparison rows
//!
//! Verifies:
//! - Every known member maps to exactly one existing group after any sequence
//!   of curated mutations
//! - Exploding a group moves all history to the successor groups
//! - Batch regroup membership does not depend on snapshot order
//! - Cross-platform matching scenarios end to end

#[cfg(test)]
mod tests {
    use std::collections::{BTreeSet, HashMap};
    use std::sync::Arc;

    use chrono::{DateTime, TimeZone, Utc};
    use proptest::prelude::*;

    use shelfmatch_catalog::{merge_rows, GroupMeta, SourceProduct};
    use shelfmatch_core::{GroupId, MemberRef, Platform};

    use crate::config::GroupingConfig;
    use crate::grouping::{GroupResolver, GroupingStore, LockTable};
    use crate::regroup::{InMemoryCheckpointStore, RegroupRunner, RegroupStatus};
    use crate::store::{GroupRepository, InMemoryGroupRepository, SnapshotFilter};

    type Repo = Arc<InMemoryGroupRepository>;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 9, minute, 0).unwrap()
    }

    fn platform(name: &str) -> Platform {
        Platform::new(name).unwrap()
    }

    fn listing(p: &str, id: &str, name: &str, quantity: &str) -> SourceProduct {
        SourceProduct::new(platform(p), id, name, quantity, at(0))
    }

    fn member(p: &str, id: &str) -> MemberRef {
        MemberRef::parse(p, id).unwrap()
    }

    fn setup() -> (Repo, GroupingStore<Repo>, GroupResolver<Repo>) {
        let repo: Repo = Arc::new(InMemoryGroupRepository::new());
        let locks = LockTable::new(GroupingConfig::default().lock_timeout);
        let store = GroupingStore::with_locks(repo.clone(), locks.clone());
        let resolver = GroupResolver::with_locks(repo.clone(), locks);
        (repo, store, resolver)
    }

    /// Every record's tag points at an existing group that contains the
    /// record's member, and every grouped member has exactly one owner.
    fn assert_consistent(repo: &Repo, members: &[MemberRef]) {
        let groups = repo.list_groups().unwrap();
        for m in members {
            let owners: Vec<GroupId> = groups
                .iter()
                .filter(|g| g.contains(m))
                .map(|g| g.id_typed())
                .collect();
            assert_eq!(owners.len(), 1, "member {m} has owners {owners:?}");

            for record in repo.records_for_member(m).unwrap() {
                assert_eq!(record.group_id, Some(owners[0]), "stale history for {m}");
            }
        }
    }

    #[test]
    fn scenario_different_quantities_stay_apart() {
        let (repo, _, resolver) = setup();
        let blinkit = resolver
            .resolve_group_id(&listing("blinkit", "b-1", "Fresh Onion", "1 kg"), at(0), None)
            .unwrap();
        let zepto = resolver
            .resolve_group_id(&listing("zepto", "z-1", "Fresh Onion", "500 g"), at(0), None)
            .unwrap();

        assert_ne!(blinkit, zepto);
        assert_eq!(repo.list_groups().unwrap().len(), 2);
    }

    #[test]
    fn scenario_same_product_fills_both_platform_columns() {
        let (repo, _, resolver) = setup();
        let batch = vec![
            listing("zepto", "z-1", "Nutroactive Keto Atta", "1 kg").with_rank(2).with_price(39900),
            listing("blinkit", "b-1", "Nutroactive Keto Atta", "1 kg").with_rank(4).with_price(41000),
        ];
        let assignments = resolver.resolve_batch(&batch).unwrap();

        let groups: HashMap<GroupId, _> = repo
            .list_groups()
            .unwrap()
            .into_iter()
            .map(|g| (g.id_typed(), g))
            .collect();
        assert_eq!(groups.len(), 1);

        let rows = merge_rows(&batch, &assignments, &groups);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].populated_platforms(), 2);
        assert_eq!(rows[0].name, "Nutroactive Keto Atta");
        assert_eq!(rows[0].cell(&platform("zepto")).unwrap().price, Some(39900));
    }

    #[test]
    fn explode_moves_all_history_to_successors() {
        let (repo, store, resolver) = setup();
        let members = [member("zepto", "z-1"), member("blinkit", "b-1"), member("instamart", "i-1")];

        // Three platforms, several observations each, all one product.
        for minute in 0..4 {
            for m in &members {
                let l = listing(m.platform.as_str(), &m.source_product_id, "Toned Milk", "500 ml");
                resolver.resolve_group_id(&l, at(minute), None).unwrap();
            }
        }
        let groups = repo.list_groups().unwrap();
        assert_eq!(groups.len(), 1);
        let old = groups[0].id_typed();

        let successors = store.explode_group(old).unwrap();

        assert_eq!(successors.len(), 3);
        let ids: BTreeSet<GroupId> = successors.iter().map(|(_, id)| *id).collect();
        assert_eq!(ids.len(), 3);
        assert!(!ids.contains(&old));
        assert!(repo.is_retired(old).unwrap());

        for (m, id) in &successors {
            let group = store.group(*id).unwrap();
            assert!(group.is_singleton());
            assert!(group.contains(m));
            let history = repo.records_for_member(m).unwrap();
            assert_eq!(history.len(), 4);
            assert!(history.iter().all(|r| r.group_id == Some(*id)));
        }
        assert!(repo
            .find_records(&SnapshotFilter::all())
            .unwrap()
            .iter()
            .all(|r| r.group_id != Some(old)));
    }

    #[test]
    fn curated_fix_survives_regroup() {
        let (repo, store, _) = setup();
        repo.insert_records(vec![
            listing("zepto", "z-1", "Keto Atta", "1 kg"),
            listing("blinkit", "b-1", "Keto Atta", "1 kg"),
        ])
        .unwrap();
        let job = RegroupRunner::new(
            repo.clone(),
            Arc::new(InMemoryCheckpointStore::new()),
            GroupingConfig::default(),
        );
        job.run(&SnapshotFilter::all()).unwrap();

        let shared = store.owner_of(&member("zepto", "z-1")).unwrap().unwrap();
        let split = store.remove_member(shared, member("blinkit", "b-1")).unwrap();

        let report = job.run(&SnapshotFilter::all()).unwrap();
        assert_eq!(report.status, RegroupStatus::Completed);
        assert_eq!(report.groups_created, 0);
        assert_eq!(store.owner_of(&member("blinkit", "b-1")).unwrap(), Some(split));
        assert_consistent(&repo, &[member("zepto", "z-1"), member("blinkit", "b-1")]);
    }

    #[test]
    fn regroup_report_serializes_for_operators() {
        let (repo, _, _) = setup();
        repo.insert_records(vec![listing("zepto", "z-1", "Keto Atta", "1 kg")]).unwrap();
        let report = RegroupRunner::new(
            repo,
            Arc::new(InMemoryCheckpointStore::new()),
            GroupingConfig::default(),
        )
        .run(&SnapshotFilter::all())
        .unwrap();

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["groups_created"], 1);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add { group: usize, member: usize },
        Remove { group: usize, member: usize },
        Explode { group: usize },
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..6, 0usize..6).prop_map(|(group, member)| Op::Add { group, member }),
            (0usize..6, 0usize..6).prop_map(|(group, member)| Op::Remove { group, member }),
            (0usize..6).prop_map(|group| Op::Explode { group }),
        ]
    }

    const PLATFORMS: [&str; 3] = ["zepto", "blinkit", "instamart"];

    /// Listings over 15 products (5 per platform); a product keeps the same
    /// name and quantity across its observations.
    fn arb_snapshot() -> impl Strategy<Value = Vec<SourceProduct>> {
        let name = prop_oneof![
            Just("Fresh Onion"),
            Just("Toned Milk (Pouch)"),
            Just("Nutroactive Keto Atta"),
        ];
        let quantity = prop_oneof![Just("1 kg"), Just("1000 g"), Just("500 g"), Just(""), Just("500 ml")];
        let catalog = prop::collection::vec((name, quantity), 15);
        let rows = prop::collection::vec((0usize..3, 0usize..5, 0u32..3), 1..24);
        (catalog, rows).prop_map(|(catalog, rows)| {
            rows.into_iter()
                .map(|(p, id, minute)| {
                    let (n, q) = catalog[p * 5 + id];
                    let platform = PLATFORMS[p];
                    let mut l = listing(platform, &format!("{platform}-{id}"), n, q);
                    l.observed_at = at(minute);
                    l
                })
                .collect()
        })
    }

    /// Group membership as a set of member sets (ids differ between stores).
    fn partition(repo: &Repo) -> BTreeSet<BTreeSet<MemberRef>> {
        repo.list_groups()
            .unwrap()
            .into_iter()
            .map(|g| g.members().clone())
            .collect()
    }

    fn regroup(snapshot: Vec<SourceProduct>, chunk: usize) -> Repo {
        let repo: Repo = Arc::new(InMemoryGroupRepository::new());
        repo.insert_records(snapshot).unwrap();
        RegroupRunner::new(
            repo.clone(),
            Arc::new(InMemoryCheckpointStore::new()),
            GroupingConfig::default().with_chunk_size(chunk),
        )
        .run(&SnapshotFilter::all())
        .unwrap();
        repo
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Property: after any sequence of add/remove/explode, every known
        /// member belongs to exactly one existing group and its history
        /// points there.
        #[test]
        fn one_group_per_member_after_any_mutations(ops in prop::collection::vec(arb_op(), 0..25)) {
            let (repo, store, _) = setup();
            let members: Vec<MemberRef> = (0..6)
                .map(|i| member(PLATFORMS[i % 3], &format!("p-{i}")))
                .collect();
            repo.insert_records(
                members
                    .iter()
                    .map(|m| listing(m.platform.as_str(), &m.source_product_id, "Keto Atta", "1 kg"))
                    .collect(),
            )
            .unwrap();
            for m in &members {
                store.create_group(m.clone(), GroupMeta::new("Keto Atta", "1 kg")).unwrap();
            }

            for op in ops {
                // Group slots refer to the groups that exist right now.
                let groups = repo.list_groups().unwrap();
                let pick = |slot: usize| groups[slot % groups.len()].id_typed();
                let _ = match op {
                    Op::Add { group, member } => store.add_member(pick(group), members[member].clone()).map(|_| ()),
                    Op::Remove { group, member } => store.remove_member(pick(group), members[member].clone()).map(|_| ()),
                    Op::Explode { group } => store.explode_group(pick(group)).map(|_| ()),
                };
                assert_consistent(&repo, &members);
            }
        }

        /// Property: regrouping the same snapshot in any order (and with any
        /// chunking) yields the same membership.
        #[test]
        fn regroup_is_order_independent(
            snapshot in arb_snapshot(),
            rotate in 0usize..24,
            chunk in 1usize..8,
        ) {
            let mut reordered = snapshot.clone();
            reordered.reverse();
            let len = reordered.len();
            reordered.rotate_left(rotate % len);

            let first = partition(&regroup(snapshot, 500));
            let second = partition(&regroup(reordered, chunk));
            prop_assert_eq!(first, second);
        }
    }
}
