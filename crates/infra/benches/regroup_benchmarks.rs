use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use chrono::{Duration, TimeZone, Utc};
use shelfmatch_catalog::{cluster_batch, SourceProduct};
use shelfmatch_core::Platform;
use shelfmatch_infra::regroup::InMemoryCheckpointStore;
use shelfmatch_infra::{
    GroupRepository, GroupResolver, GroupingConfig, InMemoryGroupRepository, RegroupRunner,
    SnapshotFilter,
};
use std::sync::Arc;

const PLATFORMS: [&str; 3] = ["zepto", "blinkit", "instamart"];
const NAMES: [&str; 8] = [
    "Fresh Onion",
    "Toned Milk (Pouch)",
    "Nutroactive Keto Atta",
    "Amul Butter",
    "Tata Salt Iodised",
    "Fortune Sunflower Oil",
    "Britannia Brown Bread",
    "Maggi 2-Minute Noodles",
];
const QUANTITIES: [&str; 4] = ["1 kg", "500 g", "1 l", "200 g"];

/// Synthetic snapshot: `count` listings spread over every platform, with
/// roughly three listings per distinct product.
fn snapshot(count: usize) -> Vec<SourceProduct> {
    let start = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
    (0..count)
        .map(|i| {
            let product = i / 3;
            let platform = Platform::new(PLATFORMS[i % 3]).unwrap();
            let name = format!("{} {}", NAMES[product % NAMES.len()], product / NAMES.len());
            SourceProduct::new(
                platform,
                format!("sku-{i}"),
                name,
                QUANTITIES[product % QUANTITIES.len()],
                start + Duration::seconds(i as i64),
            )
            .with_rank((i % 50) as u32)
        })
        .collect()
}

fn bench_resolve_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve_group_id");
    group.sample_size(200);

    group.bench_function("new_group", |b| {
        let listings = snapshot(1);
        b.iter(|| {
            let resolver = GroupResolver::new(
                Arc::new(InMemoryGroupRepository::new()),
                &GroupingConfig::default(),
            );
            let listing = &listings[0];
            black_box(resolver.resolve_group_id(listing, listing.observed_at, None).unwrap());
        });
    });

    group.bench_function("join_with_1000_groups", |b| {
        let repo = Arc::new(InMemoryGroupRepository::new());
        let resolver = GroupResolver::new(repo, &GroupingConfig::default());
        resolver.resolve_batch(&snapshot(3000)).unwrap();

        // Same product as sku-0, new member id each iteration.
        let mut n = 0u64;
        b.iter(|| {
            n += 1;
            let mut listing = snapshot(1).remove(0);
            listing.source_product_id = format!("sku-new-{n}");
            black_box(resolver.resolve_group_id(&listing, listing.observed_at, None).unwrap());
        });
    });

    group.finish();
}

fn bench_cluster_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("cluster_batch");

    for size in [10, 100, 1000, 10000].iter() {
        let listings = snapshot(*size);
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &listings, |b, listings| {
            b.iter(|| black_box(cluster_batch(listings)));
        });
    }

    group.finish();
}

fn bench_regroup_rebuild(c: &mut Criterion) {
    let mut group = c.benchmark_group("regroup_rebuild");
    group.sample_size(20);

    for size in [100, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let listings = snapshot(size);
            b.iter(|| {
                let repo = Arc::new(InMemoryGroupRepository::new());
                repo.insert_records(listings.clone()).unwrap();
                let runner = RegroupRunner::new(
                    repo,
                    InMemoryCheckpointStore::new(),
                    GroupingConfig::default(),
                );
                black_box(runner.run(&SnapshotFilter::all()).unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_resolve_latency,
    bench_cluster_batch,
    bench_regroup_rebuild
);
criterion_main!(benches);
