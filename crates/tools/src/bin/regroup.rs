//! Offline regroup over a listing snapshot.
//!
//! Reads one JSON listing per line, regroups the selected snapshot and prints
//! the resulting comparison rows as JSON on stdout.
//!
//! Usage: `shelfmatch-regroup <listings.jsonl> [--category NAME] [--pincode CODE]`

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;

use shelfmatch_catalog::{merge_rows, ProductGroup, SourceProduct};
use shelfmatch_core::{GroupId, MemberRef};
use shelfmatch_infra::regroup::InMemoryCheckpointStore;
use shelfmatch_infra::{
    GroupRepository, GroupingConfig, InMemoryGroupRepository, RegroupRunner, RegroupStatus,
    SnapshotFilter,
};

/// Regroup a listing snapshot and print the comparison rows as JSON.
#[derive(Debug, Parser)]
#[command(name = "shelfmatch-regroup")]
struct Args {
    /// Listing snapshot, one JSON object per line
    path: PathBuf,

    /// Only regroup listings from this category
    #[arg(long)]
    category: Option<String>,

    /// Only regroup listings from this pincode
    #[arg(long)]
    pincode: Option<String>,
}

impl Args {
    fn filter(&self) -> SnapshotFilter {
        let mut filter = SnapshotFilter::all();
        if let Some(category) = &self.category {
            filter = filter.with_category(category.clone());
        }
        if let Some(pincode) = &self.pincode {
            filter = filter.with_pincode(pincode.clone());
        }
        filter
    }
}

fn read_listings(path: &Path) -> anyhow::Result<Vec<SourceProduct>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut listings = Vec::new();
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("reading {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<SourceProduct>(&line) {
            Ok(listing) => listings.push(listing),
            Err(err) => tracing::warn!(line = n + 1, error = %err, "skipping unparseable listing"),
        }
    }
    Ok(listings)
}

fn main() -> anyhow::Result<()> {
    shelfmatch_observability::init();

    let args = Args::parse();
    let filter = args.filter();
    let listings = read_listings(&args.path)?;
    tracing::info!(path = %args.path.display(), listings = listings.len(), "snapshot loaded");

    let repo = Arc::new(InMemoryGroupRepository::new());
    repo.insert_records(listings)?;

    let runner = RegroupRunner::new(repo.clone(), InMemoryCheckpointStore::new(), GroupingConfig::from_env());
    let report = runner.run(&filter)?;
    tracing::info!(
        status = ?report.status,
        processed = report.processed,
        errored = report.errored,
        groups_created = report.groups_created,
        "regroup finished"
    );
    if report.status != RegroupStatus::Completed {
        bail!("regroup did not complete: {:?}", report.status);
    }

    let groups: HashMap<GroupId, ProductGroup> = repo
        .list_groups()?
        .into_iter()
        .map(|g| (g.id_typed(), g))
        .collect();
    let assignments: HashMap<MemberRef, GroupId> = groups
        .values()
        .flat_map(|g| g.members().iter().map(move |m| (m.clone(), g.id_typed())))
        .collect();

    let snapshot: Vec<SourceProduct> = repo
        .find_records(&filter)?
        .into_iter()
        .map(|r| r.listing)
        .collect();
    let rows = merge_rows(&snapshot, &assignments, &groups);

    serde_json::to_writer_pretty(std::io::stdout().lock(), &rows)?;
    println!();
    Ok(())
}
