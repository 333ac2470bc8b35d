//! Long-running, checkpointed regroup of historical snapshots.

pub mod checkpoint;
pub mod runner;
pub mod types;

pub use checkpoint::{CheckpointError, CheckpointStore, InMemoryCheckpointStore, RegroupCheckpoint};
pub use runner::{RegroupError, RegroupHandle, RegroupRunner};
pub use types::{RegroupProgress, RegroupReport, RegroupStatus};
