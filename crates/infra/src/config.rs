//! Runtime configuration for grouping and batch regroup.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const ENV_CHUNK_SIZE: &str = "SHELFMATCH_REGROUP_CHUNK_SIZE";
pub const ENV_LOCK_TIMEOUT_MS: &str = "SHELFMATCH_LOCK_TIMEOUT_MS";
pub const ENV_JOB_NAME: &str = "SHELFMATCH_REGROUP_JOB_NAME";

const DEFAULT_CHUNK_SIZE: usize = 500;
const DEFAULT_LOCK_TIMEOUT_MS: u64 = 2000;
const DEFAULT_JOB_NAME: &str = "regroup";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupingConfig {
    /// Records committed (and checkpointed) together during a regroup.
    pub regroup_chunk_size: usize,
    /// How long a mutation waits for its group/member locks.
    pub lock_timeout: Duration,
    /// Checkpoint key and log name of the regroup job.
    pub regroup_job_name: String,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            regroup_chunk_size: DEFAULT_CHUNK_SIZE,
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
            regroup_job_name: DEFAULT_JOB_NAME.to_string(),
        }
    }
}

impl GroupingConfig {
    /// Read configuration from the environment.
    ///
    /// Missing variables use defaults; invalid ones are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let chunk_size = parse_var(&lookup, ENV_CHUNK_SIZE, DEFAULT_CHUNK_SIZE);
        let chunk_size = if chunk_size == 0 {
            tracing::warn!(var = ENV_CHUNK_SIZE, "chunk size must be positive; using default");
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };

        let lock_timeout_ms = parse_var(&lookup, ENV_LOCK_TIMEOUT_MS, DEFAULT_LOCK_TIMEOUT_MS);

        let job_name = lookup(ENV_JOB_NAME)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_JOB_NAME.to_string());

        Self {
            regroup_chunk_size: chunk_size,
            lock_timeout: Duration::from_millis(lock_timeout_ms),
            regroup_job_name: job_name,
        }
    }

    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.regroup_chunk_size = size.max(1);
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_job_name(mut self, name: impl Into<String>) -> Self {
        self.regroup_job_name = name.into();
        self
    }
}

fn parse_var<T: FromStr + Copy>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse::<T>().unwrap_or_else(|_| {
            tracing::warn!(var = key, value = %raw, "invalid value; using default");
            default
        }),
    }
}
