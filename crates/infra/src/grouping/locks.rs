//! Mutual exclusion for interactive mutations on the same group or member.

use std::collections::BTreeSet;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use shelfmatch_core::{DomainError, GroupId, MemberRef};

use super::GroupingError;
use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockKey {
    Group(GroupId),
    Member(MemberRef),
}

impl core::fmt::Display for LockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            LockKey::Group(id) => write!(f, "group:{id}"),
            LockKey::Member(member) => write!(f, "member:{member}"),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    held: Mutex<BTreeSet<LockKey>>,
    released: Condvar,
}

/// Lock table keyed by group id and member reference.
///
/// A caller acquires its whole key set at once, in sorted order, or waits
/// until all of them are free. Clones share the same table.
#[derive(Debug, Clone)]
pub struct LockTable {
    inner: Arc<Inner>,
    timeout: Duration,
}

impl LockTable {
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner::default()),
            timeout,
        }
    }

    /// Acquire every key or fail with `Conflict` after the configured timeout.
    pub fn acquire(
        &self,
        keys: impl IntoIterator<Item = LockKey>,
    ) -> Result<LockGuard, GroupingError> {
        let keys: BTreeSet<LockKey> = keys.into_iter().collect();
        let deadline = Instant::now() + self.timeout;

        let mut held = self.inner.held.lock().map_err(|_| StoreError::Poisoned)?;
        while keys.iter().any(|k| held.contains(k)) {
            let now = Instant::now();
            if now >= deadline {
                let busy: Vec<String> = keys
                    .iter()
                    .filter(|k| held.contains(*k))
                    .map(ToString::to_string)
                    .collect();
                return Err(DomainError::conflict(format!(
                    "timed out waiting for {}",
                    busy.join(", ")
                ))
                .into());
            }
            let (guard, _) = self
                .inner
                .released
                .wait_timeout(held, deadline - now)
                .map_err(|_| StoreError::Poisoned)?;
            held = guard;
        }
        held.extend(keys.iter().cloned());

        Ok(LockGuard {
            inner: self.inner.clone(),
            keys,
        })
    }
}

/// Releases its keys on drop.
#[derive(Debug)]
pub struct LockGuard {
    inner: Arc<Inner>,
    keys: BTreeSet<LockKey>,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let mut held = match self.inner.held.lock() {
            Ok(held) => held,
            Err(poisoned) => poisoned.into_inner(),
        };
        for key in &self.keys {
            held.remove(key);
        }
        self.inner.released.notify_all();
    }
}
