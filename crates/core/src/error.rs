//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic grouping failures (validation, ownership,
/// invariants, conflicts). Persistence concerns belong to the infra layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed member reference).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A requested group does not exist (or no longer exists).
    #[error("not found: {0}")]
    NotFound(String),

    /// The member is owned by a different existing group.
    #[error("member {member} already belongs to group {owner}")]
    AlreadyGrouped { member: String, owner: String },

    /// The operation would orphan a reference or break the one-group invariant.
    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A conflict occurred (stale version, lock timeout).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn already_grouped(member: impl ToString, owner: impl ToString) -> Self {
        Self::AlreadyGrouped {
            member: member.to_string(),
            owner: owner.to_string(),
        }
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::IntegrityViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}
