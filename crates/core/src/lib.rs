//! `shelfmatch-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, member references, the error taxonomy and aggregate traits.

pub mod aggregate;
pub mod error;
pub mod id;
pub mod member;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult};
pub use id::{GroupId, JobId};
pub use member::{MemberRef, Platform};
pub use value_object::ValueObject;
