//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values
/// (`MemberRef`, `Quantity`). Entities such as `ProductGroup` are compared by id.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
