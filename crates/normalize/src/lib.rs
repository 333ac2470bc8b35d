//! Name and quantity normalization (leaf algorithms, no IO).
//!
//! Everything here is deterministic: the same input always yields the same
//! normalized form, which is what lets independent platforms be compared.

pub mod name;
pub mod quantity;

pub use name::{name_tokens, normalize_name};
pub use quantity::{parse_quantity, quantity_equivalent, Quantity, Unit, QUANTITY_TOLERANCE};
