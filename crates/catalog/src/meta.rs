//! Canonical group metadata and the allow-listed update structure.

use serde::{Deserialize, Serialize};

use shelfmatch_core::{DomainError, DomainResult};

use crate::listing::SourceProduct;

/// Canonical display metadata of a product group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMeta {
    pub name: String,
    #[serde(default)]
    pub quantity: String,
    #[serde(default)]
    pub category: Option<String>,
}

impl GroupMeta {
    pub fn new(name: impl Into<String>, quantity: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            quantity: quantity.into(),
            category: None,
        }
    }

    pub fn with_category(mut self, category: Option<String>) -> Self {
        self.category = category;
        self
    }

    /// Metadata seeded from a listing (used for new and split-out groups).
    pub fn from_listing(listing: &SourceProduct) -> Self {
        Self {
            name: listing.name.trim().to_string(),
            quantity: listing.quantity.trim().to_string(),
            category: listing.category.clone(),
        }
    }
}

/// Editable canonical fields. Unknown fields are rejected at deserialization.
///
/// Membership and category are deliberately not part of this structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupMetaPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub quantity: Option<String>,
}

impl GroupMetaPatch {
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            quantity: None,
        }
    }

    pub fn quantity(quantity: impl Into<String>) -> Self {
        Self {
            name: None,
            quantity: Some(quantity.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.quantity.is_none()
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.is_empty() {
            return Err(DomainError::validation("metadata patch has no fields"));
        }
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(DomainError::validation("name cannot be empty"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_rejects_unknown_fields() {
        let err = serde_json::from_str::<GroupMetaPatch>(r#"{"name":"Atta","members":[]}"#);
        assert!(err.is_err());
    }

    #[test]
    fn patch_accepts_allow_listed_fields() {
        let patch: GroupMetaPatch = serde_json::from_str(r#"{"quantity":"5 kg"}"#).unwrap();
        assert_eq!(patch, GroupMetaPatch::quantity("5 kg"));
        assert!(patch.validate().is_ok());
    }

    #[test]
    fn empty_or_blank_patch_is_invalid() {
        assert!(matches!(
            GroupMetaPatch::default().validate(),
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(
            GroupMetaPatch::name("  ").validate(),
            Err(DomainError::Validation(_))
        ));
    }
}
