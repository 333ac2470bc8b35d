//! Platform and member references.
//!
//! A member reference `{platform, source_product_id}` is the stable identity of a
//! listing across scrape runs. Groups own member references, not listings.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

/// One grocery-delivery source catalog (e.g. `blinkit`, `zepto`).
///
/// Stored lower-cased and trimmed so `"Zepto "` and `"zepto"` are one platform.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Platform(String);

impl Platform {
    pub fn new(raw: impl AsRef<str>) -> DomainResult<Self> {
        let value = raw.as_ref().trim().to_lowercase();
        if value.is_empty() {
            return Err(DomainError::validation("platform cannot be empty"));
        }
        if value.chars().any(char::is_whitespace) {
            return Err(DomainError::validation(format!(
                "platform '{value}' must not contain whitespace"
            )));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Platform {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Platform> for String {
    fn from(value: Platform) -> Self {
        value.0
    }
}

impl core::fmt::Display for Platform {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to a listing identity: `(platform, source_product_id)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MemberRef {
    pub platform: Platform,
    pub source_product_id: String,
}

impl MemberRef {
    /// Build a validated member reference.
    ///
    /// A blank source product id is a malformed reference.
    pub fn new(platform: Platform, source_product_id: impl Into<String>) -> DomainResult<Self> {
        let source_product_id = source_product_id.into().trim().to_string();
        if source_product_id.is_empty() {
            return Err(DomainError::validation(format!(
                "empty source product id for platform '{platform}'"
            )));
        }
        Ok(Self {
            platform,
            source_product_id,
        })
    }

    /// Parse both parts from raw strings.
    pub fn parse(platform: &str, source_product_id: &str) -> DomainResult<Self> {
        Self::new(Platform::new(platform)?, source_product_id)
    }

    /// Re-check a reference that may have been built field-by-field (e.g. deserialized).
    pub fn validate(&self) -> DomainResult<()> {
        if self.source_product_id.trim().is_empty() {
            return Err(DomainError::validation(format!(
                "empty source product id for platform '{}'",
                self.platform
            )));
        }
        Ok(())
    }
}

impl ValueObject for MemberRef {}

impl core::fmt::Display for MemberRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.platform, self.source_product_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_is_case_and_space_insensitive() {
        assert_eq!(Platform::new(" Zepto ").unwrap(), Platform::new("zepto").unwrap());
    }

    #[test]
    fn platform_rejects_blank_and_inner_whitespace() {
        assert!(matches!(Platform::new("  "), Err(DomainError::Validation(_))));
        assert!(matches!(Platform::new("big basket"), Err(DomainError::Validation(_))));
    }

    #[test]
    fn member_ref_rejects_blank_source_id() {
        let err = MemberRef::parse("blinkit", "   ").unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn member_ref_orders_by_platform_then_id() {
        let a = MemberRef::parse("blinkit", "9").unwrap();
        let b = MemberRef::parse("zepto", "1").unwrap();
        assert!(a < b);
        assert_eq!(a.to_string(), "blinkit:9");
    }

    #[test]
    fn platform_deserialization_validates() {
        let ok: Platform = serde_json::from_str("\"Instamart\"").unwrap();
        assert_eq!(ok.as_str(), "instamart");
        assert!(serde_json::from_str::<Platform>("\"\"").is_err());
    }
}
