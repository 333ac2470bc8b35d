//! Pack / weight / volume parsing and equivalence.
//!
//! Free-form quantity strings (`"1 kg"`, `"3 x 100g"`, `"500 g Pack of 2"`,
//! `"1 Ltr"`) are parsed into a [`Quantity`]. Unparseable strings yield `None`,
//! which the comparator treats as compatible with anything: missing or garbled
//! source data must not block a name-based match.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use shelfmatch_core::ValueObject;

/// Two values in the same unit are equal when closer than this.
pub const QUANTITY_TOLERANCE: f64 = 0.1;

/// Canonical quantity unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    #[serde(rename = "g")]
    Gram,
    #[serde(rename = "kg")]
    Kilogram,
    #[serde(rename = "ml")]
    Millilitre,
    #[serde(rename = "l")]
    Litre,
    Count,
}

impl Unit {
    fn from_token(token: &str) -> Option<Self> {
        match token {
            "g" => Some(Unit::Gram),
            "kg" => Some(Unit::Kilogram),
            "ml" => Some(Unit::Millilitre),
            "l" => Some(Unit::Litre),
            "pc" => Some(Unit::Count),
            _ => None,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Unit::Gram => "g",
            Unit::Kilogram => "kg",
            Unit::Millilitre => "ml",
            Unit::Litre => "l",
            Unit::Count => "count",
        }
    }
}

impl core::fmt::Display for Unit {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A parsed quantity: total value in `unit` (multipliers already applied).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    pub value: f64,
    pub unit: Unit,
}

impl ValueObject for Quantity {}

impl Quantity {
    pub fn new(value: f64, unit: Unit) -> Self {
        Self { value, unit }
    }

    /// Parse a free-form quantity string. See [`parse_quantity`].
    pub fn parse(raw: &str) -> Option<Self> {
        parse_quantity(raw)
    }

    /// Equivalence under the unit-aware tolerance policy.
    pub fn is_equivalent(&self, other: &Quantity) -> bool {
        use Unit::*;

        let close = |a: f64, b: f64| (a - b).abs() < QUANTITY_TOLERANCE;
        match (self.unit, other.unit) {
            (a, b) if a == b => close(self.value, other.value),
            (Kilogram, Gram) | (Litre, Millilitre) => close(self.value * 1000.0, other.value),
            (Gram, Kilogram) | (Millilitre, Litre) => close(self.value, other.value * 1000.0),
            _ => false,
        }
    }
}

impl core::fmt::Display for Quantity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.unit {
            Unit::Count => write!(f, "{} pcs", self.value),
            unit => write!(f, "{} {}", self.value, unit),
        }
    }
}

static PACK_OF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"packof(\d+)").expect("static pattern is valid"));

/// Unit synonyms, longest spellings first within each group.
static SYNONYMS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"kilograms|kilogram|kgs", "kg"),
        (r"litres|liters|litre|liter|ltr", "l"),
        (r"grams|gram|gms|gm", "g"),
        (r"pieces|piece|pcs|units|unit", "pc"),
    ]
    .into_iter()
    .map(|(pattern, unit)| (Regex::new(pattern).expect("static pattern is valid"), unit))
    .collect()
});

static MULTIPLIED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)[x*](\d+(?:\.\d+)?|\.\d+)(kg|g|ml|l|pc)").expect("static pattern is valid")
});

static VALUE_UNIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+(?:\.\d+)?|\.\d+)(kg|g|ml|l|pc)(.*)$").expect("static pattern is valid")
});

/// `xN` only counts when the `x` starts a token, so words such as "approx"
/// are not read as multipliers.
static TRAILING_MULTIPLIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^a-z0-9.])x(\d+)|\*(\d+)").expect("static pattern is valid")
});

static COUNT_ONLY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^x(\d+)$").expect("static pattern is valid"));

/// Parse a free-form quantity string.
///
/// Recognized shapes, after lower-casing and removing whitespace/parentheses:
/// - `<count>x<value><unit>` (`3x100g` is 300 g)
/// - `<value><unit><trailing>` where `trailing` may carry `xN` or `*N`
///   (`1kgx3` is 3 kg, `500gpackof2` is 1000 g)
/// - `xN` alone (`pack of 6` is 6 pieces)
pub fn parse_quantity(raw: &str) -> Option<Quantity> {
    let compact: String = raw
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '(' && *c != ')')
        .collect();
    let compact = PACK_OF.replace_all(&compact, "x$1").replace("pack", "");

    let mut folded = compact;
    for (pattern, unit) in SYNONYMS.iter() {
        folded = pattern.replace_all(&folded, *unit).into_owned();
    }

    if let Some(caps) = MULTIPLIED.captures(&folded) {
        let count: f64 = caps[1].parse().ok()?;
        let value: f64 = caps[2].parse().ok()?;
        let unit = Unit::from_token(&caps[3])?;
        return Some(Quantity::new(count * value, unit));
    }

    if let Some(caps) = VALUE_UNIT.captures(&folded) {
        let value: f64 = caps[1].parse().ok()?;
        let unit = Unit::from_token(&caps[2])?;
        let multiplier = TRAILING_MULTIPLIER
            .captures(&caps[3])
            .and_then(|m| m.get(1).or_else(|| m.get(2)))
            .and_then(|n| n.as_str().parse::<f64>().ok())
            .unwrap_or(1.0);
        return Some(Quantity::new(value * multiplier, unit));
    }

    if let Some(caps) = COUNT_ONLY.captures(&folded) {
        let count: f64 = caps[1].parse().ok()?;
        return Some(Quantity::new(count, Unit::Count));
    }

    None
}

/// Whether two quantity strings describe the same amount.
///
/// Either side unparseable means compatible.
pub fn quantity_equivalent(a: &str, b: &str) -> bool {
    match (parse_quantity(a), parse_quantity(b)) {
        (Some(qa), Some(qb)) => qa.is_equivalent(&qb),
        _ => true,
    }
}
