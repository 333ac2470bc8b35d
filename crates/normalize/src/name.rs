//! Display-name normalization.
//!
//! Reduces a listing's display name to a canonical token string so the same
//! product rendered by different platforms compares equal:
//!
//! 1. lower-case
//! 2. strip bracketed content (`()`, `[]`, `{}`), where packaging annotations live
//! 3. replace every non-alphanumeric character with a space
//! 4. drop packaging nouns and filler words
//! 5. drop unit tokens (quantity is compared separately)
//! 6. collapse whitespace and trim
//!
//! The result is deterministic and idempotent. A name made only of noise
//! normalizes to `""`, which never matches anything.

use std::sync::LazyLock;

use regex::Regex;

/// Packaging nouns and filler words.
const STOP_WORDS: &[&str] = &[
    "pack", "pouch", "tetra", "bottle", "tub", "carton", "box", "tin", "can", "jar", "packet",
    "sachet", "of", "and", "with", "pcs", "pc", "piece", "pieces",
];

/// Standalone unit tokens.
const UNIT_TOKENS: &[&str] = &[
    "kg", "kgs", "g", "gm", "gms", "gram", "grams", "ml", "l", "ltr", "litre", "litres", "liter",
    "liters",
];

static BRACKETED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\([^)]*\)|\[[^\]]*\]|\{[^}]*\}").expect("static bracket pattern is valid")
});

/// Normalize a display name to its canonical token string.
pub fn normalize_name(name: &str) -> String {
    name_tokens(name).join(" ")
}

/// The tokens of the normalized name, in order.
pub fn name_tokens(name: &str) -> Vec<String> {
    let lowered = name.to_lowercase();
    let unbracketed = BRACKETED.replace_all(&lowered, " ");

    let spaced: String = unbracketed
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    spaced
        .split_whitespace()
        .filter(|token| !is_noise(token))
        .map(str::to_string)
        .collect()
}

fn is_noise(token: &str) -> bool {
    STOP_WORDS.contains(&token) || UNIT_TOKENS.contains(&token)
}
