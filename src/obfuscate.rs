//! Query text obfuscation.
//!
//! Strips literal values out of query text before it reaches logs or metrics,
//! replacing quoted strings and standalone numbers with fixed placeholders.
//! This is lexical pattern matching, not a SQL parser: it is a best-effort
//! scrub against accidental leakage, not a security boundary.

use std::sync::LazyLock;

use regex::Regex;

/// Placeholder substituted for string literals.
const STRING_PLACEHOLDER: &str = "'?'";

/// Placeholder substituted for numeric literals.
const NUMBER_PLACEHOLDER: &str = "?";

// Single- or double-quoted literals, with backslash escapes.
static STRING_LITERAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"'(?:[^'\\]|\\.)*'|"(?:[^"\\]|\\.)*""#).expect("valid regex")
});

// Standalone integers, decimals, and exponent forms. Word boundaries keep
// digits inside identifiers (users2, v3_articles) untouched.
static NUMERIC_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d+(?:\.\d+)?(?:[eE][+-]?\d+)?\b").expect("valid regex"));

/// Replace every quoted string literal and standalone numeric literal in
/// `raw` with a fixed placeholder.
///
/// Idempotent: obfuscating an already-obfuscated string returns it unchanged.
/// Malformed input (for example an unterminated quote) produces a best-effort
/// partial result instead of an error.
#[must_use]
pub fn obfuscate_query(raw: &str) -> String {
    let scrubbed = STRING_LITERAL.replace_all(raw, STRING_PLACEHOLDER);
    NUMERIC_LITERAL
        .replace_all(&scrubbed, NUMBER_PLACEHOLDER)
        .into_owned()
}
