//! fn_tag selection patterns
//!
//! The perf-counter tooling selects operations with SQL `LIKE` semantics:
//! `%` matches any run of characters, `_` matches exactly one, and ASCII
//! letters compare case-insensitively. SQLite evaluates the pattern natively;
//! the in-memory store uses the compiled regex.

use crate::error::StoreError;
use regex::Regex;

#[derive(Debug, Clone)]
pub struct FnTagPattern {
    raw: String,
    regex: Regex,
}

impl FnTagPattern {
    /// Compile a `LIKE` pattern
    ///
    /// # Errors
    /// Returns `StoreError::InvalidPattern` for an empty pattern.
    pub fn new(pattern: &str) -> Result<Self, StoreError> {
        if pattern.is_empty() {
            return Err(StoreError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: "empty pattern".to_string(),
            });
        }

        // Case folding is ASCII only, both sides are lowered before matching
        let mut expr = String::from("(?s)^");
        let mut literal = String::new();
        for c in pattern.chars() {
            match c {
                '%' | '_' => {
                    expr.push_str(&regex::escape(&literal));
                    literal.clear();
                    expr.push_str(if c == '%' { ".*" } else { "." });
                }
                other => literal.push(other.to_ascii_lowercase()),
            }
        }
        expr.push_str(&regex::escape(&literal));
        expr.push('$');

        let regex = Regex::new(&expr).map_err(|e| StoreError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            raw: pattern.to_string(),
            regex,
        })
    }

    /// The pattern as given, suitable for a SQL `LIKE` parameter
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// True if the pattern has no wildcards
    pub fn is_exact(&self) -> bool {
        !self.raw.contains(['%', '_'])
    }

    pub fn matches(&self, fn_tag: &str) -> bool {
        self.regex.is_match(&fn_tag.to_ascii_lowercase())
    }
}
