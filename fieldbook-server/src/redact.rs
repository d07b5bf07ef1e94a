//! Redaction filter for tabular payloads
//!
//! Applied to every table before it reaches the artifact store or the wire.
//! Column names are matched against an identifier-pattern list; matching
//! columns are masked or hashed, and the row count is capped regardless of
//! any match.
//!
//! This is a heuristic safety net over column names, not a certified
//! de-identification control: a free-text column with no identifying name
//! passes through untouched. When a name is ambiguous the filter matches it
//! and redacts (fails closed).

use crate::store::TableData;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

/// Recognized redaction options
#[derive(Debug, Clone)]
pub struct RedactionConfig {
    pub enabled: bool,
    /// Hard cap on stored rows, applied even when no column matches
    pub max_rows: usize,
    /// Hash matching columns instead of masking them
    pub hash_identifiers: bool,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_rows: 10_000,
            hash_identifiers: false,
        }
    }
}

/// What the filter did to a table
#[derive(Debug, Clone, Default)]
pub struct RedactionOutcome {
    pub redacted_columns: Vec<String>,
    pub truncated: bool,
}

/// Name fragments that mark a column as identifier-like
const IDENTIFIER_PATTERNS: &[&str] = &[
    "name",
    "address",
    "addr",
    "email",
    "phone",
    "ssn",
    "mrn",
    "dob",
    "birth",
    "postal",
    "zip",
    "patient",
    "subject",
    "identifier",
    "passport",
    "license",
];

const MASK: &str = "\u{2022}\u{2022}\u{2022}";

/// True when a column name matches the identifier-pattern list
pub fn is_identifier_column(name: &str) -> bool {
    let lowered = name.to_ascii_lowercase();
    IDENTIFIER_PATTERNS
        .iter()
        .any(|pattern| lowered.contains(pattern))
}

/// Apply the filter in place, returning what was changed
pub fn apply(table: &mut TableData, config: &RedactionConfig) -> RedactionOutcome {
    let mut outcome = RedactionOutcome::default();

    // The row cap holds whether or not redaction is enabled
    outcome.truncated = table.truncate_rows(config.max_rows);

    if !config.enabled {
        return outcome;
    }

    for (i, spec) in table.schema.columns.iter().enumerate() {
        if !is_identifier_column(&spec.name) {
            continue;
        }
        outcome.redacted_columns.push(spec.name.clone());
        for value in &mut table.columns[i] {
            if value.is_null() {
                continue;
            }
            *value = if config.hash_identifiers {
                Value::String(hash_value(value))
            } else {
                Value::String(MASK.to_string())
            };
        }
    }

    if !outcome.redacted_columns.is_empty() {
        debug!(
            "Redacted identifier-like columns: {}",
            outcome.redacted_columns.join(", ")
        );
    }
    outcome
}

/// Stable short hash of a value, keeping joinability without the raw value
fn hash_value(value: &Value) -> String {
    let raw = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    let digest = hasher.finalize();
    format!("h:{:x}", digest)[..14].to_string()
}
