//! Core data model for the Fieldbook journal
//!
//! A journal is organized as Studies, each holding an ordered list of Cards.
//! Large card payloads (tables, images) live in the artifact store and are
//! referenced by id; the card itself only carries schema and preview rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use uuid::Uuid;

/// Card kind, fixed at creation.
///
/// Decision cards keep their kind after freezing; the frozen state is
/// expressed through `response_requested` / `response` on the card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardKind {
    Table,
    Chart,
    Image,
    Markdown,
    KeyValue,
    Decision,
    Section,
    AgentTask,
}

/// Column data type for tabular artifacts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Int,
    Float,
    Bool,
    Text,
    Json,
}

/// A single column in a tabular schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub dtype: ColumnType,
}

/// Ordered column schema for a tabular artifact
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnSpec>,
}

impl TableSchema {
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

/// Storage format of an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactFormat {
    Tabular,
    Json,
    Image,
}

/// Metadata describing a stored artifact
///
/// Artifacts are immutable once written; replacing a card's data writes a
/// new artifact under a fresh id and repoints the card's payload reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub id: Uuid,
    pub format: ArtifactFormat,
    pub byte_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<TableSchema>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
}

/// Reference to a tabular artifact plus enough data to render a preview
/// without fetching the artifact itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableRef {
    pub artifact_id: Uuid,
    pub schema: TableSchema,
    pub row_count: u64,
    /// First rows (post-redaction) as JSON objects, for inline preview
    pub preview: Vec<serde_json::Value>,
    /// Column names masked or hashed by the redaction filter
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub redacted_columns: Vec<String>,
    /// True when the redaction row cap dropped trailing rows
    #[serde(default)]
    pub truncated: bool,
}

/// One key/value entry in a keyvalue card
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyValueEntry {
    pub key: String,
    pub value: serde_json::Value,
}

/// A named action offered on a decision card
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSpec {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl ActionSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: None,
        }
    }
}

/// Kind-specific card payload
///
/// Tabular and image payloads hold an artifact reference, never inline data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "payload", rename_all = "snake_case")]
pub enum Payload {
    Table(TableRef),
    Chart {
        spec: serde_json::Value,
    },
    Image {
        artifact_id: Uuid,
        media_type: String,
    },
    Markdown {
        text: String,
    },
    KeyValue {
        entries: Vec<KeyValueEntry>,
    },
    Decision {
        prompt: String,
        actions: Vec<ActionSpec>,
        /// Content the decision is about (e.g. a table under review)
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<Box<Payload>>,
    },
    Section,
    AgentTask {
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
}

impl Payload {
    /// The card kind implied by this payload variant
    pub fn kind(&self) -> CardKind {
        match self {
            Payload::Table(_) => CardKind::Table,
            Payload::Chart { .. } => CardKind::Chart,
            Payload::Image { .. } => CardKind::Image,
            Payload::Markdown { .. } => CardKind::Markdown,
            Payload::KeyValue { .. } => CardKind::KeyValue,
            Payload::Decision { .. } => CardKind::Decision,
            Payload::Section => CardKind::Section,
            Payload::AgentTask { .. } => CardKind::AgentTask,
        }
    }

    /// Artifact referenced by this payload, if any (looks through decision
    /// wrappers so replace-pushes repoint the inner reference correctly)
    pub fn artifact_id(&self) -> Option<Uuid> {
        match self {
            Payload::Table(table) => Some(table.artifact_id),
            Payload::Image { artifact_id, .. } => Some(*artifact_id),
            Payload::Decision { content, .. } => {
                content.as_deref().and_then(Payload::artifact_id)
            }
            _ => None,
        }
    }
}

/// Provenance of a card's content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provenance {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset: Option<String>,
    pub captured_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

/// A reviewer annotation on a card
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    pub id: Uuid,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// The reviewer's current row or point picks on a card
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "items", rename_all = "snake_case")]
pub enum SelectionState {
    /// Logical row indices into the card's tabular artifact
    Rows(Vec<u64>),
    /// Clicked points on a chart
    Points(Vec<serde_json::Value>),
}

impl SelectionState {
    pub fn is_empty(&self) -> bool {
        match self {
            SelectionState::Rows(rows) => rows.is_empty(),
            SelectionState::Points(points) => points.is_empty(),
        }
    }
}

/// Per-card selection record, last write wins
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Selection {
    pub card_id: Uuid,
    pub state: SelectionState,
    pub updated_at: DateTime<Utc>,
}

/// The committed answer to a decision card, written exactly once
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<serde_json::Value>,
    /// Snapshot of the reviewer's selection at response time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected: Option<SelectionState>,
    pub responded_at: DateTime<Utc>,
}

impl ResponseRecord {
    /// Action recorded when a decision times out with no reviewer response
    pub const SKIP_ACTION: &'static str = "skip";

    /// Build the synthesized skip response for a timed-out decision
    pub fn skip() -> Self {
        Self {
            action: Self::SKIP_ACTION.to_string(),
            message: None,
            values: None,
            selected: None,
            responded_at: Utc::now(),
        }
    }
}

/// One journal entry
///
/// `id` and `created_at` are immutable; `response` is write-once with the
/// first committed response winning. Tabular/image payloads reference an
/// artifact that outlives the card's in-memory representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Card {
    pub id: Uuid,
    pub study: String,
    /// Per-study monotone sequence number, assigned on append
    pub seq: u64,
    pub kind: CardKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub payload: Payload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
    #[serde(default)]
    pub dismissed: bool,
    /// True while a decision card awaits a reply
    #[serde(default)]
    pub response_requested: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Card {
    /// True once a decision has been committed (frozen)
    pub fn is_frozen(&self) -> bool {
        self.response.is_some()
    }
}

/// Compact card descriptor for listing endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardDescriptor {
    pub id: Uuid,
    pub seq: u64,
    pub kind: CardKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub dismissed: bool,
    pub response_requested: bool,
    pub responded: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Card> for CardDescriptor {
    fn from(card: &Card) -> Self {
        Self {
            id: card.id,
            seq: card.seq,
            kind: card.kind,
            title: card.title.clone(),
            dismissed: card.dismissed,
            response_requested: card.response_requested,
            responded: card.response.is_some(),
            created_at: card.created_at,
            updated_at: card.updated_at,
        }
    }
}

/// Study listing entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyInfo {
    pub label: String,
    pub created_at: DateTime<Utc>,
    pub card_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
}

/// One committed decision, reported in a study summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionOutcome {
    pub card_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub action: String,
    pub responded_at: DateTime<Utc>,
}

/// Re-orientation summary of a study after a long gap
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudySummary {
    pub label: String,
    pub card_count: usize,
    pub titles: Vec<String>,
    pub decisions_made: Vec<DecisionOutcome>,
    pub current_selections: Vec<Selection>,
}

/// SHA-256 content hash of a JSON value, as lowercase hex
pub fn content_hash(value: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_kind_mapping() {
        assert_eq!(Payload::Section.kind(), CardKind::Section);
        assert_eq!(
            Payload::Markdown {
                text: "hello".into()
            }
            .kind(),
            CardKind::Markdown
        );
        let decision = Payload::Decision {
            prompt: "Proceed?".into(),
            actions: vec![ActionSpec::new("continue")],
            content: None,
        };
        assert_eq!(decision.kind(), CardKind::Decision);
    }

    #[test]
    fn test_artifact_id_through_decision_wrapper() {
        let artifact_id = Uuid::new_v4();
        let inner = Payload::Image {
            artifact_id,
            media_type: "image/png".into(),
        };
        let decision = Payload::Decision {
            prompt: "Keep this figure?".into(),
            actions: vec![],
            content: Some(Box::new(inner)),
        };
        assert_eq!(decision.artifact_id(), Some(artifact_id));
        assert_eq!(Payload::Section.artifact_id(), None);
    }

    #[test]
    fn test_content_hash_stable() {
        let value = serde_json::json!({"a": 1, "b": [true, null]});
        let first = content_hash(&value);
        let second = content_hash(&value);
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);

        let other = serde_json::json!({"a": 2});
        assert_ne!(first, content_hash(&other));
    }

    #[test]
    fn test_skip_response() {
        let skip = ResponseRecord::skip();
        assert_eq!(skip.action, ResponseRecord::SKIP_ACTION);
        assert!(skip.message.is_none());
        assert!(skip.selected.is_none());
    }
}
