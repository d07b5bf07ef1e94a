//! Event types for the Fieldbook event system
//!
//! Two directions flow through the event channel:
//! - `JournalEvent`: outbound, broadcast to every connected viewer in the
//!   registry's assigned sequence order
//! - `DisplayEvent`: inbound, a single viewer interaction scoped to one card
//!
//! `EventBus` wraps a tokio broadcast channel for fan-out to SSE sessions.

use crate::model::{Card, SelectionState};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Outbound events broadcast to connected viewers
///
/// Card events carry the full card so reconnecting clients can treat replay
/// and live delivery identically, deduplicating by card id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JournalEvent {
    CardAdded { card: Card },
    CardUpdated { card: Card },
    StudyRenamed { old_label: String, new_label: String },
    StudyDeleted { label: String },
}

impl JournalEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_name(&self) -> &'static str {
        match self {
            JournalEvent::CardAdded { .. } => "CardAdded",
            JournalEvent::CardUpdated { .. } => "CardUpdated",
            JournalEvent::StudyRenamed { .. } => "StudyRenamed",
            JournalEvent::StudyDeleted { .. } => "StudyDeleted",
        }
    }

    /// Study label this event belongs to, for per-study SSE filtering
    pub fn study(&self) -> Option<&str> {
        match self {
            JournalEvent::CardAdded { card } | JournalEvent::CardUpdated { card } => {
                Some(&card.study)
            }
            JournalEvent::StudyRenamed { old_label, .. } => Some(old_label),
            JournalEvent::StudyDeleted { label } => Some(label),
        }
    }
}

/// Annotation operation carried by an inbound annotation event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum AnnotationOp {
    Add { text: String },
    Edit { id: Uuid, text: String },
    Delete { id: Uuid },
}

/// Inbound viewer interaction, always scoped to one card
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DisplayEvent {
    Selection {
        card_id: Uuid,
        state: SelectionState,
    },
    Annotation {
        card_id: Uuid,
        #[serde(flatten)]
        op: AnnotationOp,
    },
    Dismiss {
        card_id: Uuid,
        dismissed: bool,
    },
    DecisionResponse {
        card_id: Uuid,
        action: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        values: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        selected: Option<SelectionState>,
    },
    PointClick {
        card_id: Uuid,
        point: serde_json::Value,
    },
}

impl DisplayEvent {
    /// The card this event targets
    pub fn card_id(&self) -> Uuid {
        match self {
            DisplayEvent::Selection { card_id, .. }
            | DisplayEvent::Annotation { card_id, .. }
            | DisplayEvent::Dismiss { card_id, .. }
            | DisplayEvent::DecisionResponse { card_id, .. }
            | DisplayEvent::PointClick { card_id, .. } => *card_id,
        }
    }
}

/// Broadcast bus fanning journal events out to all SSE sessions
///
/// Sending never blocks and ignores the no-receiver case: the server keeps
/// accepting pushes whether or not any browser is connected.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<JournalEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Broadcast an event to all subscribers
    pub fn emit(&self, event: JournalEvent) {
        // No receivers is fine; pushes persist regardless of viewers
        let _ = self.tx.send(event);
    }

    /// Subscribe for SSE fan-out
    pub fn subscribe(&self) -> broadcast::Receiver<JournalEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
