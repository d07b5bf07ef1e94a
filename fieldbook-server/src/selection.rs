//! Selection tracker: per-card, last-write-wins viewer selections
//!
//! Selections are keyed by logical row/point identity, not by table page,
//! so they survive pagination. Reads never block and no history is kept.

use chrono::Utc;
use fieldbook_common::model::{Selection, SelectionState};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct SelectionTracker {
    map: RwLock<HashMap<Uuid, Selection>>,
}

impl SelectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the live selection for a card
    pub fn set(&self, card_id: Uuid, state: SelectionState) {
        let selection = Selection {
            card_id,
            state,
            updated_at: Utc::now(),
        };
        self.map
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(card_id, selection);
    }

    /// Most recent selection for a card, if any
    pub fn get(&self, card_id: Uuid) -> Option<Selection> {
        self.map
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&card_id)
            .cloned()
    }

    /// Non-empty selections for the given cards, in the given order
    pub fn for_cards(&self, card_ids: &[Uuid]) -> Vec<Selection> {
        let map = self.map.read().unwrap_or_else(|e| e.into_inner());
        card_ids
            .iter()
            .filter_map(|id| map.get(id))
            .filter(|s| !s.state.is_empty())
            .cloned()
            .collect()
    }

    /// Drop selections for cards that no longer exist (study delete)
    pub fn clear_cards(&self, card_ids: &[Uuid]) {
        let mut map = self.map.write().unwrap_or_else(|e| e.into_inner());
        for id in card_ids {
            map.remove(id);
        }
    }
}
