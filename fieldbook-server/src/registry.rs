//! Card registry: the ordered, journaled card index of one study
//!
//! The index is a JSON Lines journal (`cards.jsonl`). Appends and updates
//! each write one line and sync before returning, so a card reported as
//! created survives a crash. Loading folds the journal from offset 0, which
//! reproduces the exact append sequence; updates replace a card in place and
//! never reorder it. `persist` writes a compacted snapshot atomically.
//!
//! Callers serialize access per study (the registry sits behind the study's
//! write lock); the registry itself is single-threaded.

use chrono::Utc;
use fieldbook_common::model::{
    Annotation, Card, CardKind, Payload, Provenance, ResponseRecord,
};
use fieldbook_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

/// Three-state field patch: leave as-is, set, or clear
#[derive(Debug, Clone, Default)]
pub enum Patch<T> {
    #[default]
    Keep,
    Set(T),
    Clear,
}

impl<T> Patch<T> {
    fn apply(self, slot: &mut Option<T>) {
        match self {
            Patch::Keep => {}
            Patch::Set(value) => *slot = Some(value),
            Patch::Clear => *slot = None,
        }
    }
}

/// Field-wise merge applied by `update`; unspecified fields keep their
/// prior values, so annotations, dismissed-state, and response state are
/// independently settable without clobbering each other.
#[derive(Debug, Default)]
pub struct CardPatch {
    pub title: Option<Option<String>>,
    pub description: Option<Option<String>>,
    pub kind: Option<CardKind>,
    pub payload: Option<Payload>,
    pub provenance: Option<Provenance>,
    pub annotations: Option<Vec<Annotation>>,
    pub dismissed: Option<bool>,
    pub response_requested: Option<bool>,
    pub response: Patch<ResponseRecord>,
}

/// One journal line
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
enum JournalEntry {
    Append {
        card: Card,
        #[serde(skip_serializing_if = "Option::is_none")]
        position: Option<usize>,
    },
    Update {
        card: Card,
    },
}

#[derive(Debug)]
pub struct CardRegistry {
    path: PathBuf,
    cards: Vec<Card>,
    by_id: HashMap<Uuid, usize>,
    next_seq: u64,
}

impl CardRegistry {
    /// Load the registry from a journal file, creating it when absent
    ///
    /// A torn trailing line (crash mid-write) is dropped with a warning
    /// rather than failing the load.
    pub fn load(path: &Path) -> Result<CardRegistry> {
        let mut registry = CardRegistry {
            path: path.to_path_buf(),
            cards: Vec::new(),
            by_id: HashMap::new(),
            next_seq: 0,
        };
        if !path.exists() {
            return Ok(registry);
        }

        let reader = BufReader::new(std::fs::File::open(path)?);
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: JournalEntry = match serde_json::from_str(&line) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(
                        "Dropping unreadable journal line {} in {}: {}",
                        lineno + 1,
                        path.display(),
                        e
                    );
                    break;
                }
            };
            match entry {
                JournalEntry::Append { card, position } => {
                    registry.insert(card, position);
                }
                JournalEntry::Update { card } => {
                    if let Some(&i) = registry.by_id.get(&card.id) {
                        registry.cards[i] = card;
                    } else {
                        warn!(
                            "Journal update for unknown card {} in {}",
                            card.id,
                            path.display()
                        );
                    }
                }
            }
        }
        Ok(registry)
    }

    /// Move the journal path after a study directory rename
    pub fn set_path(&mut self, path: PathBuf) {
        self.path = path;
    }

    /// Rewrite every card's study label (study rename)
    pub fn relabel(&mut self, label: &str) {
        for card in &mut self.cards {
            card.study = label.to_string();
        }
    }

    fn insert(&mut self, card: Card, position: Option<usize>) {
        self.next_seq = self.next_seq.max(card.seq + 1);
        let index = position
            .map(|p| p.min(self.cards.len()))
            .unwrap_or(self.cards.len());
        self.cards.insert(index, card);
        self.reindex();
    }

    fn reindex(&mut self) {
        self.by_id = self
            .cards
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id, i))
            .collect();
    }

    fn write_entry(&self, entry: &JournalEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.sync_data()?;
        Ok(())
    }

    /// Append a card, assigning its sequence number, and persist the journal
    /// entry before returning the stored card
    pub fn append(&mut self, mut card: Card, position: Option<usize>) -> Result<Card> {
        card.seq = self.next_seq;
        self.write_entry(&JournalEntry::Append {
            card: card.clone(),
            position,
        })?;
        self.insert(card.clone(), position);
        Ok(card)
    }

    /// Merge a patch into a card and persist the updated state
    ///
    /// Returns the merged card for broadcasting. Never changes the card's
    /// position in the display order.
    pub fn update(&mut self, id: Uuid, patch: CardPatch) -> Result<Card> {
        let index = *self
            .by_id
            .get(&id)
            .ok_or_else(|| Error::NotFound(format!("card {}", id)))?;
        let card = &mut self.cards[index];

        if let Some(title) = patch.title {
            card.title = title;
        }
        if let Some(description) = patch.description {
            card.description = description;
        }
        if let Some(kind) = patch.kind {
            card.kind = kind;
        }
        if let Some(payload) = patch.payload {
            card.payload = payload;
        }
        if let Some(provenance) = patch.provenance {
            card.provenance = Some(provenance);
        }
        if let Some(annotations) = patch.annotations {
            card.annotations = annotations;
        }
        if let Some(dismissed) = patch.dismissed {
            card.dismissed = dismissed;
        }
        if let Some(requested) = patch.response_requested {
            card.response_requested = requested;
        }
        patch.response.apply(&mut card.response);
        card.updated_at = Utc::now();

        let merged = card.clone();
        self.write_entry(&JournalEntry::Update {
            card: merged.clone(),
        })?;
        Ok(merged)
    }

    pub fn get(&self, id: Uuid) -> Result<&Card> {
        self.by_id
            .get(&id)
            .map(|&i| &self.cards[i])
            .ok_or_else(|| Error::NotFound(format!("card {}", id)))
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.by_id.contains_key(&id)
    }

    /// Cards in display order
    pub fn list(&self) -> &[Card] {
        &self.cards
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn card_ids(&self) -> Vec<Uuid> {
        self.cards.iter().map(|c| c.id).collect()
    }

    /// Idempotent compacted snapshot: rewrites the journal as one append per
    /// card in display order, atomically (temp file + rename)
    pub fn persist(&self) -> Result<()> {
        let tmp = self.path.with_file_name(".tmp-cards.jsonl");
        {
            let mut file = std::fs::File::create(&tmp)?;
            for card in &self.cards {
                let mut line = serde_json::to_string(&JournalEntry::Append {
                    card: card.clone(),
                    position: None,
                })?;
                line.push('\n');
                file.write_all(line.as_bytes())?;
            }
            file.sync_data()?;
        }
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
