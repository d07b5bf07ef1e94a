//! Server context: explicit shared state with a create/serve/shutdown
//! lifecycle
//!
//! There is no ambient global server. Producing code holds (or reaches over
//! loopback) one `ServerContext`, and every push flows through `push()` on
//! it, whichever transport delivered the request:
//!
//! 1. the pushed value is shape-adapted to a typed payload
//! 2. tabular content passes the redaction filter
//! 3. large payloads are written to the study's artifact store
//! 4. the card is appended to (or replaced in) the study's registry
//! 5. the card event is broadcast to connected viewers
//! 6. a `wait=true` push parks until its decision card freezes
//!
//! Artifact writes happen before the registry lock is taken: a failed write
//! aborts the push and the card is never registered.

use crate::adapt::{self, AdaptedValue};
use crate::config::Config;
use crate::decision::DecisionController;
use crate::redact;
use crate::registry::{CardPatch, Patch};
use crate::selection::SelectionTracker;
use crate::store::ArtifactStore;
use crate::study::{StudyHandle, StudyManager};
use chrono::Utc;
use fieldbook_common::api::{PushRequest, PushResponse};
use fieldbook_common::events::{AnnotationOp, DisplayEvent, EventBus, JournalEvent};
use fieldbook_common::model::{
    ActionSpec, Annotation, ArtifactFormat, Card, DecisionOutcome, Payload, Provenance,
    ResponseRecord, Selection, SelectionState, StudySummary, TableRef, content_hash,
};
use fieldbook_common::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use uuid::Uuid;

const DEFAULT_STUDY: &str = "default";

/// Result of attempting to freeze a decision card
#[derive(Debug)]
pub enum FreezeOutcome {
    /// This response was committed as the card's one response
    Committed(ResponseRecord),
    /// The card was already frozen; the existing response is returned
    AlreadyFrozen(ResponseRecord),
}

pub struct ServerContext {
    pub config: Config,
    pub studies: StudyManager,
    pub events: EventBus,
    pub decisions: DecisionController,
    pub selections: SelectionTracker,
    pub api_token: String,
    shutdown: Notify,
}

impl ServerContext {
    pub fn new(config: Config) -> Result<ServerContext> {
        std::fs::create_dir_all(&config.data_dir)?;
        let studies = StudyManager::open(&config.studies_dir())?;
        let api_token = crate::api::auth::load_or_create_token(&config.token_path())?;
        Ok(ServerContext {
            config,
            studies,
            events: EventBus::default(),
            decisions: DecisionController::new(),
            selections: SelectionTracker::new(),
            api_token,
            shutdown: Notify::new(),
        })
    }

    /// Ask the serve loop to stop (shutdown endpoint)
    pub fn request_shutdown(&self) {
        info!("Shutdown requested");
        self.shutdown.notify_one();
    }

    pub async fn shutdown_requested(&self) {
        self.shutdown.notified().await;
    }

    // ------------------------------------------------------------------
    // Push
    // ------------------------------------------------------------------

    /// Push one displayable value; the single orchestration path for both
    /// the in-process and loopback transports
    pub async fn push(&self, req: PushRequest) -> Result<PushResponse> {
        let label = req
            .study
            .clone()
            .unwrap_or_else(|| DEFAULT_STUDY.to_string());
        let study = self.studies.create_or_get(&label).await?;

        let adapted = adapt::adapt(&req.value)?;
        let title = req
            .title
            .clone()
            .or_else(|| adapt::section_heading(&req.value));
        let provenance = Provenance {
            source: req.source.clone(),
            dataset: req.dataset.clone(),
            captured_at: Utc::now(),
            content_hash: Some(content_hash(&req.value)),
        };

        // Artifact writes happen here; failure aborts before registration
        let base_payload = self.materialize(&study.store(), adapted)?;

        let wait = req.wait;
        let is_decision = wait || req.prompt.is_some() || !req.actions.is_empty();
        let payload = if is_decision {
            let actions = if req.actions.is_empty() {
                vec![ActionSpec::new("continue"), ActionSpec::new("skip")]
            } else {
                req.actions.clone()
            };
            Payload::Decision {
                prompt: req
                    .prompt
                    .clone()
                    .unwrap_or_else(|| "Review and confirm".to_string()),
                actions,
                content: if req.value.is_null() {
                    None
                } else {
                    Some(Box::new(base_payload))
                },
            }
        } else {
            base_payload
        };
        let kind = payload.kind();

        let card_id = req.replace.unwrap_or_else(Uuid::new_v4);
        // Register the waiter before the card becomes visible so an instant
        // reviewer response cannot slip past the park
        let rx = wait.then(|| self.decisions.register(card_id));

        let registered = {
            let mut registry = study.registry.lock().await;
            let outcome = if let Some(replace_id) = req.replace {
                let patch = CardPatch {
                    title: req.title.clone().map(Some),
                    description: req.description.clone().map(Some),
                    kind: Some(kind),
                    payload: Some(payload),
                    provenance: Some(provenance),
                    response_requested: Some(wait),
                    // Re-arming a decision clears its frozen state
                    response: if wait { Patch::Clear } else { Patch::Keep },
                    ..CardPatch::default()
                };
                registry
                    .update(replace_id, patch)
                    .map(|card| JournalEvent::CardUpdated { card })
            } else {
                let now = Utc::now();
                let card = Card {
                    id: card_id,
                    study: label.clone(),
                    seq: 0,
                    kind,
                    title,
                    description: req.description.clone(),
                    payload,
                    provenance: Some(provenance),
                    annotations: Vec::new(),
                    dismissed: false,
                    response_requested: wait,
                    response: None,
                    created_at: now,
                    updated_at: now,
                };
                registry.append(card, req.position).map(|card| {
                    self.studies.note_card(card.id, &label);
                    JournalEvent::CardAdded { card }
                })
            };
            // Emit under the study lock so every client observes appends and
            // updates in the registry's assigned sequence order
            outcome.map(|event| self.events.emit(event))
        };
        if let Err(e) = registered {
            self.decisions.forget(card_id);
            return Err(e);
        }

        let Some(rx) = rx else {
            return Ok(PushResponse {
                card_id,
                response: None,
            });
        };

        // Clamp so a bad timeout cannot overflow Duration
        let requested = req
            .timeout_secs
            .unwrap_or(self.config.default_timeout_secs);
        let timeout_secs = if requested.is_finite() {
            requested.clamp(0.0, 86_400.0 * 365.0)
        } else {
            self.config.default_timeout_secs
        };
        match tokio::time::timeout(Duration::from_secs_f64(timeout_secs), rx).await {
            Ok(Ok(response)) => Ok(PushResponse {
                card_id,
                response: Some(response),
            }),
            Ok(Err(_)) => {
                // Waiter replaced by a re-arm of the same card; this caller
                // returns once, with a skip, and leaves the new wait alone
                warn!("Decision wait for card {} superseded by re-arm", card_id);
                Ok(PushResponse {
                    card_id,
                    response: Some(ResponseRecord::skip()),
                })
            }
            Err(_) => {
                // Normal timeout: freeze with a synthesized skip through the
                // same commit path a reviewer response takes
                self.decisions.forget(card_id);
                let response = match self.freeze(card_id, ResponseRecord::skip()).await? {
                    FreezeOutcome::Committed(r) => r,
                    // A reviewer response landed in the same instant; the
                    // first committed response wins
                    FreezeOutcome::AlreadyFrozen(r) => r,
                };
                Ok(PushResponse {
                    card_id,
                    response: Some(response),
                })
            }
        }
    }

    /// Turn an adapted value into a card payload, writing artifacts
    fn materialize(&self, store: &ArtifactStore, adapted: AdaptedValue) -> Result<Payload> {
        match adapted {
            AdaptedValue::Table(mut table) => {
                let outcome = redact::apply(&mut table, &self.config.redaction);
                let meta = store.write_table(&table)?;
                let preview_rows = self.config.preview_rows.min(table.row_count());
                let preview = (0..preview_rows).map(|i| table.row_object(i)).collect();
                Ok(Payload::Table(TableRef {
                    artifact_id: meta.id,
                    schema: table.schema.clone(),
                    row_count: meta.row_count.unwrap_or(0),
                    preview,
                    redacted_columns: outcome.redacted_columns,
                    truncated: outcome.truncated,
                }))
            }
            AdaptedValue::Image { bytes, media_type } => {
                let meta =
                    store.write_blob(&bytes, ArtifactFormat::Image, Some(media_type.clone()))?;
                Ok(Payload::Image {
                    artifact_id: meta.id,
                    media_type,
                })
            }
            AdaptedValue::Chart(spec) => Ok(Payload::Chart { spec }),
            AdaptedValue::KeyValue(entries) => Ok(Payload::KeyValue { entries }),
            AdaptedValue::Section => Ok(Payload::Section),
            AdaptedValue::AgentTask { status, detail } => {
                Ok(Payload::AgentTask { status, detail })
            }
            AdaptedValue::Markdown(text) | AdaptedValue::Text(text) => {
                Ok(Payload::Markdown { text })
            }
        }
    }

    // ------------------------------------------------------------------
    // Decision freeze
    // ------------------------------------------------------------------

    /// Commit a response onto a decision card, first-committed-wins
    ///
    /// The check and the write happen under the study's registry lock, which
    /// is what guarantees at-most-one committed response even when a reviewer
    /// click races a timeout or a second browser tab.
    pub async fn freeze(
        &self,
        card_id: Uuid,
        response: ResponseRecord,
    ) -> Result<FreezeOutcome> {
        let study = self.study_of_card(card_id).await?;
        let mut registry = study.registry.lock().await;
        if let Some(existing) = &registry.get(card_id)?.response {
            return Ok(FreezeOutcome::AlreadyFrozen(existing.clone()));
        }
        let merged = registry.update(
            card_id,
            CardPatch {
                response: Patch::Set(response.clone()),
                response_requested: Some(false),
                ..CardPatch::default()
            },
        )?;
        // Emit under the lock to preserve broadcast sequence order
        self.events.emit(JournalEvent::CardUpdated { card: merged });
        drop(registry);
        Ok(FreezeOutcome::Committed(response))
    }

    // ------------------------------------------------------------------
    // Inbound events
    // ------------------------------------------------------------------

    /// Validate and route one inbound viewer event
    pub async fn handle_display_event(&self, event: DisplayEvent) -> Result<()> {
        let card_id = event.card_id();
        let study = self.study_of_card(card_id).await?;

        match event {
            DisplayEvent::Selection { state, .. } => {
                self.selections.set(card_id, state);
            }
            DisplayEvent::PointClick { point, .. } => {
                self.selections
                    .set(card_id, SelectionState::Points(vec![point]));
            }
            DisplayEvent::Dismiss { dismissed, .. } => {
                let mut registry = study.registry.lock().await;
                let merged = registry.update(
                    card_id,
                    CardPatch {
                        dismissed: Some(dismissed),
                        ..CardPatch::default()
                    },
                )?;
                self.events.emit(JournalEvent::CardUpdated { card: merged });
            }
            DisplayEvent::Annotation { op, .. } => {
                let mut registry = study.registry.lock().await;
                let mut annotations = registry.get(card_id)?.annotations.clone();
                match op {
                    AnnotationOp::Add { text } => {
                        annotations.push(Annotation {
                            id: Uuid::new_v4(),
                            text,
                            created_at: Utc::now(),
                        });
                    }
                    AnnotationOp::Edit { id, text } => {
                        let note = annotations
                            .iter_mut()
                            .find(|a| a.id == id)
                            .ok_or_else(|| Error::NotFound(format!("annotation {}", id)))?;
                        note.text = text;
                    }
                    AnnotationOp::Delete { id } => {
                        let before = annotations.len();
                        annotations.retain(|a| a.id != id);
                        if annotations.len() == before {
                            return Err(Error::NotFound(format!("annotation {}", id)));
                        }
                    }
                }
                let merged = registry.update(
                    card_id,
                    CardPatch {
                        annotations: Some(annotations),
                        ..CardPatch::default()
                    },
                )?;
                self.events.emit(JournalEvent::CardUpdated { card: merged });
            }
            DisplayEvent::DecisionResponse {
                action,
                message,
                values,
                selected,
                ..
            } => {
                {
                    let registry = study.registry.lock().await;
                    let card = registry.get(card_id)?;
                    if !matches!(card.payload, Payload::Decision { .. }) {
                        return Err(Error::InvalidInput(format!(
                            "card {} is not a decision card",
                            card_id
                        )));
                    }
                }
                let record = ResponseRecord {
                    action,
                    message,
                    values,
                    // Snapshot the live selection when the event carries none
                    selected: selected
                        .or_else(|| self.selections.get(card_id).map(|s| s.state)),
                    responded_at: Utc::now(),
                };
                match self.freeze(card_id, record).await? {
                    FreezeOutcome::Committed(response) => {
                        self.decisions.signal(card_id, response);
                    }
                    FreezeOutcome::AlreadyFrozen(_) => {
                        warn!(
                            "Rejected duplicate decision response for frozen card {}",
                            card_id
                        );
                    }
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    async fn study_of_card(&self, card_id: Uuid) -> Result<Arc<StudyHandle>> {
        self.studies
            .study_of_card(card_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("card {}", card_id)))
    }

    pub async fn get_card(&self, card_id: Uuid) -> Result<Card> {
        let study = self.study_of_card(card_id).await?;
        let registry = study.registry.lock().await;
        Ok(registry.get(card_id)?.clone())
    }

    /// Ordered cards of one study
    pub async fn list_cards(&self, label: &str) -> Result<Vec<Card>> {
        let study = self
            .studies
            .get(label)
            .await
            .ok_or_else(|| Error::NotFound(format!("study '{}'", label)))?;
        let registry = study.registry.lock().await;
        Ok(registry.list().to_vec())
    }

    /// Snapshot for SSE replay: one study's cards, or all studies in
    /// creation order
    pub async fn snapshot_cards(&self, study: Option<&str>) -> Result<Vec<Card>> {
        match study {
            Some(label) => self.list_cards(label).await,
            None => {
                let mut cards = Vec::new();
                for info in self.studies.list().await {
                    cards.extend(self.list_cards(&info.label).await?);
                }
                Ok(cards)
            }
        }
    }

    /// The store that holds an artifact, searched across loaded studies
    pub async fn locate_artifact(&self, artifact_id: Uuid) -> Result<ArtifactStore> {
        for handle in self.studies.handles().await {
            let store = handle.store();
            if store.file_name(artifact_id).is_ok() {
                return Ok(store);
            }
        }
        Err(Error::NotFound(format!("artifact {}", artifact_id)))
    }

    /// Current selection for a card (non-blocking; None when nothing is
    /// selected)
    pub async fn selection(&self, card_id: Uuid) -> Result<Option<Selection>> {
        // Validate the card exists so unknown ids read as not-found
        let _ = self.study_of_card(card_id).await?;
        Ok(self.selections.get(card_id))
    }

    /// Re-orientation summary of a study
    pub async fn summarize(&self, label: &str) -> Result<StudySummary> {
        let study = self
            .studies
            .get(label)
            .await
            .ok_or_else(|| Error::NotFound(format!("study '{}'", label)))?;
        let registry = study.registry.lock().await;
        let cards = registry.list();
        let titles = cards.iter().filter_map(|c| c.title.clone()).collect();
        let decisions_made = cards
            .iter()
            .filter_map(|card| {
                card.response.as_ref().map(|response| DecisionOutcome {
                    card_id: card.id,
                    title: card.title.clone(),
                    action: response.action.clone(),
                    responded_at: response.responded_at,
                })
            })
            .collect();
        let card_ids = registry.card_ids();
        let card_count = registry.len();
        drop(registry);

        Ok(StudySummary {
            label: label.to_string(),
            card_count,
            titles,
            decisions_made,
            current_selections: self.selections.for_cards(&card_ids),
        })
    }

    // ------------------------------------------------------------------
    // Study lifecycle
    // ------------------------------------------------------------------

    pub async fn rename_study(&self, from: &str, to: &str) -> Result<()> {
        self.studies.rename(from, to).await?;
        self.events.emit(JournalEvent::StudyRenamed {
            old_label: from.to_string(),
            new_label: to.to_string(),
        });
        Ok(())
    }

    pub async fn delete_study(&self, label: &str) -> Result<()> {
        let removed = self.studies.delete(label).await?;
        self.selections.clear_cards(&removed);
        for card_id in &removed {
            self.decisions.forget(*card_id);
        }
        self.events.emit(JournalEvent::StudyDeleted {
            label: label.to_string(),
        });
        debug!("Cleared {} selections for deleted study", removed.len());
        Ok(())
    }

    pub async fn register_output_dir(
        &self,
        label: &str,
        path: std::path::PathBuf,
    ) -> Result<()> {
        self.studies.register_output_dir(label, path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_config(dir: &std::path::Path) -> Config {
        Config {
            data_dir: dir.to_path_buf(),
            port: 0,
            redaction: crate::redact::RedactionConfig::default(),
            default_timeout_secs: 5.0,
            preview_rows: 5,
        }
    }

    fn context(dir: &std::path::Path) -> Arc<ServerContext> {
        Arc::new(ServerContext::new(test_config(dir)).unwrap())
    }

    fn table_push(study: &str, title: &str) -> PushRequest {
        let mut req = PushRequest::new(json!([
            {"arm": "treatment", "n": 210},
            {"arm": "control", "n": 204},
        ]));
        req.study = Some(study.to_string());
        req.title = Some(title.to_string());
        req
    }

    #[tokio::test]
    async fn test_push_with_no_viewer_still_lists() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());

        ctx.push(table_push("s1", "Cohort")).await.unwrap();

        let cards = ctx.list_cards("s1").await.unwrap();
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].title.as_deref(), Some("Cohort"));
        assert!(matches!(cards[0].payload, Payload::Table(_)));
    }

    #[tokio::test]
    async fn test_wait_times_out_with_skip() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());

        let mut req = PushRequest::new(json!(null));
        req.study = Some("s1".into());
        req.wait = true;
        req.prompt = Some("Continue with model fit?".into());
        req.timeout_secs = Some(0.2);

        let started = std::time::Instant::now();
        let result = ctx.push(req).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));

        let response = result.response.unwrap();
        assert_eq!(response.action, "skip");

        // The card is frozen with the synthesized response
        let card = ctx.get_card(result.card_id).await.unwrap();
        assert!(card.is_frozen());
        assert!(!card.response_requested);
    }

    #[tokio::test]
    async fn test_reviewer_response_releases_waiter() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());

        let mut req = PushRequest::new(json!("Apply exclusion criteria?"));
        req.study = Some("s1".into());
        req.wait = true;
        req.timeout_secs = Some(10.0);

        let pusher = {
            let ctx = ctx.clone();
            tokio::spawn(async move { ctx.push(req).await })
        };

        // Wait for the decision card to appear
        let card_id = loop {
            let cards = ctx.list_cards("s1").await.unwrap_or_default();
            if let Some(card) = cards.first() {
                break card.id;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };

        ctx.handle_display_event(DisplayEvent::DecisionResponse {
            card_id,
            action: "approve".into(),
            message: Some("go ahead".into()),
            values: None,
            selected: None,
        })
        .await
        .unwrap();

        let result = pusher.await.unwrap().unwrap();
        let response = result.response.unwrap();
        assert_eq!(response.action, "approve");
        assert_eq!(response.message.as_deref(), Some("go ahead"));
    }

    #[tokio::test]
    async fn test_duplicate_response_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());

        let mut req = PushRequest::new(json!(null));
        req.study = Some("s1".into());
        req.wait = true;
        req.timeout_secs = Some(0.1);
        let result = ctx.push(req).await.unwrap();
        let card_id = result.card_id;

        // Late reviewer click after the timeout froze the card
        ctx.handle_display_event(DisplayEvent::DecisionResponse {
            card_id,
            action: "approve".into(),
            message: None,
            values: None,
            selected: None,
        })
        .await
        .unwrap();

        let card = ctx.get_card(card_id).await.unwrap();
        assert_eq!(card.response.unwrap().action, "skip");
    }

    #[tokio::test]
    async fn test_concurrent_responses_commit_exactly_one() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());

        let mut req = PushRequest::new(json!(null));
        req.study = Some("s1".into());
        req.wait = true;
        req.timeout_secs = Some(10.0);
        let pusher = {
            let ctx = ctx.clone();
            tokio::spawn(async move { ctx.push(req).await })
        };
        let card_id = loop {
            let cards = ctx.list_cards("s1").await.unwrap_or_default();
            if let Some(card) = cards.first() {
                break card.id;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };

        let submit = |action: &str| {
            let ctx = ctx.clone();
            let action = action.to_string();
            tokio::spawn(async move {
                ctx.handle_display_event(DisplayEvent::DecisionResponse {
                    card_id,
                    action,
                    message: None,
                    values: None,
                    selected: None,
                })
                .await
            })
        };
        let first = submit("approve");
        let second = submit("reject");
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        // Exactly one committed response, and the caller returned once
        let result = pusher.await.unwrap().unwrap();
        let committed = ctx.get_card(card_id).await.unwrap().response.unwrap();
        assert_eq!(result.response.unwrap().action, committed.action);
        assert!(committed.action == "approve" || committed.action == "reject");
    }

    #[tokio::test]
    async fn test_replace_repoints_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());

        let first = ctx.push(table_push("s1", "Cohort")).await.unwrap();
        let old_artifact = ctx
            .get_card(first.card_id)
            .await
            .unwrap()
            .payload
            .artifact_id()
            .unwrap();

        let mut replacement = PushRequest::new(json!([
            {"arm": "treatment", "n": 305},
        ]));
        replacement.study = Some("s1".into());
        replacement.replace = Some(first.card_id);
        let second = ctx.push(replacement).await.unwrap();
        assert_eq!(second.card_id, first.card_id);

        let new_artifact = ctx
            .get_card(first.card_id)
            .await
            .unwrap()
            .payload
            .artifact_id()
            .unwrap();
        assert_ne!(old_artifact, new_artifact);

        // A page against the card's reference returns the new data
        let store = ctx.locate_artifact(new_artifact).await.unwrap();
        let page = store.read_page(new_artifact, 0, 10, None, true).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0]["n"], json!(305));

        // One card, not two
        assert_eq!(ctx.list_cards("s1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rearm_clears_frozen_state() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());

        let mut req = PushRequest::new(json!(null));
        req.study = Some("s1".into());
        req.wait = true;
        req.timeout_secs = Some(0.1);
        let first = ctx.push(req).await.unwrap();
        assert!(ctx.get_card(first.card_id).await.unwrap().is_frozen());

        let mut again = PushRequest::new(json!(null));
        again.study = Some("s1".into());
        again.replace = Some(first.card_id);
        again.wait = true;
        again.timeout_secs = Some(0.1);
        let second = ctx.push(again).await.unwrap();

        assert_eq!(second.card_id, first.card_id);
        assert_eq!(second.response.unwrap().action, "skip");
        // Frozen again after the second round, by the second skip
        let card = ctx.get_card(first.card_id).await.unwrap();
        assert!(card.is_frozen());
    }

    #[tokio::test]
    async fn test_annotation_and_dismiss_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let pushed = ctx.push(table_push("s1", "Cohort")).await.unwrap();

        ctx.handle_display_event(DisplayEvent::Annotation {
            card_id: pushed.card_id,
            op: AnnotationOp::Add {
                text: "n looks low".into(),
            },
        })
        .await
        .unwrap();
        ctx.handle_display_event(DisplayEvent::Dismiss {
            card_id: pushed.card_id,
            dismissed: true,
        })
        .await
        .unwrap();

        let card = ctx.get_card(pushed.card_id).await.unwrap();
        assert_eq!(card.annotations.len(), 1);
        assert!(card.dismissed);
    }

    #[tokio::test]
    async fn test_event_for_unknown_card_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let result = ctx
            .handle_display_event(DisplayEvent::Dismiss {
                card_id: Uuid::new_v4(),
                dismissed: true,
            })
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_summary_reports_decisions_and_selections() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());

        let pushed = ctx.push(table_push("s1", "Cohort")).await.unwrap();
        let mut decision = PushRequest::new(json!(null));
        decision.study = Some("s1".into());
        decision.title = Some("Gate".into());
        decision.wait = true;
        decision.timeout_secs = Some(0.1);
        ctx.push(decision).await.unwrap();

        ctx.handle_display_event(DisplayEvent::Selection {
            card_id: pushed.card_id,
            state: SelectionState::Rows(vec![0]),
        })
        .await
        .unwrap();

        let summary = ctx.summarize("s1").await.unwrap();
        assert_eq!(summary.card_count, 2);
        assert_eq!(summary.titles, vec!["Cohort", "Gate"]);
        assert_eq!(summary.decisions_made.len(), 1);
        assert_eq!(summary.decisions_made[0].action, "skip");
        assert_eq!(summary.current_selections.len(), 1);
    }

    #[tokio::test]
    async fn test_replay_matches_after_reload() {
        let dir = tempfile::tempdir().unwrap();
        let ids: Vec<Uuid> = {
            let ctx = context(dir.path());
            let mut out = Vec::new();
            for i in 0..4 {
                let mut req = PushRequest::new(json!(format!("note {}", i)));
                req.study = Some("s1".into());
                out.push(ctx.push(req).await.unwrap().card_id);
            }
            out
        };

        // A fresh context replays the persisted index in the same order
        let ctx = context(dir.path());
        let replayed: Vec<Uuid> = ctx
            .list_cards("s1")
            .await
            .unwrap()
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(replayed, ids);
    }

    #[tokio::test]
    async fn test_redaction_applies_before_store() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());

        let mut req = PushRequest::new(json!([
            {"patient_name": "Ada", "visits": 3},
        ]));
        req.study = Some("s1".into());
        let pushed = ctx.push(req).await.unwrap();

        let card = ctx.get_card(pushed.card_id).await.unwrap();
        let table = match &card.payload {
            Payload::Table(table) => table,
            other => panic!("unexpected payload: {:?}", other),
        };
        assert_eq!(table.redacted_columns, vec!["patient_name"]);
        // Stored artifact is masked too, not just the preview
        let store = ctx.locate_artifact(table.artifact_id).await.unwrap();
        let page = store
            .read_page(table.artifact_id, 0, 10, None, true)
            .unwrap();
        assert_ne!(page[0]["patient_name"], json!("Ada"));
    }
}
