//! Journal API tests over the in-process transport
//!
//! The loopback transport shares every code path past the wire, so these
//! cover the producing-code contract: push, blocking decide, selection
//! reads, and study management.

use fieldbook_client::Journal;
use fieldbook_common::events::DisplayEvent;
use fieldbook_common::model::SelectionState;
use fieldbook_server::config::Config;
use fieldbook_server::redact::RedactionConfig;
use fieldbook_server::ServerContext;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn context(dir: &Path) -> Arc<ServerContext> {
    let config = Config {
        data_dir: dir.to_path_buf(),
        port: 0,
        redaction: RedactionConfig::default(),
        default_timeout_secs: 5.0,
        preview_rows: 5,
    };
    Arc::new(ServerContext::new(config).unwrap())
}

#[tokio::test]
async fn test_show_and_summary() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path());
    let journal = Journal::in_process(ctx.clone()).with_study("cohort");

    journal
        .show(json!([{"arm": "a", "n": 12}]), "Enrollment")
        .await
        .unwrap();
    journal.push(json!("baseline looks clean")).await.unwrap();

    let summary = journal.summary().await.unwrap();
    assert_eq!(summary.label, "cohort");
    assert_eq!(summary.card_count, 2);
    assert_eq!(summary.titles, vec!["Enrollment"]);
}

#[tokio::test]
async fn test_decide_times_out_with_skip() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::in_process(context(dir.path())).with_study("cohort");

    let started = Instant::now();
    let response = journal
        .decide(json!(null), "Proceed past interim?", 0.2)
        .await
        .unwrap();
    assert_eq!(response.action, "skip");
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_decide_returns_reviewer_action() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path());
    let journal = Journal::in_process(ctx.clone()).with_study("cohort");

    let decider = {
        let journal = journal.clone();
        tokio::spawn(async move {
            journal
                .decide_with_actions(
                    json!([{"outlier": 14}]),
                    "Exclude these rows?",
                    &["exclude", "keep"],
                    10.0,
                )
                .await
        })
    };

    let card_id = loop {
        if let Ok(cards) = ctx.list_cards("cohort").await {
            if let Some(card) = cards.first() {
                break card.id;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };
    ctx.handle_display_event(DisplayEvent::DecisionResponse {
        card_id,
        action: "exclude".into(),
        message: None,
        values: None,
        selected: None,
    })
    .await
    .unwrap();

    let response = decider.await.unwrap().unwrap();
    assert_eq!(response.action, "exclude");
}

#[tokio::test]
async fn test_selection_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path());
    let journal = Journal::in_process(ctx.clone()).with_study("cohort");

    let card_id = journal
        .show(json!([{"a": 1}, {"a": 2}]), "Rows")
        .await
        .unwrap();
    assert!(journal.selection(card_id).await.unwrap().is_none());

    ctx.handle_display_event(DisplayEvent::Selection {
        card_id,
        state: SelectionState::Rows(vec![1]),
    })
    .await
    .unwrap();

    let selection = journal.selection(card_id).await.unwrap().unwrap();
    assert_eq!(selection.state, SelectionState::Rows(vec![1]));
}

#[tokio::test]
async fn test_replace_keeps_card_identity() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path());
    let journal = Journal::in_process(ctx.clone()).with_study("cohort");

    let card_id = journal
        .show(json!([{"n": 1}]), "Counts")
        .await
        .unwrap();
    let replaced = journal
        .replace(card_id, json!([{"n": 2}, {"n": 3}]))
        .await
        .unwrap();
    assert_eq!(card_id, replaced);
    assert_eq!(ctx.list_cards("cohort").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_rename_study_moves_cards() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path());
    let journal = Journal::in_process(ctx.clone()).with_study("draft");

    journal.push(json!("first pass")).await.unwrap();
    journal.rename_study("draft", "final").await.unwrap();

    let journal = journal.with_study("final");
    let summary = journal.summary().await.unwrap();
    assert_eq!(summary.card_count, 1);
    assert!(ctx.list_cards("draft").await.is_err());
}
