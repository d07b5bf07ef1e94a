//! Server-Sent Events stream: full replay, then live updates
//!
//! A connecting (or reconnecting) client first receives every existing card
//! of the requested study in registry order, then live events as they are
//! broadcast. The subscription is taken before the snapshot, so no event can
//! fall into a gap between replay and live delivery; the overlap can deliver
//! a card twice, which clients handle by deduplicating on card id.

use crate::state::ServerContext;
use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use fieldbook_common::events::JournalEvent;
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
pub struct EventStreamQuery {
    /// Restrict the stream to one study; all studies when absent
    pub study: Option<String>,
}

/// GET /api/events - replay plus live event stream
pub async fn event_stream(
    State(ctx): State<Arc<ServerContext>>,
    Query(query): Query<EventStreamQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!(
        "New SSE client connected (study filter: {:?})",
        query.study
    );

    // Subscribe before snapshotting so nothing falls between replay and live
    let mut rx = ctx.events.subscribe();
    let snapshot = ctx
        .snapshot_cards(query.study.as_deref())
        .await
        .unwrap_or_default();
    let study_filter = query.study;

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("ConnectionStatus").data("connected"));

        for card in snapshot {
            let event = JournalEvent::CardAdded { card };
            match serde_json::to_string(&event) {
                Ok(json) => {
                    yield Ok(Event::default().event(event.event_name()).data(json));
                }
                Err(e) => warn!("Failed to serialize replay event: {}", e),
            }
        }

        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Some(filter) = &study_filter {
                        if event.study().map(|s| s != filter.as_str()).unwrap_or(false) {
                            continue;
                        }
                    }
                    match serde_json::to_string(&event) {
                        Ok(json) => {
                            yield Ok(Event::default()
                                .event(event.event_name())
                                .data(json));
                        }
                        Err(e) => warn!("Failed to serialize event: {}", e),
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    // The client will dedup any overlap on reconnect
                    warn!("SSE stream lagged, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
