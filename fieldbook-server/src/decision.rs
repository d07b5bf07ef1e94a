//! Decision/freeze controller: waiter registration and signaling
//!
//! Each decision card walks `pending -> waiting -> frozen`:
//! - `waiting` begins when a push requests `wait=true`; the calling context
//!   parks on a oneshot registered here under the card id
//! - `frozen` is reached by the first committed response (reviewer event or
//!   synthesized timeout skip); the commit itself happens in the server
//!   context under the study's registry lock, which is what makes the
//!   response write-once. This module only parks and wakes callers.
//!
//! A card can re-enter `waiting` via a replace-push with `wait=true`, which
//! clears the frozen state before a new waiter is registered.

use fieldbook_common::model::ResponseRecord;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct DecisionController {
    waiters: Mutex<HashMap<Uuid, oneshot::Sender<ResponseRecord>>>,
}

impl DecisionController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for a card, replacing any stale one
    ///
    /// A stale waiter can exist when a decision card is re-armed while the
    /// previous caller already timed out; dropping the old sender is safe
    /// because that caller stopped listening.
    pub fn register(&self, card_id: Uuid) -> oneshot::Receiver<ResponseRecord> {
        let (tx, rx) = oneshot::channel();
        let mut waiters = self.waiters.lock().unwrap_or_else(|e| e.into_inner());
        if waiters.insert(card_id, tx).is_some() {
            debug!("Replaced stale decision waiter for card {}", card_id);
        }
        rx
    }

    /// Wake the waiter for a card with the committed response
    pub fn signal(&self, card_id: Uuid, response: ResponseRecord) {
        let waiter = self
            .waiters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&card_id);
        match waiter {
            Some(tx) => {
                if tx.send(response).is_err() {
                    // Caller already returned via the timeout path
                    debug!("Decision waiter for card {} no longer listening", card_id);
                }
            }
            None => warn!(
                "Decision response for card {} had no registered waiter",
                card_id
            ),
        }
    }

    /// Drop a waiter without signaling (timeout path cleanup)
    pub fn forget(&self, card_id: Uuid) {
        self.waiters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&card_id);
    }

    /// True while a caller is parked on this card
    pub fn is_waiting(&self, card_id: Uuid) -> bool {
        self.waiters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&card_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_signal_wakes_waiter() {
        let controller = DecisionController::new();
        let card = Uuid::new_v4();
        let rx = controller.register(card);
        assert!(controller.is_waiting(card));

        controller.signal(card, ResponseRecord::skip());
        let response = rx.await.unwrap();
        assert_eq!(response.action, "skip");
        assert!(!controller.is_waiting(card));
    }

    #[tokio::test]
    async fn test_forget_leaves_receiver_closed() {
        let controller = DecisionController::new();
        let card = Uuid::new_v4();
        let rx = controller.register(card);
        controller.forget(card);
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn test_reregister_replaces_waiter() {
        let controller = DecisionController::new();
        let card = Uuid::new_v4();
        let stale = controller.register(card);
        let fresh = controller.register(card);

        controller.signal(card, ResponseRecord::skip());
        assert!(stale.await.is_err());
        assert_eq!(fresh.await.unwrap().action, "skip");
    }

    #[test]
    fn test_signal_without_waiter_is_noop() {
        let controller = DecisionController::new();
        controller.signal(Uuid::new_v4(), ResponseRecord::skip());
    }
}
