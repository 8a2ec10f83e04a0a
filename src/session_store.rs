//! # Conversation Position Store
//!
//! The single table mapping a user to their active conversation. Nothing
//! outside the conversation engine reads or writes it.
//!
//! Every slot carries a generation that is bumped on each change. A turn
//! takes a [`Snapshot`], performs whatever I/O it needs, and then applies
//! its outcome with [`ConversationStore::compare_and_set`]. If `/cancel`
//! (or any other turn) changed the slot in the meantime the write is
//! refused. The slot also keeps the update sequence of the latest cancel,
//! which lets the engine tell a turn the user cancelled apart from one
//! that merely started before an earlier cancel was applied.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::dialogue::Conversation;
use crate::localization::Language;

/// A user's active conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: i64,
    pub language: Language,
    pub conversation: Conversation,
}

/// What a turn saw when it started
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub generation: u64,
    pub session: Option<Session>,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    session: Option<Session>,
    /// Highest update sequence that cancelled this slot
    last_cancel: u64,
}

#[derive(Debug, Default)]
pub struct ConversationStore {
    // Idle users keep their slot so their generation survives a clear
    slots: Mutex<HashMap<i64, Slot>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self, user_id: i64) -> Snapshot {
        let slots = self.slots.lock().await;
        match slots.get(&user_id) {
            Some(slot) => Snapshot {
                generation: slot.generation,
                session: slot.session.clone(),
            },
            None => Snapshot {
                generation: 0,
                session: None,
            },
        }
    }

    pub async fn session(&self, user_id: i64) -> Option<Session> {
        self.snapshot(user_id).await.session
    }

    /// Whether nothing changed for `user_id` since `generation` was read
    pub async fn is_current(&self, user_id: i64, generation: u64) -> bool {
        let slots = self.slots.lock().await;
        slots.get(&user_id).map_or(0, |slot| slot.generation) == generation
    }

    /// Replace the slot's session if its generation still equals `expected`.
    /// Passing `None` ends the conversation.
    pub async fn compare_and_set(&self, user_id: i64, expected: u64, next: Option<Session>) -> bool {
        let mut slots = self.slots.lock().await;
        let slot = slots.entry(user_id).or_default();
        if slot.generation != expected {
            debug!(
                user_id = user_id,
                expected = expected,
                actual = slot.generation,
                "Discarding stale conversation update"
            );
            return false;
        }
        slot.generation += 1;
        slot.session = next;
        true
    }

    /// Unconditionally end the user's conversation; returns whether one existed
    pub async fn clear(&self, user_id: i64) -> bool {
        let mut slots = self.slots.lock().await;
        let slot = slots.entry(user_id).or_default();
        slot.generation += 1;
        slot.session.take().is_some()
    }

    /// `/cancel` carried by update `sequence`: clear and remember the sequence
    pub async fn cancel(&self, user_id: i64, sequence: u64) -> bool {
        let mut slots = self.slots.lock().await;
        let slot = slots.entry(user_id).or_default();
        slot.generation += 1;
        slot.last_cancel = slot.last_cancel.max(sequence);
        slot.session.take().is_some()
    }

    pub async fn last_cancel(&self, user_id: i64) -> u64 {
        let slots = self.slots.lock().await;
        slots.get(&user_id).map_or(0, |slot| slot.last_cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialogue::AdminState;

    fn admin_session(user_id: i64) -> Session {
        Session {
            user_id,
            language: Language::English,
            conversation: Conversation::Admin { state: AdminState::Menu },
        }
    }

    #[tokio::test]
    async fn test_compare_and_set_rejects_stale_generation() {
        let store = ConversationStore::new();
        let before = store.snapshot(1).await;
        assert!(store.compare_and_set(1, before.generation, Some(admin_session(1))).await);
        // Second writer still holds the old generation
        assert!(!store.compare_and_set(1, before.generation, None).await);
        assert!(store.session(1).await.is_some());
    }

    #[tokio::test]
    async fn test_clear_invalidates_outstanding_snapshots() {
        let store = ConversationStore::new();
        let idle = store.snapshot(5).await;
        assert!(!store.clear(5).await);
        assert!(!store.is_current(5, idle.generation).await);
        assert!(!store.compare_and_set(5, idle.generation, Some(admin_session(5))).await);
        assert_eq!(store.session(5).await, None);
    }

    #[tokio::test]
    async fn test_clear_reports_existing_session() {
        let store = ConversationStore::new();
        store.compare_and_set(9, 0, Some(admin_session(9))).await;
        assert!(store.clear(9).await);
        assert!(!store.clear(9).await);
        assert_eq!(store.session(9).await, None);
    }

    #[tokio::test]
    async fn test_cancel_keeps_highest_sequence() {
        let store = ConversationStore::new();
        assert_eq!(store.last_cancel(3).await, 0);
        store.compare_and_set(3, 0, Some(admin_session(3))).await;

        let before = store.snapshot(3).await;
        assert!(store.cancel(3, 40).await);
        assert!(!store.is_current(3, before.generation).await);
        // A cancel delivered out of order never lowers the mark
        assert!(!store.cancel(3, 12).await);
        assert_eq!(store.last_cancel(3).await, 40);
        assert_eq!(store.last_cancel(4).await, 0);
    }

    #[tokio::test]
    async fn test_users_do_not_share_generations() {
        let store = ConversationStore::new();
        store.compare_and_set(1, 0, Some(admin_session(1))).await;
        assert!(store.is_current(2, 0).await);
        assert!(store.compare_and_set(2, 0, Some(admin_session(2))).await);
        assert!(store.session(1).await.is_some());
        assert!(store.session(2).await.is_some());
    }
}
