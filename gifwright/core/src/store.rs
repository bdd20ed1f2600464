//! Session Store
//!
//! Process-wide registry mapping requester identity to conversation state.
//!
//! # Locking model
//!
//! The registry itself is a `parking_lot::RwLock<HashMap>` held only long
//! enough to look up or insert a slot. Each slot is an
//! `Arc<tokio::sync::Mutex<Option<Session>>>`: holding the slot lock
//! serializes all event processing for that chat (including awaits into the
//! responder) while events for other chats proceed concurrently. No lock
//! spans more than one identity, so a slow render can never stall another
//! requester's dialogue.
//!
//! Nothing here is persisted. A restart loses all in-flight sessions, which
//! is acceptable: sessions are short-lived, single-request workflows.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::events::ChatId;
use crate::session::Session;

/// Shared slot holding at most one live session for a chat.
type Slot = Arc<Mutex<Option<Session>>>;

/// Identity-keyed store of live sessions.
#[derive(Debug, Default)]
pub struct SessionStore {
    slots: RwLock<HashMap<ChatId, Slot>>,
}

impl SessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the slot for `chat`, creating it on first use.
    ///
    /// The returned guard is the serialization point for that chat: exactly
    /// one event for an identity is processed at a time.
    pub async fn lock(&self, chat: ChatId) -> SessionLock {
        let slot = self.slot(chat);
        SessionLock {
            guard: slot.lock_owned().await,
        }
    }

    /// Number of identities with a live session.
    ///
    /// A slot currently locked by an in-flight event counts as live.
    #[must_use]
    pub fn active_count(&self) -> usize {
        let slots = self.slots.read();
        slots
            .values()
            .filter(|slot| match slot.try_lock() {
                Ok(guard) => guard.is_some(),
                Err(_) => true,
            })
            .count()
    }

    /// Whether `chat` currently has a live session.
    #[must_use]
    pub fn contains(&self, chat: ChatId) -> bool {
        let slots = self.slots.read();
        match slots.get(&chat) {
            Some(slot) => match slot.try_lock() {
                Ok(guard) => guard.is_some(),
                Err(_) => true,
            },
            None => false,
        }
    }

    /// Drop `chat`'s slot if it is empty and nobody is using it.
    ///
    /// Keeps the registry from growing monotonically with every identity
    /// ever seen. Safe to call unconditionally; a live or contended slot is
    /// left alone.
    pub fn prune(&self, chat: ChatId) {
        let mut slots = self.slots.write();
        if let Some(slot) = slots.get(&chat) {
            let removable =
                Arc::strong_count(slot) == 1 && slot.try_lock().map(|g| g.is_none()).unwrap_or(false);
            if removable {
                slots.remove(&chat);
            }
        }
    }

    /// Number of allocated slots, live or not. Diagnostic only.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slots.read().len()
    }

    fn slot(&self, chat: ChatId) -> Slot {
        if let Some(slot) = self.slots.read().get(&chat) {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write();
        Arc::clone(slots.entry(chat).or_default())
    }
}

/// Exclusive access to one chat's session state.
///
/// Exposes the store contract - get, create, update in place, discard -
/// while the per-chat lock is held, so invariants (at most one session per
/// identity, dispose-before-overwrite) cannot be bypassed by callers.
pub struct SessionLock {
    guard: OwnedMutexGuard<Option<Session>>,
}

impl SessionLock {
    /// The live session, if any.
    #[must_use]
    pub fn get(&self) -> Option<&Session> {
        self.guard.as_ref()
    }

    /// Mutable access to the live session, if any.
    pub fn get_mut(&mut self) -> Option<&mut Session> {
        self.guard.as_mut()
    }

    /// Install a new session, displacing any existing one.
    ///
    /// The displaced session's artifacts are disposed before the new session
    /// is installed, so overwriting can never leak files.
    pub fn create(&mut self, session: Session) {
        if let Some(mut displaced) = self.guard.replace(session) {
            tracing::debug!(chat = %displaced.chat, "Displacing existing session");
            displaced.artifacts_mut().dispose_all();
        }
    }

    /// Remove and return the live session, if any.
    ///
    /// The caller owns disposal of the returned session's artifacts (its
    /// `ArtifactSet` disposes on drop as a backstop).
    pub fn discard(&mut self) -> Option<Session> {
        self.guard.take()
    }

    /// Whether no session is live for this chat.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.guard.is_none()
    }
}
