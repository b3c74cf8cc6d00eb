//! Typing indicators received from other participants.
//!
//! Each conversation keeps who is typing and who paused. Senders repeat
//! their state while typing, so an entry that has not been refreshed within
//! `typing_stale_after` is dropped by a periodic poll.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use courier_shared::EntityId;

use crate::client::Client;
use crate::events::{Event, EventPayload, EVENT_TYPING_CHANGE};
use crate::scheduler::{Scheduler, TaskHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypingState {
    Started,
    Paused,
    Finished,
}

/// Payload of `typing-indicator-change`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingChange {
    pub conversation: EntityId,
    pub typing: Vec<String>,
    pub paused: Vec<String>,
}

struct Entry {
    state: TypingState,
    updated: Instant,
}

#[derive(Default)]
pub(crate) struct TypingIndicators {
    conversations: RefCell<HashMap<EntityId, HashMap<String, Entry>>>,
    poll: Cell<Option<TaskHandle>>,
}

impl TypingIndicators {
    fn snapshot(&self, conversation: &EntityId) -> TypingChange {
        let conversations = self.conversations.borrow();
        let mut typing = Vec::new();
        let mut paused = Vec::new();
        if let Some(entries) = conversations.get(conversation) {
            for (identity, entry) in entries {
                match entry.state {
                    TypingState::Started => typing.push(identity.clone()),
                    TypingState::Paused => paused.push(identity.clone()),
                    TypingState::Finished => {}
                }
            }
        }
        typing.sort();
        paused.sort();
        TypingChange {
            conversation: conversation.clone(),
            typing,
            paused,
        }
    }

    /// Returns whether anything visible changed.
    fn record(&self, conversation: &EntityId, identity: &str, state: TypingState, now: Instant) -> bool {
        let mut conversations = self.conversations.borrow_mut();
        if state == TypingState::Finished {
            let Some(entries) = conversations.get_mut(conversation) else {
                return false;
            };
            let removed = entries.remove(identity).is_some();
            if entries.is_empty() {
                conversations.remove(conversation);
            }
            return removed;
        }

        let entries = conversations.entry(conversation.clone()).or_default();
        let previous = entries.insert(identity.to_string(), Entry { state, updated: now });
        previous.map(|p| p.state) != Some(state)
    }

    /// Drop entries last refreshed before `cutoff`; returns the affected
    /// conversations.
    fn expire(&self, cutoff: Instant) -> Vec<EntityId> {
        let mut conversations = self.conversations.borrow_mut();
        let mut affected = Vec::new();
        conversations.retain(|conversation, entries| {
            let before = entries.len();
            entries.retain(|_, entry| entry.updated >= cutoff);
            if entries.len() != before {
                affected.push(conversation.clone());
            }
            !entries.is_empty()
        });
        affected
    }

    fn is_empty(&self) -> bool {
        self.conversations.borrow().is_empty()
    }

    pub(crate) fn stop(&self, scheduler: &Scheduler) {
        if let Some(handle) = self.poll.take() {
            scheduler.cancel(handle);
        }
        self.conversations.borrow_mut().clear();
    }
}

impl Client {
    /// Record a typing state reported by `identity` in `conversation`.
    pub fn set_typing_state(&self, conversation: &EntityId, identity: &str, state: TypingState) {
        if self.is_destroyed() {
            return;
        }
        let typing = &self.inner().typing;
        let changed = typing.record(conversation, identity, state, Instant::now());
        if !typing.is_empty() {
            self.start_typing_poll();
        }
        if changed {
            self.emit_typing(conversation);
        }
    }

    pub fn typing_state(&self, conversation: &EntityId) -> TypingChange {
        self.inner().typing.snapshot(conversation)
    }

    fn emit_typing(&self, conversation: &EntityId) {
        let change = self.inner().typing.snapshot(conversation);
        tracing::trace!(%conversation, typing = change.typing.len(), paused = change.paused.len(), "typing change");
        self.trigger(Event::new(EVENT_TYPING_CHANGE, EventPayload::Typing(change)));
    }

    fn start_typing_poll(&self) {
        let typing = &self.inner().typing;
        if typing.poll.get().is_some_and(|handle| self.scheduler().is_pending(handle)) {
            return;
        }
        let client = self.downgrade();
        let handle = self.scheduler().every(self.config().typing_poll_interval, move || {
            let Some(client) = client.upgrade() else {
                return false;
            };
            client.expire_typing()
        });
        typing.poll.set(Some(handle));
    }

    /// Returns whether polling should continue.
    fn expire_typing(&self) -> bool {
        let typing = &self.inner().typing;
        let Some(cutoff) = Instant::now().checked_sub(self.config().typing_stale_after) else {
            return true;
        };
        for conversation in typing.expire(cutoff) {
            self.emit_typing(&conversation);
        }
        if typing.is_empty() {
            typing.poll.set(None);
            return false;
        }
        true
    }
}
