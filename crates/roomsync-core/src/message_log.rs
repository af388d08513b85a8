//! Per-room message history.
//!
//! The store delivers each message at least once and in key order. The log
//! keeps arrival order, drops repeated deliveries by message id, and lets the
//! author nickname be filled in later without moving the message.

use std::collections::HashSet;

use roomsync_proto::{MessageId, MessageRecord};

use crate::Message;

/// Insertion-ordered, deduplicated message sequence.
#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    messages: Vec<Message>,
    seen: HashSet<MessageId>,
}

impl MessageLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a delivered message unless its id was already ingested.
    ///
    /// `author_display` is the author's nickname if already known; otherwise
    /// the message shows the raw author id until [`MessageLog::backfill`].
    /// Returns `false` for a repeated delivery.
    pub fn ingest(
        &mut self,
        id: &str,
        record: MessageRecord,
        author_display: Option<&str>,
    ) -> bool {
        if !self.seen.insert(id.to_string()) {
            return false;
        }
        let mut message = Message::new(id, record.author, record.timestamp, record.body);
        if let Some(nickname) = author_display {
            message.resolve_author(nickname);
        }
        self.messages.push(message);
        true
    }

    /// Set the resolved nickname on one message, in place.
    ///
    /// Returns `false` if the message is gone or was already resolved.
    pub fn backfill(&mut self, id: &str, nickname: &str) -> bool {
        self.messages
            .iter_mut()
            .find(|message| message.id == id)
            .is_some_and(|message| message.resolve_author(nickname))
    }

    /// Set the resolved nickname on every unresolved message by `author_id`.
    ///
    /// Returns the number of messages changed.
    pub fn backfill_author(&mut self, author_id: &str, nickname: &str) -> usize {
        let mut changed = 0;
        for message in self.messages.iter_mut().filter(|message| message.author_id == author_id) {
            if message.resolve_author(nickname) {
                changed += 1;
            }
        }
        changed
    }

    /// Remove a message that was deleted remotely.
    ///
    /// The id is forgotten, so a later delivery under the same id is
    /// ingested again.
    pub fn remove(&mut self, id: &str) -> bool {
        if !self.seen.remove(id) {
            return false;
        }
        self.messages.retain(|message| message.id != id);
        true
    }

    /// Whether a message id was ingested and not removed.
    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    /// Messages in arrival order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
