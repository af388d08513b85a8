//! Author id → nickname resolution.
//!
//! Messages name their author by account id. The nickname lives in the
//! author's membership record and may arrive long after the message. The
//! resolver fetches each author at most once at a time: later requests for an
//! author with a fetch in flight join its waiter list. Resolved nicknames are
//! cached for the life of the process; failures are not, so the next request
//! tries again. Once an author resolves, the engine backfills every message
//! by that author, including waiters of earlier failed fetches.

use std::collections::HashMap;

use roomsync_proto::{MembershipRecord, MessageId, Record, RoomId, StoreError, UserId};
use serde_json::Value;

use crate::{
    RequestId,
    context::{PendingOp, RoomContext},
};

/// A message waiting for its author's nickname.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Waiter {
    /// Room holding the message.
    pub room_id: RoomId,
    /// The message to backfill.
    pub message_id: MessageId,
}

#[derive(Debug)]
struct InFlight {
    request: RequestId,
    waiters: Vec<Waiter>,
}

/// How an author fetch settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settled {
    /// Nickname resolved and cached.
    Resolved {
        /// The resolved nickname.
        nickname: String,
        /// Messages to backfill.
        waiters: Vec<Waiter>,
    },
    /// No usable membership record. Nothing cached.
    Unavailable {
        /// Messages showing the raw author id until a later fetch resolves.
        waiters: Vec<Waiter>,
    },
    /// The store rejected the fetch. Nothing cached.
    Failed {
        /// Store failure.
        error: StoreError,
        /// Messages showing the raw author id until a later fetch resolves.
        waiters: Vec<Waiter>,
    },
}

/// Memoizing, deduplicating nickname resolver.
#[derive(Debug, Default)]
pub struct NicknameResolver {
    cache: HashMap<UserId, String>,
    in_flight: HashMap<UserId, InFlight>,
}

impl NicknameResolver {
    /// Create an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached nickname for an author.
    pub fn cached(&self, author_id: &str) -> Option<&str> {
        self.cache.get(author_id).map(String::as_str)
    }

    /// Whether a fetch for `author_id` is outstanding.
    pub fn is_pending(&self, author_id: &str) -> bool {
        self.in_flight.contains_key(author_id)
    }

    /// Number of cached nicknames.
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Queue `waiter` for the nickname of `author_id`.
    ///
    /// Issues a fetch of `members/{room}/{author}` unless one for this author
    /// is already in flight. Callers check [`NicknameResolver::cached`]
    /// first; a cached author never reaches this method.
    pub(crate) fn resolve(
        &mut self,
        author_id: &str,
        waiter: Waiter,
        ctx: &mut impl RoomContext,
    ) {
        if let Some(in_flight) = self.in_flight.get_mut(author_id) {
            in_flight.waiters.push(waiter);
            return;
        }
        let path = ctx.member_path(&waiter.room_id, author_id);
        let request =
            ctx.fetch(path, PendingOp::ResolveNickname { author_id: author_id.to_string() });
        self.in_flight.insert(author_id.to_string(), InFlight { request, waiters: vec![waiter] });
    }

    /// Settle the fetch for `author_id` and hand back its waiters.
    ///
    /// Returns `None` if `request` is not the outstanding fetch for this
    /// author.
    pub(crate) fn complete(
        &mut self,
        author_id: &str,
        request: RequestId,
        result: Result<Option<Value>, StoreError>,
    ) -> Option<Settled> {
        if self.in_flight.get(author_id).is_none_or(|in_flight| in_flight.request != request) {
            return None;
        }
        let waiters = self.in_flight.remove(author_id)?.waiters;

        let settled = match result {
            Ok(Some(value)) => match MembershipRecord::decode(&value) {
                Ok(record) => {
                    self.cache.insert(author_id.to_string(), record.nickname.clone());
                    Settled::Resolved { nickname: record.nickname, waiters }
                },
                Err(error) => {
                    tracing::warn!(%author_id, %error, "author membership record is malformed");
                    Settled::Unavailable { waiters }
                },
            },
            Ok(None) => Settled::Unavailable { waiters },
            Err(error) => Settled::Failed { error, waiters },
        };
        Some(settled)
    }
}
