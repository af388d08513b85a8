//! Capabilities handed to room-scoped components.
//!
//! Room-scoped components ([`crate::membership::MembershipTracker`],
//! [`crate::nickname::NicknameResolver`]) never hold a reference back to the
//! engine. Whatever they may do to the outside world goes through
//! [`RoomContext`]: compute a member path, issue a fetch or write, record an
//! error, request a notification.

use std::collections::HashMap;

use roomsync_proto::{Identity, RoomId, StorePath, UserId};
use serde_json::Value;

use crate::{EngineAction, PathLayout, RequestId, SyncError};

/// What to do when an issued operation completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PendingOp {
    /// Room record pushed; next write the owner membership.
    CreateRoom { owner: Identity, nickname: String },
    /// Owner membership written; next select the room.
    WriteOwner { room_id: RoomId },
    /// First step of deletion. Failure is expected for empty rooms.
    ClearMessages { room_id: RoomId },
    /// Second step of deletion.
    DeleteRoomRecord { room_id: RoomId },
    /// Last step of deletion.
    DeleteMembers,
    /// Member record written on selection; next re-fetch.
    EnsureMembership { room_id: RoomId },
    /// Nickname written; next re-fetch.
    UpdateNickname { room_id: RoomId },
    /// Membership fetch for the current identity.
    FetchMembership { room_id: RoomId },
    /// Nickname fetch for a message author.
    ResolveNickname { author_id: UserId },
    /// Message pushed.
    SendMessage,
    /// Sign-in or sign-out started.
    Auth,
}

/// An issued operation awaiting its completion event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Pending {
    pub op: PendingOp,
    /// Target path, for error reports.
    pub path: StorePath,
}

/// Capability interface for room-scoped components.
pub(crate) trait RoomContext {
    /// `members/{room}/{user}` under the configured layout.
    fn member_path(&self, room_id: &str, user_id: &str) -> StorePath;

    /// Issue a one-shot fetch.
    fn fetch(&mut self, path: StorePath, op: PendingOp) -> RequestId;

    /// Issue a write, or a removal with `None`.
    fn set(&mut self, path: StorePath, value: Option<Value>, op: PendingOp) -> RequestId;

    /// Record an asynchronous failure as `last_error` and notify.
    fn report_error(&mut self, error: SyncError);

    /// Request an observer notification for this tick.
    fn notify(&mut self);
}

/// Side effects accumulated while the engine processes one input.
#[derive(Debug)]
pub(crate) struct Effects {
    layout: PathLayout,
    actions: Vec<EngineAction>,
    pending: HashMap<RequestId, Pending>,
    next_request: u64,
    last_error: Option<SyncError>,
    notify: bool,
}

impl Effects {
    pub fn new(layout: PathLayout) -> Self {
        Self {
            layout,
            actions: Vec::new(),
            pending: HashMap::new(),
            next_request: 1,
            last_error: None,
            notify: false,
        }
    }

    fn allocate(&mut self, op: PendingOp, path: StorePath) -> RequestId {
        let request = RequestId(self.next_request);
        self.next_request += 1;
        self.pending.insert(request, Pending { op, path });
        request
    }

    pub fn push(&mut self, collection: StorePath, value: Value, op: PendingOp) -> RequestId {
        let request = self.allocate(op, collection.clone());
        self.actions.push(EngineAction::Push { request, collection, value });
        request
    }

    pub fn auth(&mut self, sign_in: bool) -> RequestId {
        let request = self.allocate(PendingOp::Auth, StorePath::root());
        self.actions.push(if sign_in {
            EngineAction::SignIn { request }
        } else {
            EngineAction::SignOut { request }
        });
        request
    }

    pub fn subscribe(&mut self, action: EngineAction) {
        self.actions.push(action);
    }

    /// Remove and return the pending entry for a completion.
    pub fn complete(&mut self, request: RequestId) -> Option<Pending> {
        self.pending.remove(&request)
    }

    pub fn last_error(&self) -> Option<&SyncError> {
        self.last_error.as_ref()
    }

    pub fn clear_error(&mut self) -> bool {
        self.last_error.take().is_some()
    }

    /// Take the accumulated actions and the notification request.
    pub fn drain(&mut self) -> (Vec<EngineAction>, bool) {
        (std::mem::take(&mut self.actions), std::mem::take(&mut self.notify))
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl RoomContext for Effects {
    fn member_path(&self, room_id: &str, user_id: &str) -> StorePath {
        self.layout.member(room_id, user_id)
    }

    fn fetch(&mut self, path: StorePath, op: PendingOp) -> RequestId {
        let request = self.allocate(op, path.clone());
        self.actions.push(EngineAction::Fetch { request, path });
        request
    }

    fn set(&mut self, path: StorePath, value: Option<Value>, op: PendingOp) -> RequestId {
        let request = self.allocate(op, path.clone());
        self.actions.push(EngineAction::Set { request, path, value });
        request
    }

    fn report_error(&mut self, error: SyncError) {
        tracing::warn!(%error, "surfacing asynchronous failure");
        self.last_error = Some(error);
        self.notify = true;
    }

    fn notify(&mut self) {
        self.notify = true;
    }
}
