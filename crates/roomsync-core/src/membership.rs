//! Signed-in account's membership in one room.
//!
//! # State machine
//!
//! ```text
//!            fetch returns record
//!   Unknown ─────────────────────▶ Resolved(role, nickname)
//!      ▲                                   │
//!      └───────────────────────────────────┘
//!        identity change, fetch fails or finds nothing
//! ```
//!
//! There is no terminal state. Every identity change resets the tracker and,
//! with an identity present, issues a fresh fetch. Only the most recent fetch
//! counts: completions of superseded fetches are dropped.

use roomsync_proto::{Identity, MembershipRecord, Record, Role, RoomId};

use crate::{
    RequestId, SyncError,
    context::{PendingOp, RoomContext},
};

/// Membership as currently known.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MembershipState {
    /// No record fetched for the current identity.
    #[default]
    Unknown,
    /// Record fetched for the current identity.
    Resolved {
        /// Role in the room.
        role: Role,
        /// Nickname in the room.
        nickname: String,
    },
}

/// Tracks one room's membership record for the signed-in account.
#[derive(Debug, Clone, Default)]
pub struct MembershipTracker {
    state: MembershipState,
    in_flight: Option<RequestId>,
    ensure_deferred: bool,
}

impl MembershipTracker {
    /// Create a tracker in [`MembershipState::Unknown`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn state(&self) -> &MembershipState {
        &self.state
    }

    /// Role, [`Role::Unset`] while unknown.
    pub fn role(&self) -> Role {
        match &self.state {
            MembershipState::Resolved { role, .. } => *role,
            MembershipState::Unknown => Role::Unset,
        }
    }

    /// Nickname, `None` while unknown.
    pub fn nickname(&self) -> Option<&str> {
        match &self.state {
            MembershipState::Resolved { nickname, .. } => Some(nickname),
            MembershipState::Unknown => None,
        }
    }

    /// Whether a fetch is outstanding.
    pub fn is_fetching(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Forget everything known for the previous identity.
    pub(crate) fn reset(&mut self) {
        self.state = MembershipState::Unknown;
        self.in_flight = None;
        self.ensure_deferred = false;
    }

    /// Fetch the record for `identity`, superseding any outstanding fetch.
    pub(crate) fn refresh(
        &mut self,
        room_id: &str,
        identity: Option<&Identity>,
        ctx: &mut impl RoomContext,
    ) {
        let Some(identity) = identity else {
            self.reset();
            return;
        };
        let path = ctx.member_path(room_id, &identity.id);
        let request =
            ctx.fetch(path, PendingOp::FetchMembership { room_id: room_id.to_string() });
        self.in_flight = Some(request);
    }

    /// Make sure the account has a record in this room.
    ///
    /// Writes a [`Role::Member`] record only when the state is `Unknown` and
    /// an identity is present. The write does not change state; the state
    /// follows from the re-fetch after the write is acknowledged. If a fetch
    /// is outstanding the decision waits for it, so an existing record is
    /// never overwritten because it had not arrived yet.
    pub(crate) fn ensure(
        &mut self,
        room_id: &str,
        identity: Option<&Identity>,
        nickname: &str,
        ctx: &mut impl RoomContext,
    ) {
        let Some(identity) = identity else {
            return;
        };
        if self.state != MembershipState::Unknown {
            return;
        }
        if self.in_flight.is_some() {
            self.ensure_deferred = true;
            return;
        }
        self.write_member(room_id, identity, nickname, ctx);
    }

    fn write_member(
        &mut self,
        room_id: &str,
        identity: &Identity,
        nickname: &str,
        ctx: &mut impl RoomContext,
    ) {
        self.ensure_deferred = false;
        let path = ctx.member_path(room_id, &identity.id);
        let record = MembershipRecord::new(nickname, Role::Member);
        tracing::debug!(%room_id, user_id = %identity.id, "writing member record");
        ctx.set(
            path,
            Some(record.encode()),
            PendingOp::EnsureMembership { room_id: room_id.to_string() },
        );
    }

    /// Apply a fetch completion.
    ///
    /// Returns `false` if `request` was superseded and the result dropped.
    pub(crate) fn on_fetched(
        &mut self,
        room_id: &RoomId,
        request: RequestId,
        outcome: FetchOutcome,
        identity: Option<&Identity>,
        nickname: &str,
        ctx: &mut impl RoomContext,
    ) -> bool {
        if self.in_flight != Some(request) {
            tracing::debug!(%room_id, %request, "dropping superseded membership fetch");
            return false;
        }
        self.in_flight = None;

        self.state = match outcome {
            FetchOutcome::Found(value) => match MembershipRecord::decode(&value) {
                Ok(record) => {
                    MembershipState::Resolved { role: record.role, nickname: record.nickname }
                },
                Err(error) => {
                    tracing::warn!(%room_id, %error, "ignoring malformed membership record");
                    MembershipState::Unknown
                },
            },
            FetchOutcome::Missing => MembershipState::Unknown,
            FetchOutcome::Failed(error) => {
                ctx.report_error(error);
                MembershipState::Unknown
            },
        };
        ctx.notify();

        if self.ensure_deferred {
            self.ensure_deferred = false;
            if let Some(identity) = identity
                && self.state == MembershipState::Unknown
            {
                self.write_member(room_id, identity, nickname, ctx);
            }
        }
        true
    }
}

/// Result of a membership fetch, as seen by the tracker.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FetchOutcome {
    Found(serde_json::Value),
    Missing,
    Failed(SyncError),
}
