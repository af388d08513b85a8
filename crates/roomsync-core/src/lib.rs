//! Reactive synchronization engine for chat rooms.
//!
//! Keeps a local, continuously updated view of rooms, the signed-in
//! account's memberships, and per-room message histories, driven by child
//! notifications from an eventually consistent hierarchical store.
//!
//! The engine tolerates out-of-order arrival, repeated delivery and partial
//! data. Message authors are resolved to nicknames asynchronously and
//! backfilled in place. Any number of changes within one tick reach the
//! single observer as one snapshot.
//!
//! # Components
//!
//! - [`SyncEngine`]: composition root and the only public surface
//! - [`RoomRegistry`]: known rooms and the selection
//! - [`MembershipTracker`]: per-room membership of the signed-in account
//! - [`MessageLog`]: per-room deduplicated message sequence
//! - [`NicknameResolver`]: memoizing author nickname lookup
//! - [`UpdateCoalescer`]: one observer call per tick
//! - [`Driver`] and [`Runtime`]: generic async loop over platform I/O
//!
//! # Architecture
//!
//! The engine is sans-IO. Store and auth operations leave it as
//! [`EngineAction`]s tagged with a [`RequestId`] and come back as
//! [`EngineEvent`]s. The same engine runs under the async [`Runtime`] and
//! under synchronous deterministic simulation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod coalescer;
mod config;
mod context;
mod driver;
mod engine;
mod error;
mod event;
mod input;
mod membership;
mod message_log;
mod nickname;
mod registry;
mod runtime;
mod state;

pub use coalescer::{Observer, SubscriptionId, UpdateCoalescer};
pub use config::{Collection, EngineConfig, PathLayout};
pub use driver::Driver;
pub use engine::SyncEngine;
pub use error::SyncError;
pub use event::{ChildEventKind, EngineAction, EngineEvent, RequestId};
pub use input::{EngineInput, Intent, IntentReply};
pub use membership::{MembershipState, MembershipTracker};
pub use message_log::MessageLog;
pub use nickname::{NicknameResolver, Settled, Waiter};
pub use registry::{Room, RoomRegistry};
pub use runtime::Runtime;
pub use state::{AppSnapshot, Message, RoomView};
