//! Remote store vocabulary for roomsync.
//!
//! The remote store is an eventually-consistent hierarchical key-value tree.
//! This crate names the pieces both sides of the store boundary agree on,
//! without any I/O:
//!
//! - [`StorePath`]: slash-separated address into the tree
//! - [`records`]: explicit schemas for every path the engine reads or writes
//! - [`Identity`]: the signed-in account, as reported by the auth collaborator
//! - [`StoreError`], [`AuthError`], [`SchemaError`]: failures at the boundary
//!
//! # Invariants
//!
//! Documents are decoded into typed records at the ingestion boundary. A
//! payload that does not match its schema is rejected with a [`SchemaError`]
//! and never partially applied.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod identity;
mod path;
pub mod records;

pub use error::{AuthError, SchemaError, StoreError};
pub use identity::Identity;
pub use path::StorePath;
pub use records::{
    MembershipRecord, MessageRecord, NewMessage, Record, Role, RoomRecord, is_server_timestamp,
    server_timestamp,
};

/// Remote key of a room under the rooms collection.
pub type RoomId = String;

/// Remote key of an account.
pub type UserId = String;

/// Remote key of a message under a room's message collection.
pub type MessageId = String;
