//! Schemas for the documents stored under each remote path.
//!
//! | path | record |
//! |---|---|
//! | `rooms/{room}` | [`RoomRecord`] |
//! | `members/{room}/{user}` | [`MembershipRecord`] |
//! | `messages/{room}/{message}` | [`MessageRecord`] (read), [`NewMessage`] (write) |
//!
//! Decoding goes through [`Record::decode`], which deserializes and then
//! checks field constraints. Encoding is infallible and produces the exact
//! JSON document written to the store.

use std::fmt;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};

use crate::{SchemaError, UserId};

/// Key of the server-value placeholder object.
pub const SERVER_VALUE_KEY: &str = ".sv";

/// Placeholder string the store replaces with its own clock, in milliseconds.
pub const SERVER_TIMESTAMP: &str = "timestamp";

/// Placeholder document resolved to the store's clock at write time.
pub fn server_timestamp() -> Value {
    json!({ SERVER_VALUE_KEY: SERVER_TIMESTAMP })
}

/// Whether `value` is the server timestamp placeholder.
pub fn is_server_timestamp(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|obj| obj.len() == 1 && obj.get(SERVER_VALUE_KEY) == Some(&json!(SERVER_TIMESTAMP)))
}

/// A typed document at a known remote path.
pub trait Record: DeserializeOwned {
    /// Record name used in error messages.
    const NAME: &'static str;

    /// Check field constraints after deserialization.
    fn validate(&self) -> Result<(), SchemaError> {
        Ok(())
    }

    /// Decode and validate a remote document.
    fn decode(value: &Value) -> Result<Self, SchemaError> {
        let record: Self = serde_json::from_value(value.clone())
            .map_err(|e| SchemaError::Malformed { record: Self::NAME, reason: e.to_string() })?;
        record.validate()?;
        Ok(record)
    }
}

fn require_text(record: &'static str, field: &str, value: &str) -> Result<(), SchemaError> {
    if value.trim().is_empty() {
        return Err(SchemaError::Invalid { record, reason: format!("`{field}` is empty") });
    }
    Ok(())
}

/// A member's standing in a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Created the room.
    Owner,
    /// Asked to join, not yet admitted.
    Applicant,
    /// Regular participant.
    Member,
    /// Barred from the room.
    Banned,
    /// No standing recorded.
    #[default]
    Unset,
}

impl Role {
    /// Wire name of the role.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Applicant => "applicant",
            Self::Member => "member",
            Self::Banned => "banned",
            Self::Unset => "unset",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Document at `rooms/{room}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRecord {
    /// Display name of the room.
    pub name: String,
}

impl RoomRecord {
    /// Create a room record.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Document written to the store.
    pub fn encode(&self) -> Value {
        json!({ "name": self.name })
    }
}

impl Record for RoomRecord {
    const NAME: &'static str = "room";

    fn validate(&self) -> Result<(), SchemaError> {
        require_text(Self::NAME, "name", &self.name)
    }
}

/// Document at `members/{room}/{user}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipRecord {
    /// Nickname the member uses in this room.
    pub nickname: String,
    /// Standing in the room. Absent on the wire means [`Role::Unset`].
    #[serde(default)]
    pub role: Role,
}

impl MembershipRecord {
    /// Create a membership record.
    pub fn new(nickname: impl Into<String>, role: Role) -> Self {
        Self { nickname: nickname.into(), role }
    }

    /// Document written to the store.
    pub fn encode(&self) -> Value {
        json!({ "nickname": self.nickname, "role": self.role.as_str() })
    }
}

impl Record for MembershipRecord {
    const NAME: &'static str = "membership";

    fn validate(&self) -> Result<(), SchemaError> {
        require_text(Self::NAME, "nickname", &self.nickname)
    }
}

/// Document at `messages/{room}/{message}` as delivered by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Account id of the author.
    pub author: UserId,
    /// Message text.
    pub body: String,
    /// Server-assigned write time, milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl Record for MessageRecord {
    const NAME: &'static str = "message";

    fn validate(&self) -> Result<(), SchemaError> {
        require_text(Self::NAME, "author", &self.author)
    }
}

/// Message as written by a client. The timestamp is left to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    /// Account id of the author.
    pub author: UserId,
    /// Message text.
    pub body: String,
}

impl NewMessage {
    /// Create an outgoing message.
    pub fn new(author: impl Into<UserId>, body: impl Into<String>) -> Self {
        Self { author: author.into(), body: body.into() }
    }

    /// Document written to the store, with a server timestamp placeholder.
    pub fn encode(&self) -> Value {
        json!({ "author": self.author, "body": self.body, "timestamp": server_timestamp() })
    }
}
