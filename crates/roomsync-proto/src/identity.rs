//! Signed-in account.

use serde::{Deserialize, Serialize};

use crate::UserId;

/// The account currently signed in with the auth collaborator.
///
/// Identities arrive on the auth event stream. Absence (`None` at the use
/// site) means signed out.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Stable account id, used as the key of membership records.
    pub id: UserId,
    /// Provider display name. Seeds the account nickname.
    pub display_name: String,
}

impl Identity {
    /// Create an identity.
    pub fn new(id: impl Into<UserId>, display_name: impl Into<String>) -> Self {
        Self { id: id.into(), display_name: display_name.into() }
    }
}
