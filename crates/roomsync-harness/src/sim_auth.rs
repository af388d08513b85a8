//! Simulated auth provider.

use roomsync_core::{EngineEvent, RequestId};
use roomsync_proto::{AuthError, Identity};

/// Auth provider with one fixed account.
///
/// Sign-in reports the account on the identity stream, then completes. A
/// configured rejection completes the flow with an error and leaves the
/// identity alone.
#[derive(Debug, Clone)]
pub struct SimAuth {
    account: Identity,
    reject: Option<AuthError>,
    signed_in: bool,
}

impl SimAuth {
    /// Provider that signs `account` in.
    pub fn new(account: Identity) -> Self {
        Self { account, reject: None, signed_in: false }
    }

    /// Fail the next sign-in with `error`.
    pub fn reject_next(&mut self, error: AuthError) {
        self.reject = Some(error);
    }

    /// The account this provider signs in.
    pub fn account(&self) -> &Identity {
        &self.account
    }

    /// Whether the account is signed in.
    pub fn is_signed_in(&self) -> bool {
        self.signed_in
    }

    /// Run an interactive sign-in.
    pub fn sign_in(&mut self, request: RequestId) -> Vec<EngineEvent> {
        if let Some(error) = self.reject.take() {
            tracing::debug!(%request, %error, "sign-in rejected");
            return vec![EngineEvent::AuthCompleted { request, result: Err(error) }];
        }
        self.signed_in = true;
        vec![
            EngineEvent::IdentityChanged(Some(self.account.clone())),
            EngineEvent::AuthCompleted { request, result: Ok(()) },
        ]
    }

    /// Sign out.
    pub fn sign_out(&mut self, request: RequestId) -> Vec<EngineEvent> {
        self.signed_in = false;
        vec![
            EngineEvent::IdentityChanged(None),
            EngineEvent::AuthCompleted { request, result: Ok(()) },
        ]
    }
}
