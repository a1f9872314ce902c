//! Listener connection lifecycle.
//!
//! Every listener connection walks the same state machine:
//!
//! ```text
//! Pending --(valid token, registered)--> Authenticated --(close/error)--> Closed
//!    |                                                                      ^
//!    +--------------(missing/invalid token, no registry change)-------------+
//! ```
//!
//! A [`ListenerSession`] that is dropped while authenticated releases its
//! registration, so every termination path of the connection task cleans up.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::accounts::IdentityVerifier;
use crate::error::AdmissionError;
use crate::handle::ConnectionHandle;
use crate::registry::ConnectionRegistry;
use crate::types::{AccountId, ConnectionId, ListenerId};

/// Current state of a listener connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Socket accepted, identity not yet verified.
    Pending,
    /// Identity verified and registered in the registry.
    Authenticated {
        account: AccountId,
        connection: ConnectionId,
    },
    /// Terminal.
    Closed,
}

/// Drives one listener connection through its lifecycle.
#[derive(Debug)]
pub struct ListenerSession {
    registry: Arc<ConnectionRegistry>,
    listener: ListenerId,
    state: SessionState,
}

impl ListenerSession {
    pub fn new(registry: Arc<ConnectionRegistry>, listener: ListenerId) -> Self {
        Self {
            registry,
            listener,
            state: SessionState::Pending,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn listener(&self) -> &ListenerId {
        &self.listener
    }

    /// Account this session was admitted for, while authenticated.
    pub fn account(&self) -> Option<&AccountId> {
        match &self.state {
            SessionState::Authenticated { account, .. } => Some(account),
            _ => None,
        }
    }

    /// Verify the handshake token and register `handle`.
    ///
    /// On any failure the session moves straight to `Closed` and the registry
    /// is left untouched. The caller is responsible for closing the transport
    /// with a policy-violation code.
    pub async fn admit(
        &mut self,
        verifier: &dyn IdentityVerifier,
        token: Option<&str>,
        handle: Arc<dyn ConnectionHandle>,
    ) -> Result<AccountId, AdmissionError> {
        if self.state != SessionState::Pending {
            return Err(AdmissionError::NotPending);
        }

        let account = match token.filter(|t| !t.is_empty()) {
            None => {
                warn!(listener = %self.listener, "Listener rejected: identity token missing");
                self.state = SessionState::Closed;
                return Err(AdmissionError::MissingToken);
            }
            Some(token) => match verifier.verify(token) {
                Ok(account) => account,
                Err(err) => {
                    warn!(listener = %self.listener, error = %err, "Listener rejected: identity token invalid");
                    self.state = SessionState::Closed;
                    return Err(err.into());
                }
            },
        };

        match self
            .registry
            .connect(account.clone(), self.listener.clone(), handle)
            .await
        {
            Ok(connection) => {
                info!(account = %account, listener = %self.listener, "Listener authenticated");
                self.state = SessionState::Authenticated {
                    account: account.clone(),
                    connection,
                };
                Ok(account)
            }
            Err(err) => {
                self.state = SessionState::Closed;
                Err(err.into())
            }
        }
    }

    /// Move to `Closed`, releasing the registration if there is one.
    ///
    /// Returns true if this call removed the registration. A registration
    /// that has already been superseded or evicted is left alone.
    pub fn close(&mut self) -> bool {
        match std::mem::replace(&mut self.state, SessionState::Closed) {
            SessionState::Authenticated {
                account,
                connection,
            } => {
                let removed = self
                    .registry
                    .disconnect_connection(&account, &self.listener, connection);
                debug!(account = %account, listener = %self.listener, removed, "Listener session closed");
                removed
            }
            SessionState::Pending | SessionState::Closed => false,
        }
    }
}

impl Drop for ListenerSession {
    fn drop(&mut self) {
        self.close();
    }
}
