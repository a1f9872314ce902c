//! Connection Registry implementation.
//!
//! Tracks live listener connections two levels deep: account, then listener.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use tracing::{debug, info, instrument, warn};

use crate::error::RegistryError;
use crate::handle::{CloseReason, ConnectionHandle};
use crate::types::{AccountId, ConnectionId, ListenerId, ListenerMessage};

/// A handle stored in the registry together with its registration id.
struct Registration {
    id: ConnectionId,
    handle: Arc<dyn ConnectionHandle>,
}

/// Result of a delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The code was sent to `count` listeners (the size of the snapshot taken
    /// at send time; individual send failures are logged, not subtracted).
    Delivered { count: usize },
    /// No listener is connected for the account.
    NoListeners,
}

/// Registry for tracking live listener connections.
///
/// Thread-safe registry that maps an account to its listeners and each
/// listener to its connection handle. Uses DashMap so that operations on
/// different accounts proceed without a global lock.
///
/// ## Invariants
///
/// - An account with no listeners has no entry.
/// - At most one handle is reachable per (account, listener) pair.
/// - No shard lock is held while a handle sends or closes.
///
/// ## Usage
///
/// ```ignore
/// let registry = Arc::new(ConnectionRegistry::new());
///
/// // When a listener is admitted:
/// let (handle, rx) = ChannelHandle::new(32);
/// let id = registry.connect(account.clone(), listener.clone(), Arc::new(handle)).await?;
///
/// // When a push arrives:
/// let outcome = registry.deliver(&account, "123456", None).await;
///
/// // When the listener goes away:
/// registry.disconnect_connection(&account, &listener, id);
/// ```
pub struct ConnectionRegistry {
    accounts: DashMap<AccountId, HashMap<ListenerId, Registration>>,
    accepting: AtomicBool,
}

impl ConnectionRegistry {
    /// Create a new connection registry.
    pub fn new() -> Self {
        info!("Creating connection registry");
        Self {
            accounts: DashMap::new(),
            accepting: AtomicBool::new(true),
        }
    }

    /// Register a listener connection.
    ///
    /// If a handle is already registered for the same account and listener it
    /// is replaced, and the superseded handle is closed once the registry lock
    /// has been released.
    #[instrument(skip(self, handle), fields(account = %account, listener = %listener))]
    pub async fn connect(
        &self,
        account: AccountId,
        listener: ListenerId,
        handle: Arc<dyn ConnectionHandle>,
    ) -> Result<ConnectionId, RegistryError> {
        if !self.accepting.load(Ordering::SeqCst) {
            handle.close(CloseReason::Shutdown).await;
            return Err(RegistryError::ShuttingDown);
        }

        let id = ConnectionId::new();
        let superseded = self.accounts.entry(account.clone()).or_default().insert(
            listener.clone(),
            Registration {
                id,
                handle: Arc::clone(&handle),
            },
        );

        // A shutdown that started after the check above may have drained the
        // map before this insert landed.
        // The superseded handle is out of the map, so the drain cannot reach it.
        if !self.accepting.load(Ordering::SeqCst) {
            self.disconnect_connection(&account, &listener, id);
            handle.close(CloseReason::Shutdown).await;
            if let Some(previous) = superseded {
                previous.handle.close(CloseReason::Shutdown).await;
            }
            return Err(RegistryError::ShuttingDown);
        }

        match superseded {
            Some(previous) => {
                debug!(previous = %previous.id, connection = %id, "Replaced existing listener registration");
                previous.handle.close(CloseReason::Superseded).await;
            }
            None => debug!(connection = %id, "Registered new listener"),
        }

        Ok(id)
    }

    /// Remove a listener, whatever registration currently holds its slot.
    ///
    /// Idempotent: returns false and changes nothing if the listener is not
    /// registered. Removes the account entry when its last listener leaves.
    #[instrument(skip(self), fields(account = %account, listener = %listener))]
    pub fn disconnect(&self, account: &AccountId, listener: &ListenerId) -> bool {
        let removed = self.remove_listener(account, listener, None);
        if removed {
            debug!("Unregistered listener");
        } else {
            debug!("Listener was not registered");
        }
        removed
    }

    /// Remove a listener only if `connection` still holds its slot.
    ///
    /// Used by a connection's own cleanup path: a connection that was
    /// superseded must not evict the registration that replaced it.
    #[instrument(skip(self), fields(account = %account, listener = %listener, connection = %connection))]
    pub fn disconnect_connection(
        &self,
        account: &AccountId,
        listener: &ListenerId,
        connection: ConnectionId,
    ) -> bool {
        let removed = self.remove_listener(account, listener, Some(connection));
        if removed {
            debug!("Unregistered listener connection");
        }
        removed
    }

    fn remove_listener(
        &self,
        account: &AccountId,
        listener: &ListenerId,
        connection: Option<ConnectionId>,
    ) -> bool {
        let mut taken = None;
        self.accounts.remove_if_mut(account, |_, listeners| {
            let matches = listeners
                .get(listener)
                .is_some_and(|registration| connection.map_or(true, |id| registration.id == id));
            if matches {
                taken = listeners.remove(listener);
            }
            listeners.is_empty()
        });
        // The handle is dropped here, outside the shard lock.
        taken.is_some()
    }

    /// Deliver a verification code to an account's listeners.
    ///
    /// When `target` names a connected listener only that listener receives
    /// the code. Otherwise, including when the target has since disconnected,
    /// every listener of the account receives it. Sends run concurrently on a
    /// snapshot of the handles; a failed send is logged and its registration
    /// evicted without affecting the other listeners.
    #[instrument(skip(self, code), fields(account = %account, target = ?target))]
    pub async fn deliver(
        &self,
        account: &AccountId,
        code: &str,
        target: Option<&ListenerId>,
    ) -> DeliveryOutcome {
        let snapshot: Vec<(ListenerId, ConnectionId, Arc<dyn ConnectionHandle>)> =
            match self.accounts.get(account) {
                Some(listeners) => match target.and_then(|t| listeners.get_key_value(t)) {
                    Some((listener, registration)) => {
                        debug!("Sending to targeted listener");
                        vec![(
                            listener.clone(),
                            registration.id,
                            Arc::clone(&registration.handle),
                        )]
                    }
                    None => {
                        if target.is_some() {
                            debug!("Targeted listener offline, falling back to all listeners");
                        }
                        listeners
                            .iter()
                            .map(|(listener, registration)| {
                                (
                                    listener.clone(),
                                    registration.id,
                                    Arc::clone(&registration.handle),
                                )
                            })
                            .collect()
                    }
                },
                None => Vec::new(),
            };

        if snapshot.is_empty() {
            debug!("No listeners connected");
            return DeliveryOutcome::NoListeners;
        }

        let message = ListenerMessage::verification_code(code);
        let results = join_all(snapshot.iter().map(|(_, _, handle)| handle.send(&message))).await;

        for ((listener, connection, _), result) in snapshot.iter().zip(results) {
            if let Err(err) = result {
                warn!(listener = %listener, error = %err, "Failed to deliver verification code");
                if err.is_fatal() {
                    self.disconnect_connection(account, listener, *connection);
                }
            }
        }

        let count = snapshot.len();
        debug!(count, "Verification code delivered");
        DeliveryOutcome::Delivered { count }
    }

    /// Check if an account has at least one connected listener.
    pub fn is_connected(&self, account: &AccountId) -> bool {
        self.accounts.contains_key(account)
    }

    /// Check if a specific listener of an account is connected.
    pub fn is_listener_connected(&self, account: &AccountId, listener: &ListenerId) -> bool {
        self.accounts
            .get(account)
            .is_some_and(|listeners| listeners.contains_key(listener))
    }

    /// Number of listeners connected for an account.
    pub fn listener_count(&self, account: &AccountId) -> usize {
        self.accounts
            .get(account)
            .map(|listeners| listeners.len())
            .unwrap_or(0)
    }

    /// Listeners connected for an account, sorted.
    pub fn listeners(&self, account: &AccountId) -> Vec<ListenerId> {
        let mut listeners: Vec<ListenerId> = self
            .accounts
            .get(account)
            .map(|listeners| listeners.keys().cloned().collect())
            .unwrap_or_default();
        listeners.sort();
        listeners
    }

    /// Number of accounts with at least one listener.
    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    /// Total number of registered listener connections.
    pub fn connection_count(&self) -> usize {
        self.accounts.iter().map(|entry| entry.value().len()).sum()
    }

    /// Stop admitting listeners and close every registered handle.
    ///
    /// Returns the number of handles closed.
    pub async fn shutdown(&self) -> usize {
        self.accepting.store(false, Ordering::SeqCst);

        let accounts: Vec<AccountId> = self.accounts.iter().map(|e| e.key().clone()).collect();
        let mut handles = Vec::new();
        for account in accounts {
            if let Some((_, listeners)) = self.accounts.remove(&account) {
                handles.extend(listeners.into_values().map(|registration| registration.handle));
            }
        }

        join_all(
            handles
                .iter()
                .map(|handle| handle.close(CloseReason::Shutdown)),
        )
        .await;

        info!(count = handles.len(), "Closed all listener connections");
        handles.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("account_count", &self.accounts.len())
            .finish()
    }
}
