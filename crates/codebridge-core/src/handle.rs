//! Connection handles owned by the registry.
//!
//! A [`ConnectionHandle`] is the registry's only way to reach a listener: it can
//! send a message to the remote peer and it can be closed. [`ChannelHandle`] is
//! the channel-backed implementation used by the WebSocket transport, where a
//! per-connection task owns the socket and drains a [`HandleReceiver`].
//!
//! ```text
//! ConnectionRegistry --send--> ChannelHandle --mpsc--> HandleReceiver --> socket writer
//!                    --close-> ChannelHandle --watch-> HandleReceiver --> close frame
//! ```

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::error::SendError;
use crate::types::ListenerMessage;

/// Why the registry closed a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// A newer connection registered under the same account and listener.
    Superseded,
    /// The process is shutting down.
    Shutdown,
}

/// An open channel to one listener.
#[async_trait]
pub trait ConnectionHandle: Send + Sync + 'static {
    /// Send a message to the remote peer.
    async fn send(&self, message: &ListenerMessage) -> Result<(), SendError>;

    /// Close the connection. Closing twice is a no-op.
    async fn close(&self, reason: CloseReason);
}

/// Channel-backed connection handle.
#[derive(Debug)]
pub struct ChannelHandle {
    messages: mpsc::Sender<ListenerMessage>,
    close: watch::Sender<Option<CloseReason>>,
}

/// Receiving half of a [`ChannelHandle`], owned by the connection task.
#[derive(Debug)]
pub struct HandleReceiver {
    messages: mpsc::Receiver<ListenerMessage>,
    close: watch::Receiver<Option<CloseReason>>,
}

impl ChannelHandle {
    /// Create a handle with an outbound buffer of `capacity` messages.
    pub fn new(capacity: usize) -> (Self, HandleReceiver) {
        let (message_tx, message_rx) = mpsc::channel(capacity);
        let (close_tx, close_rx) = watch::channel(None);
        (
            Self {
                messages: message_tx,
                close: close_tx,
            },
            HandleReceiver {
                messages: message_rx,
                close: close_rx,
            },
        )
    }

    pub fn is_closed(&self) -> bool {
        self.close.borrow().is_some() || self.messages.is_closed()
    }
}

#[async_trait]
impl ConnectionHandle for ChannelHandle {
    async fn send(&self, message: &ListenerMessage) -> Result<(), SendError> {
        if self.close.borrow().is_some() {
            return Err(SendError::Closed);
        }

        self.messages
            .try_send(message.clone())
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => SendError::Full,
                mpsc::error::TrySendError::Closed(_) => SendError::Closed,
            })
    }

    async fn close(&self, reason: CloseReason) {
        let first = self.close.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
        if first {
            debug!(reason = ?reason, "Connection handle closed");
        }
    }
}

impl HandleReceiver {
    /// Wait for the next outbound message.
    ///
    /// Returns `None` once the handle has been closed or dropped; queued
    /// messages are not drained after a close.
    pub async fn recv(&mut self) -> Option<ListenerMessage> {
        loop {
            if self.close.borrow_and_update().is_some() {
                return None;
            }

            tokio::select! {
                biased;
                changed = self.close.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
                message = self.messages.recv() => return message,
            }
        }
    }

    /// Reason the handle was closed, if it was closed explicitly.
    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.close.borrow()
    }
}
