//! Connection Registry for verification code delivery.
//!
//! This module provides a thread-safe registry that tracks live listener
//! connections per account, enabling fan-out and targeted delivery of
//! verification codes.
//!
//! ## Architecture
//!
//! Each listener connection registers a [`ConnectionHandle`](crate::ConnectionHandle)
//! once its identity token has been verified. Pushes are then delivered to the
//! handles registered under the pushed account.
//!
//! ```text
//!                        DashMap<AccountId, HashMap<ListenerId, Registration>>
//! ListenerSession (alice/L1) --connect--> [alice] -> { L1, L2 } <--deliver-- DeliveryService
//! ListenerSession (alice/L2) --connect-->   [bob] -> { L1 }
//! ```
//!
//! The map is sharded by account, so operations on one account never wait on
//! sends to another. Sends happen on a snapshot taken outside the shard lock.

mod connection_registry;

pub use connection_registry::{ConnectionRegistry, DeliveryOutcome};
