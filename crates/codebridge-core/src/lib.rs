//! # codebridge-core
//!
//! Listener registry and delivery core for the Codebridge verification code relay.
//!
//! A phone pushes a short-lived verification code over HTTP; the code is relayed
//! to every browser listener connected for the same account, or to one specific
//! listener when the push names it.
//!
//! ## Architecture
//!
//! - **ConnectionRegistry**: `account -> { listener -> handle }`, sharded by account
//! - **DeliveryService**: validates a push and turns it into a registry delivery
//! - **ListenerSession**: per-connection handshake state machine
//!   (`Pending -> Authenticated -> Closed`)
//! - **IdentityVerifier** / **AccountStore**: collaborator traits implemented by
//!   the embedding server
//!
//! ```text
//! POST /push/{account} -> DeliveryService -> ConnectionRegistry -> ConnectionHandle (listener A)
//!                                                   |
//!                                                   +-----------> ConnectionHandle (listener B)
//! ```

pub mod accounts;
pub mod delivery;
pub mod handle;
pub mod registry;
pub mod session;

mod error;
mod types;

pub use accounts::{AccountStore, IdentityVerifier, InMemoryAccountStore};
pub use delivery::{DeliveryService, PushRequest};
pub use error::{AccountStoreError, AdmissionError, PushError, RegistryError, SendError, VerifyError};
pub use handle::{ChannelHandle, CloseReason, ConnectionHandle, HandleReceiver};
pub use registry::{ConnectionRegistry, DeliveryOutcome};
pub use session::{ListenerSession, SessionState};
pub use types::*;
