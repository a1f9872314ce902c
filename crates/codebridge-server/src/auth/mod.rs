//! Listener authentication.
//!
//! Browser listeners present a signed identity token as the `token` query
//! parameter of the WebSocket upgrade. Tokens are HS256 JSON Web Tokens whose
//! `sub` claim names the account; issuing them is the job of whatever login
//! flow fronts the relay (or `codebridge-server issue-token` for operators).
//!
//! # Architecture
//!
//! - `token`: HS256 issuance and verification, implementing
//!   [`codebridge_core::IdentityVerifier`]

pub mod token;

pub use token::HmacTokenVerifier;
