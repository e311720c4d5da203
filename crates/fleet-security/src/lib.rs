//! Security primitives for the Fleet A2A protocol.
//!
//! # Main types
//!
//! - [`MessageSigner`] — Signs and verifies canonical message bytes.
//! - [`HmacSigner`] — HMAC-SHA256 with a fleet-wide shared secret.
//! - [`NoopSigner`] — Explicit no-security mode that accepts every message.

/// Message signing and verification.
pub mod signing;

pub use signing::{signer_from_secret, HmacSigner, MessageSigner, NoopSigner};
