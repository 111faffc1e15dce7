//! Keys: sealed key lifecycle and the services built on it
//!
//! - **KeyManager**: load-or-generate, sealed persistence, tamper detection
//! - **SignatureService**: Ed25519 signing key
//! - **BoxKeyService**: X25519 key agreement key

mod box_key;
mod manager;
mod signature;

pub use box_key::{BoxKey, BoxKeyService, BOX_KEY_SIZE};
pub use manager::{GeneratedKey, KeyError, KeyManager, KeyRole};
pub use signature::{SignatureKey, SignatureService, PRIVATE_KEY_SIZE};
