//! Enclave Signer: sealed key lifecycle and signed response cells
//!
//! Keys are generated inside the enclave, sealed to its identity and
//! reloaded across restarts. Responses are cell payloads hashed and signed
//! with the enclave's Ed25519 key so external verifiers can check them.

pub mod cell;
pub mod config;
pub mod keys;
pub mod response;
pub mod tee;

pub use cell::{Cell, CellBuilder, CellError};
pub use config::{Config, KeysConfig, ResponseConfig};
pub use keys::{BoxKeyService, KeyError, KeyManager, SignatureKey, SignatureService};
pub use response::{build_response, pack_response, EnclaveResponse, ResponseError, ResponseService};
pub use tee::{SealPolicy, SealedCodec, SealingProvider, SimulatedEnclave};
