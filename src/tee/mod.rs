//! TEE (Trusted Execution Environment): hardware sealing for key storage
//!
//! - **Enclave**: the sealing primitive ([`SealingProvider`]) and its
//!   software implementation
//! - **Sealed Storage**: sealed files bound to a role-specific context tag

pub mod enclave;
pub mod sealed_storage;

pub use enclave::{
    EnclaveMeasurement, SealPolicy, SealingProvider, SimulatedEnclave, TeeError,
};
pub use sealed_storage::{SealError, SealedCodec};
