//! Signed responses: payload, hash and signature for external verifiers
//!
//! A response is produced two ways from the same signed payload cell:
//! - **EnclaveResponse**: JSON artifact with base64 `signature`, `payload`
//!   and `hash`
//! - **response cell**: a single cell tree an on-chain verifier parses
//!   directly
//!
//! The hash is the payload cell's representation hash, and the signature
//! covers the raw 32 hash bytes.

use crate::cell::{Cell, CellBuilder, CellError};
use crate::config::ResponseConfig;
use crate::keys::{KeyError, SignatureKey, SignatureService};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum ResponseError {
    #[error(transparent)]
    Key(#[from] KeyError),

    #[error("cell encoding failed: {0}")]
    Cell(#[from] CellError),

    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid base64 field: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// The JSON response artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnclaveResponse {
    pub signature: String,
    pub payload: String,
    pub hash: String,
}

impl EnclaveResponse {
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ResponseError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|source| ResponseError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ResponseError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ResponseError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Check the artifact the way an external verifier would: the hash must
    /// be the payload's cell hash and the signature must cover it.
    pub fn verify(&self, public_key: &[u8; 32]) -> Result<bool, ResponseError> {
        let payload = Cell::from_boc(&STANDARD.decode(&self.payload)?)?;
        let hash = STANDARD.decode(&self.hash)?;
        if hash != payload.hash() {
            return Ok(false);
        }
        let signature = STANDARD.decode(&self.signature)?;
        let Ok(signature) = ed25519_dalek::Signature::from_slice(&signature) else {
            return Ok(false);
        };
        let Ok(verifying_key) = ed25519_dalek::VerifyingKey::from_bytes(public_key) else {
            return Ok(false);
        };
        Ok(verifying_key.verify_strict(&hash, &signature).is_ok())
    }
}

/// Hash and sign `payload`
pub fn build_response(payload: &Cell, key: &SignatureKey) -> EnclaveResponse {
    let hash = payload.hash();
    let signature = key.sign(&hash);
    EnclaveResponse {
        signature: STANDARD.encode(signature),
        payload: STANDARD.encode(payload.to_boc()),
        hash: STANDARD.encode(hash),
    }
}

/// Pack `op_code`, the payload and its signature into one cell tree
///
/// ```text
/// root: op_code:uint32 | payload bits | payload refs.. | ^signature
/// ^signature: 512-bit Ed25519 signature over the payload hash
/// ```
/// The payload's own leading fields (timestamp, query id) follow the op
/// code directly.
pub fn pack_response(payload: &Cell, key: &SignatureKey, op_code: u32) -> Result<Cell, CellError> {
    let signature = key.sign(&payload.hash());
    let mut signature_cell = CellBuilder::new();
    signature_cell.store_slice(&signature)?;

    let mut root = CellBuilder::new();
    root.store_uint(op_code as u64, 32)?
        .store_cell(payload)?
        .store_ref(Arc::new(signature_cell.build()?))?;
    root.build()
}

/// Builds and persists responses with the enclave's signature key
pub struct ResponseService {
    config: ResponseConfig,
    signer: SignatureService,
}

impl ResponseService {
    pub fn new(config: ResponseConfig, signer: SignatureService) -> Self {
        Self { config, signer }
    }

    pub fn signer(&self) -> &SignatureService {
        &self.signer
    }

    /// Sign `payload` and write the JSON artifact to the response path
    pub fn save_response(&self, payload: &Cell) -> Result<EnclaveResponse, ResponseError> {
        let key = self.signer.get_signature_key()?;
        let response = build_response(payload, &key);
        response.save(&self.config.response_path)?;
        log::info!(
            "Response saved to {} (hash {})",
            self.config.response_path.display(),
            response.hash
        );
        Ok(response)
    }

    pub fn pack_response_to_cell(&self, payload: &Cell, op_code: u32) -> Result<Cell, ResponseError> {
        let key = self.signer.get_signature_key()?;
        let cell = pack_response(payload, &key, op_code)?;
        log::debug!(
            "Packed response op={:#010x} hash={}",
            op_code,
            hex::encode(cell.hash())
        );
        Ok(cell)
    }
}
