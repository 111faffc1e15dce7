//! TEE Enclave: the sealing primitive
//!
//! Sealing is authenticated encryption under a key that only the enclave can
//! derive. Two policies decide which identity the key is bound to:
//! - **Unique**: this exact enclave build (MRENCLAVE); a rebuild cannot unseal
//! - **Product**: the vendor and product (MRSIGNER + product id); any build
//!   from the same vendor can unseal
//!
//! [`SealingProvider`] is the seam where real hardware plugs in.
//! [`SimulatedEnclave`] is the software implementation used off-hardware and
//! in tests: AES-256-GCM with keys derived by HKDF-SHA256 from the
//! measurement.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

const NONCE_LEN: usize = 12;
/// policy byte + nonce + GCM tag
const SEAL_OVERHEAD: usize = 1 + NONCE_LEN + 16;

/// Which enclave identity a sealed blob is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SealPolicy {
    /// Bound to this enclave build
    #[default]
    Unique,
    /// Bound to the vendor/product identity, survives rebuilds
    Product,
}

impl SealPolicy {
    fn as_byte(self) -> u8 {
        match self {
            SealPolicy::Unique => 1,
            SealPolicy::Product => 2,
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(SealPolicy::Unique),
            2 => Some(SealPolicy::Product),
            _ => None,
        }
    }
}

/// Hardware sealing capability
///
/// `context_tag` is authenticated associated data: a blob sealed under one
/// tag does not unseal under another.
pub trait SealingProvider: Send + Sync {
    fn seal(&self, plaintext: &[u8], context_tag: &[u8], policy: SealPolicy) -> Result<Vec<u8>, TeeError>;

    fn unseal(&self, sealed: &[u8], context_tag: &[u8]) -> Result<Vec<u8>, TeeError>;
}

/// Measurement of enclave identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnclaveMeasurement {
    /// MRENCLAVE: hash of enclave code + data at build time
    pub mrenclave: String,
    /// MRSIGNER: hash of the signing key
    pub mrsigner: String,
    /// Product ID
    pub product_id: u16,
    /// Security version number
    pub isv_svn: u16,
}

impl EnclaveMeasurement {
    /// Compute a measurement for this enclave (simulated via SHA256)
    pub fn compute(code_hash: &str, signer_key: &str, product_id: u16, svn: u16) -> Self {
        let mrenclave = {
            let mut h = Sha256::new();
            h.update(code_hash.as_bytes());
            h.update(b"mrenclave-v1");
            hex::encode(h.finalize())
        };
        let mrsigner = {
            let mut h = Sha256::new();
            h.update(signer_key.as_bytes());
            h.update(b"mrsigner-v1");
            hex::encode(h.finalize())
        };
        Self {
            mrenclave,
            mrsigner,
            product_id,
            isv_svn: svn,
        }
    }
}

/// Software enclave implementing [`SealingProvider`]
///
/// Sealing keys depend only on the measurement, so a new instance with the
/// same measurement (a process restart) unseals what an earlier one sealed.
pub struct SimulatedEnclave {
    /// Instance identifier, for logs
    pub id: String,
    pub measurement: EnclaveMeasurement,
    unique_key: Zeroizing<[u8; 32]>,
    product_key: Zeroizing<[u8; 32]>,
}

impl SimulatedEnclave {
    pub fn new(measurement: EnclaveMeasurement) -> Result<Self, TeeError> {
        let unique_key = derive_sealing_key(measurement.mrenclave.as_bytes(), b"seal-unique")?;
        let mut product_info = b"seal-product".to_vec();
        product_info.extend_from_slice(&measurement.product_id.to_be_bytes());
        let product_key = derive_sealing_key(measurement.mrsigner.as_bytes(), &product_info)?;

        let id = uuid::Uuid::new_v4().to_string();
        log::info!(
            "Simulated enclave initialized: id={}, mrenclave={}..",
            &id[..8],
            &measurement.mrenclave[..16]
        );

        Ok(Self {
            id,
            measurement,
            unique_key,
            product_key,
        })
    }

    fn key_for(&self, policy: SealPolicy) -> &[u8; 32] {
        match policy {
            SealPolicy::Unique => &self.unique_key,
            SealPolicy::Product => &self.product_key,
        }
    }
}

impl SealingProvider for SimulatedEnclave {
    fn seal(&self, plaintext: &[u8], context_tag: &[u8], policy: SealPolicy) -> Result<Vec<u8>, TeeError> {
        let cipher = Aes256Gcm::new_from_slice(self.key_for(policy))
            .map_err(|e| TeeError::SealingError(format!("Cipher init: {}", e)))?;
        let nonce: [u8; NONCE_LEN] = rand::random();
        let aad = associated_data(policy, context_tag);

        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|e| TeeError::SealingError(format!("Encrypt: {}", e)))?;

        let mut sealed = Vec::with_capacity(ciphertext.len() + 1 + NONCE_LEN);
        sealed.push(policy.as_byte());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn unseal(&self, sealed: &[u8], context_tag: &[u8]) -> Result<Vec<u8>, TeeError> {
        if sealed.len() < SEAL_OVERHEAD {
            return Err(TeeError::IntegrityError(format!(
                "Sealed data too short: {} bytes",
                sealed.len()
            )));
        }
        let policy = SealPolicy::from_byte(sealed[0])
            .ok_or_else(|| TeeError::IntegrityError(format!("Unknown seal policy {:#04x}", sealed[0])))?;
        let nonce = &sealed[1..1 + NONCE_LEN];
        let ciphertext = &sealed[1 + NONCE_LEN..];

        let cipher = Aes256Gcm::new_from_slice(self.key_for(policy))
            .map_err(|e| TeeError::SealingError(format!("Cipher init: {}", e)))?;
        let aad = associated_data(policy, context_tag);

        cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| TeeError::IntegrityError("Authentication failed".into()))
    }
}

fn associated_data(policy: SealPolicy, context_tag: &[u8]) -> Vec<u8> {
    let mut aad = Vec::with_capacity(context_tag.len() + 1);
    aad.push(policy.as_byte());
    aad.extend_from_slice(context_tag);
    aad
}

/// Stand-in for the CPU's fused sealing root
const SIMULATED_ROOT_KEY: &[u8] = b"enclave-signer-simulated-root-key-v1";

fn derive_sealing_key(identity: &[u8], info: &[u8]) -> Result<Zeroizing<[u8; 32]>, TeeError> {
    let hk = Hkdf::<Sha256>::new(Some(identity), SIMULATED_ROOT_KEY);
    let mut key = Zeroizing::new([0u8; 32]);
    hk.expand(info, &mut key[..])
        .map_err(|e| TeeError::SealingError(format!("Key derivation: {}", e)))?;
    Ok(key)
}

/// TEE-related errors
#[derive(Debug, thiserror::Error)]
pub enum TeeError {
    #[error("Sealing error: {0}")]
    SealingError(String),

    #[error("Integrity verification failed: {0}")]
    IntegrityError(String),
}
