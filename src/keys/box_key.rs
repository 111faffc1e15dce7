//! X25519 encryption ("box") keys backed by the Key Manager
//!
//! Peers derive a shared secret with the enclave's box public key to send it
//! encrypted data; the private half never leaves sealed storage.

use super::manager::{GeneratedKey, KeyError, KeyManager};
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

pub const BOX_KEY_SIZE: usize = 32;

pub struct BoxKey {
    secret: StaticSecret,
}

impl BoxKey {
    pub fn from_bytes(key_data: &[u8]) -> Result<Self, KeyError> {
        let bytes: [u8; BOX_KEY_SIZE] = key_data
            .try_into()
            .map_err(|_| KeyError::Configuration(format!("invalid keys size: {}", key_data.len())))?;
        Ok(Self {
            secret: StaticSecret::from(bytes),
        })
    }

    pub fn public_key(&self) -> [u8; 32] {
        PublicKey::from(&self.secret).to_bytes()
    }

    /// X25519 shared secret with a peer's public key
    pub fn diffie_hellman(&self, peer_public: &[u8; 32]) -> Zeroizing<[u8; 32]> {
        let shared = self.secret.diffie_hellman(&PublicKey::from(*peer_public));
        Zeroizing::new(shared.to_bytes())
    }
}

pub struct BoxKeyService {
    manager: KeyManager,
}

impl BoxKeyService {
    pub fn new(manager: KeyManager) -> Self {
        Self { manager }
    }

    /// Load the box key, generating one on first use
    pub fn get_box_key(&self) -> Result<BoxKey, KeyError> {
        let key_data = self.manager.get_private_key(generate_box_key)?;
        BoxKey::from_bytes(&key_data)
    }

    pub fn get_public_key(&self) -> Result<[u8; 32], KeyError> {
        Ok(self.get_box_key()?.public_key())
    }

    /// Provision an externally supplied 32-byte secret
    pub fn save_box_key(&self, key_data: &[u8]) -> Result<(), KeyError> {
        let key = BoxKey::from_bytes(key_data)?;
        self.manager.save(&key.public_key(), key_data)
    }
}

fn generate_box_key() -> Result<GeneratedKey, KeyError> {
    let secret = StaticSecret::random_from_rng(OsRng);
    Ok(GeneratedKey {
        public_key: PublicKey::from(&secret).to_bytes().to_vec(),
        private_key: Zeroizing::new(secret.to_bytes().to_vec()),
    })
}
