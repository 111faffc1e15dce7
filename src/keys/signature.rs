//! Ed25519 signature keys backed by the Key Manager

use super::manager::{GeneratedKey, KeyError, KeyManager};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, KEYPAIR_LENGTH, PUBLIC_KEY_LENGTH};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

/// Stored private key: 32-byte seed followed by the 32-byte public key
pub const PRIVATE_KEY_SIZE: usize = KEYPAIR_LENGTH;

/// An Ed25519 signing key
pub struct SignatureKey {
    signing_key: SigningKey,
}

impl SignatureKey {
    /// Parse a 64-byte seed+public keypair; the public half must match the seed
    pub fn from_keypair_bytes(key_data: &[u8]) -> Result<Self, KeyError> {
        let bytes: &[u8; KEYPAIR_LENGTH] = key_data
            .try_into()
            .map_err(|_| KeyError::Configuration(format!("invalid keys size: {}", key_data.len())))?;
        let signing_key = SigningKey::from_keypair_bytes(bytes)
            .map_err(|_| KeyError::Configuration("public key does not match the private key".into()))?;
        Ok(Self { signing_key })
    }

    pub fn public_key(&self) -> [u8; PUBLIC_KEY_LENGTH] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Seed followed by public key
    pub fn private_key(&self) -> Zeroizing<[u8; KEYPAIR_LENGTH]> {
        Zeroizing::new(self.signing_key.to_keypair_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }

    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        match Signature::from_slice(signature) {
            Ok(sig) => self.signing_key.verifying_key().verify(message, &sig).is_ok(),
            Err(_) => false,
        }
    }
}

/// Sign/verify over the key held by a [`KeyManager`]
pub struct SignatureService {
    manager: KeyManager,
}

impl SignatureService {
    pub fn new(manager: KeyManager) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &KeyManager {
        &self.manager
    }

    /// Load the signature key, generating one on first use
    pub fn get_signature_key(&self) -> Result<SignatureKey, KeyError> {
        let key_data = self.manager.get_private_key(generate_signature_key)?;
        SignatureKey::from_keypair_bytes(&key_data)
    }

    pub fn get_public_key(&self) -> Result<[u8; PUBLIC_KEY_LENGTH], KeyError> {
        Ok(self.get_signature_key()?.public_key())
    }

    pub fn sign(&self, message: &[u8]) -> Result<[u8; 64], KeyError> {
        Ok(self.get_signature_key()?.sign(message))
    }

    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<bool, KeyError> {
        Ok(self.get_signature_key()?.verify(message, signature))
    }

    /// Provision an externally supplied 64-byte keypair
    pub fn save_signature_key(&self, key_data: &[u8]) -> Result<(), KeyError> {
        let key = SignatureKey::from_keypair_bytes(key_data)?;
        self.manager.save(&key.public_key(), key_data)
    }
}

fn generate_signature_key() -> Result<GeneratedKey, KeyError> {
    let signing_key = SigningKey::generate(&mut OsRng);
    Ok(GeneratedKey {
        public_key: signing_key.verifying_key().to_bytes().to_vec(),
        private_key: Zeroizing::new(signing_key.to_keypair_bytes().to_vec()),
    })
}
