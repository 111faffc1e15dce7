//! Key Manager: generate once, persist sealed, detect tamper, reuse
//!
//! Two independent sealed records back one key pair:
//! - the **creation marker**, whose presence means "a key was generated"
//! - the **private key** itself
//!
//! [`KeyManager::get_private_key`] generates a key only when the marker is
//! absent, or when the marker exists but the private key file was deleted.
//! A private key file that exists but fails to unseal is tamper or
//! corruption and is surfaced, never papered over with a new key.

use crate::config::KeysConfig;
use crate::tee::{SealError, SealedCodec, TeeError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Mutex;
use zeroize::Zeroizing;

/// Context tag of the sealed private key
const PRIVATE_KEY_TAG: &[u8] = b"private-key";
/// Context tag of the sealed creation marker
const CREATION_MARKER_TAG: &[u8] = b"created";

/// The file a key operation was working on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRole {
    PublicKey,
    PrivateKey,
    CreationMarker,
}

impl fmt::Display for KeyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            KeyRole::PublicKey => "public key",
            KeyRole::PrivateKey => "private key",
            KeyRole::CreationMarker => "creation marker",
        })
    }
}

/// Key lifecycle errors
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    /// No creation marker: the only condition that allows generation
    #[error("no key generated yet: creation marker is absent")]
    NotYetInitialized,

    /// Marker present but the private key file is gone
    #[error("private key record missing at {}", path.display())]
    KeyRecordMissing { path: PathBuf },

    #[error("{role} is tampered or corrupted: {reason}")]
    TamperOrCorruption { role: KeyRole, reason: String },

    #[error("invalid key configuration: {0}")]
    Configuration(String),

    #[error("failed to seal {role}: {source}")]
    Sealing { role: KeyRole, source: TeeError },

    #[error("I/O error on {role}: {source}")]
    Io { role: KeyRole, source: std::io::Error },

    #[error("failed to encode {role}: {source}")]
    Encoding {
        role: KeyRole,
        source: serde_json::Error,
    },
}

impl KeyError {
    fn from_seal(role: KeyRole, err: SealError) -> Self {
        match err {
            SealError::NotFound { path } => KeyError::Io {
                role,
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{} not found", path.display()),
                ),
            },
            SealError::Integrity { source, .. } => KeyError::TamperOrCorruption {
                role,
                reason: source.to_string(),
            },
            SealError::Seal { source, .. } => KeyError::Sealing { role, source },
            SealError::Io { source, .. } => KeyError::Io { role, source },
        }
    }
}

/// A freshly generated key pair
pub struct GeneratedKey {
    pub public_key: Vec<u8>,
    pub private_key: Zeroizing<Vec<u8>>,
}

/// Contents of the sealed creation marker
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CreationMarker {
    version: String,
    created_at: DateTime<Utc>,
}

/// Lifecycle of one key pair described by a [`KeysConfig`]
///
/// Every call reads sealed storage, so deletion and tampering are seen by a
/// live manager as well as after a restart. One manager serializes its own
/// load-or-generate calls; separate managers over the same paths are not
/// coordinated.
pub struct KeyManager {
    config: KeysConfig,
    codec: SealedCodec,
    /// Key handed out by the previous call
    last_key: Mutex<Option<Zeroizing<Vec<u8>>>>,
}

impl KeyManager {
    pub fn new(config: KeysConfig, codec: SealedCodec) -> Self {
        Self {
            config,
            codec,
            last_key: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &KeysConfig {
        &self.config
    }

    /// Return the stored private key, generating and persisting one with
    /// `generator` only when no key was ever created.
    pub fn get_private_key<F>(&self, generator: F) -> Result<Zeroizing<Vec<u8>>, KeyError>
    where
        F: FnOnce() -> Result<GeneratedKey, KeyError>,
    {
        let mut last_key = self.last_key.lock().unwrap_or_else(|e| e.into_inner());

        let key = match self.load() {
            Ok(key) => {
                if last_key.as_ref().is_some_and(|last| *last != key) {
                    log::warn!(
                        "Private key {} changed on disk since it was last loaded",
                        self.config.private_key_path.display()
                    );
                }
                key
            }
            Err(KeyError::NotYetInitialized) => {
                if self.config.private_key_path.exists() {
                    log::warn!(
                        "Creation marker {} is absent but {} exists, replacing the key",
                        self.config.sealed_date_path.display(),
                        self.config.private_key_path.display()
                    );
                } else {
                    log::info!(
                        "No key created yet for {}, generating",
                        self.config.private_key_path.display()
                    );
                }
                self.generate_and_save(generator)?
            }
            Err(KeyError::KeyRecordMissing { path }) => {
                log::warn!(
                    "Private key {} is missing although a creation marker exists, regenerating",
                    path.display()
                );
                self.generate_and_save(generator)?
            }
            Err(e) => return Err(e),
        };

        *last_key = Some(key.clone());
        Ok(key)
    }

    /// Read the creation marker, then the sealed private key
    pub fn load(&self) -> Result<Zeroizing<Vec<u8>>, KeyError> {
        let marker = match self
            .codec
            .read(&self.config.sealed_date_path, CREATION_MARKER_TAG)
        {
            Ok(bytes) => bytes,
            Err(SealError::NotFound { .. }) => return Err(KeyError::NotYetInitialized),
            Err(e) => return Err(KeyError::from_seal(KeyRole::CreationMarker, e)),
        };
        let marker: CreationMarker =
            serde_json::from_slice(&marker).map_err(|e| KeyError::TamperOrCorruption {
                role: KeyRole::CreationMarker,
                reason: e.to_string(),
            })?;
        if marker.version != self.config.version {
            log::info!(
                "Key at {} was created by version {} on {}, running {}",
                self.config.private_key_path.display(),
                marker.version,
                marker.created_at.to_rfc3339(),
                self.config.version
            );
        }

        match self
            .codec
            .read(&self.config.private_key_path, PRIVATE_KEY_TAG)
        {
            Ok(key) => Ok(Zeroizing::new(key)),
            Err(SealError::NotFound { path }) => Err(KeyError::KeyRecordMissing { path }),
            Err(e) => Err(KeyError::from_seal(KeyRole::PrivateKey, e)),
        }
    }

    /// Persist a key pair: plaintext public key, sealed private key, sealed
    /// creation marker. Stops at the first failing write.
    pub fn save(&self, public_key: &[u8], private_key: &[u8]) -> Result<(), KeyError> {
        let mut last_key = self.last_key.lock().unwrap_or_else(|e| e.into_inner());
        self.persist(public_key, private_key)?;
        *last_key = Some(Zeroizing::new(private_key.to_vec()));
        Ok(())
    }

    /// Contents of the plaintext public key file
    pub fn public_key(&self) -> Result<Vec<u8>, KeyError> {
        std::fs::read(&self.config.public_key_path).map_err(|source| KeyError::Io {
            role: KeyRole::PublicKey,
            source,
        })
    }

    fn generate_and_save<F>(&self, generator: F) -> Result<Zeroizing<Vec<u8>>, KeyError>
    where
        F: FnOnce() -> Result<GeneratedKey, KeyError>,
    {
        let generated = generator()?;
        self.persist(&generated.public_key, &generated.private_key)?;
        Ok(generated.private_key)
    }

    /// The three writes behind `save`; callers hold the `last_key` lock
    fn persist(&self, public_key: &[u8], private_key: &[u8]) -> Result<(), KeyError> {
        std::fs::write(&self.config.public_key_path, public_key).map_err(|source| {
            KeyError::Io {
                role: KeyRole::PublicKey,
                source,
            }
        })?;

        self.codec
            .write(
                &self.config.private_key_path,
                private_key,
                PRIVATE_KEY_TAG,
                self.config.policy,
            )
            .map_err(|e| KeyError::from_seal(KeyRole::PrivateKey, e))?;

        let marker = CreationMarker {
            version: self.config.version.clone(),
            created_at: Utc::now(),
        };
        let marker = serde_json::to_vec(&marker).map_err(|source| KeyError::Encoding {
            role: KeyRole::CreationMarker,
            source,
        })?;
        self.codec
            .write(
                &self.config.sealed_date_path,
                &marker,
                CREATION_MARKER_TAG,
                self.config.policy,
            )
            .map_err(|e| KeyError::from_seal(KeyRole::CreationMarker, e))?;

        log::info!(
            "Saved key pair: public={} ({}..)",
            self.config.public_key_path.display(),
            hex::encode(&public_key[..public_key.len().min(4)])
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tee::{EnclaveMeasurement, SealPolicy, SimulatedEnclave};
    use std::path::Path;
    use std::sync::Arc;

    fn test_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("enclave-keys-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn config(dir: &Path) -> KeysConfig {
        KeysConfig::under(dir, "key", "created", "test")
    }

    fn manager(dir: &Path) -> KeyManager {
        let enclave = SimulatedEnclave::new(EnclaveMeasurement::compute("code", "vendor", 1, 1)).unwrap();
        KeyManager::new(config(dir), SealedCodec::new(Arc::new(enclave)))
    }

    fn random_key() -> Result<GeneratedKey, KeyError> {
        let public: [u8; 32] = rand::random();
        let private: [u8; 32] = rand::random();
        Ok(GeneratedKey {
            public_key: public.to_vec(),
            private_key: Zeroizing::new(private.to_vec()),
        })
    }

    #[test]
    fn test_load_without_marker_is_not_initialized() {
        let dir = test_dir();
        let keys = manager(&dir);
        assert!(matches!(keys.load(), Err(KeyError::NotYetInitialized)));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_save_and_load() {
        let dir = test_dir();
        let keys = manager(&dir);
        keys.save(b"testpub", b"testpriv").unwrap();

        assert_eq!(keys.load().unwrap().as_slice(), b"testpriv");
        assert_eq!(keys.public_key().unwrap(), b"testpub");
        let sealed = std::fs::read(&keys.config().private_key_path).unwrap();
        assert!(!sealed.windows(8).any(|w| w == b"testpriv"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_key_loaded_and_reused() {
        let dir = test_dir();
        let keys = manager(&dir);
        let key1 = keys.get_private_key(random_key).unwrap();
        assert!(keys.config().private_key_path.exists());

        let key2 = keys.get_private_key(random_key).unwrap();
        assert_eq!(key1, key2);

        // a new manager over the same storage is a process restart
        let restarted = manager(&dir);
        let key3 = restarted.get_private_key(random_key).unwrap();
        assert_eq!(key1, key3);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_deleted_private_key_is_regenerated() {
        let dir = test_dir();
        let keys = manager(&dir);
        let key1 = keys.get_private_key(random_key).unwrap();

        std::fs::remove_file(&keys.config().private_key_path).unwrap();
        assert!(matches!(keys.load(), Err(KeyError::KeyRecordMissing { .. })));

        let key2 = keys.get_private_key(random_key).unwrap();
        assert_ne!(key1, key2);
        assert_eq!(keys.load().unwrap(), key2);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_tampered_key_not_used() {
        let dir = test_dir();
        let keys = manager(&dir);
        keys.get_private_key(random_key).unwrap();
        std::fs::write(&keys.config().private_key_path, b"modified").unwrap();

        let err = keys.get_private_key(random_key).unwrap_err();
        assert!(matches!(
            err,
            KeyError::TamperOrCorruption {
                role: KeyRole::PrivateKey,
                ..
            }
        ));
        // the tampered file is left as it was
        assert_eq!(std::fs::read(&keys.config().private_key_path).unwrap(), b"modified");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_swapped_records_are_rejected() {
        let dir = test_dir();
        let keys = manager(&dir);
        keys.get_private_key(random_key).unwrap();

        // the marker blob placed at the private key path fails its context tag
        std::fs::copy(&keys.config().sealed_date_path, &keys.config().private_key_path).unwrap();
        assert!(matches!(
            keys.get_private_key(random_key),
            Err(KeyError::TamperOrCorruption {
                role: KeyRole::PrivateKey,
                ..
            })
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_deleted_marker_replaces_key() {
        let dir = test_dir();
        let keys = manager(&dir);
        let key1 = keys.get_private_key(random_key).unwrap();

        std::fs::remove_file(&keys.config().sealed_date_path).unwrap();
        let key2 = keys.get_private_key(random_key).unwrap();
        assert_ne!(key1, key2);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_other_enclave_build_cannot_read_key() {
        let dir = test_dir();
        manager(&dir).get_private_key(random_key).unwrap();

        let rebuilt = SimulatedEnclave::new(EnclaveMeasurement::compute("code-v2", "vendor", 1, 1)).unwrap();
        let keys = KeyManager::new(config(&dir), SealedCodec::new(Arc::new(rebuilt)));
        assert!(matches!(
            keys.get_private_key(random_key),
            Err(KeyError::TamperOrCorruption {
                role: KeyRole::CreationMarker,
                ..
            })
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_product_policy_survives_rebuild() {
        let dir = test_dir();
        let mut cfg = config(&dir);
        cfg.policy = SealPolicy::Product;

        let v1 = SimulatedEnclave::new(EnclaveMeasurement::compute("code-v1", "vendor", 1, 1)).unwrap();
        let key1 = KeyManager::new(cfg.clone(), SealedCodec::new(Arc::new(v1)))
            .get_private_key(random_key)
            .unwrap();

        let v2 = SimulatedEnclave::new(EnclaveMeasurement::compute("code-v2", "vendor", 1, 1)).unwrap();
        let key2 = KeyManager::new(cfg, SealedCodec::new(Arc::new(v2)))
            .get_private_key(random_key)
            .unwrap();
        assert_eq!(key1, key2);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_concurrent_first_use_generates_one_key() {
        let dir = test_dir();
        let keys = Arc::new(manager(&dir));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let keys = keys.clone();
                std::thread::spawn(move || keys.get_private_key(random_key).unwrap())
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(results.iter().all(|k| *k == results[0]));
        assert_eq!(keys.load().unwrap(), results[0]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_live_manager_follows_storage() {
        let dir = test_dir();
        let keys = manager(&dir);
        let key1 = keys.get_private_key(random_key).unwrap();

        std::fs::remove_file(&keys.config().private_key_path).unwrap();
        let key2 = keys.get_private_key(random_key).unwrap();
        assert_ne!(key1, key2);
        assert!(keys.config().private_key_path.exists());
        assert_eq!(keys.get_private_key(random_key).unwrap(), key2);

        std::fs::write(&keys.config().private_key_path, b"modified").unwrap();
        assert!(matches!(
            keys.get_private_key(random_key),
            Err(KeyError::TamperOrCorruption {
                role: KeyRole::PrivateKey,
                ..
            })
        ));
        // still refused on the next call, nothing served from memory
        assert!(keys.get_private_key(random_key).is_err());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_key_replaced_on_disk_is_served() {
        let dir = test_dir();
        let keys = manager(&dir);
        keys.get_private_key(random_key).unwrap();

        // another manager over the same paths provisions a new key
        manager(&dir).save(b"pub", b"provisioned").unwrap();
        assert_eq!(keys.get_private_key(random_key).unwrap().as_slice(), b"provisioned");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_marker_encoding_error_is_not_io() {
        let source = serde_json::from_str::<u8>("not json").unwrap_err();
        let err = KeyError::Encoding {
            role: KeyRole::CreationMarker,
            source,
        };
        assert!(err.to_string().starts_with("failed to encode creation marker"));
        assert!(!matches!(err, KeyError::Io { .. }));
    }
}
