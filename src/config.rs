//! Configuration: file layout for keys and responses
//!
//! All paths live under one application directory (`mount` by default),
//! created with owner-only permissions before anything is written to it.

use crate::tee::SealPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default application directory, relative to the working directory
pub const DEFAULT_ROOT: &str = "mount";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Where the JSON response artifact is written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseConfig {
    pub response_path: PathBuf,
}

/// Storage for one managed key pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysConfig {
    /// Plaintext public key
    pub public_key_path: PathBuf,
    /// Sealed private key
    pub private_key_path: PathBuf,
    /// Sealed creation marker
    pub sealed_date_path: PathBuf,
    /// Application version recorded in the creation marker
    pub version: String,
    /// Sealing policy for the private key and the marker
    #[serde(default)]
    pub policy: SealPolicy,
}

impl KeysConfig {
    /// `<root>/<name>.pub`, `<root>/<name>.priv.enc`, `<root>/<marker>.enc`
    pub fn under(root: &Path, name: &str, marker: &str, version: &str) -> Self {
        Self {
            public_key_path: root.join(format!("{}.pub", name)),
            private_key_path: root.join(format!("{}.priv.enc", name)),
            sealed_date_path: root.join(format!("{}.enc", marker)),
            version: version.to_string(),
            policy: SealPolicy::default(),
        }
    }
}

/// Paths used by report signing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportsConfig {
    pub public_keys_path: PathBuf,
    pub signature_request_path: PathBuf,
    pub signature_import_path: PathBuf,
    pub signature_export_path: PathBuf,
}

/// All configuration sections
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub response: ResponseConfig,
    pub reports: ReportsConfig,
    pub signature_keys: KeysConfig,
    pub encryption_keys: KeysConfig,
}

impl Config {
    /// Default layout under [`DEFAULT_ROOT`]
    pub fn load(app_version: &str) -> Result<Self, ConfigError> {
        Self::with_root(DEFAULT_ROOT, app_version)
    }

    /// Default layout under `root`, creating the directory if needed
    pub fn with_root(root: impl AsRef<Path>, app_version: &str) -> Result<Self, ConfigError> {
        let root = root.as_ref();
        let cfg = Self {
            response: ResponseConfig {
                response_path: root.join("response.json"),
            },
            reports: ReportsConfig {
                public_keys_path: root.join("report_keys.pub"),
                signature_request_path: root.join("report_signature_request.pub"),
                signature_import_path: root.join("report_signature_import.enc"),
                signature_export_path: root.join("report_signature_export.enc"),
            },
            signature_keys: KeysConfig::under(root, "signature_key", "signature_created", app_version),
            encryption_keys: KeysConfig::under(root, "box_key", "box_created", app_version),
        };

        ensure_private_dir(root)?;
        log::debug!("Config loaded: root={}, version={}", root.display(), app_version);
        Ok(cfg)
    }

    /// Read a JSON config file; the directories it names must already exist
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&json)?)
    }
}

fn ensure_private_dir(dir: &Path) -> Result<(), ConfigError> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir).map_err(|source| ConfigError::Io {
        path: dir.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_dir() -> PathBuf {
        std::env::temp_dir().join(format!("enclave-config-test-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_with_root_creates_directory() {
        let root = test_dir();
        let cfg = Config::with_root(&root, "econf-test").unwrap();
        assert!(root.is_dir());
        assert_eq!(cfg.signature_keys.version, "econf-test");
        assert_eq!(cfg.signature_keys.public_key_path, root.join("signature_key.pub"));
        assert_eq!(cfg.signature_keys.private_key_path, root.join("signature_key.priv.enc"));
        assert_eq!(cfg.signature_keys.sealed_date_path, root.join("signature_created.enc"));
        assert_eq!(cfg.encryption_keys.private_key_path, root.join("box_key.priv.enc"));
        assert_eq!(cfg.response.response_path, root.join("response.json"));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[cfg(unix)]
    #[test]
    fn test_directory_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let root = test_dir();
        Config::with_root(&root, "v1").unwrap();
        let mode = std::fs::metadata(&root).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn test_from_file() {
        let root = test_dir();
        let cfg = Config::with_root(&root, "v2").unwrap();
        let path = root.join("config.json");
        std::fs::write(&path, serde_json::to_string_pretty(&cfg).unwrap()).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded, cfg);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn test_policy_defaults_to_unique() {
        let json = r#"{
            "public_key_path": "k.pub",
            "private_key_path": "k.priv.enc",
            "sealed_date_path": "created.enc",
            "version": "test"
        }"#;
        let keys: KeysConfig = serde_json::from_str(json).unwrap();
        assert_eq!(keys.policy, SealPolicy::Unique);
    }
}
