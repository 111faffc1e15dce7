//! Sealed Storage: files encrypted with the enclave's sealing key
//!
//! Every file is sealed under a context tag naming its role, so a sealed
//! blob moved into another role's path fails to unseal.
//! - A missing file is reported as [`SealError::NotFound`]
//! - A file that fails authentication is [`SealError::Integrity`], never
//!   recovered silently

use super::enclave::{SealPolicy, SealingProvider, TeeError};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Sealed file read/write errors
#[derive(Debug, thiserror::Error)]
pub enum SealError {
    #[error("sealed file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("sealed file {} failed to unseal: {source}", path.display())]
    Integrity { path: PathBuf, source: TeeError },

    #[error("sealing failed for {}: {source}", path.display())]
    Seal { path: PathBuf, source: TeeError },

    #[error("I/O error on {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
}

/// Reads and writes sealed files through a [`SealingProvider`]
#[derive(Clone)]
pub struct SealedCodec {
    provider: Arc<dyn SealingProvider>,
}

impl SealedCodec {
    pub fn new(provider: Arc<dyn SealingProvider>) -> Self {
        Self { provider }
    }

    /// Seal `plaintext` and write it to `path`, replacing any existing file
    pub fn write(
        &self,
        path: &Path,
        plaintext: &[u8],
        context_tag: &[u8],
        policy: SealPolicy,
    ) -> Result<(), SealError> {
        let sealed = self
            .provider
            .seal(plaintext, context_tag, policy)
            .map_err(|source| SealError::Seal {
                path: path.to_path_buf(),
                source,
            })?;
        write_private_file(path, &sealed).map_err(|source| SealError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        log::debug!(
            "Sealed {} bytes to {} ({:?})",
            plaintext.len(),
            path.display(),
            policy
        );
        Ok(())
    }

    /// Read `path` and unseal it under `context_tag`
    pub fn read(&self, path: &Path, context_tag: &[u8]) -> Result<Vec<u8>, SealError> {
        let sealed = std::fs::read(path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                SealError::NotFound {
                    path: path.to_path_buf(),
                }
            } else {
                SealError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        self.provider
            .unseal(&sealed, context_tag)
            .map_err(|source| SealError::Integrity {
                path: path.to_path_buf(),
                source,
            })
    }
}

/// Write with owner-only permissions on unix
pub(crate) fn write_private_file(path: &Path, data: &[u8]) -> io::Result<()> {
    use std::io::Write;

    let mut options = std::fs::OpenOptions::new();
    options.create(true).write(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(data)?;
    file.sync_all()
}
