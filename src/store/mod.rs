//! Encrypted persistence for the session snapshot and token cache
//!
//! Each [`SecureStore`] owns exactly one file. Reads never fail hard: a
//! missing, corrupt or undecryptable file reads as "nothing stored", which
//! sends the caller back through interactive login.

pub mod crypto;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub use crypto::{is_encrypted, Sealer};

/// One encrypted JSON document on disk.
pub struct SecureStore<T> {
    path: PathBuf,
    sealer: Sealer,
    _doc: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> SecureStore<T> {
    pub fn new(path: PathBuf, sealer: Sealer) -> Self {
        Self {
            path,
            sealer,
            _doc: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Encrypt and atomically replace the file (temp file + rename).
    pub fn write(&self, doc: &T) -> Result<()> {
        let dir = self
            .path
            .parent()
            .context("Store path has no parent directory")?;
        fs::create_dir_all(dir).context("Failed to create store directory")?;

        let json = serde_json::to_vec(doc).context("Failed to serialize document")?;
        let sealed = self.sealer.seal(&json)?;

        let file_name = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("store");
        let tmp = dir.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

        let result = (|| -> Result<()> {
            let mut file = crypto::owner_only_file(&tmp).context("Failed to create temp file")?;
            file.write_all(&sealed).context("Failed to write temp file")?;
            file.sync_all().context("Failed to flush temp file")?;
            fs::rename(&tmp, &self.path).context("Failed to replace store file")?;
            Ok(())
        })();
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))
                .context("Failed to set store permissions")?;
        }

        tracing::debug!("Wrote {}", self.path.display());
        Ok(())
    }

    /// Read and decrypt the document.
    ///
    /// Legacy plaintext JSON is returned and immediately re-written
    /// encrypted. Anything unreadable is logged and reported as absent.
    pub fn read(&self) -> Option<T> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!("Session file {} unreadable: {}", self.path.display(), e);
                return None;
            }
        };

        if is_encrypted(&bytes) {
            let decoded = self
                .sealer
                .open(&bytes)
                .and_then(|plain| serde_json::from_slice(&plain).context("Bad document JSON"));
            return match decoded {
                Ok(doc) => Some(doc),
                Err(e) => {
                    tracing::warn!(
                        "Session file {} could not be decrypted ({:#}); treating as absent",
                        self.path.display(),
                        e
                    );
                    None
                }
            };
        }

        match serde_json::from_slice::<T>(&bytes) {
            Ok(doc) => {
                tracing::info!("Migrating plaintext {} to encrypted form", self.path.display());
                if let Err(e) = self.write(&doc) {
                    tracing::warn!("Plaintext migration failed: {:#}", e);
                }
                Some(doc)
            }
            Err(e) => {
                tracing::warn!(
                    "Session file {} is neither encrypted nor valid JSON ({}); treating as absent",
                    self.path.display(),
                    e
                );
                None
            }
        }
    }

    /// Delete the file. Succeeds if it does not exist.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!("Removed {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", self.path.display())),
        }
    }

    /// Hours since the file was last written, from its modification time.
    pub fn age_hours(&self) -> Option<f64> {
        let modified = fs::metadata(&self.path).ok()?.modified().ok()?;
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or_default();
        Some(age.as_secs_f64() / 3600.0)
    }
}
