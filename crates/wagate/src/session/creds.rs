//! Credential persistence.
//!
//! One file per credential entry under the credentials directory. Entry
//! contents are opaque; only the driver understands them. Writes go through
//! a temp file, fsync, then rename, because a torn credential file is
//! indistinguishable from a revoked session at the next startup.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use wagate_protocol::{CredentialBundle, CredentialEntry};

// ============================================================================
// CredentialStore
// ============================================================================

/// Directory-backed store for one account's authentication state.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Load the persisted bundle. `None` when the directory does not exist
    /// or holds no entries, meaning the session must pair from scratch.
    pub async fn load(&self) -> Result<Option<CredentialBundle>, CredsError> {
        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(d) => d,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CredsError::io(&self.dir, e)),
        };

        let mut entries = Vec::new();
        while let Some(dirent) = dir
            .next_entry()
            .await
            .map_err(|e| CredsError::io(&self.dir, e))?
        {
            let path = dirent.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            // An interrupted atomic write can leave a temp file behind.
            if name.ends_with(".tmp") {
                continue;
            }
            let data = fs::read(&path)
                .await
                .map_err(|e| CredsError::io(&path, e))?;
            entries.push(CredentialEntry::new(name, data));
        }

        if entries.is_empty() {
            return Ok(None);
        }
        // Directory iteration order is unspecified.
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Some(CredentialBundle { entries }))
    }

    /// Persist one entry atomically, replacing any previous version.
    pub async fn save_entry(&self, entry: &CredentialEntry) -> Result<(), CredsError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| CredsError::io(&self.dir, e))?;

        let name = sanitize_name(&entry.name);
        let final_path = self.dir.join(&name);
        let temp_path = self
            .dir
            .join(format!("{}.{}.tmp", name, ulid::Ulid::new()));

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| CredsError::io(&temp_path, e))?;
        file.write_all(&entry.data)
            .await
            .map_err(|e| CredsError::io(&temp_path, e))?;
        file.sync_all()
            .await
            .map_err(|e| CredsError::io(&temp_path, e))?;
        fs::rename(&temp_path, &final_path)
            .await
            .map_err(|e| CredsError::io(&final_path, e))?;

        debug!(entry = %name, "persisted credential entry");
        Ok(())
    }

    /// Persist every entry in a bundle.
    pub async fn save_bundle(&self, bundle: &CredentialBundle) -> Result<(), CredsError> {
        for entry in &bundle.entries {
            self.save_entry(entry).await?;
        }
        Ok(())
    }

    /// Delete the entire store in one operation. A missing directory counts
    /// as already wiped.
    pub async fn wipe(&self) -> Result<(), CredsError> {
        match fs::remove_dir_all(&self.dir).await {
            Ok(()) => {
                debug!(dir = %self.dir.display(), "credential store wiped");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CredsError::io(&self.dir, e)),
        }
    }
}

/// Entry names come from the driver; keep only the final path component so
/// they cannot escape the store directory.
fn sanitize_name(name: &str) -> String {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("entry")
        .to_string()
}

// ============================================================================
// CredsError
// ============================================================================

#[derive(Debug, Error)]
#[error("credential store io at {}: {source}", path.display())]
pub struct CredsError {
    path: PathBuf,
    #[source]
    source: std::io::Error,
}

impl CredsError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self {
            path: path.into(),
            source,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
