//! Attachment staging area.
//!
//! Uploaded payloads are written to disk before the send is queued, so the
//! dispatch worker never depends on the lifetime of the HTTP request that
//! carried them. Staged files live until the owning dispatch item finishes,
//! then are removed regardless of the send outcome.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

use wagate_protocol::MessagePayload;

/// Audio uploads are re-declared with this container type; the network's
/// voice-note player ignores the uploaded MIME.
const AUDIO_MIME: &str = "audio/mp4";

const IMAGE_EXTENSIONS: &[&str] = &["jpeg", "jpg", "png", "gif"];
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "ogg"];

// ============================================================================
// StagedAttachment
// ============================================================================

/// A payload written to the staging area, plus the metadata the client
/// declared for it.
#[derive(Debug, Clone)]
pub struct StagedAttachment {
    pub path: PathBuf,
    pub file_name: String,
    pub mime_type: String,
    pub size: u64,
}

impl StagedAttachment {
    /// Build the outbound payload for this attachment from its file
    /// extension: known image extensions become an image message with the
    /// caption, known audio extensions become a voice note, anything else
    /// ships as a document under its declared name and MIME.
    pub fn classify(&self, caption: &str) -> MessagePayload {
        let extension = Path::new(&self.file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        if IMAGE_EXTENSIONS.contains(&extension.as_str()) {
            MessagePayload::Image {
                path: self.path.clone(),
                caption: caption.to_string(),
            }
        } else if AUDIO_EXTENSIONS.contains(&extension.as_str()) {
            MessagePayload::Audio {
                path: self.path.clone(),
                mime: AUDIO_MIME.to_string(),
            }
        } else {
            MessagePayload::Document {
                path: self.path.clone(),
                file_name: self.file_name.clone(),
                mime: self.mime_type.clone(),
                caption: caption.to_string(),
            }
        }
    }
}

// ============================================================================
// Staging
// ============================================================================

/// Writes uploads into the staging directory and removes them after use.
#[derive(Debug, Clone)]
pub struct Staging {
    dir: PathBuf,
}

impl Staging {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Write `payload` under a timestamp-prefixed unique name, creating the
    /// staging directory if it does not exist yet.
    pub async fn stage(
        &self,
        declared_name: &str,
        mime_type: &str,
        payload: Bytes,
    ) -> Result<StagedAttachment, StagingError> {
        fs::create_dir_all(&self.dir).await?;

        // Clients declare the name; keep only the final path component.
        let file_name = Path::new(declared_name)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload.bin")
            .to_string();

        let staged_name = format!("{}_{}", chrono::Utc::now().timestamp_millis(), file_name);
        let path = self.dir.join(&staged_name);
        let size = payload.len() as u64;

        fs::write(&path, &payload).await?;
        debug!(path = %path.display(), size, "staged attachment");

        Ok(StagedAttachment {
            path,
            file_name,
            mime_type: mime_type.to_string(),
            size,
        })
    }

    /// Remove a staged file. Takes the attachment by value so each staged
    /// payload is released exactly once; failures are logged and swallowed
    /// because the send outcome has already been decided.
    pub async fn release(&self, attachment: StagedAttachment) {
        if let Err(e) = fs::remove_file(&attachment.path).await {
            warn!(
                path = %attachment.path.display(),
                error = %e,
                "failed to remove staged attachment"
            );
        }
    }
}

// ============================================================================
// StagingError
// ============================================================================

#[derive(Debug, Error)]
pub enum StagingError {
    #[error("failed to write staged attachment: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// Tests
// ============================================================================
