use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Transport-level upload failures, each with its fixed caller message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadFailure {
    /// Body larger than the server-wide limit
    IniSize,
    /// Body larger than the limit the form declared
    FormSize,
    /// Stream ended before the part was complete
    Partial,
    NoFile,
    NoTmpDir,
    CantWrite,
    /// Rejected by a request filter
    Extension,
}

impl UploadFailure {
    pub fn message(self) -> &'static str {
        match self {
            UploadFailure::IniSize => "Il file supera la dimensione massima consentita",
            UploadFailure::FormSize => "Il file supera la dimensione massima specificata nel form",
            UploadFailure::Partial => "Il file è stato caricato solo parzialmente",
            UploadFailure::NoFile => "Nessun file è stato caricato",
            UploadFailure::NoTmpDir => "Directory temporanea mancante",
            UploadFailure::CantWrite => "Impossibile scrivere il file su disco",
            UploadFailure::Extension => "Caricamento interrotto da un'estensione",
        }
    }
}

impl fmt::Display for UploadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// A received upload parked in a uniquely named temp file. The file is
/// removed when this value is dropped.
#[derive(Debug)]
pub struct StagedUpload {
    /// Name the client sent, unsanitized
    pub file_name: String,
    path: PathBuf,
}

impl StagedUpload {
    /// Create an empty staging file under `temp_dir`.
    pub async fn create(temp_dir: &Path, file_name: impl Into<String>) -> Result<(Self, tokio::fs::File), UploadFailure> {
        if !tokio::fs::metadata(temp_dir).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Err(UploadFailure::NoTmpDir);
        }
        let path = temp_dir.join(format!("devfm-upload-{}", uuid::Uuid::new_v4()));
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| {
                debug!("cannot create staging file {}: {}", path.display(), e);
                UploadFailure::CantWrite
            })?;
        Ok((
            Self {
                file_name: file_name.into(),
                path,
            },
            file,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedUpload {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                debug!("leaving staging file {}: {}", self.path.display(), e);
            }
        }
    }
}
