//! ECG record upload intake.
//!
//! An upload is a header file plus its signal file. Names are sanitized and the
//! pair is validated (extensions, matching basenames, non-empty payloads)
//! before anything is written to disk or handed to the analysis pipeline.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use thiserror::Error;
use uuid::Uuid;

use crate::models::EcgFiles;

/// Multipart field carrying the signal payload.
pub const SIGNAL_FIELD: &str = "mat_file";
/// Multipart field carrying the header.
pub const HEADER_FIELD: &str = "hea_file";

const HEADER_EXTENSIONS: &[&str] = &["hea"];
const SIGNAL_EXTENSIONS: &[&str] = &["mat", "dat"];

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Missing upload field '{0}'")]
    MissingFile(&'static str),

    #[error("Uploaded file '{0}' is empty")]
    EmptyFile(String),

    #[error("'{file_name}' must have one of the extensions: {expected}")]
    InvalidExtension { file_name: String, expected: String },

    #[error("Header '{header}' and signal '{signal}' must share a basename")]
    BasenameMismatch { header: String, signal: String },

    #[error("Invalid upload: {0}")]
    Malformed(String),

    #[error("Failed to store upload: {0}")]
    Io(#[from] std::io::Error),
}

/// One uploaded file, name already sanitized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(raw_name: &str, bytes: Vec<u8>) -> Self {
        Self {
            file_name: sanitize_filename(raw_name),
            bytes,
        }
    }
}

/// A validated header/signal pair, not yet on disk.
#[derive(Debug, Clone)]
pub struct EcgUpload {
    header: UploadedFile,
    signal: UploadedFile,
}

/// A pair staged in a temporary directory; removed on drop.
pub struct StagedRecord {
    _dir: TempDir,
    pub files: EcgFiles,
}

impl EcgUpload {
    /// Validate a pair. Performs no I/O.
    pub fn new(header: UploadedFile, signal: UploadedFile) -> Result<Self, UploadError> {
        validate_pair(&header.file_name, &signal.file_name)?;
        for file in [&header, &signal] {
            if file.bytes.is_empty() {
                return Err(UploadError::EmptyFile(file.file_name.clone()));
            }
        }
        Ok(Self { header, signal })
    }

    /// Build from optional form parts. Both absent → `Ok(None)`; one absent → error.
    pub fn from_parts(
        header: Option<UploadedFile>,
        signal: Option<UploadedFile>,
    ) -> Result<Option<Self>, UploadError> {
        match (header, signal) {
            (None, None) => Ok(None),
            (Some(h), Some(s)) => Self::new(h, s).map(Some),
            (None, Some(_)) => Err(UploadError::MissingFile(HEADER_FIELD)),
            (Some(_), None) => Err(UploadError::MissingFile(SIGNAL_FIELD)),
        }
    }

    pub fn header_name(&self) -> &str {
        &self.header.file_name
    }

    pub fn signal_name(&self) -> &str {
        &self.signal.file_name
    }

    /// Write both files into `dir` (created if needed).
    pub fn write_to(&self, dir: &Path) -> Result<EcgFiles, UploadError> {
        std::fs::create_dir_all(dir)?;
        let header_path = dir.join(&self.header.file_name);
        let signal_path = dir.join(&self.signal.file_name);
        std::fs::write(&header_path, &self.header.bytes)?;
        std::fs::write(&signal_path, &self.signal.bytes)?;
        Ok(EcgFiles {
            header_path,
            signal_path,
        })
    }

    /// Stage for a one-off analysis.
    pub fn stage_temp(&self) -> Result<StagedRecord, UploadError> {
        let dir = tempfile::Builder::new().prefix("ecg-upload-").tempdir()?;
        let files = self.write_to(dir.path())?;
        Ok(StagedRecord { _dir: dir, files })
    }

    /// Store permanently under `<root>/<uuid>/`.
    pub fn store(&self, root: &Path) -> Result<EcgFiles, UploadError> {
        let dir = root.join(Uuid::new_v4().to_string());
        let files = self.write_to(&dir)?;
        tracing::info!(
            dir = %dir.display(),
            header = %self.header.file_name,
            signal = %self.signal.file_name,
            "Stored ECG record"
        );
        Ok(files)
    }
}

/// Extension and basename checks on already sanitized names.
pub fn validate_pair(header_name: &str, signal_name: &str) -> Result<(), UploadError> {
    check_extension(header_name, HEADER_EXTENSIONS)?;
    check_extension(signal_name, SIGNAL_EXTENSIONS)?;

    if basename(header_name) != basename(signal_name) {
        return Err(UploadError::BasenameMismatch {
            header: header_name.to_string(),
            signal: signal_name.to_string(),
        });
    }
    Ok(())
}

fn check_extension(file_name: &str, allowed: &[&str]) -> Result<(), UploadError> {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext {
        Some(ext) if allowed.contains(&ext.as_str()) => Ok(()),
        _ => Err(UploadError::InvalidExtension {
            file_name: file_name.to_string(),
            expected: allowed
                .iter()
                .map(|e| format!(".{e}"))
                .collect::<Vec<_>>()
                .join(", "),
        }),
    }
}

fn basename(file_name: &str) -> Option<&str> {
    Path::new(file_name).file_stem().and_then(|s| s.to_str())
}

/// Sanitize a filename: drops directory components and special characters.
pub fn sanitize_filename(name: &str) -> String {
    // Only the last path component, whichever separator the client used
    let last = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();

    let sanitized: String = last
        .chars()
        .filter(|&c| c != '\0')
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    // Remove consecutive dots (path traversal prevention)
    let sanitized = sanitized.replace("..", "");

    // Truncate to 100 characters
    let sanitized = if sanitized.len() > 100 {
        sanitized[..100].to_string()
    } else {
        sanitized
    };

    if sanitized.is_empty() || sanitized.chars().all(|c| c == '.') {
        "record".into()
    } else {
        sanitized
    }
}

/// Directory holding a stored pair, for cleanup after a failed visit write.
pub fn upload_dir(files: &EcgFiles) -> Option<PathBuf> {
    files.header_path.parent().map(Path::to_path_buf)
}
