//! Shared types for the HTTP API layer.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::Multipart;

use crate::api::error::ApiError;
use crate::core_state::CoreState;
use crate::intake::{EcgUpload, UploadedFile, HEADER_FIELD, SIGNAL_FIELD};

// ═══════════════════════════════════════════════════════════
// API context: shared state for the router
// ═══════════════════════════════════════════════════════════

/// Shared context for all API routes.
#[derive(Clone)]
pub struct ApiContext {
    pub core: Arc<CoreState>,
}

impl ApiContext {
    pub fn new(core: Arc<CoreState>) -> Self {
        Self { core }
    }
}

// ═══════════════════════════════════════════════════════════
// Multipart form: ECG pair plus text fields
// ═══════════════════════════════════════════════════════════

/// A multipart body split into the ECG file fields and plain text fields.
#[derive(Debug, Default)]
pub struct EcgForm {
    header: Option<UploadedFile>,
    signal: Option<UploadedFile>,
    text: HashMap<String, String>,
}

impl EcgForm {
    pub async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = EcgForm::default();

        loop {
            let field = match multipart.next_field().await {
                Ok(Some(field)) => field,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Failed to read multipart body: {e}");
                    return Err(ApiError::BadRequest(format!("Malformed upload: {}", e.body_text())));
                }
            };

            let name = field.name().unwrap_or("").to_string();
            if name == HEADER_FIELD || name == SIGNAL_FIELD {
                let filename = field.file_name().unwrap_or("").to_string();
                let bytes = field.bytes().await.map_err(|e| {
                    tracing::warn!("Failed to read upload bytes: {e}");
                    ApiError::BadRequest("Failed to read file data.".into())
                })?;
                let file = UploadedFile::new(&filename, bytes.to_vec());
                if name == HEADER_FIELD {
                    form.header = Some(file);
                } else {
                    form.signal = Some(file);
                }
            } else if !name.is_empty() {
                let value = field.text().await.unwrap_or_default();
                form.text.insert(name, value);
            }
        }

        Ok(form)
    }

    /// Validated pair, or `None` when neither file was sent.
    pub fn take_upload(&mut self) -> Result<Option<EcgUpload>, ApiError> {
        Ok(EcgUpload::from_parts(self.header.take(), self.signal.take())?)
    }

    /// Validated pair; both files are mandatory.
    pub fn require_upload(&mut self) -> Result<EcgUpload, ApiError> {
        let missing = if self.header.is_none() {
            Some(HEADER_FIELD)
        } else if self.signal.is_none() {
            Some(SIGNAL_FIELD)
        } else {
            None
        };
        if let Some(field) = missing {
            return Err(crate::intake::UploadError::MissingFile(field).into());
        }
        self.take_upload()?
            .ok_or(ApiError::BadRequest("No ECG files provided".into()))
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.text.get(name).map(String::as_str)
    }
}
