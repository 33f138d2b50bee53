//! API error types with structured JSON responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::core_state::CoreError;
use crate::db::DatabaseError;
use crate::ecg::EcgError;
use crate::intake::UploadError;
use crate::visits::VisitError;

/// Error response body: `{success: false, error, code}`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
    pub code: &'static str,
}

/// API-level errors with HTTP status mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("{0}")]
    Upload(#[from] UploadError),
    #[error("{0}")]
    Ecg(#[from] EcgError),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::NotFound(detail) => (StatusCode::NOT_FOUND, "NOT_FOUND", detail.clone()),
            ApiError::BadRequest(detail) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", detail.clone()),
            ApiError::Upload(e) => (StatusCode::BAD_REQUEST, "INVALID_UPLOAD", e.to_string()),
            ApiError::Ecg(e) => ecg_parts(e),
            ApiError::Internal(detail) => {
                tracing::error!(detail, "API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "An internal error occurred".to_string(),
                )
            }
        }
    }
}

fn ecg_parts(err: &EcgError) -> (StatusCode, &'static str, String) {
    match err {
        EcgError::RecordFormat { .. } if err.is_missing_file() => {
            (StatusCode::NOT_FOUND, "RECORD_NOT_FOUND", err.to_string())
        }
        EcgError::RecordFormat { reason, .. } => {
            // Server-side paths stay out of the client message
            (
                StatusCode::BAD_REQUEST,
                "INVALID_RECORD",
                format!("could not read ECG record: {reason}"),
            )
        }
        EcgError::ChannelCountMismatch { .. } => {
            (StatusCode::BAD_REQUEST, "CHANNEL_MISMATCH", err.to_string())
        }
        EcgError::UnknownLead { .. } => (StatusCode::BAD_REQUEST, "UNKNOWN_LEAD", err.to_string()),
        EcgError::ModelUnavailable(detail) => {
            tracing::warn!(detail = %detail, "ECG analysis requested while model unavailable");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "MODEL_UNAVAILABLE",
                "ECG analysis model not available".to_string(),
            )
        }
        EcgError::Shape { .. } | EcgError::Inference(_) => {
            tracing::error!(error = %err, "ECG pipeline internal error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL",
                "An internal error occurred".to_string(),
            )
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        let body = ErrorBody {
            success: false,
            error: message,
            code,
        };
        (status, Json(body)).into_response()
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound { entity_type, id } => {
                ApiError::NotFound(format!("{entity_type} {id} not found"))
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<VisitError> for ApiError {
    fn from(err: VisitError) -> Self {
        match err {
            VisitError::NotFound(id) => ApiError::NotFound(format!("Visit {id} not found")),
            VisitError::NoEcg(id) => ApiError::NotFound(format!("Visit {id} has no ECG record")),
            VisitError::Invalid(detail) => ApiError::BadRequest(detail),
            VisitError::Upload(e) => ApiError::Upload(e),
            VisitError::Ecg(e) => ApiError::Ecg(e),
            VisitError::Database(e) => e.into(),
            VisitError::Core(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecg::RecordFormatReason;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> serde_json::Value {
        let body = to_bytes(response.into_body(), 4096).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn error_body_shape() {
        let response = ApiError::BadRequest("Invalid ID format".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "Invalid ID format");
        assert_eq!(json["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn basename_mismatch_returns_400() {
        let err = UploadError::BasenameMismatch {
            header: "B2.hea".into(),
            signal: "A1.mat".into(),
        };
        let response = ApiError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "INVALID_UPLOAD");
    }

    #[tokio::test]
    async fn missing_record_returns_404() {
        let err = EcgError::RecordFormat {
            path: "/srv/ecg/A1.mat".into(),
            reason: RecordFormatReason::MissingFile,
        };
        let response = ApiError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_record_returns_400_without_path() {
        let err = EcgError::RecordFormat {
            path: "/srv/ecg/A1.mat".into(),
            reason: RecordFormatReason::Truncated {
                expected: 100,
                actual: 10,
            },
        };
        let response = ApiError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        let message = json["error"].as_str().unwrap();
        assert!(message.starts_with("could not read ECG record"));
        assert!(!message.contains("/srv/ecg"));
    }

    #[tokio::test]
    async fn read_timeout_returns_400() {
        let err = EcgError::RecordFormat {
            path: "/srv/ecg/A1.mat".into(),
            reason: RecordFormatReason::Timeout(std::time::Duration::from_millis(250)),
        };
        let response = ApiError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["code"], "INVALID_RECORD");
        assert_eq!(
            json["error"],
            "could not read ECG record: read timed out after 250ms"
        );
    }

    #[tokio::test]
    async fn channel_mismatch_returns_400() {
        let err = EcgError::ChannelCountMismatch {
            record: "A1".into(),
            expected: 12,
            actual: 8,
        };
        let response = ApiError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"], "ECG record A1 has 8 leads, model expects 12");
    }

    #[tokio::test]
    async fn model_unavailable_returns_500() {
        let response = ApiError::from(EcgError::ModelUnavailable("missing".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        assert_eq!(json["code"], "MODEL_UNAVAILABLE");
        assert_eq!(json["error"], "ECG analysis model not available");
    }

    #[tokio::test]
    async fn shape_error_is_hidden() {
        let err = EcgError::Shape {
            context: "classifier output",
            expected: "[9]".into(),
            actual: "[5]".into(),
        };
        let response = ApiError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        // Internal errors hide details from client
        assert_eq!(body_json(response).await["error"], "An internal error occurred");
    }

    #[tokio::test]
    async fn visit_not_found_returns_404() {
        let err = VisitError::NotFound(uuid::Uuid::nil());
        let response = ApiError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn database_errors_are_internal() {
        let err = DatabaseError::ConstraintViolation("boom".into());
        let response = ApiError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
