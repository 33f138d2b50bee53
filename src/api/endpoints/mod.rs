//! API endpoint handlers.
//!
//! Handlers reuse the analysis pipeline and visit workflows; none of them
//! touch record files or the classifier directly.

pub mod analysis;
pub mod health;
pub mod visits;

use uuid::Uuid;

use crate::api::error::ApiError;

pub(crate) fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("Invalid visit ID: {raw}")))
}
