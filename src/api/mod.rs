//! HTTP API.
//!
//! Routes are nested under `/api/`. Handlers translate requests into calls on
//! [`CoreState`](crate::core_state::CoreState) and map errors through
//! [`ApiError`](error::ApiError).

pub mod endpoints;
pub mod error;
pub mod router;
pub mod server;
pub mod types;

pub use router::api_router;
pub use server::{start_api_server, ApiServer, ServerError};
pub use types::ApiContext;
