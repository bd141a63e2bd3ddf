//! HTTP API for the discovery service

pub mod handlers;
pub mod routes;

pub use handlers::{ApiState, AppError, ServerState};
pub use routes::create_router;
