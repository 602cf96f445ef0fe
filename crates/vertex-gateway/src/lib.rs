//! HTTP gateway for the orchestration engine.
//!
//! | route | operation |
//! |---|---|
//! | `POST /tasks` | submit a task, `202` with its id |
//! | `GET /tasks/{id}` | task status, results and error |
//! | `DELETE /tasks/{id}` | cancel |
//! | `GET /metrics` | metrics snapshot |
//! | `GET /algorithms` | registered algorithm descriptors, optionally `?category=` |
//! | `POST /pool` | resize the vertex pool |
//! | `GET /health` | liveness and current budget tier |
//!
//! Errors are returned as JSON [`ErrorReport`](vertex_core::ErrorReport)s.

/// Error to response mapping.
pub mod error;
/// API key authentication.
pub mod middleware;
/// Router construction and serving.
pub mod server;

pub use error::ApiError;
pub use middleware::AuthConfig;
pub use server::{GatewayServer, ServerConfig, SubmitResponse};
