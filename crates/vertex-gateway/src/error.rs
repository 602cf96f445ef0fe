use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::warn;
use vertex_core::{ErrorReport, VertexError};

/// A [`VertexError`] rendered as a JSON [`ErrorReport`] with a matching status.
#[derive(Debug)]
pub struct ApiError(pub VertexError);

impl From<VertexError> for ApiError {
    fn from(e: VertexError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            VertexError::Validation(_) | VertexError::Json(_) => StatusCode::BAD_REQUEST,
            VertexError::AlgorithmNotFound(_) | VertexError::TaskNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            VertexError::ResourceExhausted(_) => StatusCode::TOO_MANY_REQUESTS,
            VertexError::BudgetExceeded(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self.0, "Request failed");
        }
        (status, Json(ErrorReport::from(&self.0))).into_response()
    }
}
