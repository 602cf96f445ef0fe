use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::warn;
use vertex_core::ErrorReport;

/// API key check for the task endpoints.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// Accepted keys. Empty disables authentication.
    pub api_keys: Vec<String>,
}

impl AuthConfig {
    pub fn new(api_keys: Vec<String>) -> Self {
        Self { api_keys }
    }

    pub fn is_enabled(&self) -> bool {
        !self.api_keys.is_empty()
    }

    /// Whether `presented` matches any configured key.
    pub fn accepts(&self, presented: &str) -> bool {
        // Every key is compared so the match position does not leak either.
        self.api_keys
            .iter()
            .fold(false, |found, allowed| constant_time_eq(allowed, presented) | found)
    }
}

/// Byte comparison whose running time depends only on the lengths.
pub fn constant_time_eq(expected: &str, presented: &str) -> bool {
    let a = expected.as_bytes();
    let b = presented.as_bytes();

    if a.len() != b.len() {
        return false;
    }

    let mut diff: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Requires `Authorization: Bearer <key>` when keys are configured.
pub async fn auth_middleware(
    State(auth): State<Arc<AuthConfig>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    if !auth.is_enabled() {
        return next.run(request).await;
    }

    let key = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match key {
        Some(k) if auth.accepts(k) => next.run(request).await,
        other => {
            let message = if other.is_some() {
                "invalid API key"
            } else {
                "API key required"
            };
            warn!(path = %request.uri().path(), "Rejected request: {message}");
            (
                StatusCode::UNAUTHORIZED,
                Json(ErrorReport {
                    kind: "Unauthorized".into(),
                    message: message.into(),
                }),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("secret-key", "secret-key"));
        assert!(!constant_time_eq("secret-key", "secret-kez"));
        assert!(!constant_time_eq("secret-key", "secret"));
        assert!(!constant_time_eq("", "x"));
        assert!(constant_time_eq("", ""));
    }

    #[test]
    fn test_accepts_any_configured_key() {
        let auth = AuthConfig::new(vec!["alpha".into(), "beta".into()]);
        assert!(auth.accepts("alpha"));
        assert!(auth.accepts("beta"));
        assert!(!auth.accepts("gamma"));
        assert!(!AuthConfig::default().accepts("alpha"));
    }
}
