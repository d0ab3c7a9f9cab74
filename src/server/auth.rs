//! PSK-based authentication for the store API.
//!
//! Implements constant-time comparison to mitigate timing attacks.

use axum::{
    extract::Request,
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use subtle::ConstantTimeEq;

use crate::errors::{AppError, ErrorResponse};

/// Header name for the API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Reject requests that carry neither a matching `x-api-key` header nor a
/// matching bearer token. Without a configured key every request passes.
pub async fn psk_auth_layer(
    expected_psk: Option<String>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = expected_psk else {
        return next.run(request).await;
    };

    let verdict = provided_key(&request).map(|key| constant_time_compare(key, &expected));
    match verdict {
        Some(true) => next.run(request).await,
        Some(false) => {
            tracing::debug!("Rejected {} {}: wrong API key", request.method(), request.uri().path());
            unauthorized_response("Invalid API key")
        }
        None => unauthorized_response("Missing or invalid API key"),
    }
}

/// The key from `x-api-key`, falling back to `Authorization: Bearer`.
fn provided_key(request: &Request) -> Option<&str> {
    let headers = request.headers();
    headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.strip_prefix("Bearer "))
        })
}

fn constant_time_compare(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

fn unauthorized_response(message: &str) -> Response {
    let error = AppError::Unauthorized(message.to_string());
    (error.status_code(), Json(ErrorResponse::new(&error, 0))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request_with(name: &str, value: &str) -> Request {
        Request::builder()
            .uri("/api/tree/board")
            .header(name, value)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("board-key", "board-key"));
        assert!(!constant_time_compare("board-key", "board-kez"));
        assert!(!constant_time_compare("short", "much-longer-key"));
        assert!(constant_time_compare("", ""));
    }

    #[test]
    fn test_key_from_header() {
        let request = request_with(API_KEY_HEADER, "secret");
        assert_eq!(provided_key(&request), Some("secret"));
    }

    #[test]
    fn test_key_from_bearer_token() {
        let request = request_with("authorization", "Bearer secret");
        assert_eq!(provided_key(&request), Some("secret"));

        let request = request_with("authorization", "Basic c2VjcmV0");
        assert_eq!(provided_key(&request), None);
    }
}
