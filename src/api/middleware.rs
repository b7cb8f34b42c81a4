use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Method, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;

use super::models::ErrorResponse;
use super::AppState;

/// Authentication middleware.
///
/// If `Config::api_key` is `Some`, require `Authorization: Bearer {key}` on
/// every request. Returns 401 if the header is missing or doesn't match.
pub async fn require_auth(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if let Some(ref expected) = state.config.api_key {
        let auth_header = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());

        match auth_header {
            Some(value) if value.strip_prefix("Bearer ").is_some_and(|t| t == expected) => {}
            _ => {
                return (
                    StatusCode::UNAUTHORIZED,
                    Json(ErrorResponse {
                        error: "unauthorized".to_string(),
                    }),
                )
                    .into_response();
            }
        }
    }

    next.run(request).await
}

/// Content-Type enforcement middleware for POST requests.
///
/// Returns 415 Unsupported Media Type if a POST request doesn't have
/// `Content-Type: application/json`.
pub async fn require_json_content_type(request: Request<Body>, next: Next) -> Response {
    if request.method() == Method::POST {
        let has_json_ct = request
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));

        if !has_json_ct {
            return (
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                Json(ErrorResponse {
                    error: "Content-Type must be application/json".to_string(),
                }),
            )
                .into_response();
        }
    }

    next.run(request).await
}
