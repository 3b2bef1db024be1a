pub mod links;
pub mod redirect;

use crate::{
    error::{CreateError, InfraError},
    AppState,
};
use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::{future::Future, sync::Arc, time::Duration};
use tower_http::trace::TraceLayer;

/// Header carrying the caller's identity, set by the authenticating proxy.
pub const OWNER_HEADER: &str = "x-owner-id";

pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new().route(
        "/links",
        get(links::get_link).post(links::create_link),
    );

    Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .nest("/api/v1", api)
        // Short-link redirect; static routes above take priority
        .route("/:code", get(redirect::redirect))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

// ── Errors ─────────────────────────────────────────────────────────────────

/// Every failure a handler can return, rendered as `{"detail": ...}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized,
    NotFound(String),
    Conflict { detail: String, code: String },
    Timeout,
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(detail) => (StatusCode::BAD_REQUEST, json!({ "detail": detail })),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                json!({ "detail": format!("missing {OWNER_HEADER} header") }),
            ),
            ApiError::NotFound(detail) => (StatusCode::NOT_FOUND, json!({ "detail": detail })),
            ApiError::Conflict { detail, code } => (
                StatusCode::CONFLICT,
                json!({ "detail": detail, "code": code }),
            ),
            ApiError::Timeout => (
                StatusCode::GATEWAY_TIMEOUT,
                json!({ "detail": "request timed out" }),
            ),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "detail": "internal error" }),
            ),
        };
        (status, Json(body)).into_response()
    }
}

impl From<InfraError> for ApiError {
    fn from(e: InfraError) -> Self {
        tracing::error!("Infrastructure error: {:?}", e);
        ApiError::Internal
    }
}

impl From<CreateError> for ApiError {
    fn from(e: CreateError) -> Self {
        match e {
            CreateError::Conflict { code } => ApiError::Conflict {
                detail: format!("a short link already exists for this URL: {code}"),
                code,
            },
            CreateError::Internal(e) => e.into(),
            e if e.is_validation() => ApiError::BadRequest(e.to_string()),
            e => {
                tracing::error!("Unexpected create error: {:?}", e);
                ApiError::Internal
            }
        }
    }
}

/// Run a core call under the per-request deadline. Dropping the future on
/// timeout cancels any store, cache or probe call still pending.
pub async fn bounded<T>(limit: Duration, fut: impl Future<Output = T>) -> Result<T, ApiError> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| ApiError::Timeout)
}

// ── Owner extractor ────────────────────────────────────────────────────────

/// The calling principal. Requests without a non-empty `x-owner-id` header
/// are rejected with 401 before the handler runs.
pub struct Owner(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for Owner
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| Owner(s.to_owned()))
            .ok_or(ApiError::Unauthorized)
    }
}
