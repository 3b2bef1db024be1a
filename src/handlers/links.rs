use super::{bounded, ApiError, Owner};
use crate::{models::LinkFilter, AppState};
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Deserialize)]
pub struct CreateLinkRequest {
    long_url: String,
    /// Unix seconds; zero, negative or missing means the link never expires.
    #[serde(default)]
    deadline_unix: i64,
}

#[derive(Serialize)]
pub struct CreateLinkResponse {
    code: String,
}

#[derive(Deserialize)]
pub struct LookupQuery {
    code: Option<String>,
    long_url: Option<String>,
}

#[derive(Serialize)]
pub struct LinkResponse {
    code: String,
    long_url: String,
    /// Zero when the link never expires.
    deadline_unix: i64,
}

/// POST /api/v1/links
pub async fn create_link(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    body: Result<Json<CreateLinkRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateLinkResponse>), ApiError> {
    let Json(req) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let long_url = req.long_url.trim();
    if long_url.is_empty() {
        return Err(ApiError::BadRequest("long_url must not be empty".into()));
    }

    let deadline = if req.deadline_unix <= 0 {
        None
    } else {
        Some(
            DateTime::<Utc>::from_timestamp(req.deadline_unix, 0)
                .ok_or_else(|| ApiError::BadRequest("deadline_unix is out of range".into()))?,
        )
    };

    let link = bounded(
        state.config.request_timeout,
        state.writer.create(&owner, long_url, deadline),
    )
    .await??;

    Ok((
        StatusCode::CREATED,
        Json(CreateLinkResponse { code: link.code }),
    ))
}

/// GET /api/v1/links?code=..&long_url=..
///
/// Looks up one of the caller's own links straight from the store.
pub async fn get_link(
    State(state): State<Arc<AppState>>,
    Owner(owner): Owner,
    Query(query): Query<LookupQuery>,
) -> Result<Json<LinkResponse>, ApiError> {
    let non_empty = |v: Option<String>| v.map(|s| s.trim().to_owned()).filter(|s| !s.is_empty());
    let filter = LinkFilter {
        owner_id: Some(owner),
        code: non_empty(query.code),
        long_url: non_empty(query.long_url),
    };
    if filter.code.is_none() && filter.long_url.is_none() {
        return Err(ApiError::BadRequest(
            "at least one of code and long_url is required".into(),
        ));
    }

    let link = bounded(state.config.request_timeout, state.store.get(&filter))
        .await??
        .ok_or_else(|| ApiError::NotFound("no such link".into()))?;

    Ok(Json(LinkResponse {
        code: link.code,
        long_url: link.long_url,
        deadline_unix: link.deadline.map(|d| d.timestamp()).unwrap_or(0),
    }))
}
