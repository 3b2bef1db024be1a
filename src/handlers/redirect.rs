use super::{bounded, ApiError};
use crate::{resolver::Resolution, AppState};
use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;

/// GET /:code
///
/// Resolve the code (cache first, then the store) and answer with the
/// configured redirect status, or 404 when the code has no live link.
pub async fn redirect(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Response, ApiError> {
    let resolution = bounded(state.config.request_timeout, state.resolver.resolve(&code)).await??;

    let long_url = match resolution {
        Resolution::Redirect(url) => url,
        Resolution::NotFound => {
            return Err(ApiError::NotFound(format!(
                "short link '{code}' has no target"
            )));
        }
    };

    let location = HeaderValue::try_from(long_url).map_err(|e| {
        tracing::error!("Stored URL for '{}' is not a valid header: {:?}", code, e);
        ApiError::Internal
    })?;
    let status =
        StatusCode::from_u16(state.config.core.redirect_status_code).unwrap_or(StatusCode::FOUND);

    Ok((status, [(header::LOCATION, location)]).into_response())
}
