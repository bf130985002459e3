use axum::{
    body::Body,
    response::Response,
    routing::get,
    Router,
};
use http::{
    header::{
        CACHE_CONTROL, CONTENT_TYPE, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH,
        LAST_MODIFIED, RETRY_AFTER,
    },
    HeaderMap, StatusCode,
};

use signet_slo::{errors, Result};

use crate::AppState;

const CACHE_CONTROL_VALUE: &str = "public, max-age=3600, must-revalidate";

pub fn new_router(state: AppState) -> Router {
    Router::new()
        .route("/.well-known/jwks.json", get(get_jwks))
        .with_state(state)
}

async fn get_jwks(app: AppState, headers: HeaderMap) -> Result<Response> {
    let snapshot = app.jwks.build().await?;

    // an empty key set means the service cannot vouch for anything yet
    if snapshot.jwks.is_empty() {
        return Response::builder()
            .status(StatusCode::SERVICE_UNAVAILABLE)
            .header(RETRY_AFTER, "30")
            .body(Body::empty())
            .map_err(errors::any);
    }

    let if_none_match = headers
        .get(IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok());
    let if_modified_since = headers
        .get(IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok());

    if snapshot.tag.matches(if_none_match, if_modified_since) {
        return Response::builder()
            .status(StatusCode::NOT_MODIFIED)
            .header(ETAG, &snapshot.tag.etag)
            .header(LAST_MODIFIED, snapshot.tag.http_date())
            .header(CACHE_CONTROL, CACHE_CONTROL_VALUE)
            .body(Body::empty())
            .map_err(errors::any);
    }

    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/json")
        .header(ETAG, &snapshot.tag.etag)
        .header(LAST_MODIFIED, snapshot.tag.http_date())
        .header(CACHE_CONTROL, CACHE_CONTROL_VALUE)
        .body(Body::from(snapshot.body))
        .map_err(errors::any)
}
