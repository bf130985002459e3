use std::str::FromStr;

use axum::{
    extract::{Path, Query},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use signet_slo::Result;
use signet_storage::{
    key::{Algorithm, Key, KeyStatus, ListParams, RotationPolicy},
    List, Pagination,
};

use crate::{services::key::RotationOutcome, valid::Valid, AppState};

pub fn new_router(state: AppState) -> Router {
    Router::new()
        .route("/keys", get(list_keys).post(create_key))
        .route("/keys/rotate", post(rotate_keys))
        .route("/keys/cleanup", post(cleanup_keys))
        .route(
            "/keys/rotation/status",
            get(rotation_status),
        )
        .route(
            "/keys/rotation/policy",
            put(update_rotation_policy),
        )
        .route("/keys/:kid", get(get_key))
        .route("/keys/:kid/retire", post(retire_key))
        .route("/keys/:kid/force-retire", post(force_retire_key))
        .with_state(state)
}

#[derive(Debug, Deserialize, Validate)]
struct KeysQuery {
    status: Option<String>,
    #[serde(flatten)]
    #[validate(nested)]
    pagination: Pagination,
}

async fn list_keys(
    app: AppState,
    Valid(Query(query)): Valid<Query<KeysQuery>>,
) -> Result<Json<List<Key>>> {
    let status = match query.status.as_deref() {
        Some(v) => Some(KeyStatus::from_str(v)?),
        None => None,
    };
    let mut output = List::default();
    app.key_manager
        .list_keys(
            &ListParams {
                status,
                pagination: query.pagination,
                ..Default::default()
            },
            &mut output,
        )
        .await?;
    Ok(output.into())
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
struct CreateKeyRequest {
    #[validate(length(min = 1, max = 16))]
    algorithm: String,
    /// Defaults to now.
    #[serde(default)]
    not_before: Option<DateTime<Utc>>,
    /// Defaults to one rotation interval plus the grace period after
    /// `not_before`.
    #[serde(default)]
    not_after: Option<DateTime<Utc>>,
}

async fn create_key(
    app: AppState,
    Valid(Json(input)): Valid<Json<CreateKeyRequest>>,
) -> Result<(StatusCode, Json<Key>)> {
    let algorithm = Algorithm::from_str(&input.algorithm)?;
    let key = app
        .key_manager
        .create_key_with_window(algorithm, input.not_before, input.not_after)
        .await?;
    Ok((StatusCode::CREATED, key.into()))
}

async fn get_key(
    app: AppState,
    Path(kid): Path<String>,
) -> Result<Json<Key>> {
    Ok(app.key_manager.get_key(&kid).await?.into())
}

async fn rotate_keys(app: AppState) -> Result<Json<RotationOutcome>> {
    Ok(app.key_rotator.rotate().await?.into())
}

async fn cleanup_keys(app: AppState) -> Result<Json<RotationOutcome>> {
    let removed = app
        .key_manager
        .cleanup_expired(chrono::Utc::now())
        .await?;
    Ok(RotationOutcome {
        removed,
        ..Default::default()
    }
    .into())
}

async fn retire_key(
    app: AppState,
    Path(kid): Path<String>,
) -> Result<Json<Key>> {
    Ok(app.key_manager.retire(&kid).await?.into())
}

async fn force_retire_key(
    app: AppState,
    Path(kid): Path<String>,
) -> Result<Json<Key>> {
    Ok(app.key_manager.force_retire(&kid).await?.into())
}

#[derive(Debug, Serialize, ToSchema)]
struct RotationStatus {
    policy: RotationPolicy,
    should_rotate: bool,
}

async fn rotation_status(app: AppState) -> Result<Json<RotationStatus>> {
    Ok(RotationStatus {
        policy: app.key_manager.policy(),
        should_rotate: app.key_rotator.should_rotate().await?,
    }
    .into())
}

async fn update_rotation_policy(
    app: AppState,
    Json(policy): Json<RotationPolicy>,
) -> Result<Json<RotationPolicy>> {
    app.key_manager.set_policy(policy)?;
    Ok(policy.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_listing_rejects_untrusted_order_by() {
        let query = KeysQuery {
            status: None,
            pagination: Pagination {
                order_by: Some("(SELECT SLEEP(10))".to_owned()),
                ..Default::default()
            },
        };
        assert!(query.validate().is_err());

        let query = KeysQuery {
            status: Some("active".to_owned()),
            pagination: Pagination::default(),
        };
        assert!(query.validate().is_ok());
    }
}
