use axum::{routing::post, Json, Router};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use signet_slo::Result;

use crate::{
    services::token::{Claims, SignRequest, SignedToken, VerifyStatus},
    valid::Valid,
    AppState,
};

pub fn new_router(state: AppState) -> Router {
    Router::new()
        .route("/token/sign", post(sign_token))
        .route("/token/verify", post(verify_token))
        .with_state(state)
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
struct VerifyRequest {
    #[validate(length(min = 1))]
    access_token: String,
    /// Return the parsed claims alongside a positive verdict.
    #[serde(default)]
    include_metadata: bool,
}

#[derive(Debug, Serialize, ToSchema)]
struct VerifyResponse {
    valid: bool,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    claims: Option<Claims>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure_reason: Option<String>,
}

impl VerifyResponse {
    fn new(verdict: VerifyStatus, include_metadata: bool) -> Self {
        let valid = verdict.is_valid();
        let status = verdict.code();
        let failure_reason = verdict.failure_reason();
        let claims = match verdict {
            VerifyStatus::Valid { claims } if include_metadata => {
                Some(claims)
            }
            _ => None,
        };
        Self {
            valid,
            status,
            claims,
            failure_reason,
        }
    }
}

async fn sign_token(
    app: AppState,
    Valid(Json(input)): Valid<Json<SignRequest>>,
) -> Result<(StatusCode, Json<SignedToken>)> {
    let signed = app.signer.sign(&input).await?;
    Ok((StatusCode::CREATED, signed.into()))
}

// verdicts ride a 200; only infrastructure failures map to error statuses
async fn verify_token(
    app: AppState,
    Valid(Json(input)): Valid<Json<VerifyRequest>>,
) -> Result<Json<VerifyResponse>> {
    let verdict = app.verifier.verify(&input.access_token).await?;
    Ok(VerifyResponse::new(verdict, input.include_metadata).into())
}
