use axum::{
    extract::{Path, State},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::instrument;
use validator::Validate;

use crate::auth::AuthUser;
use crate::errors::ServiceError;
use crate::handlers::common::{created_response, success_response, validate_input};
use crate::handlers::AppState;
use crate::models::CartLine;

pub fn voucher_routes() -> Router<AppState> {
    Router::new()
        .route("/validate", post(validate_voucher))
        .route("/claims", get(list_claims))
        .route("/:code/claim", post(claim_voucher))
}

#[derive(Debug, Deserialize, Validate)]
pub struct ValidateVoucherBody {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
    #[validate(length(min = 1, max = 100))]
    pub lines: Vec<CartLine>,
}

/// `POST /vouchers/validate`: what the code would take off this cart.
#[instrument(skip(state, body), fields(user_id = %user.user_id))]
pub async fn validate_voucher(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<ValidateVoucherBody>,
) -> Result<Response, ServiceError> {
    validate_input(&body)?;
    let quote = state.processor.quote_voucher(&body.code, &body.lines).await?;
    Ok(success_response(quote))
}

/// `POST /vouchers/:code/claim`
#[instrument(skip(state), fields(user_id = %user.user_id))]
pub async fn claim_voucher(
    State(state): State<AppState>,
    user: AuthUser,
    Path(code): Path<String>,
) -> Result<Response, ServiceError> {
    let claim = state
        .processor
        .vouchers()
        .claim(user.user_id, &code, Utc::now())
        .await?;
    Ok(created_response(claim))
}

/// `GET /vouchers/claims`
pub async fn list_claims(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Response, ServiceError> {
    let claims = state
        .processor
        .vouchers()
        .claims_for_user(user.user_id)
        .await?;
    Ok(success_response(claims))
}
