use axum::{
    extract::{Path, State},
    response::Response,
};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::errors::ServiceError;
use crate::handlers::common::success_response;
use crate::handlers::AppState;

/// `GET /orders/:id`. Orders of other users are reported as missing.
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let order = state.processor.find_order(order_id, user.user_id).await?;
    Ok(success_response(order))
}
