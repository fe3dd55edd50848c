use axum::{extract::State, response::Response};

use crate::auth::AuthUser;
use crate::errors::ServiceError;
use crate::handlers::common::success_response;
use crate::handlers::AppState;

/// `GET /products/trending`, best seller first.
pub async fn trending_products(
    State(state): State<AppState>,
    _user: AuthUser,
) -> Result<Response, ServiceError> {
    let products = state.processor.products().trending().await?;
    Ok(success_response(products))
}
