//! Storefront checkout engine
//!
//! Voucher validation, discount computation, atomic stock reservation and the
//! order commit with its compensating rollback, served over HTTP.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod circuit_breaker;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod models;
pub mod repositories;
pub mod services;

use axum::{
    extract::FromRef,
    routing::{get, post},
    Router,
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::auth::JwtVerifier;
use crate::services::OrderProcessor;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub processor: Arc<OrderProcessor>,
    pub verifier: Arc<JwtVerifier>,
}

impl FromRef<AppState> for Arc<JwtVerifier> {
    fn from_ref(state: &AppState) -> Self {
        state.verifier.clone()
    }
}

/// Every `/api/v1` route.
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/checkout", post(handlers::checkout::place_order))
        .nest("/vouchers", handlers::vouchers::voucher_routes())
        .route("/orders/:id", get(handlers::orders::get_order))
        .route(
            "/products/trending",
            get(handlers::products::trending_products),
        )
}
