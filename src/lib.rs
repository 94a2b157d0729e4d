//! Payments API Library
//!
//! Marketplace payment processing: gateway orchestration, webhook
//! reconciliation, refunds, and payment lifecycle events over a partitioned
//! message bus.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod cache;
pub mod config;
pub mod coordination;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod gateways;
pub mod handlers;
pub mod openapi;
pub mod repositories;
pub mod services;

use std::sync::Arc;

use axum::{routing::get, Router};
use sea_orm::DatabaseConnection;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::gateways::GatewayRegistry;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub redis: Arc<redis::Client>,
    pub gateways: Arc<GatewayRegistry>,
    pub services: handlers::AppServices,
}

/// Build the application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .nest("/api/v1", handlers::routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
