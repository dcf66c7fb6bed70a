//! Health Check API Handler
//!
//! Simple health check endpoint for monitoring.

use axum::{Json, extract::State};
use serde::Serialize;

use super::AppState;
use crate::repository::Repository;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub observers: usize,
    pub dropped_messages: u64,
}

/// GET /status
/// Health check endpoint, with hub counters
pub async fn health_check<R: Repository>(State(state): State<AppState<R>>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "OK",
        observers: state.hub.observer_count(),
        dropped_messages: state.hub.dropped_messages(),
    })
}
