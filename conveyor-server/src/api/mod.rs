//! API Module
//!
//! HTTP API layer for the server.
//! Each submodule handles endpoints for a specific domain; `ws` serves the
//! observer stream.

pub mod error;
pub mod health;
pub mod pipeline;
pub mod task;
pub mod user;
pub mod ws;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    Router,
    http::{HeaderValue, Method, header},
    routing::{delete, get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::hub::Hub;
use crate::repository::Repository;
use crate::service::{ChainMaintainer, ChangeNotifier, PipelineLocks, PipelineService, TaskService};

/// Shared state handed to every handler
pub struct AppState<R: Repository> {
    pub chain: Arc<ChainMaintainer<R>>,
    pub pipelines: Arc<PipelineService<R>>,
    pub tasks: Arc<TaskService<R>>,
    pub hub: Hub,
    pub observer_write_timeout: Duration,
}

impl<R: Repository> Clone for AppState<R> {
    fn clone(&self) -> Self {
        Self {
            chain: self.chain.clone(),
            pipelines: self.pipelines.clone(),
            tasks: self.tasks.clone(),
            hub: self.hub.clone(),
            observer_write_timeout: self.observer_write_timeout,
        }
    }
}

impl<R: Repository> AppState<R> {
    /// Wires the services around one repository and one hub
    pub fn new(repo: Arc<R>, hub: Hub, config: &Config) -> Self {
        let locks = Arc::new(PipelineLocks::new());
        let notifier = ChangeNotifier::new(repo.clone(), hub.clone());

        Self {
            chain: Arc::new(ChainMaintainer::new(
                repo.clone(),
                locks.clone(),
                notifier.clone(),
            )),
            pipelines: Arc::new(PipelineService::new(repo.clone(), locks, notifier.clone())),
            tasks: Arc::new(TaskService::new(repo, notifier, config.stale_task_after)),
            hub,
            observer_write_timeout: config.observer_write_timeout,
        }
    }
}

/// Create the main API router with all endpoints
pub fn create_router<R: Repository>(state: AppState<R>, cors_origin: &str) -> anyhow::Result<Router> {
    let origin = cors_origin
        .parse::<HeaderValue>()
        .with_context(|| format!("invalid CORS origin '{}'", cors_origin))?;

    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    let router = Router::new()
        // Health check
        .route("/status", get(health::health_check::<R>))
        // Pipeline endpoints
        .route("/api/pipelines", get(pipeline::list_pipelines::<R>))
        .route("/api/pipeline/create", post(pipeline::create_pipeline::<R>))
        .route("/api/pipeline/update", post(pipeline::update_pipeline_status::<R>))
        .route("/api/pipeline/delete", delete(pipeline::delete_pipeline::<R>))
        .route("/api/pipeline/{pipeline_id}", get(pipeline::get_pipeline::<R>))
        .route(
            "/api/pipeline/{pipeline_id}/tasks/stats",
            get(pipeline::get_task_stats::<R>),
        )
        .route("/api/analytics", get(pipeline::get_analytics::<R>))
        // Task endpoints
        .route("/api/task/create", post(task::create_task::<R>))
        .route("/api/task/move", post(task::move_task::<R>))
        .route("/api/task/delete", delete(task::delete_task::<R>))
        .route("/api/task/update", post(task::update_task_status::<R>))
        .route("/api/task/assign", post(task::assign_task::<R>))
        .route("/api/task/add-tag", post(task::add_tag::<R>))
        .route("/api/task/remove-tag", post(task::remove_tag::<R>))
        .route("/api/task/progress", post(task::report_progress::<R>))
        .route("/api/task/{task_id}", get(task::get_task::<R>))
        .route("/api/check-tasks", post(task::check_tasks::<R>))
        // User endpoints
        .route("/api/users", get(user::list_users::<R>))
        // Observer stream
        .route("/ws", get(ws::ws_handler::<R>))
        // Add state and middleware
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(router)
}
