//! Pipeline API Handlers
//!
//! HTTP endpoints for pipeline management.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use conveyor_core::domain::PipelineId;
use conveyor_core::domain::pipeline::{Pipeline, PipelineAnalytics, PipelineTaskStats};
use conveyor_core::dto::pipeline::CreatePipeline;
use serde::Deserialize;

use super::AppState;
use crate::api::error::ApiResult;
use crate::repository::Repository;

#[derive(Debug, Deserialize)]
pub struct PipelineQuery {
    pub pipeline_id: PipelineId,
}

#[derive(Debug, Deserialize)]
pub struct PipelineStatusQuery {
    pub pipeline_id: PipelineId,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct AnalyticsQuery {
    pub pipeline_id: Option<PipelineId>,
    pub status: Option<String>,
}

/// POST /api/pipeline/create
/// Create a new pipeline
pub async fn create_pipeline<R: Repository>(
    State(state): State<AppState<R>>,
    Json(req): Json<CreatePipeline>,
) -> ApiResult<(StatusCode, Json<Pipeline>)> {
    tracing::info!("Creating pipeline: {}", req.name);

    let pipeline = state.pipelines.create(req).await?;

    Ok((StatusCode::CREATED, Json(pipeline)))
}

/// GET /api/pipelines
/// List all pipelines with their tasks
pub async fn list_pipelines<R: Repository>(
    State(state): State<AppState<R>>,
) -> ApiResult<Json<Vec<Pipeline>>> {
    tracing::debug!("Listing all pipelines");

    let pipelines = state.pipelines.list().await?;

    Ok(Json(pipelines))
}

/// GET /api/pipeline/{pipeline_id}
/// Get pipeline snapshot by ID
pub async fn get_pipeline<R: Repository>(
    State(state): State<AppState<R>>,
    Path(pipeline_id): Path<PipelineId>,
) -> ApiResult<Json<Pipeline>> {
    tracing::debug!("Getting pipeline: {}", pipeline_id);

    let pipeline = state.pipelines.get(pipeline_id).await?;

    Ok(Json(pipeline))
}

/// GET /api/pipeline/{pipeline_id}/tasks/stats
/// Task counts per status
pub async fn get_task_stats<R: Repository>(
    State(state): State<AppState<R>>,
    Path(pipeline_id): Path<PipelineId>,
) -> ApiResult<Json<PipelineTaskStats>> {
    tracing::debug!("Getting task stats for pipeline: {}", pipeline_id);

    let stats = state.pipelines.task_stats(pipeline_id).await?;

    Ok(Json(stats))
}

/// POST /api/pipeline/update?pipeline_id&status
/// Change the pipeline status
pub async fn update_pipeline_status<R: Repository>(
    State(state): State<AppState<R>>,
    Query(query): Query<PipelineStatusQuery>,
) -> ApiResult<StatusCode> {
    tracing::info!(
        "Updating pipeline {} status to {}",
        query.pipeline_id,
        query.status
    );

    state
        .pipelines
        .update_status(query.pipeline_id, &query.status)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/pipeline/delete?pipeline_id
/// Delete a pipeline with all its tasks
pub async fn delete_pipeline<R: Repository>(
    State(state): State<AppState<R>>,
    Query(query): Query<PipelineQuery>,
) -> ApiResult<StatusCode> {
    tracing::info!("Deleting pipeline: {}", query.pipeline_id);

    state.pipelines.delete(query.pipeline_id).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/analytics?pipeline_id&status
/// Execution figures per pipeline
pub async fn get_analytics<R: Repository>(
    State(state): State<AppState<R>>,
    Query(query): Query<AnalyticsQuery>,
) -> ApiResult<Json<Vec<PipelineAnalytics>>> {
    tracing::debug!("Getting analytics: {:?}", query);

    // empty filter values mean no filter
    let status = query.status.as_deref().filter(|status| !status.is_empty());
    let analytics = state.pipelines.analytics(query.pipeline_id, status).await?;

    Ok(Json(analytics))
}
