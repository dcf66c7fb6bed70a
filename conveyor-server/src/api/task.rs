//! Task API Handlers
//!
//! HTTP endpoints for tasks: chain edits (create, move, delete) and the
//! edits that leave the chain alone.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use conveyor_core::domain::task::{Task, TaskDetails};
use conveyor_core::domain::{PipelineId, TaskId, UserId};
use conveyor_core::dto::task::{CreateTask, MoveTask};
use serde::Deserialize;

use super::AppState;
use crate::api::error::ApiResult;
use crate::repository::Repository;
use crate::service::SweepReport;

#[derive(Debug, Deserialize)]
pub struct CreateTaskQuery {
    pub pipeline_id: PipelineId,
}

#[derive(Debug, Deserialize)]
pub struct TaskQuery {
    pub task_id: TaskId,
}

#[derive(Debug, Deserialize)]
pub struct TaskStatusQuery {
    pub task_id: TaskId,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct AssignQuery {
    pub task_id: TaskId,
    pub user_id: UserId,
}

#[derive(Debug, Deserialize)]
pub struct TagQuery {
    pub task_id: TaskId,
    pub tag: String,
}

#[derive(Debug, Deserialize)]
pub struct ProgressQuery {
    pub task_id: TaskId,
    pub progress: i32,
}

// =============================================================================
// Chain Endpoints
// =============================================================================

/// POST /api/task/create?pipeline_id
/// Append a task to the end of the pipeline's chain
pub async fn create_task<R: Repository>(
    State(state): State<AppState<R>>,
    Query(query): Query<CreateTaskQuery>,
    Json(req): Json<CreateTask>,
) -> ApiResult<(StatusCode, Json<Task>)> {
    tracing::info!("Creating task {} in pipeline {}", req.name, query.pipeline_id);

    let task = state.chain.append_task(query.pipeline_id, req).await?;

    Ok((StatusCode::CREATED, Json(task)))
}

/// POST /api/task/move
/// Move a task one step up or down the chain
pub async fn move_task<R: Repository>(
    State(state): State<AppState<R>>,
    Json(req): Json<MoveTask>,
) -> ApiResult<StatusCode> {
    tracing::info!(
        "Moving task {} {} in pipeline {}",
        req.task_id,
        req.direction,
        req.pipeline_id
    );

    state
        .chain
        .move_task(req.pipeline_id, req.task_id, &req.direction)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/task/delete?task_id
/// Delete a task, rewiring its dependents
pub async fn delete_task<R: Repository>(
    State(state): State<AppState<R>>,
    Query(query): Query<TaskQuery>,
) -> ApiResult<StatusCode> {
    tracing::info!("Deleting task: {}", query.task_id);

    state.chain.delete_task(query.task_id).await?;

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Task Edit Endpoints
// =============================================================================

/// POST /api/task/update?task_id&status
/// Change a task's status
pub async fn update_task_status<R: Repository>(
    State(state): State<AppState<R>>,
    Query(query): Query<TaskStatusQuery>,
) -> ApiResult<StatusCode> {
    tracing::info!("Updating task {} status to {}", query.task_id, query.status);

    state
        .tasks
        .update_status(query.task_id, &query.status)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/task/assign?task_id&user_id
pub async fn assign_task<R: Repository>(
    State(state): State<AppState<R>>,
    Query(query): Query<AssignQuery>,
) -> ApiResult<StatusCode> {
    tracing::info!("Assigning task {} to user {}", query.task_id, query.user_id);

    state.tasks.assign(query.task_id, query.user_id).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/task/add-tag?task_id&tag
pub async fn add_tag<R: Repository>(
    State(state): State<AppState<R>>,
    Query(query): Query<TagQuery>,
) -> ApiResult<StatusCode> {
    state.tasks.add_tag(query.task_id, &query.tag).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/task/remove-tag?task_id&tag
pub async fn remove_tag<R: Repository>(
    State(state): State<AppState<R>>,
    Query(query): Query<TagQuery>,
) -> ApiResult<StatusCode> {
    state.tasks.remove_tag(query.task_id, &query.tag).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/task/progress?task_id&progress
pub async fn report_progress<R: Repository>(
    State(state): State<AppState<R>>,
    Query(query): Query<ProgressQuery>,
) -> ApiResult<StatusCode> {
    state
        .tasks
        .set_progress(query.task_id, query.progress)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/task/{task_id}
/// Task details
pub async fn get_task<R: Repository>(
    State(state): State<AppState<R>>,
    Path(task_id): Path<TaskId>,
) -> ApiResult<Json<TaskDetails>> {
    tracing::debug!("Getting task: {}", task_id);

    let task = state.tasks.details(task_id).await?;

    Ok(Json(task))
}

/// POST /api/check-tasks
/// Run the progress sweep once
pub async fn check_tasks<R: Repository>(
    State(state): State<AppState<R>>,
) -> ApiResult<Json<SweepSummary>> {
    let report = state.tasks.sweep_progress(chrono::Utc::now()).await?;
    Ok(Json(report.into()))
}

#[derive(Debug, serde::Serialize)]
pub struct SweepSummary {
    pub completed: Vec<TaskId>,
    pub failed: Vec<TaskId>,
    pub started: Vec<TaskId>,
    pub running: Vec<TaskId>,
}

impl From<SweepReport> for SweepSummary {
    fn from(report: SweepReport) -> Self {
        SweepSummary {
            completed: report.completed,
            failed: report.failed,
            started: report.started,
            running: report.still_running,
        }
    }
}
