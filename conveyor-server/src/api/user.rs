//! User API Handlers

use axum::{Json, extract::State};
use conveyor_core::domain::user::User;

use super::AppState;
use crate::api::error::ApiResult;
use crate::repository::Repository;

/// GET /api/users
/// List users tasks can be assigned to
pub async fn list_users<R: Repository>(
    State(state): State<AppState<R>>,
) -> ApiResult<Json<Vec<User>>> {
    tracing::debug!("Listing users");

    let users = state.tasks.list_users().await?;

    Ok(Json(users))
}
