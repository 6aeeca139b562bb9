use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    Extension, Json,
};
use serde::Deserialize;

use crate::app::AppState;
use crate::auth::AuthUser;
use crate::database::models::TaskView;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::TodoInput;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Only tasks with this status; empty means no filter.
    pub status: Option<String>,
}

/// GET /todos - tasks owned by the caller
pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Vec<TaskView>> {
    let Query(query) = query?;
    let tasks = state.todos.list(&user, query.status.as_deref()).await?;
    Ok(ApiResponse::success(tasks))
}

/// POST /todos - create a task owned by the caller
pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    body: Result<Json<TodoInput>, JsonRejection>,
) -> ApiResult<TaskView> {
    let Json(input) = body?;
    let created = state.todos.create(&user, input).await?;
    Ok(ApiResponse::created(created))
}
