use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Extension, Json,
};

use crate::app::AppState;
use crate::auth::AuthUser;
use crate::database::models::{TaskView, UpdatedAttributes};
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::TodoInput;

/// GET /todos/:id
pub async fn get(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<TaskView> {
    let task = state.todos.get(&user, &id).await?;
    Ok(ApiResponse::success(task))
}

/// PUT /todos/:id - rewrite `task`, and `status` when supplied
pub async fn put(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    body: Result<Json<TodoInput>, JsonRejection>,
) -> ApiResult<UpdatedAttributes> {
    let Json(input) = body?;
    let updated = state.todos.update(&user, &id, input).await?;
    Ok(ApiResponse::success(updated))
}

/// DELETE /todos/:id - 204 whether or not the task existed
pub async fn delete(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<()> {
    state.todos.delete(&user, &id).await?;
    Ok(ApiResponse::no_content())
}
