use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::Response,
};

use crate::app::AppState;
use crate::error::ApiError;

/// Resolves the caller from the bearer token and stores an
/// [`AuthUser`](crate::auth::AuthUser) in the request extensions. Every
/// failure is the same 401.
pub async fn require_bearer(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let authorization = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    let user = state.todos.authenticate(authorization)?;
    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}
