use std::sync::Arc;

use anyhow::Context;
use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::get,
    Router,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use crate::auth::JwtVerifier;
use crate::config::AppConfig;
use crate::database::{StoreManager, TaskRepository};
use crate::handlers::{protected::todos, public};
use crate::middleware::require_bearer;
use crate::services::TodoService;

/// Shared per-process dependencies, built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub todos: Arc<TodoService>,
}

impl AppState {
    pub fn new(todos: TodoService) -> Self {
        Self {
            todos: Arc::new(todos),
        }
    }

    /// Connects the configured store and loads verification keys.
    pub async fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let missing = config.missing_settings();
        if !missing.is_empty() {
            anyhow::bail!("missing required settings: {}", missing.join(", "));
        }

        let store = StoreManager::connect(&config.store)
            .await
            .context("failed to initialise task store")?;
        let repository = TaskRepository::new(store, config.store.owner_index.clone())
            .with_id_strategy(config.store.id_strategy)
            .with_page_size(config.store.page_size);

        let verifier = JwtVerifier::from_config(&config.auth)
            .await
            .context("failed to load token verification keys")?;

        let todos = TodoService::new(Arc::new(verifier), repository)
            .with_ownership_policy(config.access.ownership_mismatch);
        Ok(Self::new(todos))
    }
}

pub fn router(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        // Public
        .route("/", get(public::root))
        .route("/health", get(public::health))
        // Protected
        .merge(todo_routes(state.clone()))
        .with_state(state)
        // Global middleware
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn todo_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/todos", get(todos::todos_get).post(todos::todos_post))
        .route(
            "/todos/:id",
            get(todos::todo_get)
                .put(todos::todo_put)
                .delete(todos::todo_delete),
        )
        .route_layer(middleware::from_fn_with_state(state, require_bearer))
}

/// CORS for browser clients; `*` in `origins` allows any origin.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() || origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("Ignoring invalid CORS origin {:?}", origin);
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}
