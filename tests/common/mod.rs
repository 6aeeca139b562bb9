#![allow(dead_code)]

use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::body::Body;
use axum::http::{header, Request, Response};
use axum::Router;
use jsonwebtoken::{encode, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tower::ServiceExt;

use todo_api::app::{cors_layer, router, AppState};
use todo_api::auth::{JwtVerifier, VerificationKeys};
use todo_api::database::memory::MemoryStore;
use todo_api::database::{KeyValueStore, TaskRepository};
use todo_api::services::{OwnershipPolicy, TodoService};

pub const SECRET: &str = "integration-test-secret";
pub const ISSUER: &str = "https://issuer.test";
pub const AUDIENCE: &str = "todo-tests";

/// A server binary running on its own port with an in-memory store. The
/// process is killed when the handle is dropped.
pub struct TestServer {
    pub port: u16,
    pub base_url: String,
    child: Child,
}

impl TestServer {
    pub async fn start() -> Result<Self> {
        let server = Self::spawn()?;
        server.wait_ready(Duration::from_secs(10)).await?;
        Ok(server)
    }

    fn spawn() -> Result<Self> {
        // Pick an unused port for isolation
        let port = portpicker::pick_unused_port().context("failed to pick free port")?;
        let base_url = format!("http://127.0.0.1:{}", port);

        let mut cmd = Command::new(env!("CARGO_BIN_EXE_todo-api"));
        cmd.env("TODO_API_PORT", port.to_string())
            .env("APP_ENV", "development")
            .env("TODO_STORE_BACKEND", "memory")
            .env("AUTH_HS256_SECRET", SECRET)
            .env("AUTH_ISSUER", ISSUER)
            .env("AUTH_AUDIENCE", AUDIENCE)
            .env("RUST_LOG", "warn")
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        let child = cmd.spawn().context("failed to spawn server binary")?;

        Ok(Self {
            port,
            base_url,
            child,
        })
    }

    async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let client = reqwest::Client::new();
        let deadline = Instant::now() + timeout;
        let url = self.url("/health");
        while Instant::now() < deadline {
            if let Ok(resp) = client.get(&url).send().await {
                if resp.status() == StatusCode::OK {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        anyhow::bail!("server did not become ready on {} within {:?}", self.base_url, timeout)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// HS256 token for `subject` accepted by both the spawned server and
/// [`test_app`].
pub fn mint_token(subject: &str) -> String {
    mint_token_with(json!({
        "sub": subject,
        "iss": ISSUER,
        "aud": AUDIENCE,
        "exp": chrono::Utc::now().timestamp() + 600,
    }))
}

pub fn mint_token_with(claims: Value) -> String {
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .expect("failed to sign test token")
}

pub fn bearer(subject: &str) -> String {
    format!("Bearer {}", mint_token(subject))
}

/// In-process router over the given store, verifying the same tokens as the
/// spawned server.
pub fn test_app_with(store: Arc<dyn KeyValueStore>, policy: OwnershipPolicy) -> Router {
    let verifier = JwtVerifier::new(VerificationKeys::shared_secret(SECRET))
        .with_issuer(ISSUER)
        .with_audience(AUDIENCE);
    let repository = TaskRepository::new(store, "UserIdIndex");
    let service =
        TodoService::new(Arc::new(verifier), repository).with_ownership_policy(policy);
    router(AppState::new(service), cors_layer(&["*".to_string()]))
}

pub fn test_app() -> Router {
    test_app_with(Arc::new(MemoryStore::new()), OwnershipPolicy::Observed)
}

/// Sends one request through the router; `body` is sent as JSON when given.
pub async fn send(
    app: &Router,
    method: &str,
    path: &str,
    subject: Option<&str>,
    body: Option<Value>,
) -> Result<(StatusCode, Value)> {
    let mut builder = Request::builder().method(method).uri(path);
    if let Some(subject) = subject {
        builder = builder.header(header::AUTHORIZATION, bearer(subject));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))?,
        None => builder.body(Body::empty())?,
    };

    let response = app.clone().oneshot(request).await?;
    read_json(response).await
}

pub async fn read_json(response: Response<Body>) -> Result<(StatusCode, Value)> {
    let status = StatusCode::from_u16(response.status().as_u16())?;
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, body))
}
