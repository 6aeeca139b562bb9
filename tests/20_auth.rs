mod common;

use anyhow::Result;
use axum::body::Body;
use axum::http::{header, Method, Request};
use reqwest::StatusCode;
use serde_json::json;
use tower::ServiceExt;

#[tokio::test]
async fn protected_routes_require_a_token() -> Result<()> {
    let server = common::TestServer::start().await?;
    let client = reqwest::Client::new();

    let res = client.get(server.url("/todos")).send().await?;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body = res.json::<serde_json::Value>().await?;
    assert_eq!(body["error"], true);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let res = client
        .post(server.url("/todos"))
        .json(&json!({ "task": "sneaky" }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn every_bad_token_gets_the_same_answer() -> Result<()> {
    let app = common::test_app();
    let now = chrono::Utc::now().timestamp();

    let expired = common::mint_token_with(json!({
        "sub": "u1", "iss": common::ISSUER, "aud": common::AUDIENCE, "exp": now - 3600,
    }));
    let wrong_audience = common::mint_token_with(json!({
        "sub": "u1", "iss": common::ISSUER, "aud": "someone-else", "exp": now + 600,
    }));
    let wrong_issuer = common::mint_token_with(json!({
        "sub": "u1", "iss": "https://evil.test", "aud": common::AUDIENCE, "exp": now + 600,
    }));

    let headers = [
        format!("Bearer {}", expired),
        format!("Bearer {}", wrong_audience),
        format!("Bearer {}", wrong_issuer),
        "Bearer not.a.jwt".to_string(),
        format!("Basic {}", common::mint_token("u1")),
        common::mint_token("u1"),
    ];

    let mut bodies = Vec::new();
    for value in headers {
        let request = Request::builder()
            .uri("/todos")
            .header(header::AUTHORIZATION, value)
            .body(Body::empty())?;
        let (status, body) = common::read_json(app.clone().oneshot(request).await?).await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        bodies.push(body);
    }
    assert!(bodies.windows(2).all(|pair| pair[0] == pair[1]));
    Ok(())
}

#[tokio::test]
async fn valid_token_is_accepted() -> Result<()> {
    let app = common::test_app();
    let (status, body) = common::send(&app, "GET", "/todos", Some("u1"), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
    Ok(())
}

#[tokio::test]
async fn cors_preflight_is_answered_without_auth() -> Result<()> {
    let app = common::test_app();
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/todos")
        .header(header::ORIGIN, "https://app.example.com")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "authorization,content-type")
        .body(Body::empty())?;

    let response = app.oneshot(request).await?;
    assert!(response.status().is_success());
    assert_eq!(
        response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).map(|v| v.as_bytes()),
        Some(&b"*"[..])
    );
    Ok(())
}
