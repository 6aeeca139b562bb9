mod common;

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::{json, Value};

#[tokio::test]
async fn create_then_read_as_owner_and_stranger() -> Result<()> {
    let server = common::TestServer::start().await?;
    let client = reqwest::Client::new();

    let res = client
        .post(server.url("/todos"))
        .header("Authorization", common::bearer("u1"))
        .json(&json!({ "task": "buy milk" }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::CREATED);
    let created: Value = res.json().await?;
    assert_eq!(created["task"], "buy milk");
    assert_eq!(created["status"], "NEW");
    let id = created["id"].as_str().expect("id is a string").to_string();

    let res = client
        .get(server.url(&format!("/todos/{}", id)))
        .header("Authorization", common::bearer("u2"))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .get(server.url(&format!("/todos/{}", id)))
        .header("Authorization", common::bearer("u1"))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.json::<Value>().await?, created);
    Ok(())
}

#[tokio::test]
async fn full_lifecycle() -> Result<()> {
    let server = common::TestServer::start().await?;
    let client = reqwest::Client::new();
    let auth = common::bearer("u1");

    let created: Value = client
        .post(server.url("/todos"))
        .header("Authorization", &auth)
        .json(&json!({ "task": "write report", "status": "IN_PROGRESS" }))
        .send()
        .await?
        .json()
        .await?;
    let path = format!("/todos/{}", created["id"].as_str().unwrap_or_default());

    // Partial update keeps the status
    let res = client
        .put(server.url(&path))
        .header("Authorization", &auth)
        .json(&json!({ "task": "write final report" }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.json::<Value>().await?["task"], "write final report");

    let listed: Value = client
        .get(server.url("/todos?status=IN_PROGRESS"))
        .header("Authorization", &auth)
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(listed.as_array().map(Vec::len), Some(1));
    assert_eq!(listed[0]["task"], "write final report");

    let res = client
        .delete(server.url(&path))
        .header("Authorization", &auth)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    // Deleting again is still a success
    let res = client
        .delete(server.url(&path))
        .header("Authorization", &auth)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let res = client
        .get(server.url(&path))
        .header("Authorization", &auth)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    Ok(())
}
