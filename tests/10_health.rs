mod common;

use anyhow::Result;
use reqwest::StatusCode;

#[tokio::test]
async fn health_endpoint_responds() -> Result<()> {
    let server = common::TestServer::start().await?;
    let client = reqwest::Client::new();

    let res = client.get(server.url("/health")).send().await?;
    assert_eq!(res.status(), StatusCode::OK);

    let body = res.json::<serde_json::Value>().await?;
    assert_eq!(body["status"], "ok");
    Ok(())
}

#[tokio::test]
async fn root_describes_the_service() -> Result<()> {
    let server = common::TestServer::start().await?;

    let body = reqwest::get(server.url("/"))
        .await?
        .json::<serde_json::Value>()
        .await?;
    assert_eq!(body["name"], "Todo API");
    assert!(body["endpoints"]["todos"].is_string());
    Ok(())
}
