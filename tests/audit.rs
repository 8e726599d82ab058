mod utils;

use tapedeck::audit::AuditMode;
use tapedeck::cache::{CacheStage, MemoryCacheStore};
use tapedeck::error::BoxError;
use tapedeck::http::{Method, StatusCode};
use tapedeck::pipeline::PipelineBuilder;
use utils::{UserApi, audit_log, read_audit_log, request};

#[tokio::test]
async fn test_audit_sees_live_and_cached_responses() -> Result<(), BoxError> {
    let (audit, log) = audit_log();
    let api = UserApi::new();
    let pipeline = PipelineBuilder::new()
        .with_stage(audit)
        .with_stage(CacheStage::new(MemoryCacheStore::new()))
        .handler(api.clone());
    assert_eq!(vec!["audit", "cache"], pipeline.stage_names());

    let req = request(Method::GET, "/users/42");
    pipeline.serve_buffered(&req).await?;
    pipeline.serve_buffered(&req).await?;
    assert_eq!(1, api.calls());

    drop(pipeline);
    let contents = read_audit_log(log).await;
    let records: Vec<&str> = contents
        .split("\r\n\r\n")
        .map(str::trim)
        .filter(|record| !record.is_empty())
        .collect();
    let responses: Vec<_> = records
        .iter()
        .filter(|record| record.starts_with("HTTP/1.1"))
        .collect();
    assert_eq!(2, responses.len());
    assert_eq!(responses[0], responses[1]);
    assert!(responses[0].contains("content-type: application/json"));

    let body = records
        .iter()
        .find(|record| record.starts_with('{'))
        .unwrap();
    let body: serde_json::Value = serde_json::from_str(body)?;
    assert_eq!(serde_json::json!({"id": 42}), body);
    Ok(())
}

#[tokio::test]
async fn test_audit_in_headers_mode() -> Result<(), BoxError> {
    let (audit, log) = audit_log();
    let pipeline = PipelineBuilder::new()
        .with_stage(audit.with_mode(AuditMode::Headers))
        .handler(UserApi::new());

    let response = pipeline
        .serve_buffered(&request(Method::GET, "/users/500"))
        .await?;
    assert_eq!(StatusCode::INTERNAL_SERVER_ERROR, response.status());

    drop(pipeline);
    let contents = read_audit_log(log).await;
    assert!(contents.starts_with("GET /users/500 HTTP/1.1\r\n"));
    assert!(contents.contains("HTTP/1.1 500 Internal Server Error\r\ncontent-type: application/json\r\n"));
    assert!(!contents.contains("database unavailable"));
    Ok(())
}

#[tokio::test]
async fn test_audit_records_request_and_response_json() -> Result<(), BoxError> {
    let (audit, log) = audit_log();
    let pipeline = PipelineBuilder::new()
        .with_stage(audit)
        .handler(UserApi::new());

    let req = tapedeck::http::Request::builder()
        .method(Method::PUT)
        .uri("/users/7")
        .header("content-type", "application/json")
        .body(tapedeck::bytes::Bytes::from_static(br#"{"name":"ada"}"#))?;
    pipeline.serve_buffered(&req).await?;

    drop(pipeline);
    let contents = read_audit_log(log).await;
    let json: Vec<serde_json::Value> = contents
        .lines()
        .filter(|line| line.starts_with('{'))
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()?;
    assert_eq!(
        vec![
            serde_json::json!({"name": "ada"}),
            serde_json::json!({"id": 7}),
        ],
        json
    );
    assert!(contents.starts_with("PUT /users/7 HTTP/1.1\r\ncontent-type: application/json\r\n"));
    Ok(())
}
