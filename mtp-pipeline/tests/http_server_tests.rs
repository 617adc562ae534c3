//! HTTP routing and handler integration tests

mod helpers;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use helpers::{ScriptedClient, TestPipeline};
use http_body_util::BodyExt;
use mtp_pipeline::build_router;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn send(pipeline: &TestPipeline, request: Request<Body>) -> (StatusCode, Value) {
    let app = build_router(pipeline.app_state());
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn submission(stage_a: &[&str]) -> Value {
    json!({
        "transcript": "JOB-HTTP Dana: let's decide on the vendor.",
        "selections": { "stageA": stage_a, "stageB": ["synthesis"], "final": ["report"] },
        "options": { "final": { "includeTranscript": true, "transcriptMode": "summary" } }
    })
}

#[tokio::test]
async fn test_health_reports_module_and_uptime() {
    let pipeline = TestPipeline::new(ScriptedClient::new());
    let (status, body) = send(&pipeline, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "mtp-pipeline");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["active_jobs"], 0);
    assert!(body.get("last_error").is_none());
}

#[tokio::test]
async fn test_analyzer_catalog_lists_each_stage() {
    let pipeline = TestPipeline::new(ScriptedClient::new());
    let (status, body) = send(&pipeline, get("/analyzers")).await;

    assert_eq!(status, StatusCode::OK);
    let stage_a: Vec<&str> = body["stageA"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    assert!(stage_a.contains(&"premises"));
    assert_eq!(body["stageB"], json!(["synthesis", "z"]));
    assert_eq!(body["final"], json!(["r1", "r2", "report"]));
}

#[tokio::test]
async fn test_submit_returns_seeded_document_then_job_completes() {
    let pipeline = TestPipeline::new(ScriptedClient::new());

    let (status, body) = send(&pipeline, post_json("/jobs", submission(&["premises", "x"]))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "queued");
    assert_eq!(body["stageA"]["premises"]["status"], "pending");
    assert_eq!(body["final"]["report"]["status"], "pending");
    let job_id = body["jobId"].as_str().unwrap().to_string();

    pipeline.wait_for_terminal(&job_id).await;

    let (status, body) = send(&pipeline, get(&format!("/jobs/{}", job_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["stagesCompleted"], json!(["stage_a", "stage_b", "final"]));
    assert_eq!(body["final"]["report"]["status"], "completed");

    let (status, body) = send(&pipeline, get("/jobs")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["jobId"], job_id.as_str());
}

#[tokio::test]
async fn test_invalid_submissions_are_rejected() {
    let pipeline = TestPipeline::new(ScriptedClient::new());

    let (status, body) = send(&pipeline, post_json("/jobs", submission(&["no_such_analyzer"]))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("no_such_analyzer"));

    let mut duplicate = submission(&["x", "x"]);
    duplicate["transcript"] = json!("JOB-DUP");
    let (status, _) = send(&pipeline, post_json("/jobs", duplicate)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let blank = json!({ "transcript": "  ", "selections": { "stageA": ["x"] } });
    let (status, _) = send(&pipeline, post_json("/jobs", blank)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = send(&pipeline, get("/jobs")).await;
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_job_is_404() {
    let pipeline = TestPipeline::new(ScriptedClient::new());

    let (status, body) = send(&pipeline, get("/jobs/does-not-exist")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let (status, _) = send(&pipeline, post_json("/jobs/does-not-exist/cancel", json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&pipeline, get("/jobs/does-not-exist/contexts")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cancel_terminal_job_conflicts() {
    let pipeline = TestPipeline::new(ScriptedClient::new());
    let (_, body) = send(&pipeline, post_json("/jobs", submission(&["x"]))).await;
    let job_id = body["jobId"].as_str().unwrap().to_string();
    pipeline.wait_for_terminal(&job_id).await;

    let (status, body) = send(
        &pipeline,
        post_json(&format!("/jobs/{}/cancel", job_id), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");
}

#[tokio::test]
async fn test_context_audit_endpoints() {
    let pipeline = TestPipeline::new(ScriptedClient::new());
    let (_, body) = send(&pipeline, post_json("/jobs", submission(&["premises"]))).await;
    let job_id = body["jobId"].as_str().unwrap().to_string();
    pipeline.wait_for_terminal(&job_id).await;

    let (status, body) = send(&pipeline, get(&format!("/jobs/{}/contexts", job_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (status, body) = send(
        &pipeline,
        get(&format!("/jobs/{}/contexts/stages_ab_to_final", job_id)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["transition"], "stages_ab_to_final");
    assert!(body["text"].as_str().unwrap().contains("[stage_a/premises]"));
    assert!(body["allocations"]["stage_b/synthesis"].as_u64().unwrap() > 0);

    let (status, body) = send(
        &pipeline,
        get(&format!("/jobs/{}/contexts/sideways", job_id)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_event_stream_is_sse() {
    let pipeline = TestPipeline::new(ScriptedClient::new());
    let app = build_router(pipeline.app_state());

    let response = app.oneshot(get("/events")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.starts_with("text/event-stream"));
}
