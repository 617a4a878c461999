use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use linkrec_core::{LinkEngine, MemorySource, SourceDocument};
use linkrec_server::{router, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn corpus() -> Vec<SourceDocument> {
    vec![
        SourceDocument::new("d1", "Modular Offices", "modular office buildings commercial").with_url("/offices"),
        SourceDocument::new("d2", "Modular Classrooms", "modular classroom buildings education").with_url("/classrooms"),
        SourceDocument::new("d3", "Financing", "unrelated page about financing options").with_url("/financing"),
    ]
}

fn app(token: Option<&str>) -> Router {
    let engine = LinkEngine::temporary(Arc::new(MemorySource::with_documents(corpus()))).unwrap();
    router(AppState::new(Arc::new(engine), token.map(String::from)))
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri).header("X-ADMIN-TOKEN", "secret");
    let body = match body {
        Some(v) => {
            req = req.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let resp = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap_or(Value::Null) };
    (status, json)
}

#[tokio::test]
async fn full_indexing_flow_over_http() {
    let app = app(None);

    let (status, body) = call(&app, "POST", "/index/start", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(body["message"].as_str().unwrap().contains("Queued 3"));

    let mut remaining = Vec::new();
    for _ in 0..3 {
        let (status, body) = call(&app, "POST", "/index/batch", Some(json!({ "batchSize": 1 }))).await;
        assert_eq!(status, StatusCode::OK);
        remaining.push(body["remaining"].as_u64().unwrap());
    }
    assert_eq!(remaining, vec![2, 1, 0]);

    let (status, body) = call(&app, "POST", "/index/similarities", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(body["calculated"].as_u64().unwrap() >= 2);

    let (status, body) = call(&app, "GET", "/recommendations?pageId=d1&limit=5&minSimilarity=0.05", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pageId"], "d1");
    assert_eq!(body["count"], 1);
    assert_eq!(body["recommendations"][0]["contentId"], "d2");
    assert_eq!(body["recommendations"][0]["url"], "/classrooms");
    assert!(body["recommendations"][0]["similarityScore"].as_f64().unwrap() > 0.05);

    let (_, stats) = call(&app, "GET", "/index/stats", None).await;
    assert_eq!(stats["totalDocuments"], 3);
    assert_eq!(stats["processedDocuments"], 3);
    assert_eq!(stats["pendingDocuments"], 0);

    let (status, body) = call(&app, "POST", "/index/clear", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let (_, stats) = call(&app, "GET", "/index/stats", None).await;
    assert_eq!(stats["totalDocuments"], 0);
    assert_eq!(stats["totalTerms"], 0);
}

#[tokio::test]
async fn similarities_on_empty_corpus_report_failure() {
    let app = app(None);
    let (status, body) = call(&app, "POST", "/index/similarities", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().is_some());
}

#[tokio::test]
async fn bad_requests_are_rejected() {
    let app = app(None);
    let (status, body) = call(&app, "POST", "/index/batch", Some(json!({ "batchSize": 0 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, _) = call(&app, "POST", "/index/batch", Some(json!({ "batchSize": -4 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&app, "GET", "/recommendations?limit=3", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(&app, "POST", "/index/batch", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().is_some());

    let (status, body) = call(&app, "POST", "/index/batch", Some(json!({ "batchSize": "ten" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, body) = call(&app, "GET", "/recommendations?pageId=d1&limit=-1", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().is_some());

    let (status, body) = call(&app, "PUT", "/settings", Some(json!({ "display_position": "floating" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, body) = call(&app, "POST", "/index/batch", Some(json!({ "batchSize": 68719476736i64 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["processed"], 0);

    let (status, body) = call(&app, "GET", "/recommendations?pageId=nope", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 0);
}

#[tokio::test]
async fn settings_round_trip() {
    let app = app(None);
    let (status, body) = call(&app, "PUT", "/settings", Some(json!({ "similarity_threshold": 0.5 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["similarity_threshold"], 0.5);

    let (_, body) = call(&app, "GET", "/settings", None).await;
    assert_eq!(body["similarity_threshold"], 0.5);
    assert_eq!(body["display_position"], "bottom");

    let (status, _) = call(&app, "PUT", "/settings", Some(json!({ "similarity_threshold": 2.0 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admin_token_guards_mutations() {
    let app = app(Some("other"));
    let (status, _) = call(&app, "POST", "/index/start", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(&app, "GET", "/recommendations?pageId=d1", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::Null);
}
