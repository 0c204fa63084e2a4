//! HTTP API tests, driven through the router without binding a socket

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use clusterize::coordinator::http::create_router;
use clusterize::{Config, Coordinator};
use serde_json::{json, Value};
use tower::ServiceExt;

fn config() -> Config {
    let mut config = Config::default();
    config.cluster.name = "poc".to_string();
    config.cluster.hosts_num = 2;
    config.report.base_url = Some("http://coord.internal:7070".to_string());
    config.secrets.report_key_secret = Some("report-key".to_string());
    config
        .inventory
        .secrets
        .insert("report-key".into(), "k3y".into());
    config
        .inventory
        .secrets
        .insert("cluster-password".into(), "pw".into());
    for i in 0..3 {
        config
            .inventory
            .private_addresses
            .insert(format!("vmss_{i}"), format!("10.2.0.{i}"));
    }
    config
}

fn router() -> Router {
    create_router(Coordinator::build_state(config()).unwrap())
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, String) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    assert!(response.headers().contains_key("x-request-id"));
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn full_bootstrap_over_http() {
    let router = router();

    let (status, body) = send(&router, post_json("/state", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    let state: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(state["expected_size"], 2);

    let (status, script) = send(&router, post_json("/clusterize", json!({"vm": "vmss_0:host-0"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(script.contains("instance 1/2 that is ready for clusterization"));
    assert!(script.contains("http://coord.internal:7070/report"));
    assert!(script.contains("exit 0"));

    // Lost response, node retries
    let (_, retry) = send(&router, post_json("/clusterize", json!({"vm": "vmss_0:host-0"}))).await;
    assert_eq!(retry, script);

    let (status, script) = send(&router, post_json("/clusterize", json!({"vm": "vmss_1:host-1"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(script.contains("HOST_NAMES=(host-0 host-1)"));
    assert!(script.contains("HOST_IPS=(10.2.0.0 10.2.0.1)"));
    assert!(script.contains("cluster start-io"));

    let (status, script) = send(&router, post_json("/clusterize", json!({"vm": "vmss_2:host-2"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(script.contains("shutdown now"));

    let (status, body) = send(&router, get("/state")).await;
    assert_eq!(status, StatusCode::OK);
    let state: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(state["instances"].as_array().unwrap().len(), 2);
    assert_eq!(state["complete"], true);
}

#[tokio::test]
async fn malformed_registration_gets_error_script() {
    let router = router();
    send(&router, post_json("/state", json!({}))).await;

    let (status, script) = send(&router, post_json("/clusterize", json!({"vm": ""}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(script.starts_with("#!/bin/bash"));
    assert!(script.contains("node identifier wasn't supplied"));
    assert!(script.contains("exit 1"));

    let bad_json = Request::post("/clusterize")
        .body(Body::from("not json"))
        .unwrap();
    let (status, script) = send(&router, bad_json).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(script.contains("exit 1"));

    // Neither attempt touched the store
    let (_, body) = send(&router, get("/state")).await;
    let state: Value = serde_json::from_str(&body).unwrap();
    assert!(state["instances"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn registration_before_init_is_error_script() {
    let router = router();
    let (status, script) = send(&router, post_json("/clusterize", json!({"vm": "vmss_0"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(script.contains("Join state not found"));
    assert!(script.contains("\"type\":\"error\""));
    assert!(script.contains("exit 1"));

    let (status, _) = send(&router, get("/state")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn init_rejects_size_change() {
    let router = router();
    let (status, _) = send(&router, post_json("/state", json!({"expected_size": 2}))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&router, post_json("/state", json!({"expected_size": 2}))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = send(&router, post_json("/state", json!({"expected_size": 5}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body.contains("refusing to re-initialize"));
}

#[tokio::test]
async fn reports_require_key_and_show_in_status() {
    let router = router();
    send(&router, post_json("/state", json!({}))).await;

    let report = json!({
        "cluster": "poc",
        "hostname": "host-0",
        "type": "progress",
        "message": "drives attached",
    });

    let (status, _) = send(&router, post_json("/report", report.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let mut request = post_json("/report", report);
    request
        .headers_mut()
        .insert("X-Report-Key", "k3y".parse().unwrap());
    let (status, _) = send(&router, request).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(&router, get("/status?limit=5")).await;
    assert_eq!(status, StatusCode::OK);
    let status: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(status["initialized"], true);
    assert_eq!(status["registered"], 0);
    let reports = status["reports"].as_array().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0]["message"], "drives attached");
    assert_eq!(reports[0]["hostname"], "host-0");
}

#[tokio::test]
async fn health_is_alive() {
    let (status, body) = send(&router(), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    let health: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(health["alive"], true);
}
