//! HTTP API for the coordinator
//!
//! - `POST /clusterize`: the invocation boundary; always answers with a script
//! - `POST /state`, `GET /state`: create and inspect the join record
//! - `POST /report`: status reports from generated scripts
//! - `GET /status`: join record plus recent reports
//! - `GET /health`: liveness

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::common::tracing_middleware::request_tracing_middleware;
use crate::common::{timestamp_now, Error};
use crate::coordinator::register::{Instruction, InstructionOutcome, JoinCoordinator};
use crate::coordinator::reports::{ReportLog, ReportMessage};
use crate::coordinator::script::REPORT_KEY_HEADER;
use crate::coordinator::state::NodeIdentifier;

/// Request bodies larger than this are rejected
const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct CoordState {
    pub coordinator: JoinCoordinator,
    pub reports: Arc<ReportLog>,
}

/// Registration body sent by a booting node
#[derive(Debug, Deserialize, Serialize)]
pub struct ClusterizeRequest {
    #[serde(default)]
    pub vm: String,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct InitStateRequest {
    /// Defaults to the configured host count
    pub expected_size: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct StatusQuery {
    #[serde(default = "default_report_limit")]
    limit: usize,
}

fn default_report_limit() -> usize {
    50
}

/// Creates the HTTP router with all endpoints.
pub fn create_router(state: CoordState) -> Router {
    Router::new()
        .route("/clusterize", axum::routing::post(clusterize))
        .route(
            "/state",
            axum::routing::post(init_state).get(get_state),
        )
        .route("/report", axum::routing::post(report))
        .route("/status", axum::routing::get(status))
        .route("/health", axum::routing::get(health))
        .layer(tower_http::limit::RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(axum::middleware::from_fn(request_tracing_middleware))
        .with_state(state)
}

fn script_response(status: StatusCode, script: String) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "text/x-shellscript; charset=utf-8")],
        script,
    )
        .into_response()
}

fn error_response(e: Error) -> Response {
    (
        e.to_http_status(),
        axum::Json(json!({ "error": e.to_string() })),
    )
        .into_response()
}

/// Registration entry point. Malformed input is answered with an error
/// script and never reaches the store.
async fn clusterize(State(state): State<CoordState>, body: Bytes) -> Response {
    let node = serde_json::from_slice::<ClusterizeRequest>(&body)
        .map_err(|e| Error::InvalidRequest(format!("bad request body: {e}")))
        .and_then(|req| NodeIdentifier::parse(&req.vm));

    let node = match node {
        Ok(node) => node,
        Err(e) => {
            tracing::error!(error = %e, "Rejected registration");
            let instruction = Instruction {
                outcome: InstructionOutcome::Error(e.to_string()),
                report: None,
            };
            return script_response(StatusCode::BAD_REQUEST, instruction.render());
        }
    };

    let request = state.coordinator.request_for(node);
    let instruction = state.coordinator.clusterize(request).await;
    script_response(StatusCode::OK, instruction.render())
}

async fn init_state(State(state): State<CoordState>, body: Bytes) -> Response {
    let req = if body.is_empty() {
        InitStateRequest::default()
    } else {
        match serde_json::from_slice::<InitStateRequest>(&body) {
            Ok(req) => req,
            Err(e) => return error_response(e.into()),
        }
    };
    let config = state.coordinator.config();
    let expected = req.expected_size.unwrap_or(config.cluster.hosts_num);

    match state
        .coordinator
        .store()
        .initialize(&config.cluster.name, expected)
        .await
    {
        Ok(join) => (
            StatusCode::OK,
            axum::Json(json!({
                "cluster": config.cluster.name,
                "instances": join.instances,
                "expected_size": join.expected_size,
            })),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_state(State(state): State<CoordState>) -> Response {
    let cluster = &state.coordinator.config().cluster.name;
    match state.coordinator.store().read(cluster).await {
        Ok(Some(join)) => (
            StatusCode::OK,
            axum::Json(json!({
                "cluster": cluster,
                "instances": join.instances,
                "expected_size": join.expected_size,
                "complete": join.is_full(),
            })),
        )
            .into_response(),
        Ok(None) => error_response(Error::StateNotFound(cluster.clone())),
        Err(e) => error_response(e),
    }
}

async fn report(
    State(state): State<CoordState>,
    headers: HeaderMap,
    axum::Json(report): axum::Json<ReportMessage>,
) -> Response {
    match state.coordinator.report_key().await {
        Ok(Some(expected)) => {
            let provided = headers
                .get(REPORT_KEY_HEADER)
                .and_then(|v| v.to_str().ok());
            if provided != Some(expected.as_str()) {
                return (
                    StatusCode::UNAUTHORIZED,
                    axum::Json(json!({ "error": "missing or invalid report key" })),
                )
                    .into_response();
            }
        }
        Ok(None) => {}
        Err(e) => return error_response(e),
    }

    state.reports.record(report);
    StatusCode::NO_CONTENT.into_response()
}

async fn status(State(state): State<CoordState>, Query(query): Query<StatusQuery>) -> Response {
    let cluster = &state.coordinator.config().cluster.name;
    let join = match state.coordinator.store().read(cluster).await {
        Ok(join) => join,
        Err(e) => return error_response(e),
    };
    let reports = state.reports.recent(cluster, query.limit);

    (
        StatusCode::OK,
        axum::Json(json!({
            "cluster": cluster,
            "initialized": join.is_some(),
            "registered": join.as_ref().map(|j| j.instances.len()).unwrap_or(0),
            "expected_size": join.as_ref().map(|j| j.expected_size),
            "instances": join.map(|j| j.instances).unwrap_or_default(),
            "reports": reports,
        })),
    )
        .into_response()
}

async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        axum::Json(json!({
            "alive": true,
            "version": env!("CARGO_PKG_VERSION"),
            "timestamp": timestamp_now(),
        })),
    )
}
