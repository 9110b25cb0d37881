//! HTTP API: action triggers, state snapshots and latency comparison

use crate::chain::{ChainKind, ContractKind, ContractState, MethodCall, TransactionId};
use crate::config::ApiConfig;
use crate::error::ErrorKind;
use crate::orchestrator::{ActionOutcome, ActionSummary, Orchestrator, TimerSnapshot};
use crate::state::{ActionRecord, LatencyStats, OperationSnapshot};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    let state = AppState { orchestrator };

    Router::new()
        .route("/health", get(health_check))
        .route("/state", get(get_state))
        .route("/timer", get(get_timer))
        .route("/history", get(get_history))
        .route("/stats", get(get_stats))
        .route("/chains/:chain/connect", post(connect))
        .route("/chains/:chain/submit", post(submit))
        .route("/chains/:chain/contracts/:contract/deploy", post(deploy))
        .route("/chains/:chain/contracts/:contract/mutate", post(mutate))
        .route("/chains/:chain/contracts/:contract/read", post(read))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, orchestrator: Arc<Orchestrator>) -> anyhow::Result<()> {
    let app = router(orchestrator);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Both chain snapshots plus the timer display
async fn get_state(State(state): State<AppState>) -> impl IntoResponse {
    let orchestrator = &state.orchestrator;
    Json(StateResponse {
        bvm: orchestrator.snapshot(ChainKind::Bvm).await,
        evm: orchestrator.snapshot(ChainKind::Evm).await,
        timer: orchestrator.timer_snapshot(),
    })
}

async fn get_timer(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.timer_snapshot())
}

async fn get_history(State(state): State<AppState>) -> impl IntoResponse {
    Json(HistoryResponse {
        actions: state.orchestrator.history().await,
    })
}

async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatsResponse {
        stats: state.orchestrator.latency_stats().await,
    })
}

async fn connect(
    State(state): State<AppState>,
    Path(chain): Path<ChainKind>,
    Json(req): Json<ConnectRequest>,
) -> impl IntoResponse {
    let outcome = state.orchestrator.connect(chain, &req.private_key).await;
    ActionResponse::from_outcome(outcome)
}

async fn deploy(
    State(state): State<AppState>,
    Path((chain, contract)): Path<(ChainKind, ContractKind)>,
    Json(req): Json<DeployRequest>,
) -> impl IntoResponse {
    let initial = match contract {
        ContractKind::MessageStorage => {
            ContractState::message(req.message.as_deref().unwrap_or_default())
        }
        ContractKind::Counter => ContractState::Counter(req.count.unwrap_or(0)),
    };
    let outcome = state.orchestrator.deploy(chain, contract, initial).await;
    ActionResponse::from_outcome(outcome)
}

async fn mutate(
    State(state): State<AppState>,
    Path((chain, contract)): Path<(ChainKind, ContractKind)>,
    Json(req): Json<MutateRequest>,
) -> impl IntoResponse {
    let call = req.call(contract);
    match req.times {
        None => {
            let outcome = state.orchestrator.mutate(chain, contract, call).await;
            ActionResponse::from_outcome(outcome)
        }
        Some(times) => {
            let outcomes = state
                .orchestrator
                .mutate_repeated(chain, contract, call, times)
                .await;
            ActionResponse::from_burst(outcomes)
        }
    }
}

async fn read(
    State(state): State<AppState>,
    Path((chain, contract)): Path<(ChainKind, ContractKind)>,
    body: Option<Json<ReadRequest>>,
) -> impl IntoResponse {
    let reference = body
        .and_then(|Json(req)| req.transaction_id)
        .filter(|id| !id.trim().is_empty())
        .map(TransactionId::new);
    let outcome = state.orchestrator.read(chain, contract, reference).await;
    ActionResponse::from_outcome(outcome)
}

async fn submit(
    State(state): State<AppState>,
    Path(chain): Path<ChainKind>,
    Json(req): Json<SubmitRequest>,
) -> impl IntoResponse {
    let outcome = state.orchestrator.submit(chain, &req.raw).await;
    ActionResponse::from_outcome(outcome)
}

// Request types

#[derive(Deserialize)]
struct ConnectRequest {
    private_key: String,
}

#[derive(Deserialize)]
struct DeployRequest {
    message: Option<String>,
    count: Option<i64>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum CounterMethod {
    Increment,
    Decrement,
}

#[derive(Deserialize)]
struct MutateRequest {
    /// New message; required by the message contract
    message: Option<String>,
    /// Counter method; defaults to increment
    method: Option<CounterMethod>,
    times: Option<u32>,
}

impl MutateRequest {
    /// A missing message maps to an empty one, which the orchestrator rejects
    fn call(&self, contract: ContractKind) -> MethodCall {
        let message = || {
            let text = self.message.as_deref().unwrap_or_default();
            MethodCall::SetMessage(text.as_bytes().to_vec())
        };
        match (contract, self.method) {
            (ContractKind::MessageStorage, None) => message(),
            (ContractKind::Counter, None) if self.message.is_some() => message(),
            (_, Some(CounterMethod::Decrement)) => MethodCall::Decrement,
            (_, _) => MethodCall::Increment,
        }
    }
}

#[derive(Deserialize)]
struct ReadRequest {
    transaction_id: Option<String>,
}

#[derive(Deserialize)]
struct SubmitRequest {
    raw: String,
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct StateResponse {
    bvm: OperationSnapshot,
    evm: OperationSnapshot,
    timer: TimerSnapshot,
}

#[derive(Serialize)]
struct HistoryResponse {
    actions: Vec<ActionRecord>,
}

#[derive(Serialize)]
struct StatsResponse {
    stats: Vec<LatencyStats>,
}

#[derive(Debug, Serialize)]
struct ActionResponse {
    ok: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<ErrorKind>,
    duration: String,
    elapsed_ms: u64,
    data: serde_json::Value,
}

impl ActionResponse {
    fn from_outcome<T: ActionSummary + Serialize>(
        outcome: ActionOutcome<T>,
    ) -> (StatusCode, Json<Self>) {
        let message = outcome.message();
        let kind = outcome.error_kind();
        let data = match &outcome.result {
            Ok(value) => serde_json::to_value(value).unwrap_or_default(),
            Err(_) => serde_json::Value::Null,
        };

        (
            status_for(kind),
            Json(Self {
                ok: kind.is_none(),
                message,
                kind,
                duration: outcome.duration,
                elapsed_ms: outcome.elapsed_ms,
                data,
            }),
        )
    }

    /// One response for a burst: the status and message of the last step
    fn from_burst<T: ActionSummary + Serialize>(
        outcomes: Vec<ActionOutcome<T>>,
    ) -> (StatusCode, Json<Self>) {
        let steps: Vec<serde_json::Value> = outcomes
            .iter()
            .map(|o| {
                serde_json::json!({
                    "ok": o.is_ok(),
                    "message": o.message(),
                    "duration": o.duration,
                    "elapsed_ms": o.elapsed_ms,
                })
            })
            .collect();
        let elapsed_ms: u64 = outcomes.iter().map(|o| o.elapsed_ms).sum();
        let last = outcomes.last();
        let kind = last.and_then(|o| o.error_kind());
        let message = last
            .map(|o| o.message())
            .unwrap_or_else(|| "nothing to do".to_string());

        (
            status_for(kind),
            Json(Self {
                ok: kind.is_none(),
                message,
                kind,
                duration: crate::timer::format_time(elapsed_ms),
                elapsed_ms,
                data: serde_json::json!({ "steps": steps }),
            }),
        )
    }
}

fn status_for(kind: Option<ErrorKind>) -> StatusCode {
    match kind {
        None | Some(ErrorKind::AlreadyKnown) => StatusCode::OK,
        Some(ErrorKind::Validation) => StatusCode::BAD_REQUEST,
        Some(ErrorKind::Precondition) => StatusCode::PRECONDITION_FAILED,
        Some(ErrorKind::ConcurrentOperation) => StatusCode::CONFLICT,
        Some(ErrorKind::NotFound) => StatusCode::NOT_FOUND,
        Some(ErrorKind::RemoteRejection) => StatusCode::UNPROCESSABLE_ENTITY,
        Some(ErrorKind::Network) | Some(ErrorKind::Decode) => StatusCode::BAD_GATEWAY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainHandles, SimulatedChain};
    use crate::config::{AppConfig, SimulatedConfig};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    const KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    fn app() -> Router {
        let config = SimulatedConfig {
            latency_ms: 0,
            ..SimulatedConfig::default()
        };
        let handles = |kind| {
            ChainHandles::simulated(
                kind,
                Arc::new(SimulatedChain::new(kind, config.clone())),
                "https://explorer.example/tx/",
                100,
            )
        };
        router(Arc::new(Orchestrator::new(
            handles(ChainKind::Bvm),
            handles(ChainKind::Evm),
            &AppConfig::default(),
        )))
    }

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_counter_flow_over_http() {
        let app = app();

        let (status, body) = call(
            &app,
            "POST",
            "/chains/bvm/connect",
            serde_json::json!({ "private_key": KEY }),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["ok"], true);

        let (status, body) = call(
            &app,
            "POST",
            "/chains/bvm/contracts/counter/deploy",
            serde_json::json!({ "count": 0 }),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert!(body["data"]["transaction_id"].is_string());

        let (status, body) = call(
            &app,
            "POST",
            "/chains/bvm/contracts/counter/mutate",
            serde_json::json!({ "method": "increment", "times": 3 }),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["data"]["steps"].as_array().unwrap().len(), 3);

        let (status, body) = call(
            &app,
            "POST",
            "/chains/bvm/contracts/counter/read",
            serde_json::json!({}),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["data"]["state"]["value"], "3");

        let (_, state) = call(&app, "GET", "/state", serde_json::Value::Null).await;
        assert_eq!(state["bvm"]["connection"], "connected");
        assert_eq!(state["evm"]["connection"], "disconnected");
        assert_eq!(state["timer"]["running"], false);

        let (_, stats) = call(&app, "GET", "/stats", serde_json::Value::Null).await;
        assert!(!stats["stats"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failures_map_to_status_codes() {
        let app = app();

        let (status, body) = call(
            &app,
            "POST",
            "/chains/evm/contracts/message/mutate",
            serde_json::json!({ "message": "hi" }),
        )
        .await;
        assert_eq!(status, StatusCode::PRECONDITION_FAILED);
        assert_eq!(body["ok"], false);
        assert_eq!(body["kind"], "precondition");
        assert!(body["duration"].as_str().unwrap().starts_with("00:00:"));

        let (status, body) = call(
            &app,
            "POST",
            "/chains/bvm/connect",
            serde_json::json!({ "private_key": "nope" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "validation");

        let (status, _) = call(
            &app,
            "POST",
            "/chains/solana/connect",
            serde_json::json!({ "private_key": KEY }),
        )
        .await;
        assert!(status.is_client_error());

        // The message contract needs a message even on a connected chain
        let (status, _) = call(
            &app,
            "POST",
            "/chains/bvm/connect",
            serde_json::json!({ "private_key": KEY }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = call(
            &app,
            "POST",
            "/chains/bvm/contracts/message/mutate",
            serde_json::json!({}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "validation");
        assert!(body["message"].as_str().unwrap().contains("message must not be empty"));
    }

    #[test]
    fn test_mutate_request_mapping() {
        let message = ContractKind::MessageStorage;
        let counter = ContractKind::Counter;

        let req: MutateRequest = serde_json::from_str(r#"{"message":"x"}"#).unwrap();
        assert_eq!(req.call(message), MethodCall::SetMessage(b"x".to_vec()));
        assert_eq!(req.call(counter), MethodCall::SetMessage(b"x".to_vec()));

        let req: MutateRequest = serde_json::from_str(r#"{"method":"decrement"}"#).unwrap();
        assert_eq!(req.call(counter), MethodCall::Decrement);

        let req: MutateRequest = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(req.call(counter), MethodCall::Increment);
        assert_eq!(req.call(message), MethodCall::SetMessage(Vec::new()));
    }
}
