//! REST + WebSocket transport (binds C9's fanout and C7/C5's command surfaces to the outside
//! world, spec §6). Route split and `AppState` shape grounded on
//! `examples/hdds-team-hdds/crates/hdds-gateway/src/{routes,handlers,main}.rs`; the WebSocket
//! session (split socket, a dedicated forward task draining an `mpsc` into the socket, a receive
//! loop matching `Message` variants) grounded on
//! `examples/hdds-team-hdds/tools/hdds-ws/src/session.rs`, adapted from DDS topic
//! subscribe/unsubscribe to the fixed `PushHub` subscription this system has only one of per
//! socket.

use crate::cycle::{CycleStatusSnapshot, CyclerCommand};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use sweep_analysis::engine::{AnalysisCommand, StatusSnapshot};
use sweep_analysis::processor::SignalRecord;
use sweep_analysis::push::{PushHub, SubscriptionFilter};
use sweep_hal::{ControllerCommand, ControllerState, FrequencyPlan, FrequencyTarget};
use tokio::sync::{mpsc, Mutex};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub push_hub: Arc<PushHub>,
    pub status: Arc<Mutex<StatusSnapshot>>,
    pub cycle_status: Arc<Mutex<CycleStatusSnapshot>>,
    pub database_snapshot: Arc<Mutex<Vec<SignalRecord>>>,
    pub controller_tx: mpsc::Sender<ControllerCommand>,
    pub cycler_tx: mpsc::Sender<CyclerCommand>,
    pub analysis_cmd_tx: mpsc::Sender<AnalysisCommand>,
    pub sweep_binary_path: String,
    /// Toggled by `start_service`/`stop_service{service:"external"}`; the C10 ingestion task
    /// checks this before forwarding a normalized detection (see `main::run_external_bridge`).
    pub external_enabled: Arc<AtomicBool>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/start-sweep", post(start_sweep))
        .route("/stop-sweep", post(stop_sweep))
        .route("/emergency-stop", post(emergency_stop))
        .route("/force-cleanup", post(force_cleanup))
        .route("/status", get(get_status))
        .route("/cycle-status", get(get_cycle_status))
        .route("/export", get(export))
        .route("/ws", get(ws_upgrade))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Deserialize)]
struct FreqRange {
    start: u64,
    stop: u64,
    #[allow(dead_code)]
    step: Option<u64>,
}

#[derive(Deserialize)]
struct StartSweepBody {
    freqs: Vec<FreqRange>,
    #[serde(rename = "cycleTime")]
    cycle_time_ms: u64,
}

/// Once the controller has moved to `failed` (spec §7, non-recoverable errors), every command
/// other than `emergencyStop`/`forceCleanup` is rejected rather than forwarded.
async fn rejected_if_failed(state: &AppState) -> Option<Response> {
    if state.status.lock().await.controller_state == ControllerState::Failed {
        Some(
            (
                StatusCode::CONFLICT,
                Json(serde_json::json!({
                    "rejected": true,
                    "reason": "controller is in failed state; only emergency-stop or force-cleanup are accepted",
                })),
            )
                .into_response(),
        )
    } else {
        None
    }
}

/// `POST /start-sweep`. Each `{start,stop,step}` range collapses to one `FrequencyTarget` at its
/// midpoint; C7 derives its own per-target start/stop span from the center (`process.rs`), so the
/// range's width only matters here insofar as it picks where the controller centers the sweep.
async fn start_sweep(State(state): State<Arc<AppState>>, Json(body): Json<StartSweepBody>) -> Response {
    if let Some(rejection) = rejected_if_failed(&state).await {
        return rejection;
    }

    let targets: Vec<FrequencyTarget> = body
        .freqs
        .iter()
        .map(|r| FrequencyTarget::new((r.start + r.stop) / 2))
        .collect();
    let plan = FrequencyPlan { frequencies: targets, cycle_time: std::time::Duration::from_millis(body.cycle_time_ms) };

    let _ = state
        .controller_tx
        .send(ControllerCommand::StartSweep { plan: plan.clone(), binary_path: state.sweep_binary_path.clone() })
        .await;
    let _ = state.cycler_tx.send(CyclerCommand::Initialize(plan)).await;
    StatusCode::OK.into_response()
}

async fn stop_sweep(State(state): State<Arc<AppState>>) -> Response {
    if let Some(rejection) = rejected_if_failed(&state).await {
        return rejection;
    }
    let _ = state.controller_tx.send(ControllerCommand::StopSweep).await;
    let _ = state.cycler_tx.send(CyclerCommand::Stop).await;
    StatusCode::OK.into_response()
}

/// Always 200, even if nothing was running (spec §6).
async fn emergency_stop(State(state): State<Arc<AppState>>) -> StatusCode {
    let _ = state.controller_tx.send(ControllerCommand::EmergencyStop).await;
    let _ = state.cycler_tx.send(CyclerCommand::Stop).await;
    StatusCode::OK
}

async fn force_cleanup(State(state): State<Arc<AppState>>) -> StatusCode {
    let _ = state.controller_tx.send(ControllerCommand::ForceCleanup).await;
    StatusCode::OK
}

async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusSnapshot> {
    Json(state.status.lock().await.clone())
}

async fn get_cycle_status(State(state): State<Arc<AppState>>) -> Json<CycleStatusSnapshot> {
    Json(state.cycle_status.lock().await.clone())
}

#[derive(Deserialize)]
struct ExportQuery {
    format: Option<String>,
}

/// `GET /export?format=csv|json`. Defaults to json when `format` is absent or unrecognized.
async fn export(State(state): State<Arc<AppState>>, Query(query): Query<ExportQuery>) -> Response {
    let records = state.database_snapshot.lock().await.clone();
    match query.format.as_deref() {
        Some("csv") => {
            let mut out = String::from("frequencyHz,lastSeen,avgPowerDb,maxPowerDb,occurrences,classification,confidence,source,mac\n");
            for r in &records {
                out.push_str(&format!(
                    "{},{},{},{},{},{},{},{:?},{}\n",
                    r.frequency_hz,
                    r.last_seen.to_rfc3339(),
                    r.avg_power_db,
                    r.max_power_db,
                    r.occurrences,
                    r.classification,
                    r.confidence,
                    r.source,
                    r.mac.clone().unwrap_or_default(),
                ));
            }
            ([(header::CONTENT_TYPE, "text/csv")], out).into_response()
        }
        _ => ([(header::CONTENT_TYPE, "application/json")], Json(records)).into_response(),
    }
}

async fn ws_upgrade(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_session(socket, state))
}

#[derive(Deserialize)]
struct ClientCommand {
    command: String,
    mac: Option<String>,
    service: Option<String>,
}

/// One WebSocket client: subscribes to the full `PushHub` fanout, forwards it to the socket on a
/// dedicated task, and handles inbound JSON commands on the receive loop. Mirrors
/// `ClientSession::run`'s split/forward/receive shape; this protocol has one implicit
/// subscription per socket rather than per-topic ones, so there's no subscribe/unsubscribe
/// bookkeeping to carry over.
async fn run_session(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut subscription = state.push_hub.subscribe(SubscriptionFilter::all()).await;
    let sub_id = subscription.id();

    let (out_tx, mut out_rx) = mpsc::channel::<String>(256);

    let forward = tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if ws_tx.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let pump_tx = out_tx.clone();
    let pump = tokio::spawn(async move {
        while let Some(event) = subscription.next().await {
            if let Ok(json) = serde_json::to_string(&event) {
                if pump_tx.send(json).await.is_err() {
                    break;
                }
            }
        }
    });

    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => handle_client_command(&text, &state, &out_tx).await,
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Binary(_)) => {}
            Err(_) => break,
        }
    }

    pump.abort();
    forward.abort();
    state.push_hub.unsubscribe(sub_id).await;
}

async fn handle_client_command(text: &str, state: &Arc<AppState>, out_tx: &mpsc::Sender<String>) {
    let Ok(cmd) = serde_json::from_str::<ClientCommand>(text) else {
        let _ = out_tx
            .send(serde_json::json!({"type": "error", "message": "invalid command"}).to_string())
            .await;
        return;
    };

    match cmd.command.as_str() {
        "get_status" => {
            let status = state.status.lock().await.clone();
            let _ = out_tx.send(serde_json::json!({"type": "status", "status": status}).to_string()).await;
        }
        "get_devices" => {
            let devices: Vec<_> =
                state.database_snapshot.lock().await.iter().filter(|r| r.mac.is_some()).cloned().collect();
            let _ = out_tx.send(serde_json::json!({"type": "devices", "devices": devices}).to_string()).await;
        }
        "get_networks" => {
            let networks: Vec<_> =
                state.database_snapshot.lock().await.iter().filter(|r| r.mac.is_none()).cloned().collect();
            let _ = out_tx.send(serde_json::json!({"type": "networks", "networks": networks}).to_string()).await;
        }
        "get_device" => {
            let mac = cmd.mac.unwrap_or_default();
            let found =
                state.database_snapshot.lock().await.iter().find(|r| r.mac.as_deref() == Some(mac.as_str())).cloned();
            let _ = out_tx.send(serde_json::json!({"type": "device", "device": found}).to_string()).await;
        }
        "start_service" | "stop_service" | "restart_service" => {
            handle_service_command(&cmd, state, out_tx).await;
        }
        "ping" => {
            let _ = out_tx.send(serde_json::json!({"type": "pong"}).to_string()).await;
        }
        _ => {
            let _ = out_tx
                .send(serde_json::json!({"type": "error", "message": "unknown command"}).to_string())
                .await;
        }
    }
}

async fn handle_service_command(cmd: &ClientCommand, state: &Arc<AppState>, out_tx: &mpsc::Sender<String>) {
    let service = cmd.service.as_deref().unwrap_or("");
    let starting = cmd.command != "stop_service";

    if service == "sweep" && state.status.lock().await.controller_state == ControllerState::Failed {
        let _ = out_tx
            .send(
                serde_json::json!({
                    "type": "error",
                    "rejected": true,
                    "reason": "controller is in failed state; only emergency-stop or force-cleanup are accepted",
                })
                .to_string(),
            )
            .await;
        return;
    }

    match service {
        "sweep" => {
            if cmd.command == "stop_service" {
                let _ = state.controller_tx.send(ControllerCommand::StopSweep).await;
            } else if cmd.command == "restart_service" {
                let _ = state.controller_tx.send(ControllerCommand::RestartSweep).await;
            }
        }
        "external" => {
            state.external_enabled.store(starting, Ordering::Relaxed);
        }
        _ => {
            let _ = out_tx
                .send(serde_json::json!({"type": "error", "message": "unknown service"}).to_string())
                .await;
            return;
        }
    }
    let _ = out_tx
        .send(serde_json::json!({"type": "config_update", "service": service, "running": starting}).to_string())
        .await;
}
