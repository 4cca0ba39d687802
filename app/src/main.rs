//! Sweep daemon entry point.
//!
//! Wires C1-C10 into their runtime tasks (spec §5): a device-reader task owned by C7, a recovery
//! worker owned by C8, an analysis task owned by C2-C4/C6/C9's `AnalysisEngine`, a cycler
//! supervisor owned by C5, an external-bridge task for C10, and the REST/WebSocket transport
//! layer binding all of it to the outside world.

use anyhow::Result;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use sweep_analysis::bridge::{ExternalSignalBridge, KismetDeviceUpdate};
use sweep_analysis::engine::{AnalysisEngine, AnalysisEngineConfig, StatusSnapshot};
use sweep_analysis::processor::{ProcessorConfig, SignalDetection, SignalRecord};
use sweep_analysis::push::PushHub;
use sweep_analysis::recovery::RecoverySupervisor;
use sweep_analysis::timewindow::WindowConfig;
use sweep_hal::parser::ParserConfig;
use sweep_hal::{
    ControllerCommand, ControllerEvent, ErrorTrackerConfig, ParsedLine, SweepController, SweepControllerConfig,
};
use tokio::sync::{mpsc, Mutex};

mod config;
mod cycle;
mod transport;

use config::AppConfig;
use cycle::{CycleStatusSnapshot, CyclerCommand, CyclerSupervisor};
use transport::AppState;

const CHANNEL_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let config = AppConfig::from_env()?;
    tracing::info!(bind_addr = %config.bind_addr, sweep_binary = %config.sweep_binary_path, "starting sweepd");

    let (controller_cmd_tx, controller_cmd_rx) = mpsc::channel::<ControllerCommand>(CHANNEL_CAPACITY);
    let (frame_tx, frame_rx) = mpsc::channel::<ParsedLine>(CHANNEL_CAPACITY);
    let (controller_event_tx, controller_event_rx) = mpsc::channel::<ControllerEvent>(CHANNEL_CAPACITY);
    let (error_report_tx, error_report_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (recovery_outcome_tx, recovery_outcome_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (analysis_cmd_tx, analysis_cmd_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (external_detection_tx, external_detection_rx) = mpsc::channel::<SignalDetection>(CHANNEL_CAPACITY);
    let (external_raw_tx, external_raw_rx) = mpsc::channel::<KismetDeviceUpdate>(CHANNEL_CAPACITY);
    let (cycler_cmd_tx, cycler_cmd_rx) = mpsc::channel::<CyclerCommand>(CHANNEL_CAPACITY);
    let (cycler_blacklist_tx, cycler_blacklist_rx) = mpsc::channel::<u64>(CHANNEL_CAPACITY);
    let (heartbeat_shutdown_tx, heartbeat_shutdown_rx) = mpsc::channel(1);

    let push_hub = Arc::new(PushHub::new(config.subscriber_max_queue));
    let status = Arc::new(Mutex::new(StatusSnapshot::default()));
    let cycle_status = Arc::new(Mutex::new(CycleStatusSnapshot::default()));
    let database_snapshot: Arc<Mutex<Vec<SignalRecord>>> = Arc::new(Mutex::new(Vec::new()));
    let external_enabled = Arc::new(AtomicBool::new(true));

    let controller_config = SweepControllerConfig {
        stale_timeout: config.stale_timeout,
        tstop: config.tstop,
        parser: ParserConfig { max_buffer_size: config.max_buffer_size, ..ParserConfig::default() },
    };
    let controller = SweepController::new(controller_config.parser, controller_config.stale_timeout, controller_config.tstop);
    tokio::spawn(controller.run(controller_cmd_rx, frame_tx, controller_event_tx));

    let recovery = RecoverySupervisor::new(controller_cmd_tx.clone(), recovery_outcome_tx);
    tokio::spawn(recovery.run(error_report_rx));

    let cycler = CyclerSupervisor::new(controller_cmd_tx.clone(), cycle_status.clone());
    tokio::spawn(cycler.run(cycler_cmd_rx, cycler_blacklist_rx));

    let engine_config = AnalysisEngineConfig {
        window: WindowConfig { window: std::time::Duration::from_secs(config.window_seconds), ..WindowConfig::default() },
        error_tracker: ErrorTrackerConfig {
            max_consecutive: config.max_consecutive_errors,
            max_failures_per_minute: config.max_failures_per_minute,
        },
        processor: ProcessorConfig::default(),
        ..Default::default()
    };
    let engine = AnalysisEngine::new(
        engine_config,
        push_hub.clone(),
        error_report_tx,
        cycler_blacklist_tx,
        status.clone(),
        database_snapshot.clone(),
    );
    tokio::spawn(engine.run(frame_rx, controller_event_rx, analysis_cmd_rx, recovery_outcome_rx, external_detection_rx));

    tokio::spawn(run_external_bridge(external_raw_rx, external_detection_tx, external_enabled.clone()));

    tokio::spawn(push_hub.clone().run_heartbeat(config.heartbeat_interval, heartbeat_shutdown_rx));

    let state = Arc::new(AppState {
        push_hub,
        status,
        cycle_status,
        database_snapshot,
        controller_tx: controller_cmd_tx,
        cycler_tx: cycler_cmd_tx,
        analysis_cmd_tx,
        sweep_binary_path: config.sweep_binary_path.clone(),
        external_enabled,
    });
    // Kept alive so `external_raw_rx` doesn't close before a future collector is wired up; the
    // bridge's own ingestion interface is in-core (spec §4.10), the collector that would feed it
    // is not.
    let _external_raw_tx = external_raw_tx;

    let app = transport::build_router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    let _ = heartbeat_shutdown_tx.send(()).await;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("shutdown signal received");
    }
}

/// Owns C10's bridge, normalizing raw Kismet-style updates into `SignalDetection`s and forwarding
/// them into the analysis engine's external channel. Gated by `enabled` so `restart_service`'s
/// `service: "external"` toggle (spec §6) can pause ingestion without tearing the task down.
async fn run_external_bridge(
    mut raw_rx: mpsc::Receiver<KismetDeviceUpdate>,
    detection_tx: mpsc::Sender<SignalDetection>,
    enabled: Arc<AtomicBool>,
) {
    let mut bridge = ExternalSignalBridge::new(sweep_analysis::bridge::DEFAULT_MAX_HZ);
    while let Some(update) = raw_rx.recv().await {
        if !enabled.load(std::sync::atomic::Ordering::Relaxed) {
            continue;
        }
        if let Some(detection) = bridge.normalize(&update) {
            let _ = detection_tx.send(detection).await;
        }
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sweep_app=debug,sweep_analysis=debug,sweep_hal=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(false).with_file(false).with_line_number(false))
        .init();
}
