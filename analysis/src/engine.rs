//! Analysis task (SPEC_FULL.md §5 supplement).
//!
//! Owns C2/C3/C4/C6 state by value — no `Arc<Mutex<_>>` over the analytics themselves, single
//! owner — and drives a `tokio::select!` over the parsed-line channel from C7's device-reader
//! task, C7's own state-change events, C8's recovery outcomes, and a command inbox used by C8/C10
//! to request changes without reaching into the owned state directly. The one piece of shared
//! mutable state is a small status snapshot, published as an immutable copy for the REST/push
//! readers (per §5: "all external readers receive immutable snapshots"). Grounded on the
//! teacher's `FusionEngine::run` channel-draining shape (`sensors/src/fusion.rs`), generalized
//! from a fixed correlation window to the C2→C3→C4→C6 pipeline.

use crate::processor::{DetectionSource, ProcessorConfig, SignalDetection, SignalProcessor, SignalRecord};
use crate::push::{PushHub, PushPayload};
use crate::recovery::{ErrorReport, RecoveryOutcome};
use crate::timewindow::{TimeWindowFilter, WindowConfig};
use crate::analyzer::{AnalyzerConfig, SweepAnalyzer};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use sweep_hal::{
    ControllerEvent, ControllerState, DeviceStatus, ErrorKind, ErrorTracker, ErrorTrackerConfig,
    ParsedLine, Severity,
};
use tokio::sync::{mpsc, Mutex};

/// Requests handed to the analysis task by components that don't own its state directly (C8's
/// recovery supervisor, C10's external bridge).
pub enum AnalysisCommand {
    Reconfigure(WindowConfig),
    Reset,
}

pub struct AnalysisEngineConfig {
    pub analyzer: AnalyzerConfig,
    pub processor: ProcessorConfig,
    pub window: WindowConfig,
    pub error_tracker: ErrorTrackerConfig,
    pub tick_interval: Duration,
}

impl Default for AnalysisEngineConfig {
    fn default() -> Self {
        Self {
            analyzer: AnalyzerConfig::default(),
            processor: ProcessorConfig::default(),
            window: WindowConfig::default(),
            error_tracker: ErrorTrackerConfig::default(),
            tick_interval: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct LastError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Read model for `GET /status` and the `status` push event. Updated in place by the analysis
/// task; everyone else only ever sees a cloned copy.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StatusSnapshot {
    pub controller_state: ControllerState,
    pub current_freq_hz: Option<u64>,
    pub sweep_generation: u64,
    pub health_score: f64,
    pub device_status: DeviceStatus,
    pub last_error: Option<LastError>,
    pub circuit_open: bool,
    pub parser_overflow_count: u64,
    /// C4 outputs exposed to subscribers (spec §4.4): live counts plus the rolling turnover rate.
    pub active_signals: usize,
    pub fading_signals: usize,
    pub total_signals: usize,
    pub signal_turnover: f64,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            controller_state: ControllerState::Idle,
            current_freq_hz: None,
            sweep_generation: 0,
            health_score: 100.0,
            device_status: DeviceStatus::Available,
            last_error: None,
            circuit_open: false,
            parser_overflow_count: 0,
            active_signals: 0,
            fading_signals: 0,
            total_signals: 0,
            signal_turnover: 0.0,
        }
    }
}

pub struct AnalysisEngine {
    analyzer: SweepAnalyzer,
    processor: SignalProcessor,
    window: TimeWindowFilter,
    errors: ErrorTracker,
    push_hub: Arc<PushHub>,
    error_report_tx: mpsc::Sender<ErrorReport>,
    cycler_blacklist_tx: mpsc::Sender<u64>,
    status: Arc<Mutex<StatusSnapshot>>,
    database_snapshot: Arc<Mutex<Vec<SignalRecord>>>,
    tick_interval: Duration,
    ticks_since_status_push: u32,
}

impl AnalysisEngine {
    pub fn new(
        config: AnalysisEngineConfig,
        push_hub: Arc<PushHub>,
        error_report_tx: mpsc::Sender<ErrorReport>,
        cycler_blacklist_tx: mpsc::Sender<u64>,
        status: Arc<Mutex<StatusSnapshot>>,
        database_snapshot: Arc<Mutex<Vec<SignalRecord>>>,
    ) -> Self {
        Self {
            analyzer: SweepAnalyzer::new(config.analyzer),
            processor: SignalProcessor::new(config.processor),
            window: TimeWindowFilter::new(config.window),
            errors: ErrorTracker::new(config.error_tracker),
            push_hub,
            error_report_tx,
            cycler_blacklist_tx,
            status,
            database_snapshot,
            tick_interval: config.tick_interval,
            ticks_since_status_push: 0,
        }
    }

    /// Drives the analysis task until `parsed_rx` closes.
    ///
    /// `external_rx` carries detections already normalized by the external signal bridge (C10);
    /// they're folded into the same coalescing/time-window path as internal detections (spec
    /// §4.10) without this task needing to know anything about Kismet's wire format.
    pub async fn run(
        mut self,
        mut parsed_rx: mpsc::Receiver<ParsedLine>,
        mut controller_events_rx: mpsc::Receiver<ControllerEvent>,
        mut cmd_rx: mpsc::Receiver<AnalysisCommand>,
        mut recovery_outcome_rx: mpsc::Receiver<RecoveryOutcome>,
        mut external_rx: mpsc::Receiver<SignalDetection>,
    ) {
        let mut ticker = tokio::time::interval(self.tick_interval);

        loop {
            tokio::select! {
                line = parsed_rx.recv() => {
                    match line {
                        Some(line) => self.handle_parsed_line(line).await,
                        None => break,
                    }
                }
                Some(event) = controller_events_rx.recv() => {
                    self.handle_controller_event(event).await;
                }
                Some(outcome) = recovery_outcome_rx.recv() => {
                    self.handle_recovery_outcome(outcome).await;
                }
                Some(cmd) = cmd_rx.recv() => {
                    self.handle_command(cmd);
                }
                Some(detection) = external_rx.recv() => {
                    self.ingest_external(detection).await;
                }
                _ = ticker.tick() => {
                    self.window.tick(Utc::now());
                    self.ticks_since_status_push += 1;
                    // Pushing a status event every tick (<=250ms per spec) would flood slow
                    // subscribers for a metric that only matters on a multi-second timescale;
                    // once per second is still well inside the staleness any consumer cares about.
                    if self.ticks_since_status_push * self.tick_interval.as_millis() as u32 >= 1000 {
                        self.ticks_since_status_push = 0;
                        self.sync_window_status().await;
                        self.push_status().await;
                    }
                }
            }
        }
    }

    async fn sync_window_status(&mut self) {
        let mut status = self.status.lock().await;
        status.active_signals = self.window.active_signals().count();
        status.fading_signals = self.window.fading_signals().count();
        status.total_signals = self.window.total_signals();
        status.signal_turnover = self.window.signal_turnover();
    }

    async fn handle_parsed_line(&mut self, line: ParsedLine) {
        match line {
            ParsedLine::Frame(frame) => self.handle_frame(&frame).await,
            ParsedLine::NonData(nd) => self.handle_non_data(&nd.raw, None).await,
            ParsedLine::Invalid(_) => {}
        }
    }

    async fn handle_frame(&mut self, frame: &sweep_hal::SpectrumFrame) {
        let summary = self.analyzer.analyze(frame);
        let now = Utc::now();
        self.errors.record_success();

        self.push_hub
            .publish(PushPayload::SweepData(serde_json::json!({
                "startFreqHz": frame.start_freq_hz,
                "stopFreqHz": frame.stop_freq_hz,
                "binHz": frame.bin_hz,
                "sweepGeneration": frame.sweep_generation,
                "timestamp": frame.timestamp,
            })))
            .await;

        if !summary.peaks.is_empty() {
            self.push_hub
                .publish(PushPayload::Peaks(serde_json::json!({
                    "peaks": summary.peaks.iter().map(|p| serde_json::json!({
                        "frequencyHz": p.frequency_hz,
                        "powerDb": p.power_db,
                        "bandwidthHz": p.bandwidth_hz,
                    })).collect::<Vec<_>>(),
                    "noiseFloorDb": summary.noise_floor_db,
                })))
                .await;
        }

        for peak in &summary.peaks {
            if let Some(detection) = self.processor.process_signal(peak, summary.noise_floor_db) {
                self.window.add_signal(detection.frequency_hz, now);
                self.publish_detection(&detection).await;
            }
        }

        if !summary.peaks.is_empty() {
            *self.database_snapshot.lock().await = self.processor.database_snapshot();
        }
    }

    async fn publish_detection(&self, detection: &SignalDetection) {
        self.push_hub
            .publish(PushPayload::SignalDetected(serde_json::json!({
                "frequencyHz": detection.frequency_hz,
                "powerDb": detection.power_db,
                "snrDb": detection.snr_db,
                "classification": detection.classification,
                "confidence": detection.confidence,
                "source": match detection.source {
                    DetectionSource::Internal => "internal",
                    DetectionSource::External => "external",
                },
                "timestamp": detection.timestamp,
            })))
            .await;
    }

    /// Feeds the external bridge's (C10) normalized detections into the same coalescing path
    /// internal detections use, then updates the time window the same way.
    pub async fn ingest_external(&mut self, detection: SignalDetection) {
        self.window.add_signal(detection.frequency_hz, detection.timestamp);
        self.processor.ingest_external(&detection);
        self.publish_detection(&detection).await;
        *self.database_snapshot.lock().await = self.processor.database_snapshot();
    }

    /// Routes a non-data stderr/stdout line to C6; escalates to the recovery supervisor when it
    /// flags a restart. Status transitions for transient, recoverable conditions are published
    /// as `status` events rather than `error` events (§7 propagation policy).
    async fn handle_non_data(&mut self, message: &str, frequency_hz: Option<u64>) {
        let verdict = self.errors.report(message, frequency_hz);
        self.sync_status(Some(LastError { kind: verdict.kind, message: message.to_string() })).await;

        if verdict.should_blacklist_frequency {
            if let Some(freq) = frequency_hz {
                let _ = self.cycler_blacklist_tx.send(freq).await;
            }
        }

        if verdict.requires_restart {
            let report = ErrorReport {
                service: "sweep".to_string(),
                kind: verdict.kind,
                severity: verdict.severity,
                message: message.to_string(),
                recoverable: verdict.recoverable,
            };
            let _ = self.error_report_tx.send(report).await;
        } else if !verdict.recoverable {
            self.push_hub
                .publish(PushPayload::Error(serde_json::json!({
                    "kind": verdict.kind.as_str(),
                    "message": message,
                })))
                .await;
        }
    }

    /// Handles C7's synthetic `device_stuck` condition (spec S6): not textual stderr, so it
    /// bypasses C6's message classifier and goes straight to the recovery supervisor tagged
    /// `stream_stale`.
    async fn handle_device_stuck(&mut self, frequency_hz: Option<u64>) {
        let message = "device stuck: no valid frame within stale timeout".to_string();
        self.sync_status(Some(LastError { kind: ErrorKind::StreamStale, message: message.clone() })).await;
        let report = ErrorReport {
            service: "sweep".to_string(),
            kind: ErrorKind::StreamStale,
            severity: Severity::High,
            message,
            recoverable: true,
        };
        let _ = self.error_report_tx.send(report).await;
        let _ = frequency_hz;
    }

    async fn handle_controller_event(&mut self, event: ControllerEvent) {
        match event {
            ControllerEvent::StateChanged { state, current_freq_hz, generation } => {
                {
                    let mut status = self.status.lock().await;
                    status.controller_state = state;
                    status.current_freq_hz = current_freq_hz;
                    status.sweep_generation = generation;
                }
                self.push_status().await;
            }
            ControllerEvent::NonDataLine { raw, frequency_hz } => {
                self.handle_non_data(&raw, frequency_hz).await;
            }
            ControllerEvent::DeviceStuck { frequency_hz } => {
                self.handle_device_stuck(frequency_hz).await;
            }
            ControllerEvent::ParserOverflow { count } => {
                let mut status = self.status.lock().await;
                status.parser_overflow_count = count;
            }
        }
    }

    async fn handle_recovery_outcome(&mut self, outcome: RecoveryOutcome) {
        match outcome {
            RecoveryOutcome::CircuitOpen { .. } => {
                self.status.lock().await.circuit_open = true;
                self.push_status().await;
            }
            RecoveryOutcome::Recovered { .. } => {
                self.status.lock().await.circuit_open = false;
                self.errors.record_success();
                self.push_status().await;
            }
            RecoveryOutcome::Degraded { service } => {
                self.push_hub
                    .publish(PushPayload::Degraded(serde_json::json!({ "service": service })))
                    .await;
            }
            RecoveryOutcome::AttemptStarted { .. } | RecoveryOutcome::StrategyExhausted { .. } => {
                self.push_status().await;
            }
        }
    }

    async fn sync_status(&mut self, last_error: Option<LastError>) {
        let mut status = self.status.lock().await;
        status.health_score = self.errors.health_score();
        status.device_status = self.errors.device_status();
        if last_error.is_some() {
            status.last_error = last_error;
        }
    }

    async fn push_status(&self) {
        let status = self.status.lock().await.clone();
        self.push_hub
            .publish(PushPayload::Status(serde_json::json!({
                "controllerState": format!("{:?}", status.controller_state),
                "currentFreqHz": status.current_freq_hz,
                "sweepGeneration": status.sweep_generation,
                "healthScore": status.health_score,
                "deviceStatus": format!("{:?}", status.device_status),
                "lastError": status.last_error.as_ref().map(|e| serde_json::json!({
                    "kind": e.kind.as_str(),
                    "message": e.message,
                })),
                "circuitOpen": status.circuit_open,
                "parserOverflowCount": status.parser_overflow_count,
                "activeSignals": status.active_signals,
                "fadingSignals": status.fading_signals,
                "totalSignals": status.total_signals,
                "signalTurnover": status.signal_turnover,
            })))
            .await;
    }

    fn handle_command(&mut self, cmd: AnalysisCommand) {
        match cmd {
            AnalysisCommand::Reconfigure(window) => self.window.reconfigure(window),
            AnalysisCommand::Reset => {
                self.errors.reset();
            }
        }
    }

    pub fn database_len(&self) -> usize {
        self.processor.database_len()
    }
}
