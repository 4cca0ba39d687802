//! Sweep Controller (C7).
//!
//! Owns the SDR child process and drives the pipeline's device-reader task: spawns/kills the
//! sweeper, feeds raw bytes to the stream parser, detects stream staleness, and exposes its
//! state machine to the rest of the system purely through two channels (a command inbox and an
//! event outbox) — per the "controllers hold ids, not ownership handles" design note in
//! `SPEC_FULL.md` §9.

use crate::cycler::FrequencyPlan;
use crate::model::ParsedLine;
use crate::parser::{ParserConfig, StreamParser};
use crate::process::{SweepProcessConfig, SweepProcessHandle};
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::ChildStdout;
use tokio::sync::mpsc;

const STARTUP_GRACE: Duration = Duration::from_secs(10);
const STALE_CHECK_INTERVAL: Duration = Duration::from_millis(500);
const READ_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ControllerState {
    Idle,
    Starting,
    Running,
    Switching,
    Stopping,
    Recovering,
    Failed,
}

#[derive(Debug)]
pub enum ControllerCommand {
    StartSweep { plan: FrequencyPlan, binary_path: String },
    SwitchFrequency { center_hz: u64 },
    StopSweep,
    EmergencyStop,
    ForceCleanup,
    /// C8's Service Restart strategy (spec §4.8): `forceCleanup` then `startSweep` on the last
    /// target the controller was actually running, so recovery resumes the sweep rather than
    /// leaving it parked in `idle`.
    RestartSweep,
    EnterRecovering,
}

#[derive(Debug, Clone)]
pub enum ControllerEvent {
    StateChanged { state: ControllerState, current_freq_hz: Option<u64>, generation: u64 },
    NonDataLine { raw: String, frequency_hz: Option<u64> },
    DeviceStuck { frequency_hz: Option<u64> },
    ParserOverflow { count: u64 },
}

struct ActiveProcess {
    handle: SweepProcessHandle,
    stdout: ChildStdout,
    stderr_rx: mpsc::Receiver<String>,
}

enum LoopEvent {
    Cmd(Option<ControllerCommand>),
    StdoutRead(std::io::Result<usize>),
    StderrLine(Option<String>),
    Stale,
}

pub struct SweepController {
    state: ControllerState,
    parser: StreamParser,
    process: Option<ActiveProcess>,
    current_freq_hz: Option<u64>,
    generation: u64,
    stale_timeout: Duration,
    tstop: Duration,
    last_valid_frame_at: Option<Instant>,
    startup_deadline: Option<Instant>,
    binary_path: String,
    /// Last target successfully spawned on, survives `ForceCleanup`/`EmergencyStop` (unlike
    /// `current_freq_hz`) so `RestartSweep` knows where to resume.
    last_target_hz: Option<u64>,
}

impl SweepController {
    pub fn new(parser_config: ParserConfig, stale_timeout: Duration, tstop: Duration) -> Self {
        Self {
            state: ControllerState::Idle,
            parser: StreamParser::new(parser_config),
            process: None,
            current_freq_hz: None,
            generation: 0,
            stale_timeout,
            tstop,
            last_valid_frame_at: None,
            startup_deadline: None,
            binary_path: String::new(),
            last_target_hz: None,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Drives the controller until `cmd_rx` closes. Intended to be the whole body of the
    /// device-reader task spawned by the application layer.
    pub async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<ControllerCommand>,
        frame_tx: mpsc::Sender<ParsedLine>,
        event_tx: mpsc::Sender<ControllerEvent>,
    ) {
        let mut stale_interval = tokio::time::interval(STALE_CHECK_INTERVAL);
        let mut read_buf = vec![0u8; READ_CHUNK];

        loop {
            // Built as a plain value first, then matched after the select!'s borrow of
            // `self.process` has ended — keeps the command arm free to take `&mut self`.
            let event = if let Some(active) = self.process.as_mut() {
                tokio::select! {
                    cmd = cmd_rx.recv() => LoopEvent::Cmd(cmd),
                    n = active.stdout.read(&mut read_buf) => LoopEvent::StdoutRead(n),
                    line = active.stderr_rx.recv() => LoopEvent::StderrLine(line),
                    _ = stale_interval.tick() => LoopEvent::Stale,
                }
            } else {
                tokio::select! {
                    cmd = cmd_rx.recv() => LoopEvent::Cmd(cmd),
                    _ = stale_interval.tick() => LoopEvent::Stale,
                }
            };

            match event {
                LoopEvent::Cmd(Some(cmd)) => self.handle_command(cmd, &frame_tx, &event_tx).await,
                LoopEvent::Cmd(None) => break,
                LoopEvent::StdoutRead(n) => {
                    self.handle_stdout_read(n, &read_buf, &frame_tx, &event_tx).await;
                }
                LoopEvent::StderrLine(Some(line)) => {
                    let _ = event_tx
                        .send(ControllerEvent::NonDataLine { raw: line, frequency_hz: self.current_freq_hz })
                        .await;
                }
                LoopEvent::StderrLine(None) => {}
                LoopEvent::Stale => self.check_staleness(&event_tx).await,
            }
        }
    }

    async fn handle_command(
        &mut self,
        cmd: ControllerCommand,
        frame_tx: &mpsc::Sender<ParsedLine>,
        event_tx: &mpsc::Sender<ControllerEvent>,
    ) {
        match cmd {
            ControllerCommand::StartSweep { plan, binary_path } => {
                self.binary_path = binary_path;
                let target = plan.frequencies.first().map(|t| t.center_hz);
                self.start_on_target(target, event_tx).await;
            }
            ControllerCommand::SwitchFrequency { center_hz } => {
                self.set_state(ControllerState::Switching, event_tx).await;
                self.spawn_on(center_hz, event_tx).await;
            }
            ControllerCommand::StopSweep => {
                self.set_state(ControllerState::Stopping, event_tx).await;
                if let Some(mut active) = self.process.take() {
                    if active.handle.stop_gracefully(self.tstop).await.is_err() {
                        tracing::warn!("error stopping sweeper process gracefully");
                    }
                }
                if let Some(partial) = self.parser.reset() {
                    let _ = frame_tx.send(partial).await;
                }
                self.current_freq_hz = None;
                self.set_state(ControllerState::Idle, event_tx).await;
            }
            ControllerCommand::EmergencyStop => {
                if let Some(mut active) = self.process.take() {
                    let _ = active.handle.kill_now().await;
                }
                self.parser.reset();
                self.current_freq_hz = None;
                self.set_state(ControllerState::Idle, event_tx).await;
            }
            ControllerCommand::ForceCleanup => {
                if let Some(mut active) = self.process.take() {
                    let _ = active.handle.kill_now().await;
                }
                self.parser.reset();
                self.current_freq_hz = None;
                self.set_state(ControllerState::Idle, event_tx).await;
            }
            ControllerCommand::RestartSweep => {
                if let Some(mut active) = self.process.take() {
                    let _ = active.handle.kill_now().await;
                }
                self.parser.reset();
                self.current_freq_hz = None;
                if self.binary_path.is_empty() {
                    self.set_state(ControllerState::Idle, event_tx).await;
                } else {
                    self.start_on_target(self.last_target_hz, event_tx).await;
                }
            }
            ControllerCommand::EnterRecovering => {
                self.set_state(ControllerState::Recovering, event_tx).await;
            }
        }
    }

    async fn start_on_target(&mut self, target: Option<u64>, event_tx: &mpsc::Sender<ControllerEvent>) {
        self.set_state(ControllerState::Starting, event_tx).await;
        self.startup_deadline = Some(Instant::now() + STARTUP_GRACE);
        self.spawn_on_or_fail(target, event_tx).await;
    }

    async fn spawn_on(&mut self, center_hz: u64, event_tx: &mpsc::Sender<ControllerEvent>) {
        self.spawn_on_or_fail(Some(center_hz), event_tx).await;
    }

    async fn spawn_on_or_fail(&mut self, target: Option<u64>, event_tx: &mpsc::Sender<ControllerEvent>) {
        let Some(center_hz) = target else {
            self.set_state(ControllerState::Failed, event_tx).await;
            return;
        };
        let config = SweepProcessConfig::for_target(&self.binary_path, center_hz);
        match SweepProcessHandle::spawn(&config) {
            Ok((handle, stdout, stderr_rx)) => {
                self.generation += 1;
                self.parser.begin_generation(self.generation);
                self.current_freq_hz = Some(center_hz);
                self.last_target_hz = Some(center_hz);
                self.last_valid_frame_at = Some(Instant::now());
                self.process = Some(ActiveProcess { handle, stdout, stderr_rx });
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to spawn sweeper process");
                let _ = event_tx
                    .send(ControllerEvent::NonDataLine { raw: e.to_string(), frequency_hz: target })
                    .await;
            }
        }
    }

    async fn handle_stdout_read(
        &mut self,
        result: std::io::Result<usize>,
        buf: &[u8],
        frame_tx: &mpsc::Sender<ParsedLine>,
        event_tx: &mpsc::Sender<ControllerEvent>,
    ) {
        match result {
            Ok(0) => {
                tracing::warn!("sweeper stdout closed (EOF)");
                self.process = None;
            }
            Ok(n) => {
                let before_overflow = self.parser.overflow_count();
                let events = self.parser.feed(&buf[..n]);
                if self.parser.overflow_count() != before_overflow {
                    let _ = event_tx
                        .send(ControllerEvent::ParserOverflow { count: self.parser.overflow_count() })
                        .await;
                }
                for event in events {
                    match &event {
                        ParsedLine::Frame(_) => {
                            self.last_valid_frame_at = Some(Instant::now());
                            if self.state == ControllerState::Starting || self.state == ControllerState::Switching {
                                self.set_state(ControllerState::Running, event_tx).await;
                            }
                        }
                        ParsedLine::NonData(nd) => {
                            let _ = event_tx
                                .send(ControllerEvent::NonDataLine {
                                    raw: nd.raw.clone(),
                                    frequency_hz: self.current_freq_hz,
                                })
                                .await;
                        }
                        ParsedLine::Invalid(_) => {}
                    }
                    if frame_tx.send(event).await.is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "error reading sweeper stdout");
            }
        }
    }

    async fn check_staleness(&mut self, event_tx: &mpsc::Sender<ControllerEvent>) {
        if self.state == ControllerState::Running {
            if let Some(last) = self.last_valid_frame_at {
                if last.elapsed() >= self.stale_timeout {
                    let _ = event_tx
                        .send(ControllerEvent::DeviceStuck { frequency_hz: self.current_freq_hz })
                        .await;
                }
            }
        }
        if self.state == ControllerState::Starting {
            if let Some(deadline) = self.startup_deadline {
                if Instant::now() >= deadline {
                    let _ = event_tx
                        .send(ControllerEvent::NonDataLine {
                            raw: "device not found: startup grace window elapsed".to_string(),
                            frequency_hz: self.current_freq_hz,
                        })
                        .await;
                    self.startup_deadline = None;
                }
            }
        }
    }

    async fn set_state(&mut self, state: ControllerState, event_tx: &mpsc::Sender<ControllerEvent>) {
        self.state = state;
        let _ = event_tx
            .send(ControllerEvent::StateChanged {
                state,
                current_freq_hz: self.current_freq_hz,
                generation: self.generation,
            })
            .await;
    }
}

/// Surfaced so callers can configure `Tstop`/stale timeouts from environment without reaching
/// into controller internals.
pub struct SweepControllerConfig {
    pub stale_timeout: Duration,
    pub tstop: Duration,
    pub parser: ParserConfig,
}

impl Default for SweepControllerConfig {
    fn default() -> Self {
        Self {
            stale_timeout: Duration::from_secs(10),
            tstop: Duration::from_secs(3),
            parser: ParserConfig::default(),
        }
    }
}
