//! Frequency cycler supervisor.
//!
//! Owns the hardware-facing [`FrequencyCycler`] (C5) on behalf of the application layer and
//! drives it from its own timer, translating its events into [`ControllerCommand`]s for C7 and
//! publishing a read-only snapshot for `GET /cycle-status`. Grounded on the same
//! ticker-in-`select!` idiom `sweep_analysis::engine::AnalysisEngine::run` uses to drive C4's
//! timer, since C5's timer is the same kind of periodic, single-owner state advance.

use std::sync::Arc;
use std::time::Duration;
use sweep_hal::{ControllerCommand, CyclerEvent, FrequencyCycler, FrequencyPlan};
use tokio::sync::{mpsc, Mutex};

const TICK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub enum CyclerCommand {
    Initialize(FrequencyPlan),
    Start,
    Stop,
    SkipTo(usize),
    BlacklistFrequency(u64),
    UnblacklistFrequency(u64),
    ClearBlacklist,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CycleStatusSnapshot {
    pub current_freq_hz: Option<u64>,
    pub current_index: usize,
    pub valid_frequency_count: usize,
    pub cycling: bool,
    pub in_transition: bool,
    pub cycle_time_ms: u64,
    pub switch_time_ms: u64,
}

impl Default for CycleStatusSnapshot {
    fn default() -> Self {
        Self {
            current_freq_hz: None,
            current_index: 0,
            valid_frequency_count: 0,
            cycling: false,
            in_transition: false,
            cycle_time_ms: 0,
            switch_time_ms: 0,
        }
    }
}

/// Drives C5 until `cmd_rx` closes. Intended as its own cooperatively-scheduled task, separate
/// from the analysis task, since it only ever needs to talk to the controller's command inbox.
pub struct CyclerSupervisor {
    cycler: FrequencyCycler,
    controller_tx: mpsc::Sender<ControllerCommand>,
    status: Arc<Mutex<CycleStatusSnapshot>>,
}

impl CyclerSupervisor {
    pub fn new(controller_tx: mpsc::Sender<ControllerCommand>, status: Arc<Mutex<CycleStatusSnapshot>>) -> Self {
        Self { cycler: FrequencyCycler::new(), controller_tx, status }
    }

    /// `blacklist_rx` carries frequencies C6 has flagged via `ErrorVerdict::should_blacklist_frequency`
    /// (spec §2: "C6 feeds C5 (blacklist)"), kept separate from the REST/WS-driven `cmd_rx` since the
    /// analysis task that owns C6 has no reason to know the full `CyclerCommand` surface.
    pub async fn run(mut self, mut cmd_rx: mpsc::Receiver<CyclerCommand>, mut blacklist_rx: mpsc::Receiver<u64>) {
        let mut ticker = tokio::time::interval(TICK_INTERVAL);

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => break,
                    }
                }
                Some(freq) = blacklist_rx.recv() => {
                    self.cycler.blacklist_frequency(freq);
                    self.sync_status().await;
                }
                _ = ticker.tick() => {
                    let events = self.cycler.tick(TICK_INTERVAL);
                    for event in events {
                        self.handle_event(event).await;
                    }
                    self.sync_status().await;
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: CyclerCommand) {
        match cmd {
            CyclerCommand::Initialize(plan) => {
                self.cycler.initialize(plan);
                if let Some(event) = self.cycler.start_automatic_cycling() {
                    self.handle_event(event).await;
                }
            }
            CyclerCommand::Start => {
                if let Some(event) = self.cycler.start_automatic_cycling() {
                    self.handle_event(event).await;
                }
            }
            CyclerCommand::Stop => self.cycler.stop_cycling(),
            CyclerCommand::SkipTo(index) => {
                self.cycler.skip_to_frequency(index);
                if let Some(freq) = self.cycler.current() {
                    let _ = self.controller_tx.send(ControllerCommand::SwitchFrequency { center_hz: freq }).await;
                }
            }
            CyclerCommand::BlacklistFrequency(freq) => self.cycler.blacklist_frequency(freq),
            CyclerCommand::UnblacklistFrequency(freq) => self.cycler.unblacklist_frequency(freq),
            CyclerCommand::ClearBlacklist => self.cycler.clear_blacklist(),
        }
        self.sync_status().await;
    }

    /// `CycleStarted` is when C5 advances its index; per the "switching means a full respawn"
    /// decision in `hal::controller`, that's also the moment the controller should start bringing
    /// the new target up, not `CycleCompleted` (which only marks Tswitch's settling gap elapsing).
    async fn handle_event(&mut self, event: CyclerEvent) {
        if let CyclerEvent::CycleStarted { .. } = event {
            if let Some(freq) = self.cycler.current() {
                let _ = self.controller_tx.send(ControllerCommand::SwitchFrequency { center_hz: freq }).await;
            }
        }
    }

    async fn sync_status(&self) {
        let mut status = self.status.lock().await;
        status.current_freq_hz = self.cycler.current();
        status.current_index = self.cycler.current_index();
        status.valid_frequency_count = self.cycler.valid_frequencies().len();
        status.cycling = self.cycler.is_cycling();
        status.in_transition = self.cycler.is_in_transition();
        status.cycle_time_ms = self.cycler.cycle_time().as_millis() as u64;
        status.switch_time_ms = self.cycler.switch_time().as_millis() as u64;
    }
}
