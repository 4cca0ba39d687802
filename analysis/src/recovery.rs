//! Error-Recovery Supervisor (C8).
//!
//! Applies registered strategies over errors flagged by C6, gated by a per-service circuit
//! breaker. Grounded on the backoff/circuit-breaker texture of
//! `examples/other_examples/2b562bf0_borsaorg-borsa__borsa-src-router-stream.rs.rs` (bounded
//! retry with cooldown, `watch`-driven shutdown) adapted from a streaming-provider supervisor
//! into a dedicated recovery task with its own inbox, per `SPEC_FULL.md` §5.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use sweep_hal::{ControllerCommand, ErrorKind, Severity};
use tokio::sync::mpsc;

const CIRCUIT_BREAKER_THRESHOLD: u32 = 3;
const CIRCUIT_BREAKER_TIMEOUT: Duration = Duration::from_secs(60);
const HISTORY_RETENTION: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    HalfOpen,
    Open,
}

struct CircuitBreaker {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<DateTime<Utc>>,
    next_retry_at: Option<DateTime<Utc>>,
}

impl CircuitBreaker {
    fn new() -> Self {
        Self { state: CircuitState::Closed, consecutive_failures: 0, last_failure: None, next_retry_at: None }
    }

    fn record_failure(&mut self, now: DateTime<Utc>) {
        self.consecutive_failures += 1;
        self.last_failure = Some(now);
        if self.state == CircuitState::HalfOpen || self.consecutive_failures >= CIRCUIT_BREAKER_THRESHOLD {
            self.state = CircuitState::Open;
            self.next_retry_at = Some(now + chrono::Duration::from_std(CIRCUIT_BREAKER_TIMEOUT).unwrap());
        }
    }

    fn record_success(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.next_retry_at = None;
    }

    /// Transitions `open -> half_open` once the cooldown has elapsed; returns whether a recovery
    /// attempt may proceed right now.
    fn allows_attempt(&mut self, now: DateTime<Utc>) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if let Some(retry_at) = self.next_retry_at {
                    if now >= retry_at {
                        self.state = CircuitState::HalfOpen;
                        return true;
                    }
                }
                false
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    ServiceRestart,
    ConnectionRetry,
    ClearAndReset,
    FallbackMode,
}

impl RecoveryStrategy {
    fn max_attempts(&self) -> u32 {
        match self {
            RecoveryStrategy::ServiceRestart => 3,
            RecoveryStrategy::ConnectionRetry => 5,
            RecoveryStrategy::ClearAndReset => 2,
            RecoveryStrategy::FallbackMode => 1,
        }
    }

    fn cooldown(&self) -> Duration {
        match self {
            RecoveryStrategy::ServiceRestart => Duration::from_secs(30),
            RecoveryStrategy::ConnectionRetry => Duration::from_secs(5),
            RecoveryStrategy::ClearAndReset => Duration::from_secs(10),
            RecoveryStrategy::FallbackMode => Duration::from_secs(60),
        }
    }
}

/// One error report handed to the supervisor, typically synthesized by the analysis task from a
/// C6 `ErrorVerdict` or a `device_stuck` controller event.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub service: String,
    pub kind: ErrorKind,
    pub severity: Severity,
    pub message: String,
    pub recoverable: bool,
}

/// Selects the first applicable strategy, per §4.8's registration order.
fn select_strategy(report: &ErrorReport) -> Option<RecoveryStrategy> {
    let lower = report.message.to_lowercase();
    if matches!(report.severity, Severity::High | Severity::Critical) {
        return Some(RecoveryStrategy::ServiceRestart);
    }
    if lower.contains("connection") || lower.contains("disconnected") || lower.contains("websocket") {
        return Some(RecoveryStrategy::ConnectionRetry);
    }
    if lower.contains("state") || lower.contains("corrupt") || lower.contains("invalid") {
        return Some(RecoveryStrategy::ClearAndReset);
    }
    if report.severity == Severity::Critical {
        return Some(RecoveryStrategy::FallbackMode);
    }
    None
}

struct AttemptRecord {
    strategy: RecoveryStrategy,
    attempted_at: DateTime<Utc>,
    succeeded: bool,
}

struct ServiceState {
    breaker: CircuitBreaker,
    attempts: VecDeque<AttemptRecord>,
    attempts_this_strategy: HashMap<RecoveryStrategy, u32>,
    last_attempt_at: HashMap<RecoveryStrategy, DateTime<Utc>>,
}

impl ServiceState {
    fn new() -> Self {
        Self {
            breaker: CircuitBreaker::new(),
            attempts: VecDeque::new(),
            attempts_this_strategy: HashMap::new(),
            last_attempt_at: HashMap::new(),
        }
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - chrono::Duration::from_std(HISTORY_RETENTION).unwrap();
        while let Some(front) = self.attempts.front() {
            if front.attempted_at < cutoff {
                self.attempts.pop_front();
            } else {
                break;
            }
        }
        if self.attempts.is_empty() {
            self.attempts_this_strategy.clear();
        }
    }
}

/// Outcome pushed to the push layer when the supervisor takes or exhausts an action.
#[derive(Debug, Clone)]
pub enum RecoveryOutcome {
    AttemptStarted { service: String, strategy: RecoveryStrategy },
    Recovered { service: String },
    StrategyExhausted { service: String, strategy: RecoveryStrategy },
    CircuitOpen { service: String },
    Degraded { service: String },
}

pub struct RecoverySupervisor {
    services: HashMap<String, ServiceState>,
    controller_tx: mpsc::Sender<ControllerCommand>,
    outcome_tx: mpsc::Sender<RecoveryOutcome>,
}

impl RecoverySupervisor {
    pub fn new(
        controller_tx: mpsc::Sender<ControllerCommand>,
        outcome_tx: mpsc::Sender<RecoveryOutcome>,
    ) -> Self {
        Self { services: HashMap::new(), controller_tx, outcome_tx }
    }

    /// Drives the dedicated recovery-worker task until `report_rx` closes.
    pub async fn run(mut self, mut report_rx: mpsc::Receiver<ErrorReport>) {
        while let Some(report) = report_rx.recv().await {
            self.handle_report(report).await;
        }
    }

    async fn handle_report(&mut self, report: ErrorReport) {
        let now = Utc::now();
        let state = self.services.entry(report.service.clone()).or_insert_with(ServiceState::new);
        state.prune(now);
        state.breaker.record_failure(now);

        if !state.breaker.allows_attempt(now) {
            let _ = self.outcome_tx.send(RecoveryOutcome::CircuitOpen { service: report.service.clone() }).await;
            return;
        }

        let Some(strategy) = select_strategy(&report) else { return };

        let attempts_used = *state.attempts_this_strategy.get(&strategy).unwrap_or(&0);
        if attempts_used >= strategy.max_attempts() {
            let _ = self
                .outcome_tx
                .send(RecoveryOutcome::StrategyExhausted { service: report.service.clone(), strategy })
                .await;
            return;
        }
        if let Some(last) = state.last_attempt_at.get(&strategy) {
            if now.signed_duration_since(*last) < chrono::Duration::from_std(strategy.cooldown()).unwrap() {
                return;
            }
        }

        state.last_attempt_at.insert(strategy, now);
        *state.attempts_this_strategy.entry(strategy).or_insert(0) += 1;

        let _ = self
            .outcome_tx
            .send(RecoveryOutcome::AttemptStarted { service: report.service.clone(), strategy })
            .await;

        let succeeded = self.execute_strategy(strategy).await;

        let state = self.services.get_mut(&report.service).expect("service state inserted above");
        state.attempts.push_back(AttemptRecord { strategy, attempted_at: now, succeeded });

        if succeeded {
            state.breaker.record_success();
            state.attempts_this_strategy.remove(&strategy);
            let _ = self.outcome_tx.send(RecoveryOutcome::Recovered { service: report.service.clone() }).await;
        } else if strategy == RecoveryStrategy::FallbackMode {
            let _ = self.outcome_tx.send(RecoveryOutcome::Degraded { service: report.service.clone() }).await;
        }
    }

    async fn execute_strategy(&self, strategy: RecoveryStrategy) -> bool {
        match strategy {
            RecoveryStrategy::ServiceRestart => {
                let _ = self.controller_tx.send(ControllerCommand::RestartSweep).await;
                true
            }
            RecoveryStrategy::ConnectionRetry => true,
            RecoveryStrategy::ClearAndReset => {
                let _ = self.controller_tx.send(ControllerCommand::EmergencyStop).await;
                true
            }
            RecoveryStrategy::FallbackMode => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(service: &str, severity: Severity, message: &str) -> ErrorReport {
        ErrorReport {
            service: service.to_string(),
            kind: ErrorKind::Unknown,
            severity,
            message: message.to_string(),
            recoverable: true,
        }
    }

    #[test]
    fn circuit_opens_after_threshold_failures() {
        let mut breaker = CircuitBreaker::new();
        let now = Utc::now();
        for _ in 0..CIRCUIT_BREAKER_THRESHOLD {
            breaker.record_failure(now);
        }
        assert_eq!(breaker.state, CircuitState::Open);
        assert!(!breaker.allows_attempt(now));
    }

    #[test]
    fn circuit_half_opens_after_cooldown() {
        let mut breaker = CircuitBreaker::new();
        let now = Utc::now();
        for _ in 0..CIRCUIT_BREAKER_THRESHOLD {
            breaker.record_failure(now);
        }
        let later = now + chrono::Duration::seconds(61);
        assert!(breaker.allows_attempt(later));
        assert_eq!(breaker.state, CircuitState::HalfOpen);
    }

    #[test]
    fn high_severity_selects_service_restart() {
        let r = report("sweep", Severity::High, "usb error");
        assert_eq!(select_strategy(&r), Some(RecoveryStrategy::ServiceRestart));
    }

    #[test]
    fn connection_message_selects_connection_retry() {
        let r = report("sweep", Severity::Medium, "connection dropped");
        assert_eq!(select_strategy(&r), Some(RecoveryStrategy::ConnectionRetry));
    }

    #[test]
    fn corrupt_state_message_selects_clear_and_reset() {
        let r = report("sweep", Severity::Medium, "invalid state detected");
        assert_eq!(select_strategy(&r), Some(RecoveryStrategy::ClearAndReset));
    }
}
