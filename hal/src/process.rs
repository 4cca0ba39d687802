//! Supervised sweeper child process.
//!
//! Owns the spawn/pipe/kill lifecycle of the external `hackrf_sweep`-equivalent binary. Adapted
//! from the blocking-thread capture loop in
//! `examples/other_examples/83fdfa8b_younjinjeong-ads-b-flightradar-rtl-sdr__services-adsb-capture-src-sdr-capture.rs.rs`
//! into the async `tokio::process` idiom the rest of this workspace uses, per spec §5's
//! device-reader task.

use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;

use crate::HalError;

#[derive(Debug, Clone)]
pub struct SweepProcessConfig {
    /// Path or `$PATH`-resolved name of the sweeper binary (`SWEEP_BINARY_PATH`).
    pub binary_path: String,
    pub start_hz: u64,
    pub stop_hz: u64,
    pub bin_hz: u64,
}

impl SweepProcessConfig {
    pub fn for_target(binary_path: &str, center_hz: u64) -> Self {
        Self {
            binary_path: binary_path.to_string(),
            start_hz: center_hz.saturating_sub(10_000_000),
            stop_hz: center_hz + 10_000_000,
            bin_hz: 1_000_000,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary_path);
        cmd.arg("--start-hz").arg(self.start_hz.to_string())
            .arg("--stop-hz").arg(self.stop_hz.to_string())
            .arg("--bin-size").arg(self.bin_hz.to_string())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// A running (or gracefully-stopping) sweeper child. Owned exclusively by the controller.
pub struct SweepProcessHandle {
    child: Child,
    spawned_at: Instant,
}

impl SweepProcessHandle {
    pub fn spawn(config: &SweepProcessConfig) -> Result<(Self, ChildStdout, mpsc::Receiver<String>), HalError> {
        let mut cmd = config.command();
        tracing::info!(binary = %config.binary_path, start_hz = config.start_hz, stop_hz = config.stop_hz, "spawning sweeper process");
        let mut child = cmd.spawn().map_err(HalError::Spawn)?;

        let stdout = child.stdout.take().ok_or(HalError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(HalError::MissingPipe("stderr"))?;

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(async move {
            let mut reader = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                if tx.send(line).await.is_err() {
                    break;
                }
            }
        });

        Ok((
            Self {
                child,
                spawned_at: Instant::now(),
            },
            stdout,
            rx,
        ))
    }

    pub fn uptime(&self) -> Duration {
        self.spawned_at.elapsed()
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Cooperative graceful termination: request exit, wait up to `Tstop`, then hard-kill.
    pub async fn stop_gracefully(&mut self, tstop: Duration) -> Result<(), HalError> {
        self.send_term_signal();
        let waited = tokio::time::timeout(tstop, self.child.wait()).await;
        if waited.is_err() {
            tracing::warn!("sweeper process did not exit within graceful window, killing");
            self.kill_now().await?;
        }
        Ok(())
    }

    /// Immediate hard kill, no graceful wait.
    pub async fn kill_now(&mut self) -> Result<(), HalError> {
        self.child.kill().await.map_err(HalError::Spawn)?;
        Ok(())
    }

    #[cfg(unix)]
    fn send_term_signal(&self) {
        if let Some(pid) = self.child.id() {
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
        }
    }

    #[cfg(not(unix))]
    fn send_term_signal(&self) {
        // Non-unix targets fall straight through to the timeout-then-kill path.
    }
}
