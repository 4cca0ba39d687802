//! Time-Window Filter (C4).
//!
//! Sliding retention window over tracked signals with graceful fade. No teacher module maps onto
//! age-banded retention directly; built fresh in the fusion engine's struct/impl idiom
//! (config struct, stateful owner, periodic `tick`).

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalState {
    Active,
    Fading,
    Expired,
}

#[derive(Debug, Clone)]
pub struct TimedSignal {
    pub id: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub state: SignalState,
}

#[derive(Debug, Clone, Copy)]
pub struct WindowConfig {
    pub window: Duration,
    pub fade_start_fraction: f64,
}

impl WindowConfig {
    pub fn rapid() -> Self {
        Self { window: Duration::from_secs(10), fade_start_fraction: 0.5 }
    }
    pub fn drone() -> Self {
        Self { window: Duration::from_secs(30), fade_start_fraction: 0.5 }
    }
    pub fn stationary() -> Self {
        Self { window: Duration::from_secs(120), fade_start_fraction: 0.5 }
    }
    pub fn pattern() -> Self {
        Self { window: Duration::from_secs(300), fade_start_fraction: 0.5 }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self::drone()
    }
}

/// Owned by the analysis task. Holds the live signal set and a rolling turnover counter.
pub struct TimeWindowFilter {
    config: WindowConfig,
    signals: HashMap<u64, TimedSignal>,
    recent_removals: VecDeque<DateTime<Utc>>,
}

impl TimeWindowFilter {
    pub fn new(config: WindowConfig) -> Self {
        Self { config, signals: HashMap::new(), recent_removals: VecDeque::new() }
    }

    pub fn reconfigure(&mut self, config: WindowConfig) {
        self.config = config;
    }

    /// `addSignal`: resets `lastSeen`, and — per the no-backwards-transition invariant allowing
    /// exactly one forward-compatible exception — may restore a `Fading` signal to `Active`.
    pub fn add_signal(&mut self, id: u64, now: DateTime<Utc>) {
        match self.signals.get_mut(&id) {
            Some(existing) if existing.state != SignalState::Expired => {
                existing.last_seen = now;
                existing.state = SignalState::Active;
            }
            _ => {
                self.signals.insert(id, TimedSignal { id, first_seen: now, last_seen: now, state: SignalState::Active });
            }
        }
    }

    /// Periodic tick (cadence <= 250ms per spec). Advances every tracked signal's state and
    /// removes expired ones, recording them for the rolling turnover metric.
    pub fn tick(&mut self, now: DateTime<Utc>) {
        let window_secs = self.config.window.as_secs_f64();
        let fade_start_secs = window_secs * self.config.fade_start_fraction;

        let mut expired_ids = Vec::new();
        for signal in self.signals.values_mut() {
            let age_secs = (now - signal.last_seen).num_milliseconds() as f64 / 1000.0;
            let new_state = if age_secs < fade_start_secs {
                SignalState::Active
            } else if age_secs < window_secs {
                SignalState::Fading
            } else {
                SignalState::Expired
            };
            // Monotone: never step backwards relative to the current state.
            if rank(new_state) > rank(signal.state) {
                signal.state = new_state;
            }
            if signal.state == SignalState::Expired {
                expired_ids.push(signal.id);
            }
        }

        for id in expired_ids {
            self.signals.remove(&id);
            self.recent_removals.push_back(now);
        }
        let cutoff = now - chrono::Duration::seconds(10);
        while let Some(front) = self.recent_removals.front() {
            if *front < cutoff {
                self.recent_removals.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn relevance(&self, id: u64, now: DateTime<Utc>) -> f64 {
        let Some(signal) = self.signals.get(&id) else { return 0.0 };
        let window_secs = self.config.window.as_secs_f64();
        let fade_start_secs = window_secs * self.config.fade_start_fraction;
        let age_secs = (now - signal.last_seen).num_milliseconds() as f64 / 1000.0;

        if age_secs < fade_start_secs {
            1.0
        } else if age_secs < window_secs {
            1.0 - (age_secs - fade_start_secs) / (window_secs - fade_start_secs)
        } else {
            0.0
        }
    }

    pub fn active_signals(&self) -> impl Iterator<Item = &TimedSignal> {
        self.signals.values().filter(|s| s.state == SignalState::Active)
    }

    pub fn fading_signals(&self) -> impl Iterator<Item = &TimedSignal> {
        self.signals.values().filter(|s| s.state == SignalState::Fading)
    }

    pub fn total_signals(&self) -> usize {
        self.signals.len()
    }

    /// Removals per second over the trailing 10 s window.
    pub fn signal_turnover(&self) -> f64 {
        self.recent_removals.len() as f64 / 10.0
    }
}

fn rank(state: SignalState) -> u8 {
    match state {
        SignalState::Active => 0,
        SignalState::Fading => 1,
        SignalState::Expired => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s4_fade_out_timeline() {
        let mut filter = TimeWindowFilter::new(WindowConfig { window: Duration::from_secs(10), fade_start_fraction: 0.5 });
        let t0 = Utc::now();
        filter.add_signal(1, t0);

        filter.tick(t0 + chrono::Duration::seconds(4));
        assert_eq!(filter.signals.get(&1).unwrap().state, SignalState::Active);

        filter.tick(t0 + chrono::Duration::seconds(7));
        assert_eq!(filter.signals.get(&1).unwrap().state, SignalState::Fading);

        filter.tick(t0 + chrono::Duration::seconds(11));
        assert!(filter.signals.get(&1).is_none());
    }

    #[test]
    fn state_never_steps_backwards() {
        let mut filter = TimeWindowFilter::new(WindowConfig { window: Duration::from_secs(10), fade_start_fraction: 0.5 });
        let t0 = Utc::now();
        filter.add_signal(1, t0);
        filter.tick(t0 + chrono::Duration::seconds(7));
        assert_eq!(filter.signals.get(&1).unwrap().state, SignalState::Fading);

        // a tick computing a lower age (e.g. clock jitter) must not move it back to Active
        filter.tick(t0 + chrono::Duration::milliseconds(500));
        assert_eq!(filter.signals.get(&1).unwrap().state, SignalState::Fading);
    }

    #[test]
    fn readd_restores_fading_to_active() {
        let mut filter = TimeWindowFilter::new(WindowConfig { window: Duration::from_secs(10), fade_start_fraction: 0.5 });
        let t0 = Utc::now();
        filter.add_signal(1, t0);
        filter.tick(t0 + chrono::Duration::seconds(7));
        assert_eq!(filter.signals.get(&1).unwrap().state, SignalState::Fading);

        filter.add_signal(1, t0 + chrono::Duration::seconds(7));
        assert_eq!(filter.signals.get(&1).unwrap().state, SignalState::Active);
    }

    #[test]
    fn turnover_counts_removals_in_trailing_ten_seconds() {
        let mut filter = TimeWindowFilter::new(WindowConfig { window: Duration::from_secs(1), fade_start_fraction: 0.5 });
        let t0 = Utc::now();
        filter.add_signal(1, t0);
        filter.add_signal(2, t0);
        filter.tick(t0 + chrono::Duration::seconds(2));
        assert_eq!(filter.total_signals(), 0);
        assert_eq!(filter.signal_turnover(), 0.2);
    }
}
