//! Session time that stops while paused, and the diagnostic countdown
//! that runs on it.

use std::time::{Duration, Instant};

/// Wall time minus paused time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionClock {
    started_at: Instant,
    paused_total: Duration,
    paused_at: Option<Instant>,
}

impl SessionClock {
    pub fn start(now: Instant) -> Self {
        Self {
            started_at: now,
            paused_total: Duration::ZERO,
            paused_at: None,
        }
    }

    pub fn pause(&mut self, now: Instant) {
        if self.paused_at.is_none() {
            self.paused_at = Some(now);
        }
    }

    pub fn resume(&mut self, now: Instant) {
        if let Some(paused_at) = self.paused_at.take() {
            self.paused_total += now.saturating_duration_since(paused_at);
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    /// Unpaused time since the session went active
    pub fn active(&self, now: Instant) -> Duration {
        let end = self.paused_at.unwrap_or(now);
        end.saturating_duration_since(self.started_at)
            .saturating_sub(self.paused_total)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownTick {
    /// Seconds left
    Running(u32),
    /// Reached zero on this tick; fires once
    Expired,
    /// Disabled, already fired, or completed by the model
    Idle,
}

/// One-second countdown to closing out the diagnostic phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticCountdown {
    remaining: u32,
    fired: bool,
    complete: bool,
}

impl DiagnosticCountdown {
    /// `secs == 0` disables the countdown
    pub fn new(secs: u32) -> Self {
        Self {
            remaining: secs,
            fired: false,
            complete: false,
        }
    }

    pub fn tick(&mut self) -> CountdownTick {
        if self.fired || self.complete || self.remaining == 0 {
            return CountdownTick::Idle;
        }
        self.remaining -= 1;
        if self.remaining == 0 {
            self.fired = true;
            CountdownTick::Expired
        } else {
            CountdownTick::Running(self.remaining)
        }
    }

    /// The model delivered its scores before time ran out
    pub fn complete(&mut self) {
        self.complete = true;
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paused_time_is_excluded() {
        let t0 = Instant::now();
        let mut clock = SessionClock::start(t0);

        clock.pause(t0 + Duration::from_secs(10));
        assert_eq!(clock.active(t0 + Duration::from_secs(30)), Duration::from_secs(10));

        clock.resume(t0 + Duration::from_secs(40));
        assert_eq!(clock.active(t0 + Duration::from_secs(45)), Duration::from_secs(15));
        assert!(!clock.is_paused());
    }

    #[test]
    fn double_pause_keeps_first_instant() {
        let t0 = Instant::now();
        let mut clock = SessionClock::start(t0);
        clock.pause(t0 + Duration::from_secs(5));
        clock.pause(t0 + Duration::from_secs(8));
        clock.resume(t0 + Duration::from_secs(10));
        assert_eq!(clock.active(t0 + Duration::from_secs(10)), Duration::from_secs(5));
    }

    #[test]
    fn countdown_fires_exactly_once() {
        let mut countdown = DiagnosticCountdown::new(3);
        assert_eq!(countdown.tick(), CountdownTick::Running(2));
        assert_eq!(countdown.tick(), CountdownTick::Running(1));
        assert_eq!(countdown.tick(), CountdownTick::Expired);
        assert_eq!(countdown.tick(), CountdownTick::Idle);
        assert!(countdown.has_fired());
        assert_eq!(countdown.remaining(), 0);
    }

    #[test]
    fn completion_stops_the_countdown() {
        let mut countdown = DiagnosticCountdown::new(120);
        countdown.tick();
        countdown.complete();
        assert_eq!(countdown.tick(), CountdownTick::Idle);
        assert_eq!(countdown.remaining(), 119);
        assert!(!countdown.has_fired());
    }

    #[test]
    fn zero_disables() {
        let mut countdown = DiagnosticCountdown::new(0);
        assert_eq!(countdown.tick(), CountdownTick::Idle);
        assert!(!countdown.has_fired());
    }
}
