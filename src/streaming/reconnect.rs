//! Connection bookkeeping and the reconnect ladder
//!
//! An unrequested close while a session is live walks a fixed ladder of
//! delays. Running off the end is terminal; a successful open resets it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Delays between reopen attempts
pub const RECONNECT_DELAYS: [Duration; 4] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(5),
    Duration::from_secs(10),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    delays: Vec<Duration>,
    attempt: usize,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(RECONNECT_DELAYS.to_vec())
    }
}

impl ReconnectPolicy {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays, attempt: 0 }
    }

    /// Delay before the next attempt, or `None` once the ladder is spent
    pub fn next_delay(&mut self) -> Option<Duration> {
        let delay = self.delays.get(self.attempt).copied()?;
        self.attempt += 1;
        Some(delay)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempts(&self) -> usize {
        self.attempt
    }

    pub fn max_attempts(&self) -> usize {
        self.delays.len()
    }
}

/// Socket lifecycle as seen by the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionPhase {
    #[default]
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionState {
    pub phase: ConnectionPhase,
    /// Set while walking the ladder after an unrequested close
    pub reconnecting: bool,
    /// Current link; events tagged with any other id are stale
    pub connection_id: Option<Uuid>,
    pub last_connected: Option<DateTime<Utc>>,
}

impl ConnectionState {
    pub fn connecting(connection_id: Uuid, reconnecting: bool) -> Self {
        Self {
            phase: ConnectionPhase::Connecting,
            reconnecting,
            connection_id: Some(connection_id),
            last_connected: None,
        }
    }

    pub fn is_current(&self, connection_id: Uuid) -> bool {
        self.connection_id == Some(connection_id)
    }

    pub fn is_open(&self) -> bool {
        self.phase == ConnectionPhase::Open
    }

    pub fn opened(&self) -> Self {
        Self {
            phase: ConnectionPhase::Open,
            reconnecting: false,
            connection_id: self.connection_id,
            last_connected: Some(Utc::now()),
        }
    }

    pub fn closed(&self) -> Self {
        Self {
            phase: ConnectionPhase::Closed,
            reconnecting: self.reconnecting,
            connection_id: self.connection_id,
            last_connected: self.last_connected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ladder_walks_fixed_delays_then_stops() {
        let mut policy = ReconnectPolicy::default();
        let delays: Vec<_> = std::iter::from_fn(|| policy.next_delay()).collect();

        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(5),
                Duration::from_secs(10)
            ]
        );
        assert_eq!(policy.next_delay(), None);
        assert_eq!(policy.attempts(), 4);
    }

    #[test]
    fn reset_restarts_the_ladder() {
        let mut policy = ReconnectPolicy::default();
        policy.next_delay();
        policy.next_delay();
        policy.reset();
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn connection_ids_gate_staleness() {
        let current = Uuid::new_v4();
        let state = ConnectionState::connecting(current, false);
        assert!(state.is_current(current));
        assert!(!state.is_current(Uuid::new_v4()));

        let open = state.opened();
        assert!(open.is_open());
        assert!(open.last_connected.is_some());
        assert_eq!(open.closed().phase, ConnectionPhase::Closed);
    }
}
