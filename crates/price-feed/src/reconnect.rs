//! Reconnect state machine
//!
//! Pure transition logic for the stream manager: (state, attempt, event)
//! in, (state, attempt, action) out. The runtime layer owns the sockets
//! and timers; everything here is testable without either.

use std::time::Duration;

use cryptodash_core::{ConnectionState, StreamConfig};

/// Events the runtime layer feeds into the machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    /// Consumer asked for a connection
    StartRequested,
    /// Transport handshake completed
    Opened,
    /// Connection ended; `deliberate` when the consumer called stop()
    Closed { deliberate: bool },
    /// A pending reconnect timer elapsed
    ReconnectTimerFired,
}

/// Side effect the runtime layer must perform after a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Open the transport now
    Connect,
    /// Arm a timer, then feed ReconnectTimerFired
    ScheduleReconnect(Duration),
    /// Budget exhausted; stop retrying and report
    GiveUp,
    /// Nothing to do
    None,
}

/// Backoff schedule and budget
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Delay before reconnect attempt `n` (1-based): base * 2^(n-1)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

impl From<&StreamConfig> for ReconnectPolicy {
    fn from(config: &StreamConfig) -> Self {
        Self::new(config.max_reconnect_attempts, config.reconnect_base_delay)
    }
}

/// Apply one event to the machine
///
/// `attempt` counts reconnects since the last successful open; a
/// successful open resets it to zero.
pub fn transition(
    state: ConnectionState,
    attempt: u32,
    event: StreamEvent,
    policy: &ReconnectPolicy,
) -> (ConnectionState, u32, Action) {
    use ConnectionState::*;

    match (state, event) {
        (Disconnected, StreamEvent::StartRequested) => (Connecting, attempt, Action::Connect),

        (Connecting, StreamEvent::Opened) => (Connected, 0, Action::None),

        (_, StreamEvent::Closed { deliberate: true }) => (Disconnected, attempt, Action::None),

        (Connecting | Connected, StreamEvent::Closed { deliberate: false }) => {
            if attempt < policy.max_attempts {
                let attempt = attempt + 1;
                let delay = policy.delay_for_attempt(attempt);
                (Disconnected, attempt, Action::ScheduleReconnect(delay))
            } else {
                (Errored, attempt, Action::GiveUp)
            }
        }

        (Disconnected, StreamEvent::ReconnectTimerFired) => (Connecting, attempt, Action::Connect),

        // Errored is terminal for the automatic path; only a manual
        // reset (force_reconnect) leaves it.
        (Errored, _) => (Errored, attempt, Action::None),

        (state, _) => (state, attempt, Action::None),
    }
}
