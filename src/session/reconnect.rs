//! Reconnection state machine.
//!
//! Tracks the broadcast transport's connection state and schedules bounded
//! exponential-backoff retries. Pure over injected time: the session pump
//! feeds it status transitions and `Instant::now()`, and acts on the
//! decisions it returns.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::session::event::ConnectionStatus;

/// Backoff schedule: min(base * 2^(attempt-1), max).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1_000),
            max: Duration::from_millis(16_000),
        }
    }
}

impl BackoffPolicy {
    /// Delay before the given 1-based attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        let factor = 1u32.checked_shl(exp).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map(|delay| delay.min(self.max))
            .unwrap_or(self.max)
    }
}

/// Connection state surfaced to callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    Reconnecting,
    /// Terminal: retry budget exhausted. Requires an external trigger to
    /// resume.
    Disconnected,
}

/// What the session should do in response to a status transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StatusOutcome {
    /// Subscription succeeded. `reconcile` is true on every success except
    /// the very first in the session's lifetime.
    Connected { reconcile: bool },
    /// A retry has been scheduled after `delay`.
    RetryScheduled { attempt: u32, delay: Duration },
    /// Retry budget exhausted; state is now Disconnected.
    GaveUp,
    NoChange,
}

pub struct ReconnectManager {
    policy: BackoffPolicy,
    max_attempts: u32,
    state: ConnectionState,
    attempts: u32,
    /// At most one pending retry deadline at any time.
    deadline: Option<Instant>,
    connected_before: bool,
}

impl ReconnectManager {
    pub fn new(policy: BackoffPolicy, max_attempts: u32) -> Self {
        Self {
            policy,
            max_attempts,
            state: ConnectionState::Reconnecting,
            attempts: 0,
            deadline: None,
            connected_before: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn pending_deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Feed a transport status transition.
    pub fn on_status(&mut self, status: ConnectionStatus, now: Instant) -> StatusOutcome {
        match status {
            ConnectionStatus::Subscribed => {
                let reconcile = self.connected_before;
                self.connected_before = true;
                self.attempts = 0;
                self.deadline = None;
                self.state = ConnectionState::Connected;
                StatusOutcome::Connected { reconcile }
            }
            ConnectionStatus::Error | ConnectionStatus::Timeout | ConnectionStatus::Closed => {
                if self.state == ConnectionState::Disconnected {
                    return StatusOutcome::NoChange;
                }
                // Count the attempt first, then check the budget.
                self.attempts += 1;
                if self.attempts > self.max_attempts {
                    self.state = ConnectionState::Disconnected;
                    self.deadline = None;
                    tracing::warn!(
                        attempts = self.attempts - 1,
                        status = status.as_str(),
                        "reconnect budget exhausted; giving up"
                    );
                    return StatusOutcome::GaveUp;
                }
                self.state = ConnectionState::Reconnecting;
                let delay = self.policy.delay_for(self.attempts);
                // Replaces any previously pending deadline.
                self.deadline = Some(now + delay);
                tracing::debug!(
                    attempt = self.attempts,
                    delay_ms = delay.as_millis() as u64,
                    status = status.as_str(),
                    "reconnect scheduled"
                );
                StatusOutcome::RetryScheduled {
                    attempt: self.attempts,
                    delay,
                }
            }
        }
    }

    /// True when a scheduled retry is due; clears the deadline so the
    /// caller attempts exactly once per schedule.
    pub fn poll_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    /// Cancel any pending retry; used at session teardown so a stray timer
    /// can never fire after the session is gone.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// External retry trigger for the terminal Disconnected state.
    pub fn restart(&mut self, now: Instant) {
        if self.state != ConnectionState::Disconnected {
            return;
        }
        self.attempts = 0;
        self.state = ConnectionState::Reconnecting;
        self.deadline = Some(now);
    }
}
