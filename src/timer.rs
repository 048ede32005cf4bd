use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimerState {
    Idle,
    Running,
    StoppedEarly,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    Tick { elapsed: Duration },
    Expired { question_id: u64 },
}

/// Countdown state machine for the active question. It holds no clock of its
/// own: the session's driver task feeds it elapsed time, and a tick that
/// arrives after a terminal transition is simply ignored.
#[derive(Debug, Clone)]
pub struct TimerCoordinator {
    state: TimerState,
    question_id: Option<u64>,
    duration: Duration,
    elapsed: Duration,
    expired: HashSet<u64>,
}

impl Default for TimerCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerCoordinator {
    pub fn new() -> Self {
        Self {
            state: TimerState::Idle,
            question_id: None,
            duration: Duration::ZERO,
            elapsed: Duration::ZERO,
            expired: HashSet::new(),
        }
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn remaining(&self) -> Duration {
        self.duration.saturating_sub(self.elapsed)
    }

    pub fn question_id(&self) -> Option<u64> {
        self.question_id
    }

    /// Returns false if the timer is already running.
    pub fn start(&mut self, question_id: u64, duration: Duration) -> bool {
        if self.state == TimerState::Running {
            return false;
        }
        self.state = TimerState::Running;
        self.question_id = Some(question_id);
        self.duration = duration;
        self.elapsed = Duration::ZERO;
        true
    }

    /// Idempotent. Only a running timer can be stopped.
    pub fn stop_early(&mut self) -> bool {
        if self.state != TimerState::Running {
            return false;
        }
        self.state = TimerState::StoppedEarly;
        true
    }

    pub fn advance(&mut self, elapsed: Duration) -> Option<TimerEvent> {
        if self.state != TimerState::Running {
            return None;
        }
        self.elapsed = elapsed;
        if elapsed >= self.duration {
            return self.expire();
        }
        Some(TimerEvent::Tick { elapsed })
    }

    /// Forces expiry of a running timer. At most one expiry is ever raised per
    /// question.
    pub fn expire(&mut self) -> Option<TimerEvent> {
        if self.state != TimerState::Running {
            return None;
        }
        self.state = TimerState::Expired;
        let question_id = self.question_id?;
        if !self.expired.insert(question_id) {
            return None;
        }
        Some(TimerEvent::Expired { question_id })
    }

    pub fn reset(&mut self) {
        self.state = TimerState::Idle;
        self.question_id = None;
        self.duration = Duration::ZERO;
        self.elapsed = Duration::ZERO;
    }

    pub fn has_expired(&self, question_id: u64) -> bool {
        self.expired.contains(&question_id)
    }
}
