//! Lock command confirmation session.
//!
//! A session is one value, replaced as a whole on every transition:
//!
//! ```text
//! Idle -> Transition(Sending) -> Transition(RefreshRequested)
//!      -> Transition(Polling) [-> Transition(Recovering)]
//!      -> Pinned (confirmed) | Idle (timed out or aborted)
//! ```
//!
//! The optimistic override carries its own expiry, so a coordinator refresh
//! racing a command resolves the same way under any scheduler.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use super::config::TimingConfig;

/// Confirmation timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmTiming {
    /// Delay between the refresh request and the first poll
    pub initial_wait: Duration,
    pub poll_interval: Duration,
    pub max_polls: u32,
    /// Delay inside the single recovery attempt after the polls run out
    pub recovery_wait: Duration,
    /// Lifetime of the override set when a command starts
    pub override_window: Duration,
    /// How long a confirmed target stays pinned after success
    pub success_hold: Duration,
}

impl Default for ConfirmTiming {
    fn default() -> Self {
        TimingConfig::default().into()
    }
}

impl From<TimingConfig> for ConfirmTiming {
    fn from(cfg: TimingConfig) -> Self {
        Self {
            initial_wait: Duration::from_secs(cfg.initial_wait),
            poll_interval: Duration::from_secs(cfg.poll_interval),
            max_polls: cfg.max_polls,
            recovery_wait: Duration::from_secs(cfg.recovery_wait),
            override_window: Duration::from_secs(cfg.override_window),
            success_hold: Duration::from_secs(cfg.success_hold),
        }
    }
}

/// Forced observable value with an expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Override {
    pub value: bool,
    pub until: Instant,
}

impl Override {
    pub fn active_at(&self, now: Instant) -> bool {
        now < self.until
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Phase {
    Sending,
    RefreshRequested,
    Polling,
    Recovering,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Session {
    #[default]
    Idle,

    /// A command is in flight.
    Transition {
        target: bool,
        phase: Phase,
        progress: u8,
        hold: Override,
    },

    /// Confirmed; the target stays visible until `hold` lapses.
    Pinned { hold: Override },
}

impl Session {
    pub fn begin(target: bool, now: Instant, timing: &ConfirmTiming) -> Self {
        Session::Transition {
            target,
            phase: Phase::Sending,
            progress: 10,
            hold: Override {
                value: target,
                until: now + timing.override_window,
            },
        }
    }

    /// Move an in-flight session to `phase`. Other sessions are unchanged.
    pub fn advance(self, phase: Phase, progress: u8) -> Self {
        match self {
            Session::Transition { target, hold, .. } => Session::Transition {
                target,
                phase,
                progress: progress.min(100),
                hold,
            },
            other => other,
        }
    }

    /// End an in-flight session. On success the target is pinned for
    /// `success_hold`; otherwise the override is dropped at once.
    pub fn settle(self, confirmed: bool, now: Instant, timing: &ConfirmTiming) -> Self {
        match (self, confirmed) {
            (Session::Transition { target, .. }, true) => Session::Pinned {
                hold: Override {
                    value: target,
                    until: now + timing.success_hold,
                },
            },
            _ => Session::Idle,
        }
    }

    /// Target of the in-flight command, if any.
    pub fn target(&self) -> Option<bool> {
        match self {
            Session::Transition { target, .. } => Some(*target),
            _ => None,
        }
    }

    pub fn in_transition(&self) -> bool {
        self.target().is_some()
    }

    pub fn phase(&self) -> Option<Phase> {
        match self {
            Session::Transition { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    pub fn progress(&self) -> Option<u8> {
        match self {
            Session::Transition { progress, .. } => Some(*progress),
            _ => None,
        }
    }

    /// Value that masks the vehicle-reported state at `now`: an active
    /// override first, then the target of an in-flight command.
    pub fn forced(&self, now: Instant) -> Option<bool> {
        match self {
            Session::Idle => None,
            Session::Transition { target, hold, .. } => {
                Some(if hold.active_at(now) { hold.value } else { *target })
            }
            Session::Pinned { hold } => hold.active_at(now).then_some(hold.value),
        }
    }
}
