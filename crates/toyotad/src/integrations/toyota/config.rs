use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Allowed values for `update_interval`, in seconds.
pub const UPDATE_INTERVAL_OPTIONS: [u64; 6] = [60, 300, 600, 900, 1800, 3600];

/// Allowed values for `refresh_status_interval`, in seconds.
pub const REFRESH_STATUS_INTERVAL_OPTIONS: [u64; 5] = [1800, 3600, 7200, 14400, 28800];

/// Upper bound for `timing.max_polls`.
pub const MAX_POLLS_LIMIT: u32 = 60;

fn default_update_interval() -> u64 {
    300
}

fn default_refresh_status_interval() -> u64 {
    3600
}

/// Configuration for the Toyota integration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Toyota account e-mail
    pub username: String,

    pub password: String,

    /// Gateway API key sent as `x-api-key`
    pub api_key: String,

    /// Where tokens and the last status-refresh time are kept between runs
    #[serde(default)]
    pub state_path: Option<PathBuf>,

    /// Seconds between coordinator refreshes
    #[serde(default = "default_update_interval")]
    pub update_interval: u64,

    /// Minimum seconds between server-side status refreshes
    #[serde(default = "default_refresh_status_interval")]
    pub refresh_status_interval: u64,

    #[serde(default)]
    pub timing: TimingConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        if !UPDATE_INTERVAL_OPTIONS.contains(&self.update_interval) {
            return Err(format!(
                "update_interval must be one of {:?}, got {}",
                UPDATE_INTERVAL_OPTIONS, self.update_interval
            ));
        }
        if !REFRESH_STATUS_INTERVAL_OPTIONS.contains(&self.refresh_status_interval) {
            return Err(format!(
                "refresh_status_interval must be one of {:?}, got {}",
                REFRESH_STATUS_INTERVAL_OPTIONS, self.refresh_status_interval
            ));
        }
        if !(1..=MAX_POLLS_LIMIT).contains(&self.timing.max_polls) {
            return Err(format!(
                "timing.max_polls must be between 1 and {}, got {}",
                MAX_POLLS_LIMIT, self.timing.max_polls
            ));
        }
        Ok(())
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval)
    }
}

/// Lock command confirmation timing, all in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub initial_wait: u64,
    pub poll_interval: u64,
    pub max_polls: u32,
    pub recovery_wait: u64,
    pub override_window: u64,
    pub success_hold: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            initial_wait: 1,
            poll_interval: 1,
            max_polls: 5,
            recovery_wait: 2,
            override_window: 30,
            success_hold: 10,
        }
    }
}
