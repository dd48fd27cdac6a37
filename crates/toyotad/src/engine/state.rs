use std::collections::HashMap;

use serde::Serialize;
use toyota_api::Reading;

/// Extra attributes published with a lock entity.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct LockAttributes {
    /// 0-100 while a command is in flight.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_progress: Option<u8>,

    /// "locking" or "unlocking" while a command is in flight.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_type: Option<String>,

    pub command_in_progress: bool,

    /// "locked" or "unlocked".
    pub lock_state: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update_timestamp: Option<String>,
}

/// State of a lock entity.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct LockState {
    pub name: String,
    pub icon: String,
    pub available: bool,
    pub locked: bool,
    pub locking: bool,
    pub unlocking: bool,
    pub attributes: LockAttributes,
}

/// State of a binary sensor entity.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct BinarySensorState {
    pub name: String,
    pub icon: String,
    pub device_class: String,

    /// Meaning depends on device class: open, unlocked, running, charging.
    /// `None` when the vehicle has not reported the underlying feature.
    pub on: Option<bool>,
}

/// State of a sensor entity.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SensorState {
    pub name: String,
    pub icon: String,
    pub state_class: String,
    pub value: Option<Reading>,
    pub unit: Option<String>,
}

/// State of a device tracker entity.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct TrackerState {
    pub name: String,
    pub icon: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Centralized snapshot of the entire engine state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct State {
    pub locks: HashMap<String, LockState>,
    pub binary_sensors: HashMap<String, BinarySensorState>,
    pub sensors: HashMap<String, SensorState>,
    pub trackers: HashMap<String, TrackerState>,
}

impl State {
    fn remove(&mut self, entity_id: &str) {
        self.locks.remove(entity_id);
        self.binary_sensors.remove(entity_id);
        self.sensors.remove(entity_id);
        self.trackers.remove(entity_id);
    }

    pub(super) fn without(&self, entity_id: &str) -> Self {
        let mut next = self.clone();
        next.remove(entity_id);
        next
    }
}
