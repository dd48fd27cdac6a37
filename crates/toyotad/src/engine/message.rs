//! Type-safe message system for toyotad
//!
//! Messages are split by direction to enforce correct usage at compile time:
//! - `FromIntegrationMessage`: Events from integrations to the engine
//! - `ToIntegrationMessage`: Commands from the engine to integrations

use super::state::BinarySensorState;
use super::state::LockState;
use super::state::SensorState;
use super::state::TrackerState;

/// Messages FROM integrations TO the engine (events/state updates)
#[derive(Debug, Clone)]
pub enum FromIntegrationMessage {
    /// An entity was discovered and registered
    EntityDiscovered {
        entity_id: String,
        integration_name: String,
    },

    /// An entity was removed (vehicle dropped from the account, etc.)
    EntityRemoved { entity_id: String },

    LockStateChanged {
        entity_id: String,
        state: LockState,
    },

    BinarySensorStateChanged {
        entity_id: String,
        state: BinarySensorState,
    },

    SensorStateChanged {
        entity_id: String,
        state: SensorState,
    },

    TrackerStateChanged {
        entity_id: String,
        state: TrackerState,
    },
}

/// Messages FROM the engine TO integrations (commands)
#[derive(Debug, Clone)]
pub enum ToIntegrationMessage {
    /// Lock (`lock == true`) or unlock a lock entity
    LockCommand { entity_id: String, lock: bool },

    /// Named service addressed to one vehicle
    ServiceCall { service: String, vehicle: String },
}
