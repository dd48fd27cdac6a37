use super::message::FromIntegrationMessage;

/// Entity abstraction for toyotad
///
/// Locks, sensors, binary sensors and trackers all implement this so an
/// integration can republish every entity after a refresh.
pub trait Entity: Send + Sync {
    fn entity_id(&self) -> &str;

    /// Return the platform type of this entity (e.g. "lock", "sensor")
    fn platform(&self) -> &'static str;

    /// Current state, ready to send to the engine
    fn state_message(&self) -> FromIntegrationMessage;
}
