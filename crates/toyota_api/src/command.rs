use serde::Deserialize;
use serde::Serialize;

/// Remote actions a vehicle can be asked to perform.
///
/// The snake_case names double as service names (`door_lock`, `engine_start`, ...).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RemoteCommand {
    DoorLock,
    DoorUnlock,
    EngineStart,
    EngineStop,
    HazardsOn,
    HazardsOff,
    Refresh,
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_service_names() {
        assert_eq!(RemoteCommand::DoorLock.to_string(), "door_lock");
        assert_eq!(
            RemoteCommand::from_str("hazards_off").unwrap(),
            RemoteCommand::HazardsOff
        );
        assert!(RemoteCommand::from_str("open_trunk").is_err());
    }
}
