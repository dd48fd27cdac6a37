use std::sync::Arc;

use serde::Serialize;
use toyota_api::FeatureValue;
use toyota_api::VehicleFeature;

use super::entity::entity_id;
use super::entity::entity_name;
use super::entity::Requires;
use super::fleet::Fleet;
use crate::engine::BinarySensorState;
use crate::engine::Entity;
use crate::engine::FromIntegrationMessage;

/// Device class for binary sensors; decides what "on" means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeviceClass {
    /// on = open
    Door,
    /// on = open
    Window,
    /// on = unlocked
    Lock,
    /// on = running
    Running,
    /// on = charging
    BatteryCharging,
}

#[derive(Debug)]
pub struct Description {
    pub feature: VehicleFeature,
    pub device_class: DeviceClass,
    pub icon: &'static str,
    pub name: &'static str,
    pub requires: Requires,
}

const fn door(feature: VehicleFeature, name: &'static str) -> Description {
    Description {
        feature,
        device_class: DeviceClass::Door,
        icon: "mdi:car-door",
        name,
        requires: Requires::SUBSCRIPTION,
    }
}

const fn window(feature: VehicleFeature, name: &'static str) -> Description {
    Description {
        feature,
        device_class: DeviceClass::Window,
        icon: "mdi:window-closed-variant",
        name,
        requires: Requires::SUBSCRIPTION,
    }
}

const fn door_lock(feature: VehicleFeature, name: &'static str) -> Description {
    Description {
        feature,
        device_class: DeviceClass::Lock,
        icon: "mdi:car-door-lock",
        name,
        requires: Requires::SUBSCRIPTION,
    }
}

pub const BINARY_SENSORS: &[Description] = &[
    door(VehicleFeature::FrontDriverDoor, "Front Driver Door"),
    door(VehicleFeature::FrontPassengerDoor, "Front Passenger Door"),
    door(VehicleFeature::RearDriverDoor, "Rear Driver Door"),
    door(VehicleFeature::RearPassengerDoor, "Rear Passenger Door"),
    door(VehicleFeature::Hood, "Hood"),
    door(VehicleFeature::Trunk, "Trunk"),
    window(VehicleFeature::Moonroof, "Moonroof"),
    window(VehicleFeature::FrontDriverWindow, "Front Driver Window"),
    window(VehicleFeature::FrontPassengerWindow, "Front Passenger Window"),
    window(VehicleFeature::RearDriverWindow, "Rear Driver Window"),
    window(VehicleFeature::RearPassengerWindow, "Rear Passenger Window"),
    door_lock(VehicleFeature::FrontDriverDoor, "Front Driver Door Lock"),
    door_lock(VehicleFeature::FrontPassengerDoor, "Front Passenger Door Lock"),
    door_lock(VehicleFeature::RearDriverDoor, "Rear Driver Door Lock"),
    door_lock(VehicleFeature::RearPassengerDoor, "Rear Passenger Door Lock"),
    Description {
        feature: VehicleFeature::RemoteStartStatus,
        device_class: DeviceClass::Running,
        icon: "mdi:car-hatchback",
        name: "Remote Start",
        requires: Requires::NOTHING,
    },
    Description {
        feature: VehicleFeature::ChargingStatus,
        device_class: DeviceClass::BatteryCharging,
        icon: "mdi:ev-station",
        name: "Charging Status",
        requires: Requires::ELECTRIC,
    },
];

impl Description {
    fn is_on(&self, value: &FeatureValue) -> Option<bool> {
        match (self.device_class, value) {
            (DeviceClass::Lock, FeatureValue::LockableOpening { locked, .. }) => Some(!locked),
            (DeviceClass::Door | DeviceClass::Window, FeatureValue::Opening { closed })
            | (DeviceClass::Door | DeviceClass::Window, FeatureValue::LockableOpening { closed, .. }) => {
                Some(!closed)
            }
            (DeviceClass::Running, FeatureValue::RemoteStart { on, .. })
            | (DeviceClass::BatteryCharging, FeatureValue::Flag { on }) => Some(*on),
            _ => None,
        }
    }
}

pub struct BinarySensor {
    entity_id: String,
    vin: String,
    description: &'static Description,
    fleet: Arc<Fleet>,
}

impl BinarySensor {
    pub fn new(vin: &str, description: &'static Description, fleet: Arc<Fleet>) -> Self {
        let suffix = (description.device_class == DeviceClass::Lock).then_some("lock");
        Self {
            entity_id: entity_id("binary_sensor", vin, description.feature, suffix),
            vin: vin.to_string(),
            description,
            fleet,
        }
    }

    pub fn state(&self) -> BinarySensorState {
        let vehicle = self.fleet.get(&self.vin);
        let on = vehicle
            .as_ref()
            .and_then(|v| v.features.get(self.description.feature))
            .and_then(|value| self.description.is_on(value));

        BinarySensorState {
            name: entity_name(self.description.name, vehicle.as_ref().map(|v| &v.info)),
            icon: self.description.icon.to_string(),
            device_class: self.description.device_class.to_string(),
            on,
        }
    }
}

impl Entity for BinarySensor {
    fn entity_id(&self) -> &str {
        &self.entity_id
    }

    fn platform(&self) -> &'static str {
        "binary_sensor"
    }

    fn state_message(&self) -> FromIntegrationMessage {
        FromIntegrationMessage::BinarySensorStateChanged {
            entity_id: self.entity_id.clone(),
            state: self.state(),
        }
    }
}
