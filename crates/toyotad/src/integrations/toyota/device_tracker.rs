use std::sync::Arc;

use toyota_api::FeatureValue;
use toyota_api::VehicleFeature;

use super::entity::entity_id;
use super::entity::entity_name;
use super::entity::Requires;
use super::fleet::Fleet;
use crate::engine::Entity;
use crate::engine::FromIntegrationMessage;
use crate::engine::TrackerState;

#[derive(Debug)]
pub struct Description {
    pub feature: VehicleFeature,
    pub icon: &'static str,
    pub name: &'static str,
    pub requires: Requires,
}

pub const DEVICE_TRACKERS: &[Description] = &[
    // Parked location comes from the health status, which needs a subscription.
    Description {
        feature: VehicleFeature::ParkingLocation,
        icon: "mdi:map-marker",
        name: "Parking Location",
        requires: Requires::SUBSCRIPTION,
    },
    Description {
        feature: VehicleFeature::RealTimeLocation,
        icon: "mdi:crosshairs-gps",
        name: "Real Time Location",
        requires: Requires::NOTHING,
    },
];

pub struct DeviceTracker {
    entity_id: String,
    vin: String,
    description: &'static Description,
    fleet: Arc<Fleet>,
}

impl DeviceTracker {
    pub fn new(vin: &str, description: &'static Description, fleet: Arc<Fleet>) -> Self {
        Self {
            entity_id: entity_id("device_tracker", vin, description.feature, None),
            vin: vin.to_string(),
            description,
            fleet,
        }
    }

    pub fn state(&self) -> TrackerState {
        let vehicle = self.fleet.get(&self.vin);
        let position = vehicle
            .as_ref()
            .and_then(|v| v.features.get(self.description.feature))
            .and_then(|value| match value {
                FeatureValue::Location {
                    latitude,
                    longitude,
                } => Some((*latitude, *longitude)),
                _ => None,
            });

        TrackerState {
            name: entity_name(self.description.name, vehicle.as_ref().map(|v| &v.info)),
            icon: self.description.icon.to_string(),
            latitude: position.map(|(lat, _)| lat),
            longitude: position.map(|(_, lon)| lon),
        }
    }
}

impl Entity for DeviceTracker {
    fn entity_id(&self) -> &str {
        &self.entity_id
    }

    fn platform(&self) -> &'static str {
        "device_tracker"
    }

    fn state_message(&self) -> FromIntegrationMessage {
        FromIntegrationMessage::TrackerStateChanged {
            entity_id: self.entity_id.clone(),
            state: self.state(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use toyota_api::Vehicle;
    use toyota_api::VehicleInfo;

    use super::*;

    #[test]
    fn test_tracker_position() {
        let info = VehicleInfo::from_listing(&json!({
            "vin": "A1", "generation": "21MM", "nickName": "Daily"
        }))
        .unwrap();
        let mut vehicle = Vehicle::new(info);
        vehicle.features.insert(
            VehicleFeature::ParkingLocation,
            FeatureValue::Location {
                latitude: 33.8,
                longitude: -84.4,
            },
        );
        let fleet = Arc::new(Fleet::new());
        fleet.replace(vec![vehicle]);

        let parked = DeviceTracker::new("A1", &DEVICE_TRACKERS[0], fleet.clone());
        assert_eq!(parked.entity_id(), "device_tracker.toyota_a1_parking_location");
        let state = parked.state();
        assert_eq!(state.latitude, Some(33.8));
        assert_eq!(state.longitude, Some(-84.4));
        assert_eq!(state.name, "Parking Location Daily");

        let live = DeviceTracker::new("A1", &DEVICE_TRACKERS[1], fleet).state();
        assert_eq!(live.latitude, None);
        assert_eq!(live.icon, "mdi:crosshairs-gps");
    }
}
