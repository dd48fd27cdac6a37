use std::sync::Arc;

use toyota_api::FeatureValue;
use toyota_api::VehicleFeature;

use super::entity::entity_id;
use super::entity::entity_name;
use super::entity::Requires;
use super::fleet::Fleet;
use crate::engine::Entity;
use crate::engine::FromIntegrationMessage;
use crate::engine::SensorState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum StateClass {
    Measurement,
    TotalIncreasing,
}

/// Where a sensor's unit comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    /// Whatever the vehicle reported (miles or kilometres).
    Reported,
    Fixed(&'static str),
    None,
}

#[derive(Debug)]
pub struct Description {
    pub feature: VehicleFeature,
    pub state_class: StateClass,
    pub icon: &'static str,
    pub name: &'static str,
    pub unit: Unit,
    pub requires: Requires,
}

const fn sensor(
    feature: VehicleFeature,
    icon: &'static str,
    name: &'static str,
    unit: Unit,
    requires: Requires,
) -> Description {
    Description {
        feature,
        state_class: StateClass::Measurement,
        icon,
        name,
        unit,
        requires,
    }
}

pub const SENSORS: &[Description] = &[
    sensor(VehicleFeature::DistanceToEmpty, "mdi:gauge", "Distance To Empty", Unit::Reported, Requires::NOTHING),
    sensor(VehicleFeature::FuelLevel, "mdi:gauge", "Fuel Level", Unit::Fixed("%"), Requires::NOTHING),
    Description {
        feature: VehicleFeature::Odometer,
        state_class: StateClass::TotalIncreasing,
        icon: "mdi:counter",
        name: "Odometer",
        unit: Unit::Reported,
        requires: Requires::NOTHING,
    },
    sensor(VehicleFeature::TripDetailsA, "mdi:counter", "Trip Details A", Unit::Reported, Requires::NOTHING),
    sensor(VehicleFeature::TripDetailsB, "mdi:counter", "Trip Details B", Unit::Reported, Requires::NOTHING),
    sensor(VehicleFeature::FrontDriverTire, "mdi:car-tire-alert", "Front Driver Tire", Unit::Fixed("psi"), Requires::NOTHING),
    sensor(VehicleFeature::FrontPassengerTire, "mdi:car-tire-alert", "Front Passenger Tire", Unit::Fixed("psi"), Requires::NOTHING),
    sensor(VehicleFeature::RearDriverTire, "mdi:car-tire-alert", "Rear Driver Tire", Unit::Fixed("psi"), Requires::NOTHING),
    sensor(VehicleFeature::RearPassengerTire, "mdi:car-tire-alert", "Rear Passenger Tire", Unit::Fixed("psi"), Requires::NOTHING),
    sensor(VehicleFeature::SpareTirePressure, "mdi:car-tire-alert", "Spare Tire Pressure", Unit::Fixed("psi"), Requires::NOTHING),
    sensor(VehicleFeature::NextService, "mdi:wrench-clock", "Next Service", Unit::Reported, Requires::NOTHING),
    sensor(VehicleFeature::ChargeDistance, "mdi:gauge", "EV Range", Unit::Reported, Requires::ELECTRIC),
    sensor(VehicleFeature::ChargeDistanceAC, "mdi:gauge", "EV Range AC", Unit::Reported, Requires::ELECTRIC),
    sensor(VehicleFeature::ChargeLevel, "mdi:gauge", "EV Battery Level", Unit::Fixed("%"), Requires::ELECTRIC),
    sensor(VehicleFeature::LastTimeStamp, "mdi:gauge", "Last Update Timestamp", Unit::None, Requires::NOTHING),
    sensor(
        VehicleFeature::LastTirePressureTimeStamp,
        "mdi:gauge",
        "Last Tire Pressure Update Timestamp",
        Unit::None,
        Requires::NOTHING,
    ),
    sensor(VehicleFeature::Speed, "mdi:gauge", "Speed", Unit::Fixed("km/h"), Requires::NOTHING),
    sensor(VehicleFeature::PlugStatus, "mdi:ev-plug-type1", "Plug Status", Unit::None, Requires::ELECTRIC),
    sensor(VehicleFeature::RemainingChargeTime, "mdi:clock-outline", "Remaining Charge Time", Unit::None, Requires::ELECTRIC),
    sensor(VehicleFeature::EvTravelableDistance, "mdi:gauge", "EV Travelable Distance", Unit::None, Requires::ELECTRIC),
    sensor(VehicleFeature::ChargeType, "mdi:ev-plug-type1", "Charge Type", Unit::None, Requires::ELECTRIC),
    sensor(VehicleFeature::ConnectorStatus, "mdi:ev-plug-type1", "Connector Status", Unit::None, Requires::ELECTRIC),
];

pub struct Sensor {
    entity_id: String,
    vin: String,
    description: &'static Description,
    fleet: Arc<Fleet>,
}

impl Sensor {
    pub fn new(vin: &str, description: &'static Description, fleet: Arc<Fleet>) -> Self {
        Self {
            entity_id: entity_id("sensor", vin, description.feature, None),
            vin: vin.to_string(),
            description,
            fleet,
        }
    }

    pub fn state(&self) -> SensorState {
        let vehicle = self.fleet.get(&self.vin);
        let (value, reported_unit) = match vehicle
            .as_ref()
            .and_then(|v| v.features.get(self.description.feature))
        {
            Some(FeatureValue::Numeric { value, unit }) => (Some(value.clone()), Some(unit.as_str())),
            _ => (None, None),
        };

        let unit = match self.description.unit {
            Unit::Reported => reported_unit.filter(|u| !u.is_empty()).map(String::from),
            Unit::Fixed(unit) => Some(unit.to_string()),
            Unit::None => None,
        };

        SensorState {
            name: entity_name(self.description.name, vehicle.as_ref().map(|v| &v.info)),
            icon: self.description.icon.to_string(),
            state_class: self.description.state_class.to_string(),
            value,
            unit,
        }
    }
}

impl Entity for Sensor {
    fn entity_id(&self) -> &str {
        &self.entity_id
    }

    fn platform(&self) -> &'static str {
        "sensor"
    }

    fn state_message(&self) -> FromIntegrationMessage {
        FromIntegrationMessage::SensorStateChanged {
            entity_id: self.entity_id.clone(),
            state: self.state(),
        }
    }
}
