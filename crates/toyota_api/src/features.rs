use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// Closed vocabulary of vehicle data points.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum VehicleFeature {
    // Openings
    FrontDriverDoor,
    FrontDriverWindow,
    FrontPassengerDoor,
    FrontPassengerWindow,
    RearDriverDoor,
    RearDriverWindow,
    RearPassengerDoor,
    RearPassengerWindow,
    Trunk,
    Moonroof,
    Hood,

    // Telemetry
    DistanceToEmpty,
    FrontDriverTire,
    FrontPassengerTire,
    RearDriverTire,
    RearPassengerTire,
    SpareTirePressure,
    FuelLevel,
    Odometer,
    TripDetailsA,
    TripDetailsB,
    NextService,
    Speed,
    LastTimeStamp,
    LastTirePressureTimeStamp,
    ParkingLocation,
    RealTimeLocation,

    // Remote start
    RemoteStartStatus,

    // Electric
    ChargeDistance,
    #[serde(rename = "charge_distance_ac")]
    #[strum(serialize = "charge_distance_ac")]
    ChargeDistanceAC,
    ChargeLevel,
    PlugStatus,
    RemainingChargeTime,
    EvTravelableDistance,
    ChargeType,
    ConnectorStatus,
    ChargingStatus,
}

/// A scalar reported by the API. Most are numbers, but some fields (formatted
/// timestamps, some electric fields) arrive as text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reading {
    Number(f64),
    Text(String),
}

impl Reading {
    /// Accepts JSON numbers and strings; anything else is not a reading.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_f64().map(Reading::Number),
            Value::String(s) => Some(Reading::Text(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reading::Number(n) => write!(f, "{}", n),
            Reading::Text(s) => f.write_str(s),
        }
    }
}

/// Typed value of a single feature.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeatureValue {
    /// Door, window, hatch: open or closed.
    Opening { closed: bool },

    /// A door that also reports its lock.
    LockableOpening { closed: bool, locked: bool },

    /// Value plus unit string (unit may be empty).
    Numeric { value: Reading, unit: String },

    Location { latitude: f64, longitude: f64 },

    RemoteStart {
        on: bool,
        timer: Option<Reading>,
        date: Option<String>,
    },

    /// Derived boolean (e.g. charging).
    Flag { on: bool },
}

impl FeatureValue {
    pub fn numeric(value: Reading, unit: impl Into<String>) -> Self {
        FeatureValue::Numeric {
            value,
            unit: unit.into(),
        }
    }
}

/// Feature key -> value. Keys are absent when the API omitted that datum;
/// inserting a key replaces its previous value wholesale.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FeatureStore {
    features: BTreeMap<VehicleFeature, FeatureValue>,
}

impl FeatureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, feature: VehicleFeature, value: FeatureValue) {
        self.features.insert(feature, value);
    }

    pub fn get(&self, feature: VehicleFeature) -> Option<&FeatureValue> {
        self.features.get(&feature)
    }

    pub fn contains(&self, feature: VehicleFeature) -> bool {
        self.features.contains_key(&feature)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (VehicleFeature, &FeatureValue)> {
        self.features.iter().map(|(k, v)| (*k, v))
    }

    /// Overlay `other` onto this store, key by key.
    pub fn merge(&mut self, other: FeatureStore) {
        self.features.extend(other.features);
    }

    /// `(feature, locked)` for every lockable opening.
    pub fn lock_states(&self) -> impl Iterator<Item = (VehicleFeature, bool)> + '_ {
        self.features.iter().filter_map(|(k, v)| match v {
            FeatureValue::LockableOpening { locked, .. } => Some((*k, *locked)),
            _ => None,
        })
    }

    /// Vehicle-level lock state: locked if any lockable opening is locked.
    ///
    /// Returns `None` when the store has no lockable openings at all.
    pub fn any_locked(&self) -> Option<bool> {
        let mut seen = false;
        for (_, locked) in self.lock_states() {
            if locked {
                return Some(true);
            }
            seen = true;
        }
        seen.then_some(false)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_feature_names_round_trip() {
        for feature in VehicleFeature::iter() {
            let name = feature.to_string();
            assert_eq!(VehicleFeature::from_str(&name).unwrap(), feature);
        }
        assert_eq!(VehicleFeature::ChargeDistanceAC.as_ref(), "charge_distance_ac");
    }

    #[test]
    fn test_any_locked_wins() {
        let mut store = FeatureStore::new();
        store.insert(
            VehicleFeature::FrontDriverDoor,
            FeatureValue::LockableOpening {
                closed: true,
                locked: false,
            },
        );
        store.insert(
            VehicleFeature::RearPassengerDoor,
            FeatureValue::LockableOpening {
                closed: true,
                locked: true,
            },
        );
        assert_eq!(store.any_locked(), Some(true));
    }

    #[test]
    fn test_any_locked_without_lockables() {
        let mut store = FeatureStore::new();
        assert_eq!(store.any_locked(), None);

        store.insert(VehicleFeature::Hood, FeatureValue::Opening { closed: true });
        assert_eq!(store.any_locked(), None);

        store.insert(
            VehicleFeature::FrontDriverDoor,
            FeatureValue::LockableOpening {
                closed: false,
                locked: false,
            },
        );
        assert_eq!(store.any_locked(), Some(false));
    }

    #[test]
    fn test_merge_replaces_whole_value() {
        let mut store = FeatureStore::new();
        store.insert(
            VehicleFeature::FuelLevel,
            FeatureValue::numeric(Reading::Number(40.0), "%"),
        );
        store.insert(VehicleFeature::Hood, FeatureValue::Opening { closed: true });

        let mut update = FeatureStore::new();
        update.insert(
            VehicleFeature::FuelLevel,
            FeatureValue::numeric(Reading::Number(38.0), ""),
        );
        store.merge(update);

        assert_eq!(
            store.get(VehicleFeature::FuelLevel),
            Some(&FeatureValue::numeric(Reading::Number(38.0), ""))
        );
        assert!(store.contains(VehicleFeature::Hood));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_reading_from_json() {
        assert_eq!(
            Reading::from_json(&serde_json::json!(12.5)),
            Some(Reading::Number(12.5))
        );
        assert_eq!(
            Reading::from_json(&serde_json::json!("3")),
            Some(Reading::Text("3".to_string()))
        );
        assert_eq!(Reading::from_json(&serde_json::json!({"value": 1})), None);
        assert_eq!(Reading::from_json(&Value::Null), None);
    }

    #[test]
    fn test_store_serializes_by_feature_name() {
        let mut store = FeatureStore::new();
        store.insert(VehicleFeature::Trunk, FeatureValue::Opening { closed: false });
        let json = serde_json::to_value(&store).unwrap();
        assert_eq!(json["trunk"]["kind"], "opening");
        assert_eq!(json["trunk"]["closed"], false);
    }
}
