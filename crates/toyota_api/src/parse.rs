//! Payload parsers: raw API JSON into [`FeatureStore`] entries.
//!
//! Every parser is best-effort. Missing, null or oddly-shaped fields are
//! skipped one at a time; a bad field never discards the rest of the payload.

use std::fmt;

use chrono::NaiveDateTime;
use chrono::TimeZone;
use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use crate::features::FeatureStore;
use crate::features::FeatureValue;
use crate::features::Reading;
use crate::features::VehicleFeature;

/// Timestamp format on the wire (always UTC).
pub const WIRE_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Local display format for timestamps stored in the feature store.
pub const DISPLAY_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Connector status value meaning "plugged in but not charging".
pub const CONNECTOR_NOT_CHARGING: f64 = 5.0;

/// Telemetry fields shaped as `{ "value": .., "unit": .. }`.
const TELEMETRY_FIELDS: &[(&str, VehicleFeature)] = &[
    ("distanceToEmpty", VehicleFeature::DistanceToEmpty),
    ("flTirePressure", VehicleFeature::FrontDriverTire),
    ("frTirePressure", VehicleFeature::FrontPassengerTire),
    ("rlTirePressure", VehicleFeature::RearDriverTire),
    ("rrTirePressure", VehicleFeature::RearPassengerTire),
    ("odometer", VehicleFeature::Odometer),
    ("spareTirePressure", VehicleFeature::SpareTirePressure),
    ("tripA", VehicleFeature::TripDetailsA),
    ("tripB", VehicleFeature::TripDetailsB),
    ("nextService", VehicleFeature::NextService),
    ("speed", VehicleFeature::Speed),
];

/// Health-status sections, keyed by "<category> <section>".
const STATUS_SECTIONS: &[(&str, VehicleFeature)] = &[
    ("Driver Side Door", VehicleFeature::FrontDriverDoor),
    ("Driver Side Window", VehicleFeature::FrontDriverWindow),
    ("Passenger Side Door", VehicleFeature::FrontPassengerDoor),
    ("Passenger Side Window", VehicleFeature::FrontPassengerWindow),
    ("Driver Side Rear Door", VehicleFeature::RearDriverDoor),
    ("Driver Side Rear Window", VehicleFeature::RearDriverWindow),
    ("Passenger Side Rear Door", VehicleFeature::RearPassengerDoor),
    ("Passenger Side Rear Window", VehicleFeature::RearPassengerWindow),
    ("Other Hatch", VehicleFeature::Trunk),
    ("Other Moonroof", VehicleFeature::Moonroof),
    ("Other Hood", VehicleFeature::Hood),
];

#[derive(Clone, Copy)]
enum ChargeUnit {
    /// Taken from the payload's `evDistanceUnit`.
    Distance,
    Fixed(&'static str),
}

/// Fields under `vehicleInfo.chargeInfo`.
const CHARGE_FIELDS: &[(&str, VehicleFeature, ChargeUnit)] = &[
    ("evDistance", VehicleFeature::ChargeDistance, ChargeUnit::Distance),
    ("evDistanceAC", VehicleFeature::ChargeDistanceAC, ChargeUnit::Distance),
    ("chargeRemainingAmount", VehicleFeature::ChargeLevel, ChargeUnit::Fixed("%")),
    ("plugStatus", VehicleFeature::PlugStatus, ChargeUnit::Fixed("")),
    ("remainingChargeTime", VehicleFeature::RemainingChargeTime, ChargeUnit::Fixed("")),
    ("evTravelableDistance", VehicleFeature::EvTravelableDistance, ChargeUnit::Fixed("")),
    ("chargeType", VehicleFeature::ChargeType, ChargeUnit::Fixed("")),
    ("connectorStatus", VehicleFeature::ConnectorStatus, ChargeUnit::Fixed("")),
];

fn lookup(table: &[(&str, VehicleFeature)], key: &str) -> Option<VehicleFeature> {
    table.iter().find(|(k, _)| *k == key).map(|(_, f)| *f)
}

/// Reformat a wire timestamp (`2024-01-15T10:30:00Z`) into `tz` local time.
pub fn format_wire_timestamp<Tz>(raw: &str, tz: &Tz) -> Option<String>
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    let naive = NaiveDateTime::parse_from_str(raw, WIRE_TIMESTAMP_FORMAT).ok()?;
    Some(
        Utc.from_utc_datetime(&naive)
            .with_timezone(tz)
            .format(DISPLAY_TIMESTAMP_FORMAT)
            .to_string(),
    )
}

fn location(value: &Value) -> Option<FeatureValue> {
    Some(FeatureValue::Location {
        latitude: value.get("latitude")?.as_f64()?,
        longitude: value.get("longitude")?.as_f64()?,
    })
}

fn value_with_unit(value: &Value) -> Option<FeatureValue> {
    let reading = Reading::from_json(value.get("value")?)?;
    let unit = value.get("unit").and_then(Value::as_str).unwrap_or_default();
    Some(FeatureValue::numeric(reading, unit))
}

/// Parse the telemetry payload, converting timestamps into `tz`.
pub fn parse_telemetry<Tz>(telemetry: &Value, store: &mut FeatureStore, tz: &Tz)
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    let Some(fields) = telemetry.as_object() else {
        debug!("Telemetry payload is not an object, skipping");
        return;
    };

    for (key, value) in fields {
        if value.is_null() {
            continue;
        }

        let parsed = match key.as_str() {
            "lastTimestamp" | "tirePressureTimestamp" => {
                let feature = if key == "lastTimestamp" {
                    VehicleFeature::LastTimeStamp
                } else {
                    VehicleFeature::LastTirePressureTimeStamp
                };
                value
                    .as_str()
                    .and_then(|raw| format_wire_timestamp(raw, tz))
                    .map(|text| (feature, FeatureValue::numeric(Reading::Text(text), "")))
            }
            "fuelLevel" => Reading::from_json(value)
                .map(|r| (VehicleFeature::FuelLevel, FeatureValue::numeric(r, "%"))),
            "vehicleLocation" => location(value).map(|v| (VehicleFeature::RealTimeLocation, v)),
            other => match lookup(TELEMETRY_FIELDS, other) {
                Some(feature) => value_with_unit(value).map(|v| (feature, v)),
                None => continue,
            },
        };

        match parsed {
            Some((feature, value)) => store.insert(feature, value),
            None => debug!("Skipping malformed telemetry field {}", key),
        }
    }
}

fn section_value(section: &Value) -> Option<FeatureValue> {
    let values = section.get("values")?.as_array()?;
    let text = |i: usize| -> Option<&str> { values.get(i)?.get("value")?.as_str() };

    // "closed" is always the first entry, "locked" the second when present.
    let closed = text(0)?.eq_ignore_ascii_case("closed");
    match values.len() {
        1 => Some(FeatureValue::Opening { closed }),
        _ => Some(FeatureValue::LockableOpening {
            closed,
            locked: text(1)?.eq_ignore_ascii_case("locked"),
        }),
    }
}

/// Parse the vehicle health/lock status payload.
pub fn parse_vehicle_status(status: &Value, store: &mut FeatureStore) {
    if let Some(parked) = location(status) {
        store.insert(VehicleFeature::ParkingLocation, parked);
    }

    let Some(categories) = status.get("vehicleStatus").and_then(Value::as_array) else {
        debug!("Vehicle status payload has no vehicleStatus list");
        return;
    };

    for category in categories {
        let Some(category_type) = category.get("category").and_then(Value::as_str) else {
            continue;
        };
        let Some(sections) = category.get("sections").and_then(Value::as_array) else {
            continue;
        };

        for section in sections {
            let Some(section_type) = section.get("section").and_then(Value::as_str) else {
                continue;
            };
            let key = format!("{} {}", category_type, section_type);
            let Some(feature) = lookup(STATUS_SECTIONS, &key) else {
                continue;
            };
            match section_value(section) {
                Some(value) => store.insert(feature, value),
                None => debug!("Skipping malformed status section {}", key),
            }
        }
    }
}

/// Parse the remote engine status payload.
pub fn parse_engine_status(status: &Value, store: &mut FeatureStore) {
    let on = match status.get("status") {
        Some(Value::String(s)) => s == "1",
        Some(Value::Number(n)) => n.as_i64() == Some(1),
        _ => {
            debug!("Engine status payload has no status field");
            return;
        }
    };

    store.insert(
        VehicleFeature::RemoteStartStatus,
        FeatureValue::RemoteStart {
            on,
            timer: status.get("timer").and_then(Reading::from_json),
            date: status.get("date").and_then(Value::as_str).map(String::from),
        },
    );
}

/// Parse the electric (charge) status payload.
pub fn parse_electric_status(status: &Value, store: &mut FeatureStore) {
    let Some(info) = status.pointer("/vehicleInfo/chargeInfo") else {
        debug!("Electric status payload has no chargeInfo");
        return;
    };

    let distance_unit = info
        .get("evDistanceUnit")
        .and_then(Value::as_str)
        .unwrap_or_default();

    for &(field, feature, unit) in CHARGE_FIELDS {
        let Some(reading) = info.get(field).and_then(Reading::from_json) else {
            continue;
        };
        let unit = match unit {
            ChargeUnit::Distance => distance_unit,
            ChargeUnit::Fixed(u) => u,
        };
        store.insert(feature, FeatureValue::numeric(reading, unit));
    }

    // Integral and fractional encodings of the same code compare equal.
    if let Some(connector) = info.get("connectorStatus").and_then(Value::as_f64) {
        store.insert(
            VehicleFeature::ChargingStatus,
            FeatureValue::Flag {
                on: connector != CONNECTOR_NOT_CHARGING,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use chrono::FixedOffset;
    use serde_json::json;

    use super::*;

    fn utc_minus_five() -> FixedOffset {
        FixedOffset::west_opt(5 * 3600).unwrap()
    }

    #[test]
    fn test_format_wire_timestamp() {
        assert_eq!(
            format_wire_timestamp("2024-01-15T10:30:00Z", &utc_minus_five()).as_deref(),
            Some("2024-01-15 05:30:00")
        );
        assert_eq!(
            format_wire_timestamp("2024-01-15T10:30:00Z", &Utc).as_deref(),
            Some("2024-01-15 10:30:00")
        );
        assert_eq!(format_wire_timestamp("15/01/2024", &Utc), None);
    }

    #[test]
    fn test_parse_telemetry() {
        let telemetry = json!({
            "fuelLevel": 62,
            "odometer": {"value": 12034, "unit": "mi"},
            "flTirePressure": {"value": 35, "unit": "psi"},
            "lastTimestamp": "2024-01-15T10:30:00Z",
            "tirePressureTimestamp": null,
            "vehicleLocation": {"latitude": 33.08, "longitude": -96.83},
            "somethingNew": {"value": 1, "unit": "x"},
        });

        let mut store = FeatureStore::new();
        parse_telemetry(&telemetry, &mut store, &utc_minus_five());

        assert_eq!(
            store.get(VehicleFeature::FuelLevel),
            Some(&FeatureValue::numeric(Reading::Number(62.0), "%"))
        );
        assert_eq!(
            store.get(VehicleFeature::Odometer),
            Some(&FeatureValue::numeric(Reading::Number(12034.0), "mi"))
        );
        assert_eq!(
            store.get(VehicleFeature::LastTimeStamp),
            Some(&FeatureValue::numeric(
                Reading::Text("2024-01-15 05:30:00".to_string()),
                ""
            ))
        );
        assert_eq!(
            store.get(VehicleFeature::RealTimeLocation),
            Some(&FeatureValue::Location {
                latitude: 33.08,
                longitude: -96.83
            })
        );
        assert!(!store.contains(VehicleFeature::LastTirePressureTimeStamp));
        assert_eq!(store.len(), 5);
    }

    #[test]
    fn test_parse_telemetry_skips_bad_fields() {
        let telemetry = json!({
            "lastTimestamp": "yesterday",
            "odometer": 12034,
            "speed": {"unit": "km/h"},
            "tripA": {"value": 4.2, "unit": "mi"},
        });

        let mut store = FeatureStore::new();
        parse_telemetry(&telemetry, &mut store, &Utc);

        assert_eq!(store.len(), 1);
        assert!(store.contains(VehicleFeature::TripDetailsA));

        // Non-object payloads leave the store untouched
        parse_telemetry(&json!([1, 2, 3]), &mut store, &Utc);
        assert_eq!(store.len(), 1);
    }

    fn section(name: &str, values: &[&str]) -> Value {
        json!({
            "section": name,
            "values": values.iter().map(|v| json!({"value": v, "status": 0})).collect::<Vec<_>>(),
        })
    }

    #[test]
    fn test_parse_vehicle_status() {
        let status = json!({
            "latitude": 33.1,
            "longitude": -96.8,
            "vehicleStatus": [
                {
                    "category": "Driver Side",
                    "sections": [
                        section("Door", &["Closed", "Locked"]),
                        section("Window", &["Open"]),
                        section("Rear Door", &["CLOSED", "Unlocked"]),
                    ]
                },
                {
                    "category": "Other",
                    "sections": [
                        section("Hood", &["closed"]),
                        section("Glovebox", &["closed"]),
                    ]
                }
            ]
        });

        let mut store = FeatureStore::new();
        parse_vehicle_status(&status, &mut store);

        assert_eq!(
            store.get(VehicleFeature::FrontDriverDoor),
            Some(&FeatureValue::LockableOpening {
                closed: true,
                locked: true
            })
        );
        assert_eq!(
            store.get(VehicleFeature::FrontDriverWindow),
            Some(&FeatureValue::Opening { closed: false })
        );
        assert_eq!(
            store.get(VehicleFeature::RearDriverDoor),
            Some(&FeatureValue::LockableOpening {
                closed: true,
                locked: false
            })
        );
        assert_eq!(
            store.get(VehicleFeature::Hood),
            Some(&FeatureValue::Opening { closed: true })
        );
        assert!(store.contains(VehicleFeature::ParkingLocation));
        assert_eq!(store.len(), 5);
    }

    #[test]
    fn test_parse_vehicle_status_partial() {
        let status = json!({
            "vehicleStatus": [
                {"category": "Driver Side"},
                {"sections": [section("Door", &["Closed", "Locked"])]},
                {
                    "category": "Passenger Side",
                    "sections": [
                        {"section": "Door", "values": []},
                        {"section": "Window"},
                        section("Door", &["Open", "Unlocked"]),
                    ]
                }
            ]
        });

        let mut store = FeatureStore::new();
        parse_vehicle_status(&status, &mut store);

        assert_eq!(
            store.get(VehicleFeature::FrontPassengerDoor),
            Some(&FeatureValue::LockableOpening {
                closed: false,
                locked: false
            })
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_parse_engine_status() {
        let mut store = FeatureStore::new();
        parse_engine_status(
            &json!({"status": "1", "timer": 600, "date": "2024-01-15T10:30:00Z"}),
            &mut store,
        );
        assert_eq!(
            store.get(VehicleFeature::RemoteStartStatus),
            Some(&FeatureValue::RemoteStart {
                on: true,
                timer: Some(Reading::Number(600.0)),
                date: Some("2024-01-15T10:30:00Z".to_string()),
            })
        );

        parse_engine_status(&json!({"status": "0"}), &mut store);
        assert!(matches!(
            store.get(VehicleFeature::RemoteStartStatus),
            Some(FeatureValue::RemoteStart { on: false, timer: None, date: None })
        ));

        let mut empty = FeatureStore::new();
        parse_engine_status(&json!({}), &mut empty);
        assert!(empty.is_empty());
    }

    fn electric(connector: Value) -> Value {
        json!({
            "vehicleInfo": {
                "chargeInfo": {
                    "evDistance": 21.5,
                    "evDistanceAC": 19.0,
                    "evDistanceUnit": "mi",
                    "chargeRemainingAmount": 80,
                    "plugStatus": 45,
                    "connectorStatus": connector,
                }
            }
        })
    }

    #[test]
    fn test_charging_status_derivation() {
        let mut store = FeatureStore::new();
        parse_electric_status(&electric(json!(5)), &mut store);
        assert_eq!(
            store.get(VehicleFeature::ChargingStatus),
            Some(&FeatureValue::Flag { on: false })
        );

        parse_electric_status(&electric(json!(3)), &mut store);
        assert_eq!(
            store.get(VehicleFeature::ChargingStatus),
            Some(&FeatureValue::Flag { on: true })
        );

        parse_electric_status(&electric(json!(5.0)), &mut store);
        assert_eq!(
            store.get(VehicleFeature::ChargingStatus),
            Some(&FeatureValue::Flag { on: false })
        );
    }

    #[test]
    fn test_parse_electric_status_units() {
        let mut store = FeatureStore::new();
        parse_electric_status(&electric(json!(3)), &mut store);

        assert_eq!(
            store.get(VehicleFeature::ChargeDistance),
            Some(&FeatureValue::numeric(Reading::Number(21.5), "mi"))
        );
        assert_eq!(
            store.get(VehicleFeature::ChargeDistanceAC),
            Some(&FeatureValue::numeric(Reading::Number(19.0), "mi"))
        );
        assert_eq!(
            store.get(VehicleFeature::ChargeLevel),
            Some(&FeatureValue::numeric(Reading::Number(80.0), "%"))
        );
        // Fields absent from the payload stay absent
        assert!(!store.contains(VehicleFeature::RemainingChargeTime));
        assert!(!store.contains(VehicleFeature::ChargeType));
    }

    #[test]
    fn test_parse_electric_status_without_charge_info() {
        let mut store = FeatureStore::new();
        parse_electric_status(&json!({"vehicleInfo": {}}), &mut store);
        assert!(store.is_empty());
    }
}
