use std::str::FromStr;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::api::VehicleApi;
use crate::command::RemoteCommand;
use crate::dispatch;
use crate::dispatch::CommandOutcome;
use crate::error::Error;
use crate::error::Result;
use crate::features::FeatureStore;
use crate::generation::strategy_for;
use crate::generation::ApiGeneration;
use crate::generation::UpdateReport;

/// Identity and entitlements of a vehicle, as reported by the listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleInfo {
    pub vin: String,
    pub nickname: Option<String>,
    pub model_name: String,
    pub model_year: String,
    pub generation: ApiGeneration,
    /// Active remote subscription; gates status endpoints and commands.
    pub subscribed: bool,
    pub electric: bool,
}

impl VehicleInfo {
    /// Build from one vehicle-listing entry.
    ///
    /// Fails for entries without a VIN or with a generation this crate does
    /// not support.
    pub fn from_listing(entry: &Value) -> Result<Self> {
        let text = |key: &str| entry.get(key).and_then(Value::as_str);

        let vin = text("vin")
            .ok_or_else(|| Error::Listing("missing vin".to_string()))?
            .to_string();
        let generation = text("generation").unwrap_or_default();
        let generation = ApiGeneration::from_str(generation)
            .map_err(|_| Error::UnsupportedGeneration(generation.to_string()))?;

        Ok(Self {
            nickname: text("nickName")
                .filter(|n| !n.is_empty())
                .map(String::from),
            model_name: text("modelName").unwrap_or("Unknown").to_string(),
            model_year: text("modelYear").unwrap_or("Unknown").to_string(),
            subscribed: text("remoteSubscriptionStatus") == Some("ACTIVE"),
            electric: entry.get("evVehicle").and_then(Value::as_bool) == Some(true),
            generation,
            vin,
        })
    }

    /// "<year> <model>"
    pub fn model(&self) -> String {
        format!("{} {}", self.model_year, self.model_name)
    }

    /// Nickname if set, else the model.
    pub fn display_name(&self) -> String {
        self.nickname.clone().unwrap_or_else(|| self.model())
    }

    /// Ask the backend to pull a fresh status from the vehicle.
    pub async fn poll_vehicle_refresh(&self, api: &dyn VehicleApi) -> Result<()> {
        api.send_refresh_status(&self.vin).await
    }

    /// Fire-and-forget remote command; see [`dispatch::send_command`].
    pub async fn send_command(&self, api: &dyn VehicleApi, command: RemoteCommand) -> CommandOutcome {
        dispatch::send_command(api, &self.vin, self.generation, command).await
    }
}

/// Fetch a fresh feature store for a vehicle without touching any existing one.
pub async fn fetch_features(api: &dyn VehicleApi, info: &VehicleInfo) -> (FeatureStore, UpdateReport) {
    let mut store = FeatureStore::new();
    let report = strategy_for(info.generation)
        .update(api, info, &mut store)
        .await;
    (store, report)
}

/// A vehicle and its latest known features.
#[derive(Debug, Clone, Serialize)]
pub struct Vehicle {
    pub info: VehicleInfo,
    pub features: FeatureStore,
}

impl Vehicle {
    pub fn new(info: VehicleInfo) -> Self {
        Self {
            info,
            features: FeatureStore::new(),
        }
    }

    pub fn vin(&self) -> &str {
        &self.info.vin
    }

    /// Fetch and overlay new data; keys the API omitted keep their old value.
    pub async fn update(&mut self, api: &dyn VehicleApi) -> UpdateReport {
        let (fresh, report) = fetch_features(api, &self.info).await;
        self.features.merge(fresh);
        report
    }

    /// Fetch and replace the whole store.
    pub async fn rebuild(&mut self, api: &dyn VehicleApi) -> UpdateReport {
        let (fresh, report) = fetch_features(api, &self.info).await;
        self.features = fresh;
        report
    }
}

/// Supported vehicles on the account, without fetching their state.
pub async fn list_vehicles(api: &dyn VehicleApi) -> Result<Vec<VehicleInfo>> {
    let listing = api.get_user_vehicle_list().await?;
    debug!("Toyota API returned {} vehicles", listing.len());

    let vehicles: Vec<VehicleInfo> = listing
        .iter()
        .filter_map(|entry| match VehicleInfo::from_listing(entry) {
            Ok(info) => Some(info),
            Err(e) => {
                debug!("Skipping vehicle: {}", e);
                None
            }
        })
        .collect();
    for v in &vehicles {
        if !v.subscribed {
            debug!(
                "Vehicle {} ({}) does not have an active remote subscription. Some features may be limited.",
                v.vin,
                v.model()
            );
        }
    }
    Ok(vehicles)
}

/// Supported vehicles on the account, each with an initial update.
pub async fn get_vehicles(api: &dyn VehicleApi) -> Result<Vec<Vehicle>> {
    let mut vehicles = Vec::new();
    for info in list_vehicles(api).await? {
        let mut vehicle = Vehicle::new(info);
        let report = vehicle.update(api).await;
        if report.is_complete() {
            info!(
                "Loaded vehicle {} ({}): {} features",
                vehicle.info.display_name(),
                vehicle.vin(),
                vehicle.features.len()
            );
        } else {
            warn!(
                "Loaded vehicle {} ({}) with {} failed stages",
                vehicle.info.display_name(),
                vehicle.vin(),
                report.failed.len()
            );
        }
        vehicles.push(vehicle);
    }
    Ok(vehicles)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::api::mock::Endpoint;
    use crate::api::mock::MockReply;
    use crate::api::mock::MockVehicleApi;
    use crate::features::FeatureValue;
    use crate::features::Reading;
    use crate::features::VehicleFeature;

    #[test]
    fn test_from_listing() {
        let entry = json!({
            "vin": "JTMABC12345678901",
            "generation": "17CYPLUS",
            "nickName": "Daily",
            "modelName": "RAV4 Prime",
            "modelYear": "2023",
            "remoteSubscriptionStatus": "ACTIVE",
            "evVehicle": true,
        });
        let info = VehicleInfo::from_listing(&entry).unwrap();
        assert_eq!(info.generation, ApiGeneration::Cy17Plus);
        assert!(info.subscribed);
        assert!(info.electric);
        assert_eq!(info.display_name(), "Daily");

        let entry = json!({
            "vin": "JTMABC12345678902",
            "generation": "21MM",
            "nickName": "",
            "modelName": "Tundra",
            "modelYear": "2022",
            "remoteSubscriptionStatus": "EXPIRED",
        });
        let info = VehicleInfo::from_listing(&entry).unwrap();
        assert!(!info.subscribed);
        assert!(!info.electric);
        assert_eq!(info.display_name(), "2022 Tundra");
    }

    #[test]
    fn test_from_listing_rejects_unsupported() {
        assert!(matches!(
            VehicleInfo::from_listing(&json!({"vin": "X", "generation": "99X"})),
            Err(Error::UnsupportedGeneration(g)) if g == "99X"
        ));
        assert!(matches!(
            VehicleInfo::from_listing(&json!({"vin": "X"})),
            Err(Error::UnsupportedGeneration(_))
        ));
        assert!(matches!(
            VehicleInfo::from_listing(&json!({"generation": "21MM"})),
            Err(Error::Listing(_))
        ));
    }

    #[tokio::test]
    async fn test_get_vehicles() {
        let api = MockVehicleApi::new();
        api.script(
            Endpoint::VehicleList,
            [MockReply::Json(json!([
                {"vin": "A1", "generation": "21MM", "remoteSubscriptionStatus": "ACTIVE"},
                {"vin": "B2", "generation": "PRE17"},
            ]))],
        );
        api.fallback(Endpoint::Telemetry, MockReply::Json(json!({"fuelLevel": 71})));

        let vehicles = get_vehicles(&api).await.unwrap();
        assert_eq!(vehicles.len(), 1);
        assert_eq!(vehicles[0].vin(), "A1");
        assert_eq!(
            vehicles[0].features.get(VehicleFeature::FuelLevel),
            Some(&FeatureValue::numeric(Reading::Number(71.0), "%"))
        );
    }

    #[tokio::test]
    async fn test_update_merges_rebuild_replaces() {
        let api = MockVehicleApi::new();
        api.script(
            Endpoint::Telemetry,
            [
                MockReply::Json(json!({"fuelLevel": 40, "speed": {"value": 0, "unit": "km/h"}})),
                MockReply::Json(json!({"fuelLevel": 39})),
                MockReply::Json(json!({"fuelLevel": 38})),
            ],
        );

        let info = VehicleInfo::from_listing(&json!({"vin": "A1", "generation": "21MM"})).unwrap();
        let mut vehicle = Vehicle::new(info);

        vehicle.update(&api).await;
        vehicle.update(&api).await;
        assert!(vehicle.features.contains(VehicleFeature::Speed));
        assert_eq!(
            vehicle.features.get(VehicleFeature::FuelLevel),
            Some(&FeatureValue::numeric(Reading::Number(39.0), "%"))
        );

        vehicle.rebuild(&api).await;
        assert!(!vehicle.features.contains(VehicleFeature::Speed));
        assert_eq!(vehicle.features.len(), 1);
    }
}
