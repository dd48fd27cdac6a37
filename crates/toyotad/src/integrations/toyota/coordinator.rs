use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use toyota_api::fetch_features;
use toyota_api::list_vehicles;
use toyota_api::Vehicle;
use toyota_api::VehicleApi;
use toyota_api::VehicleInfo;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::fleet::Fleet;
use super::persist::StateFile;

/// Whether a server-side status refresh is due.
pub fn needs_status_refresh(last: Option<i64>, now: i64, interval: Duration) -> bool {
    match last {
        None => true,
        Some(last) => now.saturating_sub(last) >= interval.as_secs() as i64,
    }
}

/// Periodically re-lists the account's vehicles and rebuilds their features.
pub struct Coordinator {
    api: Arc<dyn VehicleApi>,
    fleet: Arc<Fleet>,
    update_interval: Duration,
    refresh_status_interval: Duration,
    state_file: Option<Arc<StateFile>>,
    last_refreshed_at: Mutex<Option<i64>>,
    wake: Notify,
}

impl Coordinator {
    pub fn new(
        api: Arc<dyn VehicleApi>,
        fleet: Arc<Fleet>,
        update_interval: Duration,
        refresh_status_interval: Duration,
        state_file: Option<Arc<StateFile>>,
    ) -> Self {
        let last_refreshed_at = state_file.as_ref().and_then(|f| f.last_refreshed_at());
        Self {
            api,
            fleet,
            update_interval,
            refresh_status_interval,
            state_file,
            last_refreshed_at: Mutex::new(last_refreshed_at),
            wake: Notify::new(),
        }
    }

    pub fn fleet(&self) -> &Arc<Fleet> {
        &self.fleet
    }

    pub fn api(&self) -> &Arc<dyn VehicleApi> {
        &self.api
    }

    /// Cut the current wait short.
    pub fn request_refresh(&self) {
        self.wake.notify_one();
    }

    /// Wait for the next cycle: the update interval or an explicit request,
    /// whichever comes first.
    pub async fn next_cycle(&self) {
        tokio::select! {
            _ = tokio::time::sleep(self.update_interval) => {}
            _ = self.wake.notified() => debug!("Refresh requested"),
        }
    }

    async fn list(&self) -> toyota_api::Result<Vec<VehicleInfo>> {
        match list_vehicles(self.api.as_ref()).await {
            Err(e) if e.is_auth() && self.api.has_credentials() => {
                warn!("Authentication error during update, attempting to re-login: {}", e);
                self.api.login().await?;
                list_vehicles(self.api.as_ref()).await
            }
            other => other,
        }
    }

    fn last_refreshed_at(&self) -> Option<i64> {
        *self.last_refreshed_at.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn mark_refreshed(&self, at: i64) {
        *self.last_refreshed_at.lock().unwrap_or_else(|e| e.into_inner()) = Some(at);
        if let Some(file) = &self.state_file {
            file.set_last_refreshed_at(at).await;
        }
    }

    /// Run one update cycle and swap the new vehicles into the fleet.
    ///
    /// Fails only when the vehicle list cannot be fetched; per-vehicle
    /// failures are logged and leave partial features behind.
    pub async fn refresh(&self) -> toyota_api::Result<usize> {
        debug!("Fetching vehicles from Toyota API");
        let infos = self.list().await?;

        let now = chrono::Utc::now().timestamp();
        if needs_status_refresh(self.last_refreshed_at(), now, self.refresh_status_interval) {
            debug!(
                "Full refresh needed. Last refresh: {:?}",
                self.last_refreshed_at()
            );
            for info in infos.iter().filter(|i| i.subscribed) {
                debug!("Refreshing vehicle {}", info.vin);
                if let Err(e) = info.poll_vehicle_refresh(self.api.as_ref()).await {
                    warn!("Error refreshing vehicle {}: {}", info.vin, e);
                }
            }
            self.mark_refreshed(now).await;
        }

        let handles: Vec<_> = infos
            .into_iter()
            .map(|info| {
                let api = self.api.clone();
                tokio::spawn(async move {
                    let (features, report) = fetch_features(api.as_ref(), &info).await;
                    for failure in &report.failed {
                        debug!(
                            "Vehicle {} {} stage failed: {}",
                            info.vin, failure.stage, failure.message
                        );
                    }
                    Vehicle { info, features }
                })
            })
            .collect();

        let mut vehicles = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(vehicle) => vehicles.push(vehicle),
                Err(e) => warn!("Vehicle update task failed: {}", e),
            }
        }

        let count = vehicles.len();
        self.fleet.replace(vehicles);
        info!("Updated {} vehicles", count);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use toyota_api::Endpoint;
    use toyota_api::MockReply;
    use toyota_api::MockVehicleApi;
    use toyota_api::VehicleFeature;

    use super::*;

    fn listing() -> MockReply {
        MockReply::Json(json!([
            {"vin": "A1", "generation": "21MM", "remoteSubscriptionStatus": "ACTIVE"},
            {"vin": "B2", "generation": "17CY"},
        ]))
    }

    fn coordinator(api: Arc<MockVehicleApi>, state_file: Option<Arc<StateFile>>) -> Coordinator {
        Coordinator::new(
            api,
            Arc::new(Fleet::new()),
            Duration::from_secs(300),
            Duration::from_secs(3600),
            state_file,
        )
    }

    #[test]
    fn test_needs_status_refresh() {
        let hour = Duration::from_secs(3600);
        assert!(needs_status_refresh(None, 1_000, hour));
        assert!(!needs_status_refresh(Some(1_000), 4_599, hour));
        assert!(needs_status_refresh(Some(1_000), 4_600, hour));
    }

    #[tokio::test]
    async fn test_refresh_populates_fleet() {
        let api = Arc::new(MockVehicleApi::new());
        api.fallback(Endpoint::VehicleList, listing());
        api.fallback(Endpoint::Telemetry, MockReply::Json(json!({"fuelLevel": 55})));

        let coordinator = coordinator(api.clone(), None);
        assert_eq!(coordinator.refresh().await.unwrap(), 2);

        let fleet = coordinator.fleet();
        assert_eq!(fleet.len(), 2);
        assert!(fleet
            .get("B2")
            .unwrap()
            .features
            .contains(VehicleFeature::FuelLevel));

        // First cycle refreshes subscribed vehicles only; the second is
        // within the status interval.
        assert_eq!(api.count(Endpoint::RefreshStatus), 1);
        coordinator.refresh().await.unwrap();
        assert_eq!(api.count(Endpoint::RefreshStatus), 1);
    }

    #[tokio::test]
    async fn test_relogin_on_auth_failure() {
        let api = Arc::new(MockVehicleApi::new());
        api.set_credentials(true);
        api.script(Endpoint::VehicleList, [MockReply::Status(401)]);
        api.fallback(Endpoint::VehicleList, listing());

        let coordinator = coordinator(api.clone(), None);
        assert_eq!(coordinator.refresh().await.unwrap(), 2);
        assert_eq!(api.count(Endpoint::Login), 1);
        assert_eq!(api.count(Endpoint::VehicleList), 2);
    }

    #[tokio::test]
    async fn test_second_auth_failure_skips_cycle() {
        let api = Arc::new(MockVehicleApi::new());
        api.set_credentials(true);
        api.fallback(Endpoint::VehicleList, MockReply::Status(401));

        let coordinator = coordinator(api.clone(), None);
        let err = coordinator.refresh().await.unwrap_err();
        assert!(err.is_auth());
        assert_eq!(api.count(Endpoint::Login), 1);
        assert!(coordinator.fleet().is_empty());
    }

    #[tokio::test]
    async fn test_no_credentials_no_login() {
        let api = Arc::new(MockVehicleApi::new());
        api.fallback(Endpoint::VehicleList, MockReply::Status(403));

        let coordinator = coordinator(api.clone(), None);
        assert!(coordinator.refresh().await.is_err());
        assert_eq!(api.count(Endpoint::Login), 0);
    }

    #[tokio::test]
    async fn test_refresh_time_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let api = Arc::new(MockVehicleApi::new());
        api.fallback(Endpoint::VehicleList, listing());

        let file = Arc::new(StateFile::load(&path).unwrap());
        coordinator(api.clone(), Some(file)).refresh().await.unwrap();

        // A restarted coordinator picks up the persisted time and skips the
        // status refresh.
        let file = Arc::new(StateFile::load(&path).unwrap());
        assert!(file.last_refreshed_at().is_some());
        coordinator(api.clone(), Some(file)).refresh().await.unwrap();
        assert_eq!(api.count(Endpoint::RefreshStatus), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_refresh_wakes_cycle() {
        let api = Arc::new(MockVehicleApi::new());
        let coordinator = coordinator(api, None);

        let start = tokio::time::Instant::now();
        coordinator.request_refresh();
        coordinator.next_cycle().await;
        assert!(start.elapsed() < Duration::from_secs(1));

        coordinator.next_cycle().await;
        assert!(start.elapsed() >= Duration::from_secs(300));
    }
}
