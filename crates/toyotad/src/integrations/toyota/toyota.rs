use std::collections::HashMap;
use std::error::Error;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use strum::IntoEnumIterator;
use tokio::task::JoinHandle;
use toyota_api::RemoteCommand;
use toyota_api::VehicleApi;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::binary_sensor::BinarySensor;
use super::binary_sensor::BINARY_SENSORS;
use super::config::Config;
use super::coordinator::Coordinator;
use super::device_tracker::DeviceTracker;
use super::device_tracker::DEVICE_TRACKERS;
use super::fleet::Fleet;
use super::lock::ToyotaLock;
use super::persist::StateFile;
use super::sensor::Sensor;
use super::sensor::SENSORS;
use super::session::ConfirmTiming;
use crate::engine::Entity;
use crate::engine::FromIntegrationMessage;
use crate::engine::FromIntegrationSender;
use crate::engine::Integration;
use crate::engine::ToIntegrationMessage;

const NAME: &str = "toyota";

/// Delay between a `refresh` service call and the coordinator refresh it
/// triggers, so the vehicle has time to upload.
const REFRESH_SERVICE_DELAY: Duration = Duration::from_secs(10);

/// Backoff between failed first refreshes during setup. Doubles from the
/// initial delay and stays at the cap.
const SETUP_RETRY_INITIAL: Duration = Duration::from_secs(5);
const SETUP_RETRY_MAX: Duration = Duration::from_secs(300);

#[derive(Debug, thiserror::Error)]
pub enum ToyotaError {
    #[error("unknown service: {0}")]
    UnknownService(String),

    #[error("unknown lock entity: {0}")]
    UnknownLock(String),

    #[error("vehicle {0} does not exist")]
    UnknownVehicle(String),

    #[error("vehicle {0} has no active remote subscription")]
    NotSubscribed(String),

    #[error("integration has not been set up")]
    NotSetUp,
}

impl From<ToyotaError> for Box<dyn Error + Send> {
    fn from(e: ToyotaError) -> Self {
        Box::new(e)
    }
}

type Entities = Arc<Vec<Arc<dyn Entity>>>;

/// Toyota connected-services integration.
pub struct ToyotaIntegration {
    coordinator: Arc<Coordinator>,
    timing: ConfirmTiming,
    locks: HashMap<String, Arc<ToyotaLock>>,
    entities: Entities,
    to_engine: Option<FromIntegrationSender>,
    tasks: Vec<JoinHandle<()>>,
}

impl ToyotaIntegration {
    pub fn new(
        api: Arc<dyn VehicleApi>,
        config: &Config,
        state_file: Option<Arc<StateFile>>,
    ) -> Self {
        let coordinator = Coordinator::new(
            api,
            Arc::new(Fleet::new()),
            config.update_interval(),
            Duration::from_secs(config.refresh_status_interval),
            state_file,
        );
        Self {
            coordinator: Arc::new(coordinator),
            timing: config.timing.into(),
            locks: HashMap::new(),
            entities: Arc::default(),
            to_engine: None,
            tasks: Vec::new(),
        }
    }

    /// Build entities for every vehicle currently in the fleet.
    fn build_entities(&mut self, tx: &FromIntegrationSender) {
        let fleet = self.coordinator.fleet().clone();
        let api = self.coordinator.api().clone();
        let mut entities: Vec<Arc<dyn Entity>> = Vec::new();

        for vehicle in fleet.all() {
            let info = &vehicle.info;
            let vin = info.vin.as_str();

            if info.subscribed {
                let lock = Arc::new(ToyotaLock::new(
                    vin,
                    api.clone(),
                    fleet.clone(),
                    self.timing,
                    tx.clone(),
                ));
                self.locks
                    .insert(lock.entity_id().to_string(), lock.clone());
                entities.push(lock);
            }

            for desc in BINARY_SENSORS.iter().filter(|d| d.requires.met_by(info)) {
                entities.push(Arc::new(BinarySensor::new(vin, desc, fleet.clone())));
            }
            for desc in SENSORS.iter().filter(|d| d.requires.met_by(info)) {
                entities.push(Arc::new(Sensor::new(vin, desc, fleet.clone())));
            }
            for desc in DEVICE_TRACKERS.iter().filter(|d| d.requires.met_by(info)) {
                entities.push(Arc::new(DeviceTracker::new(vin, desc, fleet.clone())));
            }
        }

        self.entities = Arc::new(entities);
    }

    /// Keep trying the first refresh until the vehicle list loads.
    async fn first_refresh(&self) -> usize {
        let mut delay = SETUP_RETRY_INITIAL;
        loop {
            match self.coordinator.refresh().await {
                Ok(count) => return count,
                Err(e) => {
                    warn!(
                        "Toyota vehicles not available yet, retrying in {}s: {}",
                        delay.as_secs(),
                        e
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(SETUP_RETRY_MAX);
                }
            }
        }
    }

    fn sender(&self) -> Result<FromIntegrationSender, ToyotaError> {
        self.to_engine.clone().ok_or(ToyotaError::NotSetUp)
    }

    fn handle_lock_command(&mut self, entity_id: &str, lock: bool) -> Result<(), ToyotaError> {
        let entity = self
            .locks
            .get(entity_id)
            .cloned()
            .ok_or_else(|| ToyotaError::UnknownLock(entity_id.to_string()))?;

        let task = tokio::spawn(async move {
            let settled = entity.run_command(lock).await;
            info!("{} settled: {:?}", entity.entity_id(), settled);
        });
        self.tasks.push(task);
        Ok(())
    }

    fn handle_service_call(&mut self, service: &str, vin: &str) -> Result<(), ToyotaError> {
        let command = RemoteCommand::from_str(service)
            .map_err(|_| ToyotaError::UnknownService(service.to_string()))?;

        let vehicle = self
            .coordinator
            .fleet()
            .get(vin)
            .ok_or_else(|| ToyotaError::UnknownVehicle(vin.to_string()))?;
        if !vehicle.info.subscribed {
            return Err(ToyotaError::NotSubscribed(vin.to_string()));
        }

        info!("Handling service call {} for {}", service, vin);

        let coordinator = self.coordinator.clone();
        let task = match command {
            RemoteCommand::Refresh => {
                let entities = self.entities.clone();
                let tx = self.sender()?;
                tokio::spawn(async move {
                    if let Err(e) = vehicle.info.poll_vehicle_refresh(coordinator.api().as_ref()).await {
                        warn!("Error refreshing vehicle {}: {}", vehicle.info.vin, e);
                    }
                    publish_all(&entities, &tx).await;
                    tokio::time::sleep(REFRESH_SERVICE_DELAY).await;
                    coordinator.request_refresh();
                })
            }
            command => tokio::spawn(async move {
                let outcome = vehicle
                    .info
                    .send_command(coordinator.api().as_ref(), command)
                    .await;
                if outcome.is_sent() {
                    debug!("{} sent to {}", command, vehicle.info.vin);
                } else {
                    warn!("{} for {} was not sent: {:?}", command, vehicle.info.vin, outcome);
                }
            }),
        };
        self.tasks.push(task);
        Ok(())
    }
}

async fn publish_all(entities: &[Arc<dyn Entity>], tx: &FromIntegrationSender) {
    for entity in entities {
        if let Err(e) = tx.send(entity.state_message()).await {
            warn!("Failed to publish {}: {}", entity.entity_id(), e);
            return;
        }
    }
}

#[async_trait]
impl Integration for ToyotaIntegration {
    fn name(&self) -> &str {
        NAME
    }

    fn services(&self) -> Vec<String> {
        RemoteCommand::iter().map(|c| c.to_string()).collect()
    }

    async fn setup(&mut self, tx: FromIntegrationSender) -> Result<(), Box<dyn Error + Send>> {
        self.to_engine = Some(tx.clone());

        info!("Loading Toyota vehicles");
        let count = self.first_refresh().await;

        self.build_entities(&tx);
        info!(
            "Toyota integration found {} vehicles, {} entities",
            count,
            self.entities.len()
        );

        for entity in self.entities.iter() {
            let discovered = FromIntegrationMessage::EntityDiscovered {
                entity_id: entity.entity_id().to_string(),
                integration_name: NAME.to_string(),
            };
            if let Err(e) = tx.send(discovered).await {
                warn!("Failed to send EntityDiscovered message: {}", e);
            }
        }
        publish_all(&self.entities, &tx).await;

        let coordinator = self.coordinator.clone();
        let entities = self.entities.clone();
        let task = tokio::spawn(async move {
            loop {
                coordinator.next_cycle().await;
                match coordinator.refresh().await {
                    Ok(_) => publish_all(&entities, &tx).await,
                    Err(e) => error!("Error updating vehicle data: {}", e),
                }
            }
        });
        self.tasks.push(task);

        Ok(())
    }

    async fn handle_message(
        &mut self,
        msg: ToIntegrationMessage,
    ) -> Result<(), Box<dyn Error + Send>> {
        self.tasks.retain(|t| !t.is_finished());

        match msg {
            ToIntegrationMessage::LockCommand { entity_id, lock } => {
                self.handle_lock_command(&entity_id, lock)?
            }
            ToIntegrationMessage::ServiceCall { service, vehicle } => {
                self.handle_service_call(&service, &vehicle)?
            }
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), Box<dyn Error + Send>> {
        info!("Toyota integration shutting down");
        for task in self.tasks.drain(..) {
            task.abort();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::sync::mpsc;
    use toyota_api::Endpoint;
    use toyota_api::MockReply;
    use toyota_api::MockVehicleApi;

    use super::*;

    fn config() -> Config {
        toml::from_str(
            r#"
            username = "u"
            password = "p"
            api_key = "k"
            "#,
        )
        .unwrap()
    }

    fn mock() -> Arc<MockVehicleApi> {
        let api = Arc::new(MockVehicleApi::new());
        api.fallback(
            Endpoint::VehicleList,
            MockReply::Json(json!([
                {
                    "vin": "A1",
                    "generation": "21MM",
                    "nickName": "Daily",
                    "remoteSubscriptionStatus": "ACTIVE",
                    "evVehicle": true,
                },
                {"vin": "B2", "generation": "17CY"},
            ])),
        );
        api
    }

    async fn set_up(
        api: Arc<MockVehicleApi>,
    ) -> (ToyotaIntegration, mpsc::Receiver<FromIntegrationMessage>) {
        let (tx, rx) = mpsc::channel(1024);
        let mut integration = ToyotaIntegration::new(api, &config(), None);
        integration.setup(tx).await.unwrap();
        (integration, rx)
    }

    fn discovered(rx: &mut mpsc::Receiver<FromIntegrationMessage>) -> Vec<String> {
        let mut ids = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if let FromIntegrationMessage::EntityDiscovered { entity_id, .. } = msg {
                ids.push(entity_id);
            }
        }
        ids
    }

    #[test]
    fn test_services() {
        let integration = ToyotaIntegration::new(mock(), &config(), None);
        let services = integration.services();
        assert_eq!(services.len(), 7);
        assert!(services.contains(&"engine_start".to_string()));
        assert!(services.contains(&"refresh".to_string()));
    }

    #[tokio::test]
    async fn test_setup_discovers_gated_entities() {
        let (_integration, mut rx) = set_up(mock()).await;
        let ids = discovered(&mut rx);

        assert!(ids.contains(&"lock.toyota_a1".to_string()));
        assert!(ids.contains(&"sensor.toyota_a1_charge_level".to_string()));
        assert!(ids.contains(&"binary_sensor.toyota_a1_front_driver_door_lock".to_string()));
        assert!(ids.contains(&"device_tracker.toyota_a1_parking_location".to_string()));

        // Unsubscribed, not electric
        assert!(!ids.contains(&"lock.toyota_b2".to_string()));
        assert!(!ids.contains(&"sensor.toyota_b2_charge_level".to_string()));
        assert!(!ids.contains(&"binary_sensor.toyota_b2_hood".to_string()));
        assert!(!ids.contains(&"device_tracker.toyota_b2_parking_location".to_string()));
        assert!(ids.contains(&"binary_sensor.toyota_b2_remote_start_status".to_string()));
        assert!(ids.contains(&"sensor.toyota_b2_odometer".to_string()));
        assert!(ids.contains(&"device_tracker.toyota_b2_real_time_location".to_string()));

        assert_eq!(ids.len(), 42 + 16);
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_retries_first_refresh() {
        let api = mock();
        api.script(
            Endpoint::VehicleList,
            [MockReply::Status(500), MockReply::Status(503)],
        );

        let start = tokio::time::Instant::now();
        let (integration, mut rx) = set_up(api.clone()).await;

        assert_eq!(api.count(Endpoint::VehicleList), 3);
        // 5s then 10s of backoff
        assert!(start.elapsed() >= Duration::from_secs(15));
        assert!(start.elapsed() < Duration::from_secs(300));
        assert_eq!(discovered(&mut rx).len(), 42 + 16);
        assert!(integration.locks.contains_key("lock.toyota_a1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_keeps_integration_through_outage() {
        let api = mock();
        api.script(Endpoint::VehicleList, [MockReply::Status(500)]);

        let mut engine = crate::engine::Engine::new();
        engine.register_integration(
            NAME.to_string(),
            Box::new(ToyotaIntegration::new(api.clone(), &config(), None)),
        );
        let engine = Arc::new(engine);
        let runner = engine.clone();
        tokio::spawn(async move { runner.run().await });

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert!(api.count(Endpoint::VehicleList) >= 2);

        engine
            .call_service("hazards_on".to_string(), "A1".to_string())
            .unwrap();
        assert!(engine
            .send_lock_command("lock.toyota_a1".to_string(), true)
            .is_ok());
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(api
            .calls()
            .contains(&(Endpoint::RemoteRequest, "A1:hazard-on".to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_service_call_sends_command() {
        let api = mock();
        let (mut integration, _rx) = set_up(api.clone()).await;

        integration
            .handle_message(ToIntegrationMessage::ServiceCall {
                service: "hazards_on".to_string(),
                vehicle: "A1".to_string(),
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(api
            .calls()
            .contains(&(Endpoint::RemoteRequest, "A1:hazard-on".to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_service_call_rejections() {
        let api = mock();
        let (mut integration, _rx) = set_up(api.clone()).await;

        let call = |service: &str, vehicle: &str| ToIntegrationMessage::ServiceCall {
            service: service.to_string(),
            vehicle: vehicle.to_string(),
        };

        assert!(integration.handle_message(call("open_trunk", "A1")).await.is_err());
        assert!(integration.handle_message(call("engine_start", "ZZ")).await.is_err());
        assert!(integration.handle_message(call("engine_start", "B2")).await.is_err());
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(api.count(Endpoint::RemoteRequest), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_service_triggers_coordinator() {
        let api = mock();
        let (mut integration, mut rx) = set_up(api.clone()).await;
        discovered(&mut rx);
        assert_eq!(api.count(Endpoint::VehicleList), 1);
        assert_eq!(api.count(Endpoint::RefreshStatus), 1);

        integration
            .handle_message(ToIntegrationMessage::ServiceCall {
                service: "refresh".to_string(),
                vehicle: "A1".to_string(),
            })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(api.count(Endpoint::RefreshStatus), 2);
        assert_eq!(api.count(Endpoint::VehicleList), 1);
        // Republished straight away
        assert!(rx.try_recv().is_ok());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(api.count(Endpoint::VehicleList), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_command_routes_to_entity() {
        let api = mock();
        let (mut integration, _rx) = set_up(api.clone()).await;

        let err = integration
            .handle_message(ToIntegrationMessage::LockCommand {
                entity_id: "lock.toyota_b2".to_string(),
                lock: true,
            })
            .await;
        assert!(err.is_err());

        integration
            .handle_message(ToIntegrationMessage::LockCommand {
                entity_id: "lock.toyota_a1".to_string(),
                lock: true,
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(20)).await;

        assert!(api
            .calls()
            .contains(&(Endpoint::RemoteRequest, "A1:door-lock".to_string())));
        assert!(!integration.locks["lock.toyota_a1"].session().in_transition());
    }
}
