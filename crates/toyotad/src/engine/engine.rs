use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::integration::FromIntegrationReceiver;
use super::integration::FromIntegrationSender;
use super::integration::Integration;
use super::integration::IntegrationContext;
use super::integration::ToIntegrationSender;
use super::message::FromIntegrationMessage;
use super::message::ToIntegrationMessage;
use super::state::State;

/// Why a command could not be delivered to an integration.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("No integration found for entity: {0}")]
    UnknownEntity(String),

    #[error("No integration provides service: {0}")]
    UnknownService(String),

    #[error("Integration '{0}' is no longer running")]
    IntegrationStopped(String),
}

/// toyotad engine
///
/// This structure handles the flow of events, sending commands to the correct
/// integration, and maintaining a view of the world with State.
pub struct Engine {
    /// Centralized state snapshot (readers load the Arc, writer stores a new one)
    state: ArcSwap<State>,

    /// Map of entity_id -> integration name for routing messages
    entity_integration_map: std::sync::Mutex<HashMap<String, String>>,

    /// Map of service name -> integration name
    service_integration_map: HashMap<String, String>,

    /// Communication channels to integrations (for commands)
    integration_channels: HashMap<String, ToIntegrationSender>,

    /// Receive messages from integrations (events)
    message_rx: Mutex<FromIntegrationReceiver>,

    /// Sender for integrations to report events back to the engine
    message_tx: FromIntegrationSender,

    /// Handles for integration tasks
    integration_handles: Vec<JoinHandle<()>>,
}

/// Capacity for the integration→engine message channel
/// Provides backpressure when integrations send faster than the engine can process
const FROM_INTEGRATION_CHANNEL_SIZE: usize = 1024;

impl Engine {
    /// Create a new Engine instance
    pub fn new() -> Self {
        let (message_tx, message_rx) = mpsc::channel(FROM_INTEGRATION_CHANNEL_SIZE);
        Self {
            state: ArcSwap::new(Arc::default()),
            entity_integration_map: std::sync::Mutex::new(HashMap::new()),
            service_integration_map: HashMap::new(),
            integration_channels: HashMap::new(),
            message_rx: Mutex::new(message_rx),
            message_tx,
            integration_handles: Vec::new(),
        }
    }

    /// Register every integration whose factory accepts the configuration.
    pub fn register_integrations_from_config(&mut self, cfg: &crate::config::Config) {
        let ctx = IntegrationContext { config: cfg };
        for constr in super::integration::REGISTRY {
            let integration = match constr(&ctx) {
                Ok(Some(i)) => i,
                Err(e) => {
                    error!("failed to setup integration: {:#}", e);
                    continue;
                }
                Ok(None) => continue,
            };
            let name = integration.name().to_string();
            self.register_integration(name, integration);
        }
    }

    /// Register an integration with the engine
    ///
    /// This spawns the integration in a background task, wires up channels,
    /// and starts its setup process.
    pub fn register_integration(&mut self, name: String, mut integration: Box<dyn Integration>) {
        let (to_integration_tx, mut to_integration_rx) = mpsc::unbounded_channel();
        let from_integration_tx = self.message_tx.clone();

        for service in integration.services() {
            if let Some(previous) = self
                .service_integration_map
                .insert(service.clone(), name.clone())
            {
                warn!(
                    "Service '{}' of integration '{}' shadows integration '{}'",
                    service, name, previous
                );
            }
        }
        self.integration_channels
            .insert(name.clone(), to_integration_tx);

        info!("Registering integration '{}'", name);
        let handle = tokio::spawn(async move {
            // Setup integration (gives it the sender for events)
            if let Err(e) = integration.setup(from_integration_tx).await {
                warn!("Integration '{}' setup failed: {}", name, e);
                return;
            }

            // Process commands from engine
            while let Some(msg) = to_integration_rx.recv().await {
                if let Err(e) = integration.handle_message(msg).await {
                    warn!("Integration '{}' failed to handle message: {}", name, e);
                }
            }

            if let Err(e) = integration.shutdown().await {
                warn!("Integration '{}' shutdown failed: {}", name, e);
            }
        });

        self.integration_handles.push(handle);
    }

    fn channel(&self, integration_name: &str) -> Result<&ToIntegrationSender, RouteError> {
        self.integration_channels
            .get(integration_name)
            .ok_or_else(|| RouteError::IntegrationStopped(integration_name.to_string()))
    }

    /// Send a command to an integration
    ///
    /// Routes the command to the appropriate integration based on entity_id
    /// or, for service calls, on the service name.
    pub fn send_command(&self, msg: ToIntegrationMessage) -> Result<(), RouteError> {
        let integration_name = match &msg {
            ToIntegrationMessage::LockCommand { entity_id, .. } => self
                .entity_integration_map
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .get(entity_id)
                .cloned()
                .ok_or_else(|| RouteError::UnknownEntity(entity_id.clone()))?,
            ToIntegrationMessage::ServiceCall { service, .. } => self
                .service_integration_map
                .get(service)
                .cloned()
                .ok_or_else(|| RouteError::UnknownService(service.clone()))?,
        };

        self.channel(&integration_name)?
            .send(msg)
            .map_err(|_| RouteError::IntegrationStopped(integration_name))
    }

    /// Send a lock or unlock command to a lock entity
    pub fn send_lock_command(&self, entity_id: String, lock: bool) -> Result<(), RouteError> {
        self.send_command(ToIntegrationMessage::LockCommand { entity_id, lock })
    }

    /// Call a named service for one vehicle
    pub fn call_service(&self, service: String, vehicle: String) -> Result<(), RouteError> {
        self.send_command(ToIntegrationMessage::ServiceCall { service, vehicle })
    }

    /// Run the engine's main event loop
    ///
    /// Processes incoming events from integrations and updates state.
    pub async fn run(&self) -> Result<(), Box<dyn Error + Send>> {
        info!("Engine starting");

        let mut rx = self.message_rx.lock().await;
        while let Some(msg) = rx.recv().await {
            self.handle_event(msg);
        }

        info!("Engine shutting down");
        Ok(())
    }

    /// Get a snapshot of the current engine state.
    ///
    /// Clones the `Arc` (atomic refcount bump), essentially free.
    pub fn state_snapshot(&self) -> Arc<State> {
        self.state.load_full()
    }

    fn update_state(&self, f: impl FnOnce(&mut State)) {
        let mut state = State::clone(&self.state.load());
        f(&mut state);
        self.state.store(Arc::new(state));
    }

    /// Handle an event from an integration
    fn handle_event(&self, msg: FromIntegrationMessage) {
        match msg {
            FromIntegrationMessage::EntityDiscovered {
                entity_id,
                integration_name,
            } => {
                info!(
                    "Entity discovered: {} (from {})",
                    entity_id, integration_name
                );

                // Record which integration owns this entity for command routing.
                // State is not populated until the first state-change message arrives.
                self.entity_integration_map
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(entity_id, integration_name);
            }
            FromIntegrationMessage::EntityRemoved { entity_id } => {
                info!("Entity removed: {}", entity_id);

                self.state.store(Arc::new(self.state.load().without(&entity_id)));
                self.entity_integration_map
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&entity_id);
            }
            FromIntegrationMessage::LockStateChanged { entity_id, state } => {
                info!(
                    "Lock state changed: {} -> locked={}, locking={}, unlocking={}",
                    entity_id, state.locked, state.locking, state.unlocking
                );
                self.update_state(|s| {
                    s.locks.insert(entity_id, state);
                });
            }
            FromIntegrationMessage::BinarySensorStateChanged { entity_id, state } => {
                debug!("Binary sensor state changed: {} -> on={:?}", entity_id, state.on);
                self.update_state(|s| {
                    s.binary_sensors.insert(entity_id, state);
                });
            }
            FromIntegrationMessage::SensorStateChanged { entity_id, state } => {
                debug!(
                    "Sensor state changed: {} -> {:?} {:?}",
                    entity_id, state.value, state.unit
                );
                self.update_state(|s| {
                    s.sensors.insert(entity_id, state);
                });
            }
            FromIntegrationMessage::TrackerStateChanged { entity_id, state } => {
                debug!(
                    "Tracker state changed: {} -> {:?},{:?}",
                    entity_id, state.latitude, state.longitude
                );
                self.update_state(|s| {
                    s.trackers.insert(entity_id, state);
                });
            }
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
