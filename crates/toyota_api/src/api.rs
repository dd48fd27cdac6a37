use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::generation::ApiGeneration;

/// Operations exposed by the connected-services backend.
///
/// This trait allows for mocking the backend for testing purposes
#[async_trait]
pub trait VehicleApi: Send + Sync {
    /// Raw vehicle listing for the logged-in account.
    async fn get_user_vehicle_list(&self) -> Result<Vec<Value>>;

    async fn get_telemetry(&self, vin: &str, generation: ApiGeneration) -> Result<Value>;

    /// Health status: openings, locks and parked location.
    async fn get_vehicle_status(&self, vin: &str, generation: ApiGeneration) -> Result<Value>;

    async fn get_engine_status(&self, vin: &str) -> Result<Value>;

    /// `None` when the backend has no electric data for the vehicle.
    async fn get_electric_status(&self, vin: &str) -> Result<Option<Value>>;

    /// Ask the backend to ping the vehicle for a fresh status upload.
    async fn send_refresh_status(&self, vin: &str) -> Result<()>;

    /// Submit a vendor command code (e.g. "door-lock").
    async fn remote_request(&self, vin: &str, command: &str) -> Result<()>;

    /// Whether stored credentials are available for a full login.
    fn has_credentials(&self) -> bool;

    /// Full login with stored credentials.
    async fn login(&self) -> Result<()>;

    async fn refresh_tokens(&self) -> Result<()>;
}

#[cfg(any(test, feature = "mock"))]
pub mod mock {
    use std::collections::HashMap;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::Value;

    use super::VehicleApi;
    use crate::error::Error;
    use crate::error::Result;
    use crate::generation::ApiGeneration;

    /// Backend operation, used to script replies and count calls.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum Endpoint {
        VehicleList,
        Telemetry,
        VehicleStatus,
        EngineStatus,
        ElectricStatus,
        RefreshStatus,
        RemoteRequest,
        Login,
        RefreshTokens,
    }

    /// One scripted reply.
    #[derive(Debug, Clone)]
    pub enum MockReply {
        Json(Value),
        Status(u16),
    }

    impl MockReply {
        fn into_result(self, endpoint: Endpoint) -> Result<Value> {
            match self {
                MockReply::Json(v) => Ok(v),
                MockReply::Status(status) => Err(Error::Status {
                    status,
                    url: format!("mock://{:?}", endpoint),
                    body: String::new(),
                }),
            }
        }
    }

    #[derive(Debug, Default)]
    struct Script {
        queued: VecDeque<MockReply>,
        fallback: Option<MockReply>,
    }

    #[derive(Debug, Default)]
    struct MockState {
        scripts: HashMap<Endpoint, Script>,
        calls: Vec<(Endpoint, String)>,
        credentials: bool,
    }

    /// Mock backend for testing
    ///
    /// Each endpoint replays its queued replies in order, then repeats its
    /// fallback. Endpoints with nothing scripted answer `null`.
    #[derive(Debug, Default)]
    pub struct MockVehicleApi {
        state: Mutex<MockState>,
    }

    impl MockVehicleApi {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue replies for an endpoint.
        pub fn script(&self, endpoint: Endpoint, replies: impl IntoIterator<Item = MockReply>) {
            let mut state = self.state.lock().unwrap();
            state
                .scripts
                .entry(endpoint)
                .or_default()
                .queued
                .extend(replies);
        }

        /// Reply used once the queue for `endpoint` is empty.
        pub fn fallback(&self, endpoint: Endpoint, reply: MockReply) {
            let mut state = self.state.lock().unwrap();
            state.scripts.entry(endpoint).or_default().fallback = Some(reply);
        }

        pub fn set_credentials(&self, available: bool) {
            self.state.lock().unwrap().credentials = available;
        }

        /// All recorded calls as `(endpoint, argument)`.
        pub fn calls(&self) -> Vec<(Endpoint, String)> {
            self.state.lock().unwrap().calls.clone()
        }

        pub fn count(&self, endpoint: Endpoint) -> usize {
            self.state
                .lock()
                .unwrap()
                .calls
                .iter()
                .filter(|(e, _)| *e == endpoint)
                .count()
        }

        fn reply(&self, endpoint: Endpoint, arg: &str) -> Result<Value> {
            let mut state = self.state.lock().unwrap();
            state.calls.push((endpoint, arg.to_string()));
            let script = state.scripts.entry(endpoint).or_default();
            let reply = script
                .queued
                .pop_front()
                .or_else(|| script.fallback.clone())
                .unwrap_or(MockReply::Json(Value::Null));
            reply.into_result(endpoint)
        }
    }

    #[async_trait]
    impl VehicleApi for MockVehicleApi {
        async fn get_user_vehicle_list(&self) -> Result<Vec<Value>> {
            match self.reply(Endpoint::VehicleList, "")? {
                Value::Array(items) => Ok(items),
                _ => Ok(Vec::new()),
            }
        }

        async fn get_telemetry(&self, vin: &str, _generation: ApiGeneration) -> Result<Value> {
            self.reply(Endpoint::Telemetry, vin)
        }

        async fn get_vehicle_status(&self, vin: &str, _generation: ApiGeneration) -> Result<Value> {
            self.reply(Endpoint::VehicleStatus, vin)
        }

        async fn get_engine_status(&self, vin: &str) -> Result<Value> {
            self.reply(Endpoint::EngineStatus, vin)
        }

        async fn get_electric_status(&self, vin: &str) -> Result<Option<Value>> {
            let value = self.reply(Endpoint::ElectricStatus, vin)?;
            Ok((!value.is_null()).then_some(value))
        }

        async fn send_refresh_status(&self, vin: &str) -> Result<()> {
            self.reply(Endpoint::RefreshStatus, vin).map(|_| ())
        }

        async fn remote_request(&self, vin: &str, command: &str) -> Result<()> {
            self.reply(Endpoint::RemoteRequest, &format!("{}:{}", vin, command))
                .map(|_| ())
        }

        fn has_credentials(&self) -> bool {
            self.state.lock().unwrap().credentials
        }

        async fn login(&self) -> Result<()> {
            self.reply(Endpoint::Login, "").map(|_| ())
        }

        async fn refresh_tokens(&self) -> Result<()> {
            self.reply(Endpoint::RefreshTokens, "").map(|_| ())
        }
    }
}
