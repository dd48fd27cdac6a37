use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::json;
use serde_json::Value;
use tracing::debug;
use tracing::warn;

use crate::api::VehicleApi;
use crate::auth::ToyotaAuth;
use crate::error::Error;
use crate::error::Result;
use crate::generation::ApiGeneration;

const DEFAULT_BASE_URL: &str = "https://onecdn.telematicsct.com/oneapi/";

#[derive(Clone)]
struct Credentials {
    username: String,
    password: String,
}

/// HTTP client for the connected-services gateway.
#[derive(Clone)]
pub struct ToyotaClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    auth: Arc<ToyotaAuth>,
    credentials: Option<Credentials>,
}

impl ToyotaClient {
    pub fn new(api_key: impl Into<String>, auth: Arc<ToyotaAuth>) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder().build()?,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            auth,
            credentials: None,
        })
    }

    /// Store credentials so auth failures can be answered with a full login.
    pub fn with_credentials(self, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            credentials: Some(Credentials {
                username: username.into(),
                password: password.into(),
            }),
            ..self
        }
    }

    pub fn with_base_url(self, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self { base_url, ..self }
    }

    pub fn auth(&self) -> &Arc<ToyotaAuth> {
        &self.auth
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        vin: Option<&str>,
        generation: Option<ApiGeneration>,
        body: Option<Value>,
    ) -> Result<Value> {
        let tokens = self.auth.check_tokens().await?;
        let guid = tokens.guid()?;
        let url = format!("{}{}", self.base_url, path);
        debug!("{} {}", method, url);

        let mut req = self
            .http
            .request(method, &url)
            .bearer_auth(&tokens.access_token)
            .header("x-api-key", &self.api_key)
            .header("x-guid", &guid)
            .header("x-channel", "ONEAPP")
            .header("x-brand", "T");
        if let Some(vin) = vin {
            req = req.header("vin", vin);
        }
        if let Some(generation) = generation {
            req = req.header("GENERATION", generation.as_ref());
        }
        if let Some(body) = body {
            req = req.json(&body);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(Error::Status {
                status: status.as_u16(),
                url,
                body: text,
            });
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(unwrap_payload(serde_json::from_str(&text)?))
    }

    async fn guid(&self) -> Result<String> {
        self.auth.check_tokens().await?.guid()
    }
}

/// Gateway responses wrap their data in `payload`.
fn unwrap_payload(mut body: Value) -> Value {
    match body.get_mut("payload") {
        Some(payload) => payload.take(),
        None => body,
    }
}

#[async_trait]
impl VehicleApi for ToyotaClient {
    async fn get_user_vehicle_list(&self) -> Result<Vec<Value>> {
        match self.request(Method::GET, "v3/vehicle/guid", None, None, None).await? {
            Value::Array(items) => Ok(items),
            Value::Null => Ok(Vec::new()),
            other => {
                warn!("Unexpected vehicle listing shape: {}", other);
                Ok(Vec::new())
            }
        }
    }

    async fn get_telemetry(&self, vin: &str, generation: ApiGeneration) -> Result<Value> {
        self.request(Method::GET, "v2/telemetry", Some(vin), Some(generation), None)
            .await
    }

    async fn get_vehicle_status(&self, vin: &str, generation: ApiGeneration) -> Result<Value> {
        self.request(
            Method::GET,
            "v1/global/remote/status",
            Some(vin),
            Some(generation),
            None,
        )
        .await
    }

    async fn get_engine_status(&self, vin: &str) -> Result<Value> {
        self.request(Method::GET, "v1/global/remote/engine-status", Some(vin), None, None)
            .await
    }

    async fn get_electric_status(&self, vin: &str) -> Result<Option<Value>> {
        let value = self
            .request(Method::GET, "v2/electric/status", Some(vin), None, None)
            .await?;
        Ok((!value.is_null()).then_some(value))
    }

    async fn send_refresh_status(&self, vin: &str) -> Result<()> {
        let guid = self.guid().await?;
        self.request(
            Method::POST,
            "v1/global/remote/refresh-status",
            Some(vin),
            None,
            Some(json!({"guid": guid, "vin": vin})),
        )
        .await
        .map(|_| ())
    }

    async fn remote_request(&self, vin: &str, command: &str) -> Result<()> {
        self.request(
            Method::POST,
            "v1/global/remote/command",
            Some(vin),
            None,
            Some(json!({"command": command})),
        )
        .await
        .map(|_| ())
    }

    fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    async fn login(&self) -> Result<()> {
        let creds = self
            .credentials
            .as_ref()
            .ok_or_else(|| Error::Auth("no stored credentials".to_string()))?;
        self.auth.login(&creds.username, &creds.password).await
    }

    async fn refresh_tokens(&self) -> Result<()> {
        self.auth.refresh_tokens().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwrap_payload() {
        assert_eq!(
            unwrap_payload(json!({"status": "ok", "payload": [{"vin": "A1"}]})),
            json!([{"vin": "A1"}])
        );
        assert_eq!(unwrap_payload(json!({"fuelLevel": 3})), json!({"fuelLevel": 3}));
    }

    #[test]
    fn test_builder() {
        let auth = Arc::new(ToyotaAuth::new().unwrap());
        let client = ToyotaClient::new("key", auth).unwrap();
        assert!(!client.has_credentials());

        let client = client
            .with_credentials("driver@example.com", "pw")
            .with_base_url("http://127.0.0.1:9/api");
        assert!(client.has_credentials());
        assert_eq!(client.base_url, "http://127.0.0.1:9/api/");
    }

    #[tokio::test]
    async fn test_requests_need_tokens() {
        let auth = Arc::new(ToyotaAuth::new().unwrap());
        let client = ToyotaClient::new("key", auth).unwrap();
        let err = client.get_engine_status("A1").await.unwrap_err();
        assert!(err.is_auth());
        assert!(client.login().await.unwrap_err().is_auth());
    }
}
