//! OAuth token handling for Toyota's ForgeRock identity service.

use std::fmt;
use std::sync::Arc;

use base64::Engine;
use serde::Deserialize;
use serde::Serialize;
use serde_json::json;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;
use tracing::info;

use crate::error::Error;
use crate::error::Result;

const AUTHENTICATE_URL: &str = "https://login.toyotadriverslogin.com/json/realms/root/realms/tmna-native/authenticate?authIndexType=service&authIndexValue=OneAppSignIn";
const AUTHORIZE_URL: &str =
    "https://login.toyotadriverslogin.com/oauth2/realms/root/realms/tmna-native/authorize";
const TOKEN_URL: &str =
    "https://login.toyotadriverslogin.com/oauth2/realms/root/realms/tmna-native/access_token";
const CLIENT_ID: &str = "oneappsdkclient";
const REDIRECT_URI: &str = "com.toyota.oneapp:/oauth2Callback";
const CODE_VERIFIER: &str = "plain";

/// Authentication callbacks are answered one round at a time; the service
/// never needs more than a handful.
const MAX_AUTH_STEPS: usize = 10;

/// Tokens are refreshed this many seconds before they actually expire.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// OAuth tokens for one account.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Tokens {
    pub access_token: String,
    pub refresh_token: String,
    pub id_token: String,
    /// Unix seconds.
    pub expires_at: i64,
}

impl fmt::Debug for Tokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tokens")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("id_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    id_token: String,
    expires_in: i64,
}

impl Tokens {
    fn from_response(response: TokenResponse, now: i64) -> Self {
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            id_token: response.id_token,
            expires_at: now + response.expires_in,
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now + EXPIRY_MARGIN_SECS >= self.expires_at
    }

    /// Account GUID: the `sub` claim of the id token.
    pub fn guid(&self) -> Result<String> {
        let payload = self
            .id_token
            .split('.')
            .nth(1)
            .ok_or_else(|| Error::Auth("id token is not a JWT".to_string()))?;
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| Error::Auth(format!("id token payload: {}", e)))?;
        let claims: Value = serde_json::from_slice(&bytes)?;
        claims
            .get("sub")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| Error::Auth("id token has no sub claim".to_string()))
    }
}

/// Called with the new tokens whenever they change.
pub type TokenCallback = Arc<dyn Fn(&Tokens) + Send + Sync>;

/// Token holder with login and refresh flows.
pub struct ToyotaAuth {
    http: reqwest::Client,
    tokens: Mutex<Option<Tokens>>,
    callback: Option<TokenCallback>,
}

impl ToyotaAuth {
    pub fn new() -> Result<Self> {
        // The authorize step answers with a redirect to a custom scheme that
        // must be read, not followed.
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            http,
            tokens: Mutex::new(None),
            callback: None,
        })
    }

    pub fn with_tokens(self, tokens: Option<Tokens>) -> Self {
        Self {
            tokens: Mutex::new(tokens),
            ..self
        }
    }

    pub fn on_tokens_updated(self, callback: TokenCallback) -> Self {
        Self {
            callback: Some(callback),
            ..self
        }
    }

    pub async fn get_tokens(&self) -> Option<Tokens> {
        self.tokens.lock().await.clone()
    }

    pub async fn set_tokens(&self, tokens: Tokens) {
        *self.tokens.lock().await = Some(tokens.clone());
        if let Some(cb) = &self.callback {
            cb(&tokens);
        }
    }

    /// Current tokens, refreshed first if they are about to expire.
    pub async fn check_tokens(&self) -> Result<Tokens> {
        let mut guard = self.tokens.lock().await;
        let current = guard
            .clone()
            .ok_or_else(|| Error::Auth("not logged in".to_string()))?;
        if !current.is_expired(now()) {
            return Ok(current);
        }

        debug!("Access token expired, refreshing");
        let fresh = self.refresh_grant(&current.refresh_token).await?;
        *guard = Some(fresh.clone());
        drop(guard);

        if let Some(cb) = &self.callback {
            cb(&fresh);
        }
        Ok(fresh)
    }

    pub async fn refresh_tokens(&self) -> Result<()> {
        let refresh_token = self
            .tokens
            .lock()
            .await
            .as_ref()
            .map(|t| t.refresh_token.clone())
            .ok_or_else(|| Error::Auth("no refresh token".to_string()))?;
        let fresh = self.refresh_grant(&refresh_token).await?;
        self.set_tokens(fresh).await;
        info!("Tokens refreshed");
        Ok(())
    }

    /// Full unattended login with username and password.
    pub async fn login(&self, username: &str, password: &str) -> Result<()> {
        let token_id = self.authenticate(username, password).await?;
        let code = self.authorize(&token_id).await?;
        let tokens = self
            .token_grant(&[
                ("client_id", CLIENT_ID),
                ("redirect_uri", REDIRECT_URI),
                ("grant_type", "authorization_code"),
                ("code_verifier", CODE_VERIFIER),
                ("code", &code),
            ])
            .await?;
        self.set_tokens(tokens).await;
        info!("Logged in to Toyota connected services");
        Ok(())
    }

    async fn refresh_grant(&self, refresh_token: &str) -> Result<Tokens> {
        self.token_grant(&[
            ("client_id", CLIENT_ID),
            ("redirect_uri", REDIRECT_URI),
            ("grant_type", "refresh_token"),
            ("code_verifier", CODE_VERIFIER),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    async fn token_grant(&self, form: &[(&str, &str)]) -> Result<Tokens> {
        let resp = self.http.post(TOKEN_URL).form(form).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Auth(format!(
                "token endpoint returned {}: {}",
                status,
                resp.text().await.unwrap_or_default()
            )));
        }
        let body: TokenResponse = resp.json().await?;
        Ok(Tokens::from_response(body, now()))
    }

    /// Walk the callback rounds until the service hands out a session token.
    async fn authenticate(&self, username: &str, password: &str) -> Result<String> {
        let mut body = json!({});
        for _ in 0..MAX_AUTH_STEPS {
            let resp = self
                .http
                .post(AUTHENTICATE_URL)
                .header("Accept-API-Version", "resource=2.1, protocol=1.0")
                .json(&body)
                .send()
                .await?;
            let status = resp.status();
            if !status.is_success() {
                return Err(Error::Auth(format!("authenticate returned {}", status)));
            }

            let mut step: Value = resp.json().await?;
            if let Some(token) = step.get("tokenId").and_then(Value::as_str) {
                return Ok(token.to_string());
            }

            let callbacks = step
                .get_mut("callbacks")
                .and_then(Value::as_array_mut)
                .ok_or_else(|| Error::Auth("authenticate step without callbacks".to_string()))?;
            for callback in callbacks.iter_mut() {
                answer_callback(callback, username, password)?;
            }
            body = step;
        }
        Err(Error::Auth("authentication did not complete".to_string()))
    }

    async fn authorize(&self, token_id: &str) -> Result<String> {
        let resp = self
            .http
            .get(AUTHORIZE_URL)
            .query(&[
                ("client_id", CLIENT_ID),
                ("scope", "openid profile write"),
                ("response_type", "code"),
                ("redirect_uri", REDIRECT_URI),
                ("code_challenge", CODE_VERIFIER),
                ("code_challenge_method", "plain"),
            ])
            .header(reqwest::header::COOKIE, format!("iPlanetDirectoryPro={}", token_id))
            .send()
            .await?;

        let location = resp
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                Error::Auth(format!("authorize returned {} without a redirect", resp.status()))
            })?;
        authorization_code(location)
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn answer_callback(callback: &mut Value, username: &str, password: &str) -> Result<()> {
    let kind = callback
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let prompt = callback
        .pointer("/output/0/value")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let answer = match kind.as_str() {
        "NameCallback" if prompt == "ui_locales" => json!("en-US"),
        "NameCallback" => json!(username),
        "PasswordCallback" if prompt.to_lowercase().contains("one time") => {
            return Err(Error::Auth("one-time passcode required".to_string()));
        }
        "PasswordCallback" => json!(password),
        _ => return Ok(()),
    };

    if let Some(slot) = callback.pointer_mut("/input/0/value") {
        *slot = answer;
    }
    Ok(())
}

/// Extract `code` from the authorize redirect.
fn authorization_code(location: &str) -> Result<String> {
    let url = reqwest::Url::parse(location)
        .map_err(|e| Error::Auth(format!("bad authorize redirect: {}", e)))?;
    url.query_pairs()
        .find(|(k, _)| k == "code")
        .map(|(_, v)| v.into_owned())
        .ok_or_else(|| Error::Auth("authorize redirect has no code".to_string()))
}
