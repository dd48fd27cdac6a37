use serde::Serialize;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::api::VehicleApi;
use crate::command::RemoteCommand;
use crate::error::Result;
use crate::generation::strategy_for;
use crate::generation::ApiGeneration;
use crate::generation::CommandRoute;

/// Result of a remote command. Dispatch never returns an error; this only
/// reports what happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommandOutcome {
    Sent,
    /// First attempt was rejected as unauthenticated; the retry went through.
    SentAfterReauth,
    /// 400 from the backend (subscription or vehicle-state limitation).
    Rejected,
    /// Token refresh / re-login failed, the command was not retried.
    AuthFailed { reason: String },
    Failed { status: Option<u16>, reason: String },
}

impl CommandOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, CommandOutcome::Sent | CommandOutcome::SentAfterReauth)
    }
}

async fn submit(api: &dyn VehicleApi, vin: &str, route: CommandRoute) -> Result<()> {
    match route {
        CommandRoute::Remote(code) => api.remote_request(vin, code).await,
        CommandRoute::RefreshStatus => api.send_refresh_status(vin).await,
    }
}

/// Prefer a full login when credentials are stored, else a token refresh.
async fn reauthenticate(api: &dyn VehicleApi) -> Result<()> {
    if api.has_credentials() {
        api.login().await
    } else {
        api.refresh_tokens().await
    }
}

/// Send `command` to a vehicle.
///
/// On 401/403 the client re-authenticates once and retries once. Every error
/// is logged and folded into the returned [`CommandOutcome`].
pub async fn send_command(
    api: &dyn VehicleApi,
    vin: &str,
    generation: ApiGeneration,
    command: RemoteCommand,
) -> CommandOutcome {
    let route = strategy_for(generation).route(command);

    let err = match submit(api, vin, route).await {
        Ok(()) => {
            info!("Successfully sent command {} to vehicle {}", command, vin);
            return CommandOutcome::Sent;
        }
        Err(e) => e,
    };

    if err.is_bad_request() {
        warn!(
            "Bad Request (400) sending {} to {}. This may be due to API changes, subscription limitations, or vehicle state.",
            command, vin
        );
        return CommandOutcome::Rejected;
    }

    if !err.is_auth() {
        error!("Unexpected error sending command {} to vehicle {}: {}", command, vin, err);
        return CommandOutcome::Failed {
            status: err.status(),
            reason: err.to_string(),
        };
    }

    warn!(
        "Authentication error sending {} to {}; refreshing tokens: {}",
        command, vin, err
    );
    if let Err(auth_err) = reauthenticate(api).await {
        error!("Failed to refresh authentication tokens: {}", auth_err);
        return CommandOutcome::AuthFailed {
            reason: auth_err.to_string(),
        };
    }
    info!("Successfully refreshed authentication tokens");

    match submit(api, vin, route).await {
        Ok(()) => {
            info!(
                "Successfully sent command {} to vehicle {} after token refresh",
                command, vin
            );
            CommandOutcome::SentAfterReauth
        }
        Err(retry_err) => {
            error!("Still failed to send command after token refresh: {}", retry_err);
            CommandOutcome::Failed {
                status: retry_err.status(),
                reason: retry_err.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::Endpoint;
    use crate::api::mock::MockReply;
    use crate::api::mock::MockVehicleApi;

    const VIN: &str = "JTMABC12345678901";

    #[tokio::test]
    async fn test_send_command() {
        let api = MockVehicleApi::new();
        let outcome = send_command(&api, VIN, ApiGeneration::Cy17Plus, RemoteCommand::HazardsOn).await;

        assert_eq!(outcome, CommandOutcome::Sent);
        assert_eq!(
            api.calls(),
            vec![(Endpoint::RemoteRequest, format!("{}:hazard-on", VIN))]
        );
    }

    #[tokio::test]
    async fn test_auth_failure_relogs_and_retries_once() {
        let api = MockVehicleApi::new();
        api.set_credentials(true);
        api.script(Endpoint::RemoteRequest, [MockReply::Status(401)]);

        let outcome = send_command(&api, VIN, ApiGeneration::Mm21, RemoteCommand::DoorLock).await;

        assert_eq!(outcome, CommandOutcome::SentAfterReauth);
        assert_eq!(api.count(Endpoint::Login), 1);
        assert_eq!(api.count(Endpoint::RefreshTokens), 0);
        assert_eq!(api.count(Endpoint::RemoteRequest), 2);
    }

    #[tokio::test]
    async fn test_auth_failure_without_credentials_refreshes() {
        let api = MockVehicleApi::new();
        api.fallback(Endpoint::RemoteRequest, MockReply::Status(403));

        let outcome = send_command(&api, VIN, ApiGeneration::Mm21, RemoteCommand::DoorUnlock).await;

        assert!(matches!(outcome, CommandOutcome::Failed { status: Some(403), .. }));
        assert_eq!(api.count(Endpoint::RefreshTokens), 1);
        // exactly one retry
        assert_eq!(api.count(Endpoint::RemoteRequest), 2);
    }

    #[tokio::test]
    async fn test_reauth_failure_is_suppressed() {
        let api = MockVehicleApi::new();
        api.script(Endpoint::RemoteRequest, [MockReply::Status(401)]);
        api.script(Endpoint::RefreshTokens, [MockReply::Status(400)]);

        let outcome = send_command(&api, VIN, ApiGeneration::Mm21, RemoteCommand::EngineStart).await;

        assert!(matches!(outcome, CommandOutcome::AuthFailed { .. }));
        assert_eq!(api.count(Endpoint::RemoteRequest), 1);
    }

    #[tokio::test]
    async fn test_bad_request_is_not_retried() {
        let api = MockVehicleApi::new();
        api.script(Endpoint::RemoteRequest, [MockReply::Status(400)]);

        let outcome = send_command(&api, VIN, ApiGeneration::Mm21, RemoteCommand::EngineStop).await;

        assert_eq!(outcome, CommandOutcome::Rejected);
        assert!(!outcome.is_sent());
        assert_eq!(api.count(Endpoint::RemoteRequest), 1);
    }

    #[tokio::test]
    async fn test_legacy_refresh_uses_status_refresh() {
        let api = MockVehicleApi::new();
        let outcome = send_command(&api, VIN, ApiGeneration::Cy17, RemoteCommand::Refresh).await;

        assert!(outcome.is_sent());
        assert_eq!(api.count(Endpoint::RefreshStatus), 1);
        assert_eq!(api.count(Endpoint::RemoteRequest), 0);
    }
}
