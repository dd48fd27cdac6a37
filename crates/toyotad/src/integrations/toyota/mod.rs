mod binary_sensor;
mod config;
mod coordinator;
mod device_tracker;
mod entity;
mod fleet;
mod lock;
mod persist;
mod sensor;
mod session;
#[allow(clippy::module_inception)]
mod toyota;

use std::sync::Arc;

use anyhow::Context;
pub use config::Config as ToyotaConfig;
use linkme::distributed_slice;
use persist::StateFile;
pub use toyota::ToyotaIntegration;
use toyota_api::ToyotaAuth;
use toyota_api::ToyotaClient;
use tracing::info;

use crate::engine;

#[distributed_slice(engine::INTEGRATION_REGISTRY)]
fn init_toyota(ctx: &engine::IntegrationContext) -> engine::IntegrationFactoryResult {
    let toyota_config = if let Some(c) = &ctx.config.integrations.toyota {
        c
    } else {
        return Ok(None);
    };

    let state_file = toyota_config
        .state_path
        .as_ref()
        .map(|path| StateFile::load(path).map(Arc::new))
        .transpose()
        .context("Failed to load Toyota state file")?;

    let mut auth = ToyotaAuth::new()
        .context("Failed to create Toyota auth client")?
        .with_tokens(state_file.as_ref().and_then(|f| f.tokens()));
    if let Some(file) = &state_file {
        let file = file.clone();
        auth = auth.on_tokens_updated(Arc::new(move |tokens| {
            info!("Tokens refreshed, updating state file");
            let file = file.clone();
            let tokens = tokens.clone();
            tokio::spawn(async move { file.set_tokens(&tokens).await });
        }));
    }

    let client = ToyotaClient::new(toyota_config.api_key.clone(), Arc::new(auth))
        .context("Failed to create Toyota client")?
        .with_credentials(
            toyota_config.username.clone(),
            toyota_config.password.clone(),
        );

    Ok(Some(Box::new(ToyotaIntegration::new(
        Arc::new(client),
        toyota_config,
        state_file,
    ))))
}
