//! Client library for Toyota (North America) connected services.
//!
//! The crate is split along the seams of the vendor API:
//! - [`VehicleApi`]: the HTTP surface, implemented by [`ToyotaClient`]
//! - [`FeatureStore`]: typed vehicle state parsed from raw payloads
//! - [`GenerationStrategy`]: per-generation update pipeline and command codes
//! - [`Vehicle`]: one vehicle's identity plus its feature store

mod api;
mod auth;
mod client;
mod command;
mod dispatch;
mod error;
mod features;
mod generation;
pub mod parse;
mod vehicle;

pub use api::VehicleApi;
#[cfg(any(test, feature = "mock"))]
pub use api::mock::{Endpoint, MockReply, MockVehicleApi};
pub use auth::{TokenCallback, Tokens, ToyotaAuth};
pub use client::ToyotaClient;
pub use command::RemoteCommand;
pub use dispatch::{send_command, CommandOutcome};
pub use error::{Error, Result};
pub use features::{FeatureStore, FeatureValue, Reading, VehicleFeature};
pub use generation::{
    strategy_for, ApiGeneration, CommandRoute, GenerationStrategy, Stage, StageFailure,
    UpdateReport,
};
pub use vehicle::{fetch_features, get_vehicles, list_vehicles, Vehicle, VehicleInfo};
