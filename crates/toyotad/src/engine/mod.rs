#[allow(clippy::module_inception)]
mod engine;
mod entity;
mod integration;
mod message;
pub mod state;

pub use engine::Engine;
pub use engine::RouteError;
pub use entity::Entity;
pub use integration::FromIntegrationSender;
pub use integration::Integration;
pub use integration::IntegrationContext;
pub use integration::IntegrationFactoryResult;
pub use integration::REGISTRY as INTEGRATION_REGISTRY;
pub use message::FromIntegrationMessage;
pub use message::ToIntegrationMessage;
pub use state::BinarySensorState;
pub use state::LockAttributes;
pub use state::LockState;
pub use state::SensorState;
pub use state::State;
pub use state::TrackerState;
