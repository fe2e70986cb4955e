pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use config::{
    Config, DiscoveryConfig, HealthConfig, QueueConfig, RbacConfig, RegistryConfig,
};
pub use error::{Error, Result};
pub use events::{Event, EventBus};
pub use types::{new_id, HealthState, ResourceUsage};
