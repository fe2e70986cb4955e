pub mod agent;
pub mod lifecycle;
pub mod sweeper;

pub use agent::Agent;
pub use lifecycle::{AgentError, LifecycleManager, LifecycleRecord, LifecycleStatus};
pub use sweeper::HeartbeatSweeper;
