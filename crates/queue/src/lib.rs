pub mod queue;
pub mod task;

pub use queue::{QueueStats, TaskQueue};
pub use task::{Task, TaskError, TaskStatus};
