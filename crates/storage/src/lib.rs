pub mod kv;
pub mod sqlite;

pub use kv::{KvStore, MemoryStore, KEY_AGENTS, KEY_HEALTH, KEY_REGISTRY, KEY_TASKS};
pub use sqlite::SqliteStore;
