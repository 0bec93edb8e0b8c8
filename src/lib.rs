// tabtodo - persisted, ordered, filterable to-do list for a new-tab dashboard

pub mod config;
pub mod filter;
pub mod storage;
pub mod store;
pub mod task;
pub mod writer;

// Re-export main types for convenience
pub use filter::{TaskCounts, TaskFilter};
pub use storage::{FileStorage, MemoryStorage, SqliteStorage, Storage};
pub use store::{DEFAULT_KEY, Outcome, PersistWarning, TaskStore};
pub use task::{Priority, Task, clean_related_sites, is_valid_site_url, now_ms};
pub use writer::QueuedWriter;
