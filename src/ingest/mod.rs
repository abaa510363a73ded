//! Discovery of new meeting recordings.
//!
//! ```text
//! StorageBackend ──poll/notify──▶ Watcher ──mark_queued──▶ Registry
//!                                    │
//!                                    └──push──▶ WorkQueue ──▶ workers
//! ```

pub mod queue;
pub mod watcher;

pub use queue::{WorkQueue, WorkQueueError};
pub use watcher::{ScanResult, Watcher, WatcherConfig, WatcherError};
