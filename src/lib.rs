//! meetvault - meeting recording orchestrator
//!
//! Watches an input location (local directory or Google Drive folder) for
//! meeting recordings and turns each one into a transcript, an analysis, an
//! Obsidian meeting note, entity records and Agile tasks.
//!
//! # Architecture
//!
//! - A durable registry records every discovered item and its state
//! - The watcher enqueues stable, unseen sources on a bounded queue
//! - A worker pool runs the fixed stage chain per item, isolated from
//!   failures of other items
//! - Tasks live as Markdown documents in the vault and follow a fixed
//!   workflow
//!
//! # Modules
//!
//! - `adapters`: External tools (ffmpeg, whisper, Fabric)
//! - `core`: Stages, pipeline, workers, orchestrator, retry and safety
//! - `domain`: Data structures (WorkItem, Task, Artifact, ...)
//! - `ingest`: Watcher and work queue
//! - `notes`: Meeting note, entity record and dashboard rendering
//! - `registry`: SQLite item registry
//! - `storage`: Local and cloud backends
//! - `tasks`: Task lifecycle and persistence
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run continuously
//! meetvault serve
//!
//! # Process what is in the input folder now
//! meetvault process --once
//!
//! # Move a task along
//! meetvault task move T-1a2b3c4d5e ready
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod ingest;
pub mod notes;
pub mod registry;
pub mod storage;
pub mod tasks;

// Re-export main types at crate root for convenience
pub use core::{Orchestrator, Pipeline};
pub use domain::{Task, TaskStatus, WorkItem, WorkItemState};
pub use registry::Registry;
pub use tasks::TaskManager;
