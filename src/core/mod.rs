//! Core orchestration logic.
//!
//! This module contains:
//! - Stages: the ordered per-meeting stage chain
//! - Pipeline: per-item run (validate, fetch, stages, commit)
//! - Worker: pool draining the work queue
//! - Orchestrator: startup, serve and one-shot cycles
//! - Retry and Safety: backoff policy and input limits

pub mod orchestrator;
pub mod pipeline;
pub mod retry;
pub mod safety;
pub mod stages;
pub mod worker;

// Re-export commonly used types
pub use orchestrator::{init_vault, CycleReport, InstanceLock, LockError, Orchestrator};
pub use pipeline::{Collaborators, Pipeline, ProcessOutcome};
pub use retry::{with_retry, RetryPolicy, Retryable};
pub use safety::{SafetyLimits, SafetyViolation};
pub use stages::{MeetingContext, Stage, StageError};
pub use worker::{WorkerPool, SHUTDOWN_REPORT_BUDGET};
