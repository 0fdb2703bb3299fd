//! Core domain types for the job queue system.
//!
//! This crate contains shared types used across all packages:
//! - Job, JobState and Priority for work items
//! - Outcome and JobResult for what a processor reports back
//! - QueueConfig and QueueStatus for the scheduler
//! - Events for lifecycle notifications

mod events;
mod job;
mod payload;
mod queue;

pub use events::QueueEvent;
pub use job::{Job, JobId, JobResult, JobState, Outcome, Priority};
pub use payload::{Payload, PayloadError};
pub use queue::{QueueConfig, QueueStatus};
