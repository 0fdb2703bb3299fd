//! Persistent local job queue.
//!
//! Jobs are stored in SurrealDB, so they survive restarts. A scheduler
//! actor dispatches them one at a time to registered processors and
//! applies retry, defer and drop policy to what the processors report.
//!
//! ```ignore
//! use job_queue::{FnProcessor, JobQueue, JobResult, QueueSettings};
//!
//! let queue = JobQueue::open(QueueSettings::default()).await?;
//! queue.register("email", FnProcessor::sync(|job| JobResult::success()));
//! queue.enqueue("a@b.c", "email").await?;
//! queue.start().await?;
//! ```

mod error;
mod job_queue;
mod settings;
mod telemetry;

pub use error::QueueError;
pub use job_queue::{GroupBatch, JobQueue};
pub use settings::QueueSettings;
pub use telemetry::init_tracing;

// Re-export the types callers need alongside the facade.
pub use actors::{Completion, FnProcessor, Processing, Processor};
pub use db::DbConfig;
pub use queue_core::{
    Job, JobId, JobResult, JobState, Outcome, Payload, PayloadError, Priority, QueueConfig,
    QueueEvent, QueueStatus,
};
