//! Message types for actor communication.

use db::DbError;
use queue_core::{Job, JobResult, QueueStatus};
use ractor::RpcReplyPort;

/// Messages for the QueueActor.
#[derive(Debug)]
pub enum QueueMessage {
    /// Start reserving jobs. The first start also releases stale reservations.
    Start {
        reply: RpcReplyPort<Result<(), DbError>>,
    },

    /// Stop reserving jobs. An in-flight job still finishes.
    Stop { reply: RpcReplyPort<()> },

    /// New work may be available; run a tick now.
    Wake,

    /// Periodic tick from the interval timer.
    Tick,

    /// Suspend reservations until the matching `Release`.
    Hold { reply: RpcReplyPort<()> },

    /// Lift one `Hold`. Sent when a [`SchedulerHold`](crate::SchedulerHold) drops.
    Release,

    /// A dispatched job produced its result.
    Outcome { job: Box<Job>, result: JobResult },

    /// Change the retry limit used for later failures.
    SetRetryLimit { retry_limit: u32 },

    /// Get the scheduler's control state.
    GetStatus { reply: RpcReplyPort<QueueStatus> },

    /// Stop the queue actor and its worker.
    Shutdown,
}

/// Messages for the WorkerActor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Run the processor for a reserved job.
    ProcessJob { job: Box<Job> },

    /// Shutdown the worker.
    Shutdown,
}

/// Error type for actor operations.
#[derive(Debug, thiserror::Error)]
pub enum ActorError {
    #[error("Queue actor is not running")]
    Unavailable,

    #[error("Actor error: {0}")]
    Actor(String),

    #[error(transparent)]
    Storage(#[from] DbError),
}
