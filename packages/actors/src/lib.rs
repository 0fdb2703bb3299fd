//! Actor system for the job queue.
//!
//! This crate provides the Ractor-based scheduler, dispatcher and
//! lifecycle controller of a queue.
//!
//! # Architecture
//!
//! - `QueueActor` - Reserves jobs one at a time and applies their outcomes
//! - `WorkerActor` - Runs the processor for a reserved job
//! - `lifecycle` - Maps an outcome to storage transitions and events
//!
//! # Usage
//!
//! ```ignore
//! use actors::{QueueArgs, spawn_queue};
//!
//! let (queue, _handle) = spawn_queue(args).await?;
//! queue.start().await?;
//! ```

mod handler;
pub mod lifecycle;
mod messages;
mod queue_actor;
mod queue_handle;
mod worker_actor;

pub use handler::{Completion, FnProcessor, Processing, Processor, ProcessorRegistry};
pub use messages::{ActorError, QueueMessage, WorkerMessage};
pub use queue_actor::{QueueActor, QueueArgs};
pub use queue_handle::{QueueHandle, SchedulerHold, spawn_queue};
pub use worker_actor::WorkerActor;

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};
