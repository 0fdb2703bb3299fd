//! Errors surfaced by the queue facade.

use thiserror::Error;

/// Errors returned to queue callers.
///
/// Job failures never show up here; they are reported through events.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Storage(#[from] db::DbError),

    #[error(transparent)]
    Payload(#[from] queue_core::PayloadError),

    #[error("Failed to spawn queue actor: {0}")]
    Spawn(#[from] ractor::SpawnErr),

    #[error(transparent)]
    Actor(#[from] actors::ActorError),
}
