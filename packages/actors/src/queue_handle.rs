//! Typed handle for talking to a queue actor.

use queue_core::QueueStatus;
use ractor::{Actor, ActorRef, RpcReplyPort};
use tokio::task::JoinHandle;

use crate::messages::{ActorError, QueueMessage};
use crate::queue_actor::{QueueActor, QueueArgs};

/// Handle to a running queue actor.
#[derive(Clone)]
pub struct QueueHandle {
    actor: ActorRef<QueueMessage>,
}

impl QueueHandle {
    /// Send a request and wait for the reply.
    async fn request<T>(
        &self,
        build: impl FnOnce(RpcReplyPort<T>) -> QueueMessage,
    ) -> Result<T, ActorError>
    where
        T: Send + 'static,
    {
        let (tx, rx) = ractor::concurrency::oneshot();
        self.actor
            .send_message(build(tx.into()))
            .map_err(|e| ActorError::Actor(format!("Failed to send message: {}", e)))?;

        rx.await.map_err(|_| ActorError::Unavailable)
    }

    fn send(&self, message: QueueMessage) -> Result<(), ActorError> {
        self.actor
            .send_message(message)
            .map_err(|e| ActorError::Actor(format!("Failed to send message: {}", e)))
    }

    /// Start reserving jobs.
    pub async fn start(&self) -> Result<(), ActorError> {
        self.request(|reply| QueueMessage::Start { reply }).await??;
        Ok(())
    }

    /// Stop reserving jobs.
    pub async fn stop(&self) -> Result<(), ActorError> {
        self.request(|reply| QueueMessage::Stop { reply }).await
    }

    /// Ask for a tick now.
    pub fn wake(&self) -> Result<(), ActorError> {
        self.send(QueueMessage::Wake)
    }

    /// Suspend reservations. Returns once the actor has taken the hold;
    /// reservations resume when the returned guard drops.
    pub async fn hold(&self) -> Result<SchedulerHold, ActorError> {
        let (tx, rx) = ractor::concurrency::oneshot();
        self.send(QueueMessage::Hold { reply: tx.into() })?;

        // From here on the actor counts the hold, so the guard must exist
        // even if this future is dropped before the reply arrives.
        let hold = SchedulerHold {
            actor: self.actor.clone(),
        };
        rx.await.map_err(|_| ActorError::Unavailable)?;
        Ok(hold)
    }

    /// Change the retry limit.
    pub fn set_retry_limit(&self, retry_limit: u32) -> Result<(), ActorError> {
        self.send(QueueMessage::SetRetryLimit { retry_limit })
    }

    /// Get the scheduler's control state.
    pub async fn status(&self) -> Result<QueueStatus, ActorError> {
        self.request(|reply| QueueMessage::GetStatus { reply }).await
    }

    /// Stop the actor.
    pub fn shutdown(&self) -> Result<(), ActorError> {
        self.send(QueueMessage::Shutdown)
    }
}

/// A hold on the scheduler. Dropping it lets reservations resume.
#[must_use = "reservations resume as soon as the hold is dropped"]
pub struct SchedulerHold {
    actor: ActorRef<QueueMessage>,
}

impl Drop for SchedulerHold {
    fn drop(&mut self) {
        if let Err(e) = self.actor.send_message(QueueMessage::Release) {
            tracing::debug!("Hold released after the queue actor stopped: {}", e);
        }
    }
}

/// Spawn a queue actor and its worker.
pub async fn spawn_queue(
    args: QueueArgs,
) -> Result<(QueueHandle, JoinHandle<()>), ractor::SpawnErr> {
    let (actor, handle) = Actor::spawn(None, QueueActor, args).await?;

    Ok((QueueHandle { actor }, handle))
}
