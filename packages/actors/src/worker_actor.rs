//! Worker actor: the dispatcher that runs processors.

use std::sync::Arc;

use queue_core::{Job, JobResult};
use ractor::{Actor, ActorProcessingErr, ActorRef};

use crate::handler::ProcessorRegistry;
use crate::messages::{QueueMessage, WorkerMessage};

/// State for the worker actor.
pub struct WorkerActorState {
    /// Queue actor reference.
    pub queue: ActorRef<QueueMessage>,
    /// Processor registry.
    pub processors: Arc<ProcessorRegistry>,
}

/// Worker actor arguments.
pub struct WorkerArgs {
    pub queue: ActorRef<QueueMessage>,
    pub processors: Arc<ProcessorRegistry>,
}

/// Worker actor that executes jobs.
///
/// Each job is processed inside the worker's own mailbox, so a slow
/// processor holds up only the worker; the queue actor keeps answering.
pub struct WorkerActor;

impl WorkerActor {
    async fn run(processors: &ProcessorRegistry, job: &Job) -> JobResult {
        match processors.get(&job.task) {
            Some(processor) => processor.process(job).resolve().await,
            None => {
                tracing::warn!(
                    "No processor registered for task '{}', deferring job {}",
                    job.task,
                    job.id
                );
                JobResult::defer()
                    .with_response(format!("No processor registered for task: {}", job.task))
            }
        }
    }
}

impl Actor for WorkerActor {
    type Msg = WorkerMessage;
    type State = WorkerActorState;
    type Arguments = WorkerArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::debug!("Starting worker");

        Ok(WorkerActorState {
            queue: args.queue,
            processors: args.processors,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::ProcessJob { job } => {
                tracing::debug!("Processing job {} ({})", job.id, job.task);

                let result = Self::run(&state.processors, &job).await;

                state
                    .queue
                    .send_message(QueueMessage::Outcome { job, result })?;
            }

            WorkerMessage::Shutdown => {
                tracing::debug!("Shutting down worker");
                myself.stop(None);
            }
        }

        Ok(())
    }
}
