//! Queue actor: the scheduler loop.
//!
//! One queue actor drives one queue. On every tick it reserves the next
//! eligible job and hands it to its worker, one job at a time. When nothing
//! is eligible it promotes deferred jobs and waits for the next tick or a
//! wake-up. Outcomes come back as messages and go through
//! [`lifecycle::apply_outcome`](crate::lifecycle::apply_outcome).

use std::sync::Arc;
use std::time::Instant;

use db::{DbError, JobRepository};
use queue_core::{Job, JobResult, Outcome, QueueConfig, QueueEvent, QueueStatus};
use ractor::{Actor, ActorProcessingErr, ActorRef, SupervisionEvent};
use tokio::sync::broadcast;

use crate::handler::ProcessorRegistry;
use crate::lifecycle;
use crate::messages::{QueueMessage, WorkerMessage};
use crate::worker_actor::{WorkerActor, WorkerArgs};

/// Queue actor arguments.
pub struct QueueArgs {
    pub repo: JobRepository,
    pub processors: Arc<ProcessorRegistry>,
    pub config: QueueConfig,
    pub event_tx: broadcast::Sender<QueueEvent>,
}

/// State for the queue actor.
pub struct QueueActorState {
    repo: JobRepository,
    processors: Arc<ProcessorRegistry>,
    config: QueueConfig,
    event_tx: broadcast::Sender<QueueEvent>,
    worker: ActorRef<WorkerMessage>,
    /// Whether new jobs are reserved.
    running: bool,
    /// Whether stale reservations were released since the actor started.
    recovered: bool,
    /// Outstanding holds; no reservations while non-zero.
    holds: u32,
    /// The job handed to the worker, until its outcome is applied.
    in_flight: Option<Job>,
    /// Last promotion sweep or deferral; the next sweep waits
    /// `retry_delay` from here.
    sweep_clock: Option<Instant>,
    shutting_down: bool,
}

impl QueueActorState {
    /// Broadcast an event.
    fn broadcast(&self, event: QueueEvent) {
        tracing::debug!("{} at {}", event.description(), event.timestamp());
        let _ = self.event_tx.send(event);
    }

    fn status(&self) -> QueueStatus {
        QueueStatus {
            running: self.running,
            in_flight: self.in_flight.as_ref().map(|job| job.id),
            retry_limit: self.config.retry_limit,
        }
    }

    /// One scheduling step.
    async fn tick(&mut self) {
        if !self.running || self.holds > 0 || self.in_flight.is_some() {
            return;
        }

        match self.repo.reserve_next().await {
            Ok(Some(job)) => self.dispatch(job).await,
            Ok(None) => self.promote_if_due().await,
            Err(e) => tracing::warn!("Failed to reserve next job: {}", e),
        }
    }

    async fn dispatch(&mut self, job: Job) {
        tracing::debug!("Dispatching job {} ({})", job.id, job.task);

        self.in_flight = Some(job.clone());
        if let Err(e) = self.worker.send_message(WorkerMessage::ProcessJob {
            job: Box::new(job.clone()),
        }) {
            tracing::warn!("Failed to hand job {} to worker: {}", job.id, e);
            self.in_flight = None;
            self.release(&job).await;
        }
    }

    /// Return a reservation nobody will complete to the pending pool.
    async fn release(&self, job: &Job) {
        match self.repo.release(job.id).await {
            Ok(Some(_)) => tracing::info!("Returned job {} to the pending pool", job.id),
            Ok(None) => {}
            Err(e) => tracing::warn!("Failed to release job {}: {}", job.id, e),
        }
    }

    async fn promote_if_due(&mut self) {
        let due = self
            .sweep_clock
            .is_none_or(|at| at.elapsed() >= self.config.retry_delay());
        if !due {
            return;
        }

        match self.repo.promote_deferred().await {
            Ok(promoted) => {
                self.sweep_clock = Some(Instant::now());
                if promoted > 0 {
                    tracing::debug!("Promoted {} deferred jobs", promoted);
                }
            }
            Err(e) => tracing::warn!("Failed to promote deferred jobs: {}", e),
        }
    }

    async fn complete(&mut self, job: &Job, result: JobResult) {
        let defers = matches!(result.outcome, Outcome::Defer | Outcome::Fail);

        match lifecycle::apply_outcome(&self.repo, job, result, self.config.retry_limit).await {
            Ok(events) => {
                for event in events {
                    self.broadcast(event);
                }
            }
            Err(e) => {
                tracing::warn!("Failed to apply outcome of job {}: {}", job.id, e);
                self.release(job).await;
            }
        }

        if defers {
            self.sweep_clock = Some(Instant::now());
        }
    }

    async fn start(&mut self) -> Result<(), DbError> {
        if !self.recovered {
            let released = self.repo.release_all_locks().await?;
            if released > 0 {
                tracing::info!("Released {} stale reservations", released);
            }
            self.recovered = true;
        }

        if !self.running {
            self.running = true;
            tracing::info!("Queue started");
            self.broadcast(QueueEvent::did_start());
        }

        Ok(())
    }

    fn stop(&mut self) {
        if self.running {
            self.running = false;
            tracing::info!("Queue stopped");
            self.broadcast(QueueEvent::did_stop());
        }
    }
}

async fn spawn_worker(
    myself: &ActorRef<QueueMessage>,
    processors: Arc<ProcessorRegistry>,
) -> Result<ActorRef<WorkerMessage>, ActorProcessingErr> {
    let args = WorkerArgs {
        queue: myself.clone(),
        processors,
    };

    let (worker, _handle) = Actor::spawn_linked(None, WorkerActor, args, myself.get_cell())
        .await
        .map_err(|e| ActorProcessingErr::from(format!("Failed to spawn worker: {}", e)))?;

    Ok(worker)
}

/// Queue actor that schedules a single queue.
pub struct QueueActor;

impl Actor for QueueActor {
    type Msg = QueueMessage;
    type State = QueueActorState;
    type Arguments = QueueArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting queue actor");

        let worker = spawn_worker(&myself, args.processors.clone()).await?;

        // Start periodic tick
        let interval = args.config.tick_interval();
        let myself_clone = myself.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if myself_clone.send_message(QueueMessage::Tick).is_err() {
                    break;
                }
            }
        });

        Ok(QueueActorState {
            repo: args.repo,
            processors: args.processors,
            config: args.config,
            event_tx: args.event_tx,
            worker,
            running: false,
            recovered: false,
            holds: 0,
            in_flight: None,
            sweep_clock: None,
            shutting_down: false,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            QueueMessage::Start { reply } => {
                let result = state.start().await;
                let started = result.is_ok();
                let _ = reply.send(result);
                if started {
                    state.tick().await;
                }
            }

            QueueMessage::Stop { reply } => {
                state.stop();
                let _ = reply.send(());
            }

            QueueMessage::Wake | QueueMessage::Tick => {
                state.tick().await;
            }

            QueueMessage::Hold { reply } => {
                state.holds += 1;
                let _ = reply.send(());
            }

            QueueMessage::Release => {
                state.holds = state.holds.saturating_sub(1);
                state.tick().await;
            }

            QueueMessage::Outcome { job, result } => {
                let expected = state.in_flight.as_ref().is_some_and(|j| j.id == job.id);
                if !expected {
                    tracing::warn!("Ignoring outcome for job {} that is not in flight", job.id);
                    return Ok(());
                }

                state.complete(&job, result).await;
                state.in_flight = None;

                // Keep draining without waiting for the next tick.
                state.tick().await;
            }

            QueueMessage::SetRetryLimit { retry_limit } => {
                state.config.retry_limit = retry_limit;
            }

            QueueMessage::GetStatus { reply } => {
                let _ = reply.send(state.status());
            }

            QueueMessage::Shutdown => {
                tracing::info!("Shutting down queue actor");
                state.shutting_down = true;
                let _ = state.worker.send_message(WorkerMessage::Shutdown);
                myself.stop(None);
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisionEvent::ActorFailed(cell, reason) => {
                if cell.get_id() != state.worker.get_id() || state.shutting_down {
                    return Ok(());
                }

                tracing::warn!("Worker failed: {}", reason);

                if let Some(job) = state.in_flight.take() {
                    let result = JobResult::fail(format!("Processor failed: {}", reason));
                    state.complete(&job, result).await;
                }

                state.worker = spawn_worker(&myself, state.processors.clone()).await?;
                state.tick().await;
            }

            SupervisionEvent::ActorTerminated(cell, _, reason) => {
                tracing::debug!(
                    "Child actor {} terminated: {:?}",
                    cell.get_name().unwrap_or_default(),
                    reason
                );
            }

            _ => {}
        }

        Ok(())
    }
}
