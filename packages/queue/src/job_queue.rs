//! The queue facade.

use std::sync::Arc;

use actors::{Processor, ProcessorRegistry, QueueArgs, QueueHandle, spawn_queue};
use db::{Database, JobRepository, NewJob};
use queue_core::{Job, Payload, PayloadError, Priority, QueueConfig, QueueEvent, QueueStatus};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::{QueueError, QueueSettings};

/// A persistent job queue.
///
/// Owns the storage repository, the processor registry and the scheduler
/// actor. Dropping the queue stops the scheduler; stored jobs stay put.
pub struct JobQueue {
    repo: JobRepository,
    scheduler: QueueHandle,
    processors: Arc<ProcessorRegistry>,
    event_tx: broadcast::Sender<QueueEvent>,
    actor_task: Option<JoinHandle<()>>,
}

/// Jobs collected by [`JobQueue::enqueue_group`].
#[derive(Debug, Default)]
pub struct GroupBatch {
    entries: Vec<NewJob>,
}

impl GroupBatch {
    /// Add a default-priority job to the group.
    pub fn enqueue<T: Serialize + ?Sized>(&mut self, data: &T, task: &str) -> Result<(), PayloadError> {
        self.enqueue_with_priority(data, Priority::Default, task)
    }

    /// Add a job with an explicit priority to the group.
    pub fn enqueue_with_priority<T: Serialize + ?Sized>(
        &mut self,
        data: &T,
        priority: Priority,
        task: &str,
    ) -> Result<(), PayloadError> {
        self.entries.push(NewJob {
            payload: Payload::encode(data)?,
            priority,
            task: task.to_string(),
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl JobQueue {
    /// Open storage and spawn the scheduler. The queue starts stopped.
    pub async fn open(settings: QueueSettings) -> Result<Self, QueueError> {
        let db = db::init_db(settings.db).await?;
        Self::with_database(db, settings.queue).await
    }

    /// Open a queue configured from the environment.
    pub async fn open_default() -> Result<Self, QueueError> {
        Self::open(QueueSettings::from_env()).await
    }

    /// Build a queue over an existing connection.
    pub async fn with_database(db: Database, config: QueueConfig) -> Result<Self, QueueError> {
        db::init_schema(&db).await?;

        let repo = JobRepository::new(db);
        let processors = Arc::new(ProcessorRegistry::new());
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));

        let (scheduler, actor_task) = spawn_queue(QueueArgs {
            repo: repo.clone(),
            processors: processors.clone(),
            config,
            event_tx: event_tx.clone(),
        })
        .await?;

        Ok(Self {
            repo,
            scheduler,
            processors,
            event_tx,
            actor_task: Some(actor_task),
        })
    }

    fn wake(&self) {
        if let Err(e) = self.scheduler.wake() {
            tracing::warn!("Failed to wake scheduler: {}", e);
        }
    }

    // Processors

    /// Register the processor for a task.
    pub fn register<P: Processor>(&self, task: impl Into<String>, processor: P) {
        self.processors.register(task, processor);
        self.wake();
    }

    /// Remove the processor for a task.
    pub fn unregister(&self, task: &str) -> bool {
        self.processors.unregister(task)
    }

    /// Set the processor for tasks without a dedicated one.
    pub fn set_fallback<P: Processor>(&self, processor: P) {
        self.processors.set_fallback(processor);
        self.wake();
    }

    // Enqueueing

    /// Enqueue a default-priority job.
    pub async fn enqueue<T: Serialize + ?Sized>(&self, data: &T, task: &str) -> Result<Job, QueueError> {
        self.enqueue_with(data, Priority::Default, task, None).await
    }

    /// Enqueue a job with explicit priority and optional group.
    pub async fn enqueue_with<T: Serialize + ?Sized>(
        &self,
        data: &T,
        priority: Priority,
        task: &str,
        group: Option<&str>,
    ) -> Result<Job, QueueError> {
        let payload = Payload::encode(data)?;
        let job = self.repo.create(payload, priority, task, group).await?;
        self.wake();
        Ok(job)
    }

    /// Enqueue several jobs under one group.
    ///
    /// `setup` fills a [`GroupBatch`]; nothing is stored if it fails. The
    /// rows are written in one transaction under a scheduler hold, so either
    /// the whole group exists before any member is reserved or none of it
    /// does. Dropping the returned future also lifts the hold.
    pub async fn enqueue_group<F>(&self, group: &str, setup: F) -> Result<Vec<Job>, QueueError>
    where
        F: FnOnce(&mut GroupBatch) -> Result<(), QueueError>,
    {
        let mut batch = GroupBatch::default();
        setup(&mut batch)?;

        let _hold = self.scheduler.hold().await?;
        let jobs = self.repo.create_group(group, batch.entries).await?;
        tracing::debug!("Enqueued {} jobs in group '{}'", jobs.len(), group);

        Ok(jobs)
    }

    // Control

    /// Start dispatching. The first start releases reservations left by a
    /// previous process.
    pub async fn start(&self) -> Result<(), QueueError> {
        self.scheduler.start().await?;
        Ok(())
    }

    /// Stop dispatching. A job already in flight still completes.
    pub async fn stop(&self) -> Result<(), QueueError> {
        self.scheduler.stop().await?;
        Ok(())
    }

    /// Remove every job regardless of state. Returns how many were removed.
    pub async fn empty(&self) -> Result<usize, QueueError> {
        let removed = self.repo.remove_all().await?;
        if removed > 0 {
            let _ = self.event_tx.send(QueueEvent::did_drain());
        }
        Ok(removed)
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.event_tx.subscribe()
    }

    /// Get the scheduler's control state.
    pub async fn status(&self) -> Result<QueueStatus, QueueError> {
        Ok(self.scheduler.status().await?)
    }

    pub async fn is_running(&self) -> Result<bool, QueueError> {
        Ok(self.status().await?.running)
    }

    pub async fn retry_limit(&self) -> Result<u32, QueueError> {
        Ok(self.status().await?.retry_limit)
    }

    /// Change how many attempts a failing job gets. Applies to later failures.
    pub fn set_retry_limit(&self, retry_limit: u32) -> Result<(), QueueError> {
        self.scheduler.set_retry_limit(retry_limit)?;
        Ok(())
    }

    // Queries

    /// Check whether any job exists for a task.
    pub async fn job_exists(&self, task: &str) -> Result<bool, QueueError> {
        Ok(self.repo.job_exists(task).await?)
    }

    /// Check whether a job for the task is being processed.
    pub async fn is_active(&self, task: &str) -> Result<bool, QueueError> {
        Ok(self.repo.is_active(task).await?)
    }

    /// Peek at the next job for a task without reserving it.
    pub async fn next_job_for_task(&self, task: &str) -> Result<Option<Job>, QueueError> {
        Ok(self.repo.fetch_job_for_task(task).await?)
    }

    /// List every stored job in dispatch order.
    pub async fn fetch_all_jobs(&self) -> Result<Vec<Job>, QueueError> {
        Ok(self.repo.fetch_all_jobs().await?)
    }

    /// Count stored jobs.
    pub async fn job_count(&self) -> Result<u64, QueueError> {
        Ok(self.repo.fetch_job_count().await?)
    }

    /// Count stored jobs in a group.
    pub async fn job_count_for_group(&self, group: &str) -> Result<u64, QueueError> {
        Ok(self.repo.fetch_job_count_for_group(group).await?)
    }

    /// The storage repository behind this queue.
    pub fn repository(&self) -> &JobRepository {
        &self.repo
    }

    /// Stop the scheduler and wait for it to exit.
    pub async fn shutdown(mut self) -> Result<(), QueueError> {
        self.scheduler.shutdown()?;
        if let Some(task) = self.actor_task.take()
            && let Err(e) = task.await
        {
            tracing::warn!("Queue actor exited abnormally: {}", e);
        }
        Ok(())
    }
}

impl Drop for JobQueue {
    fn drop(&mut self) {
        if self.actor_task.is_some() {
            let _ = self.scheduler.shutdown();
        }
    }
}
