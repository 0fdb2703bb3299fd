//! Processor trait and registry.
//!
//! A processor turns one reserved job into one [`JobResult`]. It may answer
//! right away or hand back something that resolves later; the dispatcher
//! awaits both the same way.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use queue_core::{Job, JobResult};
use tokio::sync::oneshot;

/// What a processor hands back for a job.
pub enum Processing {
    /// The result is already known.
    Immediate(JobResult),
    /// The result arrives later.
    Later(BoxFuture<'static, JobResult>),
}

impl Processing {
    /// Wrap a future that produces the result.
    pub fn later<F>(future: F) -> Self
    where
        F: Future<Output = JobResult> + Send + 'static,
    {
        Processing::Later(future.boxed())
    }

    /// Callback style: the returned [`Completion`] delivers the result from
    /// wherever the work finishes.
    pub fn callback() -> (Completion, Self) {
        let (tx, rx) = oneshot::channel();
        let processing = Processing::later(async move {
            rx.await.unwrap_or_else(|_| {
                JobResult::fail("Completion dropped without reporting a result")
            })
        });
        (Completion(tx), processing)
    }

    /// Wait for the result.
    pub async fn resolve(self) -> JobResult {
        match self {
            Processing::Immediate(result) => result,
            Processing::Later(future) => future.await,
        }
    }
}

impl From<JobResult> for Processing {
    fn from(result: JobResult) -> Self {
        Processing::Immediate(result)
    }
}

impl std::fmt::Debug for Processing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Processing::Immediate(result) => f.debug_tuple("Immediate").field(result).finish(),
            Processing::Later(_) => f.write_str("Later(..)"),
        }
    }
}

/// One-shot completion handle for callback-style processors.
///
/// `complete` consumes the handle, so a result is reported at most once.
#[derive(Debug)]
pub struct Completion(oneshot::Sender<JobResult>);

impl Completion {
    /// Report the result of the job.
    pub fn complete(self, result: JobResult) {
        if self.0.send(result).is_err() {
            tracing::debug!("Completion reported after the dispatcher went away");
        }
    }
}

/// Trait for job processors.
///
/// Implement this trait to define how jobs of a task are processed.
pub trait Processor: Send + Sync + 'static {
    /// Process a job.
    fn process(&self, job: &Job) -> Processing;
}

/// Registry of processors by task name.
///
/// Tasks without a dedicated processor fall back to the optional default.
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: RwLock<HashMap<String, Arc<dyn Processor>>>,
    fallback: RwLock<Option<Arc<dyn Processor>>>,
}

impl ProcessorRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the processor for a task, replacing any previous one.
    pub fn register<P: Processor>(&self, task: impl Into<String>, processor: P) {
        self.processors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task.into(), Arc::new(processor));
    }

    /// Remove the processor for a task.
    pub fn unregister(&self, task: &str) -> bool {
        self.processors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(task)
            .is_some()
    }

    /// Set the processor used for tasks nobody registered for.
    pub fn set_fallback<P: Processor>(&self, processor: P) {
        *self.fallback.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(processor));
    }

    /// Get the processor responsible for a task.
    pub fn get(&self, task: &str) -> Option<Arc<dyn Processor>> {
        let dedicated = self
            .processors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(task)
            .cloned();

        dedicated.or_else(|| {
            self.fallback
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        })
    }

    /// Check if a processor would handle a task.
    pub fn has_processor(&self, task: &str) -> bool {
        self.get(task).is_some()
    }

    /// List the tasks with a dedicated processor.
    pub fn tasks(&self) -> Vec<String> {
        self.processors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

/// A simple function-based processor.
pub struct FnProcessor<F>
where
    F: Fn(&Job) -> Processing + Send + Sync + 'static,
{
    processor: F,
}

impl<F> FnProcessor<F>
where
    F: Fn(&Job) -> Processing + Send + Sync + 'static,
{
    /// Create a processor from a closure returning [`Processing`].
    pub fn new(processor: F) -> Self {
        Self { processor }
    }
}

impl FnProcessor<fn(&Job) -> Processing> {
    /// Create a processor from a closure that answers synchronously.
    pub fn sync<S>(processor: S) -> FnProcessor<impl Fn(&Job) -> Processing + Send + Sync + 'static>
    where
        S: Fn(&Job) -> JobResult + Send + Sync + 'static,
    {
        FnProcessor::new(move |job: &Job| Processing::Immediate(processor(job)))
    }

    /// Create a processor from an async closure. The closure receives an
    /// owned copy of the job.
    pub fn future<A, Fut>(processor: A) -> FnProcessor<impl Fn(&Job) -> Processing + Send + Sync + 'static>
    where
        A: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobResult> + Send + 'static,
    {
        FnProcessor::new(move |job: &Job| Processing::later(processor(job.clone())))
    }
}

impl<F> Processor for FnProcessor<F>
where
    F: Fn(&Job) -> Processing + Send + Sync + 'static,
{
    fn process(&self, job: &Job) -> Processing {
        (self.processor)(job)
    }
}
