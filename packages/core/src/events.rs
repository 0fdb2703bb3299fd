//! Lifecycle events broadcast to observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Job, JobId};

/// Events emitted by the job queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    // Queue events
    /// The scheduler started reserving jobs.
    DidStart { timestamp: DateTime<Utc> },
    /// The scheduler stopped reserving jobs.
    DidStop { timestamp: DateTime<Utc> },
    /// The last stored job was removed.
    DidDrain { timestamp: DateTime<Utc> },

    // Job events
    /// A job succeeded and was removed.
    JobDidSucceed {
        job: Job,
        response: Option<String>,
        timestamp: DateTime<Utc>,
    },
    /// A job failed. `terminal` jobs were removed; the others were deferred.
    JobDidFail {
        job: Job,
        response: Option<String>,
        terminal: bool,
        timestamp: DateTime<Utc>,
    },

    // Group events
    /// The last job of a group was removed.
    GroupDidComplete {
        group: String,
        timestamp: DateTime<Utc>,
    },
}

impl QueueEvent {
    pub fn did_start() -> Self {
        QueueEvent::DidStart {
            timestamp: Utc::now(),
        }
    }

    pub fn did_stop() -> Self {
        QueueEvent::DidStop {
            timestamp: Utc::now(),
        }
    }

    pub fn did_drain() -> Self {
        QueueEvent::DidDrain {
            timestamp: Utc::now(),
        }
    }

    pub fn job_did_succeed(job: Job, response: Option<String>) -> Self {
        QueueEvent::JobDidSucceed {
            job,
            response,
            timestamp: Utc::now(),
        }
    }

    pub fn job_did_fail(job: Job, response: Option<String>, terminal: bool) -> Self {
        QueueEvent::JobDidFail {
            job,
            response,
            terminal,
            timestamp: Utc::now(),
        }
    }

    pub fn group_did_complete(group: impl Into<String>) -> Self {
        QueueEvent::GroupDidComplete {
            group: group.into(),
            timestamp: Utc::now(),
        }
    }

    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            QueueEvent::DidStart { timestamp } => *timestamp,
            QueueEvent::DidStop { timestamp } => *timestamp,
            QueueEvent::DidDrain { timestamp } => *timestamp,
            QueueEvent::JobDidSucceed { timestamp, .. } => *timestamp,
            QueueEvent::JobDidFail { timestamp, .. } => *timestamp,
            QueueEvent::GroupDidComplete { timestamp, .. } => *timestamp,
        }
    }

    /// Get the job associated with this event, if any.
    pub fn job(&self) -> Option<&Job> {
        match self {
            QueueEvent::JobDidSucceed { job, .. } => Some(job),
            QueueEvent::JobDidFail { job, .. } => Some(job),
            _ => None,
        }
    }

    /// Get the job ID associated with this event, if any.
    pub fn job_id(&self) -> Option<JobId> {
        self.job().map(|job| job.id)
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            QueueEvent::DidStart { .. } => "Queue started".to_string(),
            QueueEvent::DidStop { .. } => "Queue stopped".to_string(),
            QueueEvent::DidDrain { .. } => "Queue drained".to_string(),
            QueueEvent::JobDidSucceed { job, .. } => {
                format!("Job {} ({}) succeeded", job.id, job.task)
            }
            QueueEvent::JobDidFail {
                job,
                response,
                terminal,
                ..
            } => {
                let response = response.as_deref().unwrap_or("no response");
                let retry = if *terminal { "" } else { " (will retry)" };
                format!(
                    "Job {} ({}) failed after {} attempts: {}{}",
                    job.id, job.task, job.attempts, response, retry
                )
            }
            QueueEvent::GroupDidComplete { group, .. } => {
                format!("Group '{}' completed", group)
            }
        }
    }
}
