//! Job domain types for work items in the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Payload;

/// Unique identifier for a job.
///
/// Assigned by storage from a durable counter, so ids grow with insertion
/// order and are never handed out twice.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl JobId {
    /// The id as a storage record key. Storage integers are signed, so ids
    /// past `i64::MAX` cannot exist; the conversion saturates.
    pub fn as_key(self) -> i64 {
        i64::try_from(self.0).unwrap_or(i64::MAX)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Priority level for job execution order.
///
/// Every `High` job is selected before any `Default` job.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(into = "u8", try_from = "u8")]
pub enum Priority {
    #[default]
    Default = 0,
    High = 1,
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        priority as u8
    }
}

impl TryFrom<u8> for Priority {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Priority::Default),
            1 => Ok(Priority::High),
            other => Err(format!("unknown priority: {}", other)),
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Default => write!(f, "default"),
            Priority::High => write!(f, "high"),
        }
    }
}

/// Where a stored job sits in its lifecycle.
///
/// Success and terminal failure are not states: the row is removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting to be reserved.
    #[default]
    Pending,
    /// Claimed by exactly one in-flight dispatch.
    Reserved,
    /// Waiting for the next promotion sweep after a retry-eligible outcome.
    Deferred,
}

impl JobState {
    /// Get a simple state string for display and queries.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Reserved => "reserved",
            JobState::Deferred => "deferred",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a processor decided about a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Done; remove the job.
    Success,
    /// Try again later without counting an attempt.
    Defer,
    /// Recoverable failure; counts an attempt.
    Fail,
    /// Unrecoverable failure; remove the job regardless of attempts.
    Critical,
}

/// Result reported by a processor for one dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub outcome: Outcome,
    /// Optional human-readable response, forwarded to observers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

impl JobResult {
    pub fn new(outcome: Outcome) -> Self {
        Self {
            outcome,
            response: None,
        }
    }

    pub fn success() -> Self {
        Self::new(Outcome::Success)
    }

    pub fn defer() -> Self {
        Self::new(Outcome::Defer)
    }

    pub fn fail(response: impl Into<String>) -> Self {
        Self::new(Outcome::Fail).with_response(response)
    }

    pub fn critical(response: impl Into<String>) -> Self {
        Self::new(Outcome::Critical).with_response(response)
    }

    /// Attach a response string.
    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.response = Some(response.into());
        self
    }
}

/// A job represents a unit of work to be executed by the queue system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Storage-assigned identifier; doubles as the insertion sequence.
    pub id: JobId,
    /// Name of the processor that handles this job.
    pub task: String,
    /// Encoded caller data. Never inspected by the queue.
    pub payload: Payload,
    /// Execution priority.
    pub priority: Priority,
    /// Optional group tag used for completion tracking.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Number of failed attempts so far.
    #[serde(default)]
    pub attempts: u32,
    /// Current lifecycle state.
    pub state: JobState,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Check whether the job is eligible for reservation.
    pub fn is_pending(&self) -> bool {
        self.state == JobState::Pending
    }

    /// Decode the payload into a caller type.
    pub fn data<T: serde::de::DeserializeOwned>(&self) -> Result<T, crate::PayloadError> {
        self.payload.decode()
    }
}
