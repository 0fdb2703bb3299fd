//! Job repository: the storage engine of the queue.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use queue_core::{Job, JobId, JobState, Payload, Priority};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{Database, DbError};

/// Selection order for the next job: priority first, then insertion order.
const SELECTION_ORDER: &str = "ORDER BY priority DESC, job_id ASC";

/// Rounds `reserve_next` spends chasing a head row that other callers keep winning.
const RESERVE_ATTEMPTS: usize = 16;

/// Repository for job persistence operations.
///
/// Clones share the connection and the reservation lock.
#[derive(Clone)]
pub struct JobRepository {
    db: Database,
    /// Serializes reservations made through this process. The conditional
    /// update is what keeps other processes from claiming the same row.
    reserve_lock: Arc<Mutex<()>>,
}

/// Internal record type for SurrealDB reads.
#[derive(Debug, Deserialize)]
struct JobRecord {
    job_id: u64,
    task: String,
    payload: String,
    priority: Priority,
    job_group: Option<String>,
    attempts: u32,
    state: JobState,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl JobRecord {
    fn into_job(self) -> Job {
        Job {
            id: JobId(self.job_id),
            task: self.task,
            payload: Payload::from_encoded(self.payload),
            priority: self.priority,
            group: self.job_group,
            attempts: self.attempts,
            state: self.state,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Struct for creating jobs.
#[derive(Debug, Clone, Serialize)]
struct JobCreate {
    job_id: u64,
    task: String,
    payload: String,
    priority: Priority,
    job_group: Option<String>,
    attempts: u32,
    state: JobState,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// A job to be created by [`JobRepository::create_group`].
#[derive(Debug, Clone)]
pub struct NewJob {
    pub payload: Payload,
    pub priority: Priority,
    pub task: String,
}

#[derive(Debug, Deserialize)]
struct SequenceRecord {
    current: u64,
}

#[derive(Debug, Deserialize)]
struct CountResult {
    count: u64,
}

fn first_job(records: Vec<JobRecord>) -> Option<Job> {
    records.into_iter().next().map(JobRecord::into_job)
}

impl JobRepository {
    /// Create a repository over an initialized database.
    pub fn new(db: Database) -> Self {
        Self {
            db,
            reserve_lock: Arc::new(Mutex::new(())),
        }
    }

    /// The underlying connection.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Take the next id from the durable sequence.
    async fn next_id(&self) -> Result<JobId, DbError> {
        let last = self.advance_sequence(1).await?;
        Ok(JobId(last))
    }

    /// Take `count` consecutive ids from the durable sequence.
    async fn next_ids(&self, count: u64) -> Result<Vec<JobId>, DbError> {
        let last = self.advance_sequence(count).await?;
        Ok((last.saturating_sub(count) + 1..=last).map(JobId).collect())
    }

    /// Advance the sequence by `count` and return its new value.
    async fn advance_sequence(&self, count: u64) -> Result<u64, DbError> {
        let mut result = self
            .db
            .query("UPSERT job_sequence:job SET current += $count RETURN AFTER")
            .bind(("count", count))
            .await?;

        let records: Vec<SequenceRecord> = result.take(0)?;

        records
            .into_iter()
            .next()
            .map(|r| r.current)
            .ok_or_else(|| DbError::Query("Failed to advance job sequence".into()))
    }

    /// Create a new pending job.
    pub async fn create(
        &self,
        payload: Payload,
        priority: Priority,
        task: &str,
        group: Option<&str>,
    ) -> Result<Job, DbError> {
        let id = self.next_id().await?;
        let now = Utc::now();

        let content = JobCreate {
            job_id: id.0,
            task: task.to_string(),
            payload: payload.as_str().to_string(),
            priority,
            job_group: group.map(str::to_string),
            attempts: 0,
            state: JobState::Pending,
            created_at: now,
            updated_at: now,
        };

        let mut result = self
            .db
            .query("CREATE type::thing('job', $id) CONTENT $content RETURN AFTER")
            .bind(("id", id.as_key()))
            .bind(("content", content))
            .await?;

        let records: Vec<JobRecord> = result.take(0)?;

        let job = first_job(records).ok_or_else(|| DbError::Query("Failed to create job".into()))?;
        tracing::debug!("Created job {} for task {}", job.id, job.task);
        Ok(job)
    }

    /// Create every job of a group in one transaction. Either all rows are
    /// stored or none are.
    pub async fn create_group(&self, group: &str, jobs: Vec<NewJob>) -> Result<Vec<Job>, DbError> {
        if jobs.is_empty() {
            return Ok(Vec::new());
        }

        let count = u64::try_from(jobs.len())
            .map_err(|_| DbError::Query("Too many jobs in one group".into()))?;
        let ids = self.next_ids(count).await?;
        let now = Utc::now();

        let rows: Vec<JobCreate> = ids
            .iter()
            .zip(jobs)
            .map(|(id, job)| JobCreate {
                job_id: id.0,
                task: job.task,
                payload: job.payload.as_str().to_string(),
                priority: job.priority,
                job_group: Some(group.to_string()),
                attempts: 0,
                state: JobState::Pending,
                created_at: now,
                updated_at: now,
            })
            .collect();

        self.db
            .query(
                r#"
                BEGIN TRANSACTION;
                FOR $row IN $rows {
                    CREATE type::thing('job', $row.job_id) CONTENT $row;
                };
                COMMIT TRANSACTION;
                "#,
            )
            .bind(("rows", rows))
            .await?
            .check()?;

        let keys: Vec<i64> = ids.iter().map(|id| id.as_key()).collect();
        let mut result = self
            .db
            .query("SELECT * FROM job WHERE job_id IN $ids ORDER BY job_id ASC")
            .bind(("ids", keys))
            .await?;

        let records: Vec<JobRecord> = result.take(0)?;
        tracing::debug!("Created {} jobs in group '{}'", records.len(), group);
        Ok(records.into_iter().map(JobRecord::into_job).collect())
    }

    /// Get a job by ID.
    pub async fn get(&self, id: JobId) -> Result<Option<Job>, DbError> {
        let mut result = self
            .db
            .query("SELECT * FROM type::thing('job', $id)")
            .bind(("id", id.as_key()))
            .await?;

        let records: Vec<JobRecord> = result.take(0)?;
        Ok(first_job(records))
    }

    /// Check whether any job, in any state, exists for a task.
    pub async fn job_exists(&self, task: &str) -> Result<bool, DbError> {
        let count = self
            .count("SELECT count() FROM job WHERE task = $task GROUP ALL", ("task", task.to_string()))
            .await?;
        Ok(count > 0)
    }

    /// Check whether a job for the task is currently reserved.
    pub async fn is_active(&self, task: &str) -> Result<bool, DbError> {
        let count = self
            .count(
                r#"SELECT count() FROM job WHERE task = $task AND state = "reserved" GROUP ALL"#,
                ("task", task.to_string()),
            )
            .await?;
        Ok(count > 0)
    }

    /// Peek at the next eligible job without reserving it.
    pub async fn fetch_job(&self) -> Result<Option<Job>, DbError> {
        let query = format!(
            r#"SELECT * FROM job WHERE state = "pending" {} LIMIT 1"#,
            SELECTION_ORDER
        );
        let mut result = self.db.query(&query).await?;

        let records: Vec<JobRecord> = result.take(0)?;
        Ok(first_job(records))
    }

    /// Mark one pending row reserved. Returns the reserved row, or `None`
    /// if the row was not pending (already reserved, deferred or removed).
    ///
    /// A caller that loses a write conflict to a concurrent reservation
    /// also gets `None`; the error is kept only while the row is still pending.
    async fn mark_reserved(&self, id: JobId) -> Result<Option<Job>, DbError> {
        let updated = self
            .db
            .query(
                r#"
                UPDATE type::thing('job', $id)
                SET state = "reserved", updated_at = $now
                WHERE state = "pending"
                RETURN AFTER
                "#,
            )
            .bind(("id", id.as_key()))
            .bind(("now", Utc::now()))
            .await
            .and_then(|mut result| {
                let records: Vec<JobRecord> = result.take(0)?;
                Ok(records)
            });

        match updated {
            Ok(records) => Ok(first_job(records)),
            Err(e) => match self.get(id).await? {
                Some(job) if job.is_pending() => Err(e.into()),
                _ => {
                    tracing::debug!("Lost reservation of job {} to a concurrent caller", id);
                    Ok(None)
                }
            },
        }
    }

    /// Reserve the next eligible job.
    ///
    /// The highest-priority, oldest pending job is marked reserved and
    /// returned. Two callers never receive the same job.
    pub async fn reserve_next(&self) -> Result<Option<Job>, DbError> {
        let _guard = self.reserve_lock.lock().await;

        for _ in 0..RESERVE_ATTEMPTS {
            let Some(candidate) = self.fetch_job().await? else {
                return Ok(None);
            };

            if let Some(job) = self.mark_reserved(candidate.id).await? {
                tracing::debug!("Reserved job {} ({})", job.id, job.task);
                return Ok(Some(job));
            }

            tracing::debug!("Job {} was claimed elsewhere, selecting again", candidate.id);
        }

        Ok(None)
    }

    /// Peek-and-reserve in one step. Same contract as [`Self::reserve_next`].
    pub async fn fetch_and_reserve(&self) -> Result<Option<Job>, DbError> {
        self.reserve_next().await
    }

    /// Reserve a specific job. Returns false if it is not pending.
    pub async fn reserve(&self, id: JobId) -> Result<bool, DbError> {
        let _guard = self.reserve_lock.lock().await;
        Ok(self.mark_reserved(id).await?.is_some())
    }

    /// Count one more attempt. Returns the updated row, or `None` if it is gone.
    pub async fn increment_attempt(&self, id: JobId) -> Result<Option<Job>, DbError> {
        let mut result = self
            .db
            .query(
                r#"
                UPDATE type::thing('job', $id)
                SET attempts += 1, updated_at = $now
                RETURN AFTER
                "#,
            )
            .bind(("id", id.as_key()))
            .bind(("now", Utc::now()))
            .await?;

        let records: Vec<JobRecord> = result.take(0)?;
        Ok(first_job(records))
    }

    /// Put a reserved job back in the pending pool without counting an
    /// attempt. Returns the updated row, or `None` if it is gone or not reserved.
    pub async fn release(&self, id: JobId) -> Result<Option<Job>, DbError> {
        let mut result = self
            .db
            .query(
                r#"
                UPDATE type::thing('job', $id)
                SET state = "pending", updated_at = $now
                WHERE state = "reserved"
                RETURN AFTER
                "#,
            )
            .bind(("id", id.as_key()))
            .bind(("now", Utc::now()))
            .await?;

        let records: Vec<JobRecord> = result.take(0)?;
        Ok(first_job(records))
    }

    /// Move a reserved job to the deferred pool. Returns the updated row,
    /// or `None` if it is gone or not reserved.
    pub async fn defer(&self, id: JobId) -> Result<Option<Job>, DbError> {
        let mut result = self
            .db
            .query(
                r#"
                UPDATE type::thing('job', $id)
                SET state = "deferred", updated_at = $now
                WHERE state = "reserved"
                RETURN AFTER
                "#,
            )
            .bind(("id", id.as_key()))
            .bind(("now", Utc::now()))
            .await?;

        let records: Vec<JobRecord> = result.take(0)?;
        Ok(first_job(records))
    }

    /// Move every deferred job back to pending. Returns how many moved.
    pub async fn promote_deferred(&self) -> Result<usize, DbError> {
        self.move_all(JobState::Deferred, JobState::Pending).await
    }

    /// Move every reserved job back to pending. Returns how many moved.
    ///
    /// Run once at startup: a reservation does not outlive the process that made it.
    pub async fn release_all_locks(&self) -> Result<usize, DbError> {
        let _guard = self.reserve_lock.lock().await;
        self.move_all(JobState::Reserved, JobState::Pending).await
    }

    async fn move_all(&self, from: JobState, to: JobState) -> Result<usize, DbError> {
        let mut result = self
            .db
            .query("UPDATE job SET state = $to_state, updated_at = $now WHERE state = $from_state RETURN AFTER")
            .bind(("from_state", from))
            .bind(("to_state", to))
            .bind(("now", Utc::now()))
            .await?;

        let records: Vec<JobRecord> = result.take(0)?;
        if !records.is_empty() {
            tracing::debug!("Moved {} jobs from {} to {}", records.len(), from, to);
        }
        Ok(records.len())
    }

    /// Delete a job. Returns the row as it was before removal, or `None`
    /// if there was nothing to delete.
    pub async fn remove(&self, id: JobId) -> Result<Option<Job>, DbError> {
        let mut result = self
            .db
            .query("DELETE type::thing('job', $id) RETURN BEFORE")
            .bind(("id", id.as_key()))
            .await?;

        let records: Vec<JobRecord> = result.take(0)?;
        Ok(first_job(records))
    }

    /// Delete every job regardless of state. Returns how many were removed.
    pub async fn remove_all(&self) -> Result<usize, DbError> {
        let mut result = self.db.query("DELETE job RETURN BEFORE").await?;

        let records: Vec<JobRecord> = result.take(0)?;
        tracing::debug!("Removed {} jobs", records.len());
        Ok(records.len())
    }

    /// Get the first job for a task in selection order, whatever its state.
    pub async fn fetch_job_for_task(&self, task: &str) -> Result<Option<Job>, DbError> {
        let query = format!(
            "SELECT * FROM job WHERE task = $task {} LIMIT 1",
            SELECTION_ORDER
        );
        let mut result = self
            .db
            .query(&query)
            .bind(("task", task.to_string()))
            .await?;

        let records: Vec<JobRecord> = result.take(0)?;
        Ok(first_job(records))
    }

    /// List every job in selection order.
    pub async fn fetch_all_jobs(&self) -> Result<Vec<Job>, DbError> {
        let query = format!("SELECT * FROM job {}", SELECTION_ORDER);
        let mut result = self.db.query(&query).await?;

        let records: Vec<JobRecord> = result.take(0)?;
        Ok(records.into_iter().map(JobRecord::into_job).collect())
    }

    /// Count all jobs, including reserved and deferred ones.
    pub async fn fetch_job_count(&self) -> Result<u64, DbError> {
        let mut result = self
            .db
            .query("SELECT count() FROM job GROUP ALL")
            .await?;

        let counts: Vec<CountResult> = result.take(0)?;
        Ok(counts.first().map_or(0, |c| c.count))
    }

    /// Count the jobs still stored for a group.
    pub async fn fetch_job_count_for_group(&self, group: &str) -> Result<u64, DbError> {
        self.count(
            "SELECT count() FROM job WHERE job_group = $job_group GROUP ALL",
            ("job_group", group.to_string()),
        )
        .await
    }

    async fn count(&self, query: &'static str, binding: (&'static str, String)) -> Result<u64, DbError> {
        let mut result = self.db.query(query).bind(binding).await?;

        let counts: Vec<CountResult> = result.take(0)?;
        Ok(counts.first().map_or(0, |c| c.count))
    }
}
