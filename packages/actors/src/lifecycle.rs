//! Turning processor outcomes into storage transitions and events.

use db::{DbError, JobRepository};
use queue_core::{Job, JobResult, Outcome, QueueEvent};

/// Apply the outcome of one dispatch.
///
/// | Outcome                    | Transition                        | Event                  |
/// |----------------------------|-----------------------------------|------------------------|
/// | Success                    | remove                            | JobDidSucceed          |
/// | Defer                      | defer                             | none                   |
/// | Fail, attempts < limit     | increment attempt, defer          | JobDidFail             |
/// | Fail, attempts reach limit | increment attempt, remove         | JobDidFail (terminal)  |
/// | Critical                   | remove                            | JobDidFail (terminal)  |
///
/// A job that is no longer stored (emptied while in flight) is left alone
/// and produces no events. After a removal, the job's group and the whole
/// queue are checked for completion.
pub async fn apply_outcome(
    repo: &JobRepository,
    job: &Job,
    result: JobResult,
    retry_limit: u32,
) -> Result<Vec<QueueEvent>, DbError> {
    let JobResult { outcome, response } = result;
    let mut events = Vec::new();

    let removed = match outcome {
        Outcome::Success => {
            let Some(removed) = repo.remove(job.id).await? else {
                return Ok(vanished(job));
            };
            tracing::debug!("Job {} succeeded", job.id);
            events.push(QueueEvent::job_did_succeed(removed.clone(), response));
            removed
        }

        Outcome::Defer => {
            if repo.defer(job.id).await?.is_none() {
                return Ok(vanished(job));
            }
            tracing::debug!("Job {} deferred", job.id);
            return Ok(events);
        }

        Outcome::Fail => {
            let Some(counted) = repo.increment_attempt(job.id).await? else {
                return Ok(vanished(job));
            };

            if counted.attempts < retry_limit {
                let Some(deferred) = repo.defer(job.id).await? else {
                    return Ok(vanished(job));
                };
                tracing::debug!(
                    "Job {} failed (attempt {} of {}), deferring",
                    job.id,
                    deferred.attempts,
                    retry_limit
                );
                events.push(QueueEvent::job_did_fail(deferred, response, false));
                return Ok(events);
            }

            let Some(removed) = repo.remove(job.id).await? else {
                return Ok(vanished(job));
            };
            tracing::debug!(
                "Job {} failed {} times, giving up",
                job.id,
                removed.attempts
            );
            events.push(QueueEvent::job_did_fail(removed.clone(), response, true));
            removed
        }

        Outcome::Critical => {
            let Some(removed) = repo.remove(job.id).await? else {
                return Ok(vanished(job));
            };
            tracing::debug!("Job {} failed critically", job.id);
            events.push(QueueEvent::job_did_fail(removed.clone(), response, true));
            removed
        }
    };

    if let Some(group) = &removed.group
        && repo.fetch_job_count_for_group(group).await? == 0
    {
        events.push(QueueEvent::group_did_complete(group.clone()));
    }

    if repo.fetch_job_count().await? == 0 {
        events.push(QueueEvent::did_drain());
    }

    Ok(events)
}

fn vanished(job: &Job) -> Vec<QueueEvent> {
    tracing::debug!("Job {} is no longer stored, ignoring its outcome", job.id);
    Vec::new()
}
