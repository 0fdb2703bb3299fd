use db::{Database, DbConfig, DbError, JobRepository};
use queue_core::{Job, Payload, Priority};

/// Open a fresh in-memory database.
#[allow(dead_code)]
pub async fn setup_db() -> Result<Database, DbError> {
    db::init(DbConfig::memory()).await
}

/// Open a repository over a fresh in-memory database.
pub async fn setup_repo() -> Result<JobRepository, DbError> {
    let db = db::init(DbConfig::memory()).await?;
    Ok(JobRepository::new(db))
}

pub fn payload(message: &str) -> Payload {
    Payload::from_encoded(format!("{{\"msg\":\"{}\"}}", message))
}

#[allow(dead_code)]
pub async fn create(
    repo: &JobRepository,
    task: &str,
    priority: Priority,
    group: Option<&str>,
) -> Result<Job, DbError> {
    repo.create(payload(task), priority, task, group).await
}
