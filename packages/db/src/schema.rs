//! Database schema definitions using SurrealQL.

use crate::{Database, DbError};

/// Initialize the database schema.
///
/// This creates all necessary tables, fields, and indexes. Safe to run
/// against a database that already has them.
pub async fn init_schema(db: &Database) -> Result<(), DbError> {
    tracing::info!("Initializing database schema...");

    // Job table
    db.query(JOB_SCHEMA).await?.check()?;

    // Id sequence
    db.query(SEQUENCE_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Job table schema.
const JOB_SCHEMA: &str = r#"
-- Job table for storing queued jobs
DEFINE TABLE IF NOT EXISTS job SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS job_id ON job TYPE int;
DEFINE FIELD IF NOT EXISTS task ON job TYPE string;
DEFINE FIELD IF NOT EXISTS payload ON job TYPE string;
DEFINE FIELD IF NOT EXISTS priority ON job TYPE int DEFAULT 0;
DEFINE FIELD IF NOT EXISTS job_group ON job TYPE option<string>;
DEFINE FIELD IF NOT EXISTS attempts ON job TYPE int DEFAULT 0;
DEFINE FIELD IF NOT EXISTS state ON job TYPE string DEFAULT "pending"
    ASSERT $value IN ["pending", "reserved", "deferred"];
DEFINE FIELD IF NOT EXISTS created_at ON job TYPE string;
DEFINE FIELD IF NOT EXISTS updated_at ON job TYPE string;

-- Indexes for efficient job queries
DEFINE INDEX IF NOT EXISTS job_task ON job FIELDS task;
DEFINE INDEX IF NOT EXISTS job_state ON job FIELDS state;
DEFINE INDEX IF NOT EXISTS job_group ON job FIELDS job_group;

-- Compound index for selecting the next job (pending jobs by priority)
DEFINE INDEX IF NOT EXISTS job_selection ON job FIELDS state, priority, job_id;
"#;

/// Durable id counter. Never reset, so ids are never reused.
const SEQUENCE_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS job_sequence SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS current ON job_sequence TYPE int DEFAULT 0;
"#;
