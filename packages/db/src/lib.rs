//! SurrealDB-backed storage engine for the job queue.
//!
//! This crate owns every read and write of job rows. It applies no
//! queue policy; the scheduler decides what to do and calls into
//! [`JobRepository`].
//!
//! # Features
//!
//! - `memory` (default): Use in-memory storage for testing
//! - `rocksdb`: Use RocksDB for persistent file-based storage

mod connection;
mod schema;
pub mod repositories;

pub use connection::{Database, DbConfig, DbError, init_db};
pub use repositories::{JobRepository, NewJob};
pub use schema::init_schema;

/// Connect to the database and make sure the schema exists.
///
/// Returns a handle that can be cloned into as many repositories as needed.
pub async fn init(config: DbConfig) -> Result<Database, DbError> {
    let db = init_db(config).await?;
    init_schema(&db).await?;
    Ok(db)
}
