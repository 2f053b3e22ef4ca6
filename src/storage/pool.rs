//! Reader connection pool using r2d2.

use std::path::Path;
use std::sync::Arc;

use duckdb::DuckdbConnectionManager;
use r2d2::{Pool, PooledConnection};

use crate::storage::StorageError;

/// Connection pool for concurrent read operations.
///
/// Readers only ever observe committed state: all writes go through the
/// single writer thread and commit atomically per batch.
pub struct ReadPool {
    pool: Pool<DuckdbConnectionManager>,
}

impl ReadPool {
    /// Create a new read pool.
    ///
    /// Note: schema is expected to be initialized by the writer before this
    /// is called.
    pub fn new(db_path: &Path, size: u32) -> Result<Arc<Self>, StorageError> {
        let manager = DuckdbConnectionManager::file(db_path)?;
        let pool = Pool::builder().max_size(size).build(manager)?;

        Ok(Arc::new(Self { pool }))
    }

    /// Get a connection from the pool.
    pub fn get(&self) -> Result<PooledConnection<DuckdbConnectionManager>, StorageError> {
        Ok(self.pool.get()?)
    }
}
