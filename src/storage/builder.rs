//! Storage builder and handles.
//!
//! Builder pattern for constructing the storage layer and a handles struct
//! giving access to the writer and both read facades.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::query::QueryReader;
use crate::storage::StorageError;
use crate::storage::actor::DbActor;
use crate::storage::facades::{StorageWriter, SyncReader};
use crate::storage::pool::ReadPool;

/// Default capacity of the writer command channel.
const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Minimum connection pool size.
const MIN_POOL_SIZE: u32 = 2;

/// Maximum connection pool size.
const MAX_POOL_SIZE: u32 = 32;

/// Default pool size from available CPU parallelism, clamped.
fn default_pool_size() -> u32 {
    std::thread::available_parallelism()
        .map(|p| (p.get() as u32).clamp(MIN_POOL_SIZE, MAX_POOL_SIZE))
        .unwrap_or(4)
}

/// Builder for constructing the storage layer.
pub struct StorageBuilder {
    db_path: PathBuf,
    pool_size: u32,
    channel_capacity: usize,
}

impl StorageBuilder {
    /// Create a new storage builder.
    ///
    /// Pool size defaults to the number of available CPUs (clamped to 2-32).
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
            pool_size: default_pool_size(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Set the connection pool size for readers.
    pub fn pool_size(mut self, size: u32) -> Self {
        self.pool_size = size;
        self
    }

    /// Set the writer command channel capacity.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Build the storage layer and return handles.
    pub fn build(self) -> Result<StorageHandles, StorageError> {
        if let Some(parent) = self.db_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Internal(format!(
                    "Failed to create database directory '{}': {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        // The writer actor opens the database and initializes the schema
        // before readers connect.
        let (actor_handle, tx) = DbActor::spawn(&self.db_path, self.channel_capacity)?;
        let pool = ReadPool::new(&self.db_path, self.pool_size)?;

        Ok(StorageHandles {
            writer: StorageWriter::new(tx),
            sync_reader: SyncReader::new(Arc::clone(&pool)),
            query_reader: QueryReader::new(pool),
            actor_handle: Some(actor_handle),
        })
    }
}

/// Handles to all storage layer facades.
pub struct StorageHandles {
    /// Transactional write facade (single writer thread).
    pub writer: StorageWriter,
    /// Read facade for the sync pipeline.
    pub sync_reader: SyncReader,
    /// Read facade for criteria queries.
    pub query_reader: QueryReader,
    /// Internal actor handle for graceful shutdown.
    actor_handle: Option<JoinHandle<()>>,
}

impl StorageHandles {
    /// Gracefully shutdown the storage layer.
    ///
    /// Sends the shutdown command to the writer and waits for it to finish.
    pub fn shutdown(mut self) -> Result<(), StorageError> {
        self.writer.shutdown()?;

        if let Some(handle) = self.actor_handle.take() {
            handle
                .join()
                .map_err(|_| StorageError::Internal("Failed to join writer thread".to_string()))?;
        }

        Ok(())
    }
}

impl Drop for StorageHandles {
    fn drop(&mut self) {
        if self.actor_handle.is_some() {
            let _ = self.writer.shutdown();
            if let Some(handle) = self.actor_handle.take() {
                let _ = handle.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_storage_builder_lifecycle() {
        let dir = tempdir().unwrap();
        let handles = StorageBuilder::new(dir.path().join("t.db")).pool_size(2).build().unwrap();

        assert!(handles.sync_reader.unfinished_games().unwrap().is_empty());
        handles.shutdown().unwrap();
    }

    #[test]
    fn test_default_pool_size_within_bounds() {
        let size = super::default_pool_size();
        assert!(size >= super::MIN_POOL_SIZE);
        assert!(size <= super::MAX_POOL_SIZE);
    }
}
