//! Storage Layer
//!
//! Embedded DuckDB storage with a strict read/write split:
//! - **Writer**: one thread owns the write connection; every command runs in
//!   its own transaction and answers the caller after commit
//! - **Readers**: r2d2 connection pool for concurrent reads of committed
//!   state only
//!
//! # Components
//!
//! - [`StorageWriter`]: transactional write facade (sync batches, schedule,
//!   rosters)
//! - [`SyncReader`]: read facade for the sync pipeline (watermarks, hashes)
//! - [`StorageBuilder`] / [`StorageHandles`]: initialization and lifecycle

mod actor;
mod builder;
mod error;
mod facades;
pub(crate) mod pool;
pub mod schema;

pub use actor::{RosterApplied, SyncApplied, SyncBatch};
pub use builder::{StorageBuilder, StorageHandles};
pub use error::StorageError;
pub use facades::{StorageWriter, SyncReader};
