//! Gridstore - relational store and query engine for live gridiron
//! play-by-play data.
//!
//! The crate keeps a normalized store of games, drives, plays and
//! per-player statistics in sync with an external feed, and exposes a
//! composable criteria interface for querying and aggregating it.
//!
//! # Architecture
//!
//! - **Types**: the fixed domain model and its closed enumerations
//! - **Storage**: DuckDB persistence; one writer thread with per-batch
//!   transactions, pooled readers for committed data
//! - **Query**: chainable [`query::Criteria`] compiled into a single SQL
//!   statement (row mode or per-player aggregate mode)
//! - **Sync**: per-game polling state machine with watermark diffing,
//!   plus roster and schedule passes on their own cadences
//!
//! # Example
//!
//! ```rust,ignore
//! use gridstore::query::{Criteria, SortKey, SortOrder};
//! use gridstore::storage::StorageBuilder;
//! use gridstore::types::{SeasonPhase, StatCategory};
//!
//! let handles = StorageBuilder::new("gridstore.db").build()?;
//! let top5 = Criteria::new()
//!     .season(2012)
//!     .phase(SeasonPhase::Regular)
//!     .sort(SortKey::Total(StatCategory::PassingYds), SortOrder::Desc)
//!     .limit(5);
//! for totals in handles.query_reader.aggregate(&top5)? {
//!     println!("{}: {}", totals.player_id, totals.total(StatCategory::PassingYds));
//! }
//! ```

pub mod config;
pub mod query;
pub mod storage;
pub mod sync;
pub mod types;

pub use config::AppConfig;
pub use query::{Criteria, QueryError, QueryReader};
pub use storage::{StorageBuilder, StorageError, StorageHandles};
pub use sync::{FeedSource, PollRegistry, SyncError, SyncPipeline};
