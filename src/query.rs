//! Criteria-based query engine.
//!
//! A [`Criteria`] value accumulates filters, a sort key, a limit and a mode
//! switch; [`QueryReader`] compiles it into one SQL statement over the
//! game -> play -> play_stat chain and executes it against committed data.
//!
//! Construction is cheap and infallible; validation happens when a query is
//! executed, and always before storage is touched.
//!
//! ```rust,ignore
//! use gridstore::query::{Criteria, SortKey, SortOrder};
//! use gridstore::types::{SeasonPhase, StatCategory};
//!
//! let top_passers = Criteria::new()
//!     .season(2012)
//!     .phase(SeasonPhase::Regular)
//!     .sort(SortKey::Total(StatCategory::PassingYds), SortOrder::Desc)
//!     .limit(5);
//! let totals = reader.aggregate(&top_passers)?;
//! ```

mod criteria;
mod fields;
mod plan;
mod reader;

use thiserror::Error;

use crate::storage::StorageError;

pub use criteria::{Criteria, FilterValue, Mode};
pub use fields::{Cmp, Field, GameField, PlayField, SortKey, SortOrder, StatField};
pub use reader::{PlayerTotals, QueryOutput, QueryReader, StatRow};

/// Errors from query construction or execution.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Malformed or inconsistent criteria. Raised before any storage
    /// access; recoverable by correcting the query.
    #[error("invalid criteria: {0}")]
    InvalidCriteria(String),

    /// Storage-level failure while executing a well-formed query.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<duckdb::Error> for QueryError {
    fn from(err: duckdb::Error) -> Self {
        Self::Storage(StorageError::Database(err))
    }
}
