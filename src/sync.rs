//! Synchronization pipeline.
//!
//! Keeps stored game/drive/play/statistic rows consistent with the external
//! feed while games are in progress, and refreshes roster data on a slower,
//! per-team cycle.
//!
//! # Components
//!
//! - [`FeedSource`]: async trait the feed collaborator implements
//! - [`HttpFeed`]: thin HTTP JSON implementation of the trait
//! - [`SyncPipeline`]: watermark diffing, the per-game state machine, and
//!   roster/schedule passes
//! - [`PollRegistry`]: one recurring job per tracked game, never two
//!   concurrent polls for the same game

mod feed;
mod http;
mod pipeline;
mod registry;

pub use feed::{
    DriveSnapshot, FeedError, FeedSource, GameSnapshot, PlaySnapshot, RosterSnapshot, StatEvent,
};
pub use http::HttpFeed;
pub use pipeline::{
    PollOutcome, PollStatus, RosterOutcome, SyncError, SyncOptions, SyncPipeline,
};
pub use registry::PollRegistry;
