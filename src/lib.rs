//! Keeps a local feed tree in sync with a Google-Reader-style aggregation
//! service.
//!
//! - [`api`] talks to the service
//! - [`source`] owns one account: login, queued edits, list and counter sync
//! - [`tree`] is the seam to the local feed tree
//! - [`config`] loads `~/.config/readersync/config.toml`

pub mod api;
pub mod config;
pub mod source;
pub mod tree;
pub mod util;

pub use source::{Account, Source, SourceEvent, SourceStatus, SyncError, UpdateFlags};
