//! Git operations for gitcollector.

pub mod cursor;
pub mod mirror;

pub use cursor::{CommitCursor, CursorMarkers};
pub use mirror::{RepositoryMirror, SyncOutcome};
