//! gitcollector core library.
//!
//! Keeps local mirrors of a changing set of git repositories, walks each
//! mirror's history incrementally and publishes the commits it has not seen
//! before: configuration, repository definitions, mirroring, commit
//! extraction, publishing and the round-robin scheduler.

pub mod collector;
pub mod config;
pub mod errors;
pub mod events;
pub mod git;
pub mod models;
pub mod publisher;
pub mod scheduler;

// Re-exports for convenience.
pub use collector::CollectorSet;
pub use config::AppConfig;
pub use events::{ConfigEvent, DefinitionSource};
pub use publisher::Publisher;
pub use scheduler::{Scheduler, ShutdownFlag};
