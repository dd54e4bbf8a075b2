//! sharpsearch — per-project semantic code search for C#/Razor/C codebases.
//!
//! Source files are parsed into structural chunks, embedded through an
//! external endpoint, persisted per project in SQLite, and served from a
//! columnar in-memory cosine index. A debounced filesystem watcher keeps
//! each project's index in sync with its working tree.

pub mod chunker;
pub mod config;
pub mod constants;
pub mod embed;
pub mod error;
pub mod ignore;
pub mod index;
pub mod store;
pub mod tracker;
pub mod vector;
pub mod watch;

pub use config::{EngineConfig, Precision};
pub use error::EngineError;
pub use index::{EngineRegistry, IndexStats, IndexStatistics, Indexer, SearchFilter};
pub use tracker::{ChangeTracker, FileChanges};
pub use vector::{SearchResult, VectorEntry, VectorIndex};
