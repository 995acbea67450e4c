//! # helpdb-core
//!
//! Engine for a hypertext help system backed by a plain-text help database.
//!
//! A help database is a set of directories holding text files marked up with
//! `!!`-prefixed directives. This crate indexes those files by keyword, reads
//! topics on demand with conditional processing applied, keeps per-window
//! navigation history, and downloads images through a persistent object
//! cache.
//!
//! ## Architecture
//!
//! - **Directives**: Line classification and `IFDEF`/`IFNDEF` evaluation
//! - **Index**: Per-directory keyword, alias and LaTeX tables
//! - **Database**: Search path, topic reading, search and scan
//! - **Topic Tree**: Arena-backed forest of windows and their history
//! - **Object Cache**: Fixed-capacity ring of downloaded files with a
//!   persisted directory
//! - **Images**: Download queue with sync, delayed and progressive policies
//! - **Context**: The engine instance tying the pieces together
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use helpdb_core::{Config, Database, Result};
//!
//! let config = Config::load()?;
//! let db = Database::open(&config.database)?;
//! if let Some(topic) = db.read("install")? {
//!     println!("{}", topic.rendered(db.globals()));
//! }
//! # Ok::<(), helpdb_core::Error>(())
//! ```
//!
//! ## Cross-reference Ordering
//!
//! Subtopic and see-also lists sort by description, ignoring leading markup
//! and comparing digit runs numerically:
//!
//! ```rust
//! use helpdb_core::xref::natural_cmp;
//! use std::cmp::Ordering;
//!
//! assert_eq!(natural_cmp("Chapter 2", "Chapter 10"), Ordering::Less);
//! ```

/// Persistent object cache for downloaded files
pub mod cache;
/// Configuration loading, environment overrides and validation
pub mod config;
/// Engine context composing database, tree, cache and images
pub mod context;
/// Process-wide database state: keyword index over the search path
pub mod database;
/// Conditional-processing token set
pub mod defines;
/// Directive line parsing and condition evaluation
pub mod directive;
/// Error types and result aliases
pub mod error;
/// Image download queue
pub mod images;
/// Per-directory keyword index
pub mod index;
/// Topics and their rendering
pub mod topic;
/// Window and history forest
pub mod tree;
/// Cross-references and their ordering
pub mod xref;

pub use cache::{CacheLookup, CacheStatus, ObjectCache};
pub use config::{CacheConfig, CacheMode, Config, DatabaseConfig, ImageConfig, LoadPolicy, PathMode};
pub use context::{Bookmark, Context};
pub use database::{Database, LatexBlock};
pub use defines::Defines;
pub use error::{Error, Result};
pub use images::{
    DrainStatus, Fetcher, ImageQueue, ImageSink, ImageType, JobId, JobStatus, Scheduler, ViewerId,
};
pub use index::{DirectoryIndex, Globals, KeywordRecord};
pub use topic::Topic;
pub use tree::{Linked, TopicId, TopicTree};
pub use xref::CrossRef;
