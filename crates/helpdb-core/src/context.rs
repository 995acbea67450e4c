//! Engine context handed to viewers.
//!
//! A [`Context`] composes the database, the topic forest, the object cache
//! and the image queue, together with the visited-URL set and bookmarks. It
//! is constructed explicitly by the host; at most one context may own a
//! given cache directory per process.

use crate::cache::ObjectCache;
use crate::config::{Config, LoadPolicy};
use crate::database::Database;
use crate::images::{DrainStatus, Fetcher, ImageQueue, ImageSink, JobId, Scheduler, ViewerId};
use crate::topic::Topic;
use crate::tree::{Linked, TopicId, TopicTree};
use crate::{Error, Result};
use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info};

static CLAIMED: Lazy<Mutex<HashSet<PathBuf>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// A saved location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bookmark {
    /// Display title.
    pub title: String,
    /// Keyword or URL.
    pub target: String,
}

/// The engine instance.
#[derive(Debug)]
pub struct Context {
    config: Config,
    database: Option<Database>,
    tree: TopicTree,
    cache: ObjectCache,
    images: ImageQueue,
    visited: HashSet<String>,
    bookmarks: Vec<Bookmark>,
    last_error: Option<String>,
    claim: PathBuf,
}

impl Context {
    /// Builds the engine.
    ///
    /// Configuration problems (no search path, missing top-level topic) do
    /// not fail construction; they are reported through
    /// [`last_error`](Self::last_error).
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyInitialized`] if another context in this
    /// process owns the same cache directory, or a storage error if the
    /// cache cannot be opened.
    pub fn new(config: Config, fetcher: Box<dyn Fetcher>, scheduler: Box<dyn Scheduler>) -> Result<Self> {
        let cache = ObjectCache::open(&config.cache)?;
        let claim = fs::canonicalize(cache.dir()).unwrap_or_else(|_| cache.dir().to_path_buf());
        {
            let mut claimed = CLAIMED
                .lock()
                .map_err(|_| Error::Other("engine registry poisoned".into()))?;
            if !claimed.insert(claim.clone()) {
                return Err(Error::AlreadyInitialized(claim.display().to_string()));
            }
        }

        let mut images = ImageQueue::new(&config.images, fetcher, scheduler);
        images.set_cache_enabled(config.cache.enabled);

        let mut context = Self {
            database: None,
            tree: TopicTree::new(),
            cache,
            images,
            visited: HashSet::new(),
            bookmarks: Vec::new(),
            last_error: None,
            claim,
            config,
        };

        match Database::open(&context.config.database) {
            Ok(db) => {
                if db.resolve(db.top_keyword()).is_none() {
                    context.record_error(&Error::Config(format!(
                        "Top-level topic '{}' not found",
                        db.top_keyword()
                    )));
                }
                context.database = Some(db);
            },
            Err(e) => context.record_error(&e),
        }
        info!(cache = %context.claim.display(), "Engine context ready");
        Ok(context)
    }

    fn record_error(&mut self, err: &Error) {
        error!(category = err.category(), "{err}");
        self.last_error = Some(err.to_string());
    }

    /// Last configuration or I/O problem, as readable text.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Forgets the last error.
    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// The database, absent when it could not be built.
    #[must_use]
    pub const fn database(&self) -> Option<&Database> {
        self.database.as_ref()
    }

    /// Mutable database.
    pub fn database_mut(&mut self) -> Option<&mut Database> {
        self.database.as_mut()
    }

    /// The navigation forest.
    #[must_use]
    pub const fn tree(&self) -> &TopicTree {
        &self.tree
    }

    /// Mutable navigation forest.
    pub fn tree_mut(&mut self) -> &mut TopicTree {
        &mut self.tree
    }

    /// The object cache.
    pub fn cache_mut(&mut self) -> &mut ObjectCache {
        &mut self.cache
    }

    /// The image queue.
    pub fn images_mut(&mut self) -> &mut ImageQueue {
        &mut self.images
    }

    /// Reads `keyword` and shows it under `root` (a new window when `None`).
    ///
    /// Returns `Ok(None)` when the keyword does not resolve or no database
    /// is available.
    pub fn open_topic(&mut self, root: Option<TopicId>, keyword: &str) -> Result<Option<Linked>> {
        let Some(db) = &self.database else {
            return Ok(None);
        };
        let Some(topic) = db.read(keyword)? else {
            return Ok(None);
        };
        self.visit(keyword);
        self.show(root, topic).map(Some)
    }

    /// Shows the configured top-level topic.
    pub fn open_top(&mut self, root: Option<TopicId>) -> Result<Option<Linked>> {
        let Some(keyword) = self.database.as_ref().map(|db| db.top_keyword().to_string()) else {
            return Ok(None);
        };
        self.open_topic(root, &keyword)
    }

    /// Loads a plain file and shows it.
    pub fn open_file(&mut self, root: Option<TopicId>, path: &Path) -> Result<Linked> {
        let topic = Topic::from_file(path)?;
        self.visit(&topic.keyword);
        self.show(root, topic)
    }

    /// Runs a keyword/title search and shows the listing.
    pub fn search(&mut self, root: Option<TopicId>, pattern: &str) -> Result<Option<Linked>> {
        let Some(db) = &self.database else {
            return Ok(None);
        };
        let listing = db.search(pattern)?;
        self.show(root, listing).map(Some)
    }

    /// Runs a full-text scan and shows the listing.
    pub fn scan(&mut self, root: Option<TopicId>, target: &str) -> Result<Option<Linked>> {
        let Some(db) = &self.database else {
            return Ok(None);
        };
        let listing = db.scan(target)?;
        self.show(root, listing).map(Some)
    }

    fn show(&mut self, root: Option<TopicId>, topic: Topic) -> Result<Linked> {
        self.tree.link_new_and_show(root, topic)
    }

    /// Marks a keyword or URL as visited.
    pub fn visit(&mut self, target: &str) -> bool {
        self.visited.insert(target.to_string())
    }

    /// Whether a keyword or URL was visited.
    #[must_use]
    pub fn is_visited(&self, target: &str) -> bool {
        self.visited.contains(target)
    }

    /// Adds a bookmark. Returns `false` if `target` is already bookmarked.
    pub fn add_bookmark(&mut self, title: &str, target: &str) -> bool {
        if self.bookmarks.iter().any(|b| b.target == target) {
            return false;
        }
        self.bookmarks.push(Bookmark {
            title: title.to_string(),
            target: target.to_string(),
        });
        true
    }

    /// Removes the bookmark for `target`.
    pub fn remove_bookmark(&mut self, target: &str) -> bool {
        let before = self.bookmarks.len();
        self.bookmarks.retain(|b| b.target != target);
        before != self.bookmarks.len()
    }

    /// Bookmarks in insertion order.
    #[must_use]
    pub fn bookmarks(&self) -> &[Bookmark] {
        &self.bookmarks
    }

    /// Requests an image for `viewer`, honoring the load policy.
    ///
    /// Under the sync policy the transfer completes before this returns.
    pub fn request_image(&mut self, viewer: ViewerId, url: &str, sink: &mut dyn ImageSink) -> JobId {
        let id = self.images.enqueue(viewer, url);
        if self.images.policy() == LoadPolicy::Sync {
            self.images.run_now(id, &mut self.cache, sink);
        }
        id
    }

    /// One idle tick of the image queue.
    pub fn drain_images(&mut self, sink: &mut dyn ImageSink) -> DrainStatus {
        self.images.drain(&mut self.cache, sink)
    }

    /// Cancels and retires every image job of a closing viewer.
    pub fn close_viewer(&mut self, viewer: ViewerId) {
        self.images.abort_viewer(viewer);
        self.images.deactivate_viewer(viewer);
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if let Ok(mut claimed) = CLAIMED.lock() {
            claimed.remove(&self.claim);
        }
    }
}
