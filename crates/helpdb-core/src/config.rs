//! Configuration management for the help database engine.
//!
//! Configuration is stored in TOML and covers three areas: where the
//! database files live (the search path), how the object cache behaves, and
//! which image load policy viewers get. Every section has defaults, so an
//! absent file or a partial file is fine.
//!
//! ## Environment Overrides
//!
//! - `HELPDB_PATH`: search path in OS path-list syntax. A leading separator
//!   (`:/extra/dir` on Unix) merges the listed directories in front of the
//!   system path; otherwise they replace it.
//! - `HELPDB_CACHE_DIR`: object cache directory.
//! - `HELPDB_DEBUG`: any non-empty value other than `0` enables debug mode.
//!
//! ## Example Configuration File
//!
//! ```toml
//! [database]
//! system_path = ["/usr/share/helpdb"]
//! user_path = ["/home/user/help"]
//! path_mode = "merge"
//! extension = "hlp"
//! top_topic = "top"
//! defines = ["UNIX"]
//!
//! [cache]
//! capacity = 64
//! mode = "external"
//!
//! [images]
//! policy = "progressive"
//! ```

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default number of slots in the object cache ring.
pub const DEFAULT_CACHE_CAPACITY: usize = 64;

/// Default database file extension (without the dot).
pub const DEFAULT_EXTENSION: &str = "hlp";

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database search path and parsing options
    pub database: DatabaseConfig,
    /// Object cache settings
    pub cache: CacheConfig,
    /// Image download settings
    pub images: ImageConfig,
}

/// How user directories combine with the system search path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathMode {
    /// User directories are searched first, then the system directories.
    #[default]
    Merge,
    /// User directories replace the system directories when any are given.
    Replace,
}

/// Database search path and directive processing options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Directories shipped with the installation.
    pub system_path: Vec<PathBuf>,

    /// Directories supplied by the user.
    pub user_path: Vec<PathBuf>,

    /// Combination rule for `user_path` and `system_path`.
    pub path_mode: PathMode,

    /// Recognized database file extension, without the leading dot.
    pub extension: String,

    /// Keyword of the top-level topic.
    pub top_topic: String,

    /// Tokens defined before any file is parsed.
    pub defines: Vec<String>,

    /// Keep unresolved cross-references as `unknown: <kw>` entries.
    pub debug: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            system_path: Vec::new(),
            user_path: Vec::new(),
            path_mode: PathMode::Merge,
            extension: DEFAULT_EXTENSION.to_string(),
            top_topic: "top".to_string(),
            defines: Vec::new(),
            debug: false,
        }
    }
}

impl DatabaseConfig {
    /// Ordered directories that make up the effective database.
    ///
    /// Duplicate entries are kept only at their first position.
    #[must_use]
    pub fn effective_search_path(&self) -> Vec<PathBuf> {
        let ordered: Vec<&PathBuf> = match self.path_mode {
            PathMode::Merge => self.user_path.iter().chain(&self.system_path).collect(),
            PathMode::Replace if !self.user_path.is_empty() => self.user_path.iter().collect(),
            PathMode::Replace => self.system_path.iter().collect(),
        };

        let mut seen = Vec::with_capacity(ordered.len());
        for dir in ordered {
            if !seen.contains(dir) {
                seen.push(dir.clone());
            }
        }
        seen
    }
}

/// Consistency discipline for the shared cache directory file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    /// Reads trust the in-process snapshot; writes are replayed on disk.
    #[default]
    Local,
    /// Every operation reloads, mutates and persists the directory file.
    External,
}

/// Object cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether fetched content is kept in the ring at all.
    pub enabled: bool,
    /// Directory holding the slot files and the directory file.
    pub dir: PathBuf,
    /// Number of ring slots.
    pub capacity: usize,
    /// Cross-process consistency discipline.
    pub mode: CacheMode,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_cache_dir(),
            capacity: DEFAULT_CACHE_CAPACITY,
            mode: CacheMode::Local,
        }
    }
}

/// When images referenced by a page are retrieved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPolicy {
    /// Fetch inline while the page is being parsed.
    Sync,
    /// Queue every image and start once the page is displayed.
    #[default]
    Delayed,
    /// Like `Delayed`, but partial data is streamed to the decoder.
    Progressive,
}

/// Image download settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// Load policy for new jobs.
    pub policy: LoadPolicy,
    /// Fewest unread bytes worth handing to a progressive decoder.
    pub min_progressive_bytes: usize,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            policy: LoadPolicy::Delayed,
            min_progressive_bytes: 512,
        }
    }
}

fn default_cache_dir() -> PathBuf {
    directories::ProjectDirs::from("org", "helpdb", "helpdb").map_or_else(
        || {
            directories::BaseDirs::new().map_or_else(
                || PathBuf::from(".helpdb/cache"),
                |base| base.home_dir().join(".helpdb").join("cache"),
            )
        },
        |dirs| dirs.cache_dir().to_path_buf(),
    )
}

impl Config {
    /// Load configuration from the default location, then apply environment
    /// overrides.
    ///
    /// A missing file yields defaults. A file that exists but does not parse
    /// is an error.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    /// Load configuration from an explicit TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config: {e}")))?;
        Ok(toml::from_str(&content)?)
    }

    /// Write the configuration as TOML, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("Failed to create config directory: {e}")))?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).map_err(|e| Error::Config(format!("Failed to write config: {e}")))
    }

    /// Apply `HELPDB_*` environment overrides in place.
    pub fn apply_env(&mut self) {
        if let Ok(value) = std::env::var("HELPDB_PATH") {
            self.apply_path_override(&value);
        }
        if let Ok(dir) = std::env::var("HELPDB_CACHE_DIR") {
            let trimmed = dir.trim();
            if !trimmed.is_empty() {
                self.cache.dir = PathBuf::from(trimmed);
            }
        }
        if let Ok(flag) = std::env::var("HELPDB_DEBUG") {
            let flag = flag.trim();
            self.database.debug = !flag.is_empty() && flag != "0";
        }
    }

    /// Interpret a path-list override the way `HELPDB_PATH` is interpreted.
    pub fn apply_path_override(&mut self, value: &str) {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return;
        }
        let merge = std::env::split_paths(trimmed)
            .next()
            .is_some_and(|first| first.as_os_str().is_empty());
        self.database.user_path = std::env::split_paths(trimmed)
            .filter(|p| !p.as_os_str().is_empty())
            .collect();
        self.database.path_mode = if merge {
            PathMode::Merge
        } else {
            PathMode::Replace
        };
    }

    /// Check the constraints that make a configuration usable at all.
    pub fn validate(&self) -> Result<()> {
        if self.database.effective_search_path().is_empty() {
            return Err(Error::Config("No search path configured".into()));
        }
        if self.database.top_topic.trim().is_empty() {
            return Err(Error::Config("No top-level topic configured".into()));
        }
        if self.cache.capacity == 0 {
            return Err(Error::Config("Cache capacity must be at least 1".into()));
        }
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let project_dirs = directories::ProjectDirs::from("org", "helpdb", "helpdb")
            .ok_or_else(|| Error::Config("Failed to determine project directories".into()))?;
        Ok(project_dirs.config_dir().join("helpdb.toml"))
    }
}
