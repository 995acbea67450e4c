//! Disk object cache: a fixed ring of slot files shared across processes.
//!
//! Fetched content is stored in `objNNN` files inside the cache directory.
//! Which URL lives in which slot is recorded in the `directory` file, which
//! is the authoritative copy; every in-process [`CacheTable`] is a
//! projection of it.
//!
//! ## Directory file
//!
//! ```text
//! HELPDB-CACHE-1 3
//! 0 0 https://example.org/a.gif
//! 1 2 https://example.org/missing.png
//! 2 1 https://example.org/partial.jpg
//! ```
//!
//! Line 1 is the prefix and the write cursor. Each further line is
//! `<slot> <status> <url>` where status `0` is ok, `2` is failed, and any
//! other nonzero value is incomplete. A file with the wrong prefix or a
//! cursor outside the ring loads as an empty cache.
//!
//! ## Slot assignment
//!
//! Slots are handed out by a cursor that advances modulo the capacity, so the
//! oldest inserted slot is reused next regardless of access recency. Reusing
//! a slot evicts the URL that held it and unlinks its file.
//!
//! ## Consistency
//!
//! Two [`SyncStrategy`] implementations decide how the directory file is
//! consulted. [`LocalSnapshot`] answers reads from memory and replays
//! writes against a freshly loaded copy; [`External`] reloads, mutates and
//! persists on every call. Concurrent processes race last-writer-wins.

use crate::config::{CacheConfig, CacheMode};
use crate::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tracing::{debug, info, warn};

/// First token of a valid directory file.
pub const DIRECTORY_PREFIX: &str = "HELPDB-CACHE-1";

/// Name of the directory file inside the cache directory.
pub const DIRECTORY_FILE: &str = "directory";

/// State of one cached object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Complete content is on disk.
    Ok,
    /// Being written, or abandoned mid-transfer. Never served.
    Incomplete,
    /// The transfer failed for good. Sticky until removed.
    Failed,
}

impl CacheStatus {
    const fn code(self) -> u8 {
        match self {
            Self::Ok => 0,
            Self::Incomplete => 1,
            Self::Failed => 2,
        }
    }

    const fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Ok,
            2 => Self::Failed,
            _ => Self::Incomplete,
        }
    }
}

/// Occupant of a ring slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRecord {
    /// Cached URL.
    pub url: String,
    /// Transfer state.
    pub status: CacheStatus,
}

/// A mutation of the cache table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheOp {
    /// Claim a slot for `url`, marked incomplete.
    Add {
        /// URL being cached.
        url: String,
    },
    /// Record the outcome of a transfer into `slot`, if `url` still holds it.
    SetStatus {
        /// Slot named by the handle.
        slot: usize,
        /// URL the handle was issued for.
        url: String,
        /// Outcome.
        status: CacheStatus,
    },
    /// Drop `url`.
    Remove {
        /// URL to forget.
        url: String,
    },
    /// Change the number of slots.
    Resize {
        /// New slot count.
        capacity: usize,
    },
    /// Drop every entry.
    Clear,
}

/// What applying a [`CacheOp`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpEffect {
    /// Slot the operation acted on, `None` if it was a no-op.
    pub slot: Option<usize>,
    /// Write cursor after the operation.
    pub cursor: usize,
    /// Entries pushed out, whose files must be unlinked.
    pub evicted: Vec<(usize, String)>,
}

/// In-memory projection of the directory file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheTable {
    cursor: usize,
    slots: Vec<Option<SlotRecord>>,
    by_url: HashMap<String, usize>,
}

impl CacheTable {
    /// Empty table with `capacity` slots.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            cursor: 0,
            slots: vec![None; capacity],
            by_url: HashMap::new(),
        }
    }

    /// Number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slot the next new URL goes to.
    #[must_use]
    pub const fn cursor(&self) -> usize {
        self.cursor
    }

    /// Number of occupied slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_url.len()
    }

    /// Whether no slot is occupied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_url.is_empty()
    }

    /// Slot holding `url`.
    #[must_use]
    pub fn slot_of(&self, url: &str) -> Option<usize> {
        self.by_url.get(url).copied()
    }

    /// Status of `url`.
    #[must_use]
    pub fn status(&self, url: &str) -> Option<CacheStatus> {
        self.record(self.slot_of(url)?).map(|r| r.status)
    }

    /// Occupant of `slot`.
    #[must_use]
    pub fn record(&self, slot: usize) -> Option<&SlotRecord> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// Occupied slots in slot order.
    pub fn entries(&self) -> impl Iterator<Item = (usize, &SlotRecord)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, record)| record.as_ref().map(|r| (slot, r)))
    }

    // Puts `url` into `slot`, evicting the occupant and any older slot of
    // the same URL.
    fn place(&mut self, slot: usize, url: &str, status: CacheStatus, evicted: &mut Vec<(usize, String)>) {
        if let Some(old) = self.slots[slot].take() {
            self.by_url.remove(&old.url);
            if old.url != url {
                evicted.push((slot, old.url));
            }
        }
        if let Some(previous) = self.by_url.insert(url.to_string(), slot) {
            if previous != slot {
                self.slots[previous] = None;
                evicted.push((previous, url.to_string()));
            }
        }
        self.slots[slot] = Some(SlotRecord {
            url: url.to_string(),
            status,
        });
    }

    // Copies the occupant of `slot` in `peer` over ours.
    fn mirror_slot(&mut self, slot: usize, peer: &Self) {
        let mut stale = Vec::new();
        match peer.record(slot) {
            Some(record) => self.place(slot, &record.url, record.status, &mut stale),
            None => {
                if let Some(old) = self.slots.get_mut(slot).and_then(Option::take) {
                    self.by_url.remove(&old.url);
                }
            },
        }
    }

    /// Applies `op` and reports its effect.
    pub fn apply(&mut self, op: &CacheOp) -> OpEffect {
        let mut effect = OpEffect::default();
        match op {
            CacheOp::Add { url } => {
                let slot = match self.slot_of(url) {
                    Some(slot) => slot,
                    None if self.slots.is_empty() => {
                        effect.cursor = self.cursor;
                        return effect;
                    },
                    None => {
                        let slot = self.cursor;
                        self.cursor = (self.cursor + 1) % self.slots.len();
                        slot
                    },
                };
                self.place(slot, url, CacheStatus::Incomplete, &mut effect.evicted);
                effect.slot = Some(slot);
            },
            CacheOp::SetStatus { slot, url, status } => {
                if let Some(record) = self.slots.get_mut(*slot).and_then(Option::as_mut) {
                    if &record.url == url {
                        record.status = *status;
                        effect.slot = Some(*slot);
                    }
                }
            },
            CacheOp::Remove { url } => {
                if let Some(slot) = self.by_url.remove(url) {
                    self.slots[slot] = None;
                    effect.evicted.push((slot, url.clone()));
                    effect.slot = Some(slot);
                }
            },
            CacheOp::Resize { capacity } => {
                for slot in *capacity..self.slots.len() {
                    if let Some(old) = self.slots[slot].take() {
                        self.by_url.remove(&old.url);
                        effect.evicted.push((slot, old.url));
                    }
                }
                self.slots.resize(*capacity, None);
                if self.cursor >= *capacity {
                    self.cursor = 0;
                }
            },
            CacheOp::Clear => {
                effect.evicted = self
                    .slots
                    .iter_mut()
                    .enumerate()
                    .filter_map(|(slot, record)| record.take().map(|r| (slot, r.url)))
                    .collect();
                self.by_url.clear();
                self.cursor = 0;
            },
        }
        effect.cursor = self.cursor;
        effect
    }

    /// Serializes the table in directory-file form.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut out = format!("{DIRECTORY_PREFIX} {}\n", self.cursor);
        for (slot, record) in self.entries() {
            out.push_str(&format!("{slot} {} {}\n", record.status.code(), record.url));
        }
        out
    }

    /// Parses directory-file text for a ring of `capacity` slots.
    ///
    /// Damage never fails: a wrong prefix or out-of-range cursor yields an
    /// empty table and malformed record lines are skipped.
    #[must_use]
    pub fn decode(text: &str, capacity: usize) -> Self {
        let mut table = Self::new(capacity);
        let mut lines = text.lines();

        let cursor = lines.next().and_then(|header| {
            let (prefix, cursor) = header.split_once(' ')?;
            (prefix == DIRECTORY_PREFIX)
                .then(|| cursor.trim().parse::<usize>().ok())
                .flatten()
        });
        match cursor {
            Some(cursor) if cursor < capacity => table.cursor = cursor,
            _ => {
                warn!("Cache directory file has a bad header, treating cache as empty");
                return table;
            },
        }

        let mut ignored = Vec::new();
        for line in lines.filter(|l| !l.trim().is_empty()) {
            match parse_record(line).filter(|&(slot, _, _)| slot < capacity) {
                Some((slot, status, url))
                    if table.slots[slot].is_none() && !table.by_url.contains_key(url) =>
                {
                    table.place(slot, url, CacheStatus::from_code(status), &mut ignored);
                },
                _ => debug!(line, "Skipping cache directory record"),
            }
        }
        table
    }
}

fn parse_record(line: &str) -> Option<(usize, u8, &str)> {
    let mut fields = line.splitn(3, ' ');
    let slot = fields.next()?.parse().ok()?;
    let status = fields.next()?.parse().ok()?;
    let url = fields.next()?.trim();
    (!url.is_empty()).then_some((slot, status, url))
}

/// Location of the directory file and slot files.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    dir: PathBuf,
}

impl DirectoryStore {
    /// Store rooted at `dir`, which must exist.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Cache directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the directory file.
    #[must_use]
    pub fn directory_path(&self) -> PathBuf {
        self.dir.join(DIRECTORY_FILE)
    }

    /// Path of the file backing `slot`.
    #[must_use]
    pub fn slot_path(&self, slot: usize) -> PathBuf {
        self.dir.join(format!("obj{slot:03}"))
    }

    /// Loads the shared table. Missing or unreadable files load as empty.
    #[must_use]
    pub fn load(&self, capacity: usize) -> CacheTable {
        match fs::read_to_string(self.directory_path()) {
            Ok(text) => CacheTable::decode(&text, capacity),
            Err(e) if e.kind() == ErrorKind::NotFound => CacheTable::new(capacity),
            Err(e) => {
                warn!(dir = %self.dir.display(), "Cannot read cache directory file: {e}");
                CacheTable::new(capacity)
            },
        }
    }

    /// Writes the shared table atomically.
    pub fn persist(&self, table: &CacheTable) -> Result<()> {
        let path = self.directory_path();
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, table.encode())
            .map_err(|e| Error::Storage(format!("Failed to write cache directory: {e}")))?;

        #[cfg(target_os = "windows")]
        if path.exists() {
            fs::remove_file(&path).map_err(|e| {
                Error::Storage(format!("Failed to remove existing cache directory: {e}"))
            })?;
        }

        fs::rename(&tmp_path, &path)
            .map_err(|e| Error::Storage(format!("Failed to commit cache directory: {e}")))?;
        Ok(())
    }
}

/// How the in-process table is kept consistent with the directory file.
pub trait SyncStrategy: fmt::Debug + Send {
    /// Table to answer reads from.
    fn view(&mut self, store: &DirectoryStore) -> &CacheTable;

    /// Applies `op` to the shared file and the in-process table.
    fn mutate(&mut self, store: &DirectoryStore, op: &CacheOp) -> Result<OpEffect>;

    /// Slot count the strategy works with.
    fn capacity(&self) -> usize;
}

/// Reads trust the in-process table; writes replay against a fresh load.
#[derive(Debug)]
pub struct LocalSnapshot {
    table: CacheTable,
}

impl LocalSnapshot {
    /// Starts from the current shared file.
    #[must_use]
    pub fn load(store: &DirectoryStore, capacity: usize) -> Self {
        Self {
            table: store.load(capacity),
        }
    }
}

impl SyncStrategy for LocalSnapshot {
    fn view(&mut self, _store: &DirectoryStore) -> &CacheTable {
        &self.table
    }

    fn mutate(&mut self, store: &DirectoryStore, op: &CacheOp) -> Result<OpEffect> {
        let mut peer = store.load(self.table.capacity());
        let effect = peer.apply(op);
        store.persist(&peer)?;

        match op {
            CacheOp::Add { url } => {
                if let Some(slot) = effect.slot {
                    let mut stale = Vec::new();
                    self.table.place(slot, url, CacheStatus::Incomplete, &mut stale);
                }
                self.table.cursor = effect.cursor;
            },
            CacheOp::SetStatus { slot, .. } => match effect.slot {
                Some(_) => {
                    self.table.apply(op);
                },
                None => self.table.mirror_slot(*slot, &peer),
            },
            CacheOp::Remove { .. } => {
                self.table.apply(op);
            },
            CacheOp::Resize { .. } | CacheOp::Clear => self.table = peer,
        }
        Ok(effect)
    }

    fn capacity(&self) -> usize {
        self.table.capacity()
    }
}

/// Every call reloads, mutates and persists the shared file.
#[derive(Debug)]
pub struct External {
    table: CacheTable,
}

impl External {
    /// Strategy for a ring of `capacity` slots.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            table: CacheTable::new(capacity),
        }
    }
}

impl SyncStrategy for External {
    fn view(&mut self, store: &DirectoryStore) -> &CacheTable {
        self.table = store.load(self.table.capacity());
        &self.table
    }

    fn mutate(&mut self, store: &DirectoryStore, op: &CacheOp) -> Result<OpEffect> {
        let mut peer = store.load(self.table.capacity());
        let effect = peer.apply(op);
        store.persist(&peer)?;
        self.table = peer;
        Ok(effect)
    }

    fn capacity(&self) -> usize {
        self.table.capacity()
    }
}

/// Outcome of [`ObjectCache::get`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// Complete content at this path.
    Hit(PathBuf),
    /// A previous transfer failed; do not refetch until retried.
    Failed,
    /// Not cached, or only partially.
    Miss,
}

/// Slot claimed by [`ObjectCache::add`]. Write the content to
/// [`path`](Self::path), then call [`ObjectCache::set_complete`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHandle {
    slot: usize,
    url: String,
    path: PathBuf,
}

impl CacheHandle {
    /// File to write the content to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// URL the slot was claimed for.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Ring slot.
    #[must_use]
    pub const fn slot(&self) -> usize {
        self.slot
    }
}

/// One listed cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Cached URL.
    pub url: String,
    /// Backing file.
    pub path: PathBuf,
    /// Transfer state.
    pub status: CacheStatus,
}

/// The object cache.
#[derive(Debug)]
pub struct ObjectCache {
    store: DirectoryStore,
    strategy: Box<dyn SyncStrategy>,
    nocache: Vec<TempPath>,
}

impl ObjectCache {
    /// Opens the cache described by `config`, creating its directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cache`] for a zero capacity and [`Error::Storage`]
    /// if the directory cannot be created.
    pub fn open(config: &CacheConfig) -> Result<Self> {
        if config.capacity == 0 {
            return Err(Error::Cache("Cache capacity must be at least 1".into()));
        }
        fs::create_dir_all(&config.dir)
            .map_err(|e| Error::Storage(format!("Failed to create cache directory: {e}")))?;

        let store = DirectoryStore::new(&config.dir);
        let strategy: Box<dyn SyncStrategy> = match config.mode {
            CacheMode::Local => Box::new(LocalSnapshot::load(&store, config.capacity)),
            CacheMode::External => Box::new(External::new(config.capacity)),
        };
        info!(
            dir = %config.dir.display(),
            capacity = config.capacity,
            mode = ?config.mode,
            "Object cache opened"
        );
        Ok(Self::with_strategy(store, strategy))
    }

    /// Cache over an existing store with an explicit strategy.
    #[must_use]
    pub fn with_strategy(store: DirectoryStore, strategy: Box<dyn SyncStrategy>) -> Self {
        Self {
            store,
            strategy,
            nocache: Vec::new(),
        }
    }

    /// Cache directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        self.store.dir()
    }

    /// Number of ring slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.strategy.capacity()
    }

    /// Looks up `url`. Incomplete entries and entries whose file vanished
    /// are misses.
    pub fn get(&mut self, url: &str) -> CacheLookup {
        let table = self.strategy.view(&self.store);
        let Some(slot) = table.slot_of(url) else {
            return CacheLookup::Miss;
        };
        match table.record(slot).map(|r| r.status) {
            Some(CacheStatus::Ok) => {
                let path = self.store.slot_path(slot);
                if path.is_file() {
                    CacheLookup::Hit(path)
                } else {
                    debug!(url, slot, "Cache entry lost its file");
                    CacheLookup::Miss
                }
            },
            Some(CacheStatus::Failed) => CacheLookup::Failed,
            Some(CacheStatus::Incomplete) | None => CacheLookup::Miss,
        }
    }

    /// Claims a slot for `url`, evicting its previous occupant.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory file cannot be written.
    pub fn add(&mut self, url: &str) -> Result<CacheHandle> {
        let effect = self.mutate(&CacheOp::Add {
            url: url.to_string(),
        })?;
        let slot = effect
            .slot
            .ok_or_else(|| Error::Cache(format!("No slot available for {url}")))?;
        let path = self.store.slot_path(slot);
        unlink(&path);
        debug!(url, slot, "Cache slot claimed");
        Ok(CacheHandle {
            slot,
            url: url.to_string(),
            path,
        })
    }

    /// Records the outcome of filling `handle`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cache`] if another process reused the slot first.
    pub fn set_complete(&mut self, handle: &CacheHandle, status: CacheStatus) -> Result<()> {
        let effect = self.mutate(&CacheOp::SetStatus {
            slot: handle.slot,
            url: handle.url.clone(),
            status,
        })?;
        if effect.slot.is_none() {
            return Err(Error::Cache(format!(
                "Slot {} no longer holds {}",
                handle.slot, handle.url
            )));
        }
        debug!(url = %handle.url, slot = handle.slot, ?status, "Cache slot completed");
        Ok(())
    }

    /// Forgets `url` and unlinks its file. Returns whether it was cached.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory file cannot be written.
    pub fn remove(&mut self, url: &str) -> Result<bool> {
        let effect = self.mutate(&CacheOp::Remove {
            url: url.to_string(),
        })?;
        Ok(effect.slot.is_some())
    }

    /// Changes the number of slots. Entries in slots beyond the new size are
    /// evicted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cache`] for a zero capacity.
    pub fn resize(&mut self, capacity: usize) -> Result<()> {
        if capacity == 0 {
            return Err(Error::Cache("Cache capacity must be at least 1".into()));
        }
        self.mutate(&CacheOp::Resize { capacity })?;
        info!(capacity, "Object cache resized");
        Ok(())
    }

    /// Drops every entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory file cannot be written.
    pub fn clear(&mut self) -> Result<()> {
        self.mutate(&CacheOp::Clear)?;
        Ok(())
    }

    /// Removes failed entries so the next access refetches them.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory file cannot be written.
    pub fn retry_failures(&mut self) -> Result<usize> {
        let failed: Vec<String> = self
            .strategy
            .view(&self.store)
            .entries()
            .filter(|(_, r)| r.status == CacheStatus::Failed)
            .map(|(_, r)| r.url.clone())
            .collect();
        for url in &failed {
            self.remove(url)?;
        }
        Ok(failed.len())
    }

    /// Current entries in slot order.
    pub fn entries(&mut self) -> Vec<CacheEntry> {
        let table = self.strategy.view(&self.store);
        table
            .entries()
            .map(|(slot, record)| CacheEntry {
                url: record.url.clone(),
                path: self.store.slot_path(slot),
                status: record.status,
            })
            .collect()
    }

    /// A disposable file outside the ring, deleted when the cache is
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn add_nocache(&mut self) -> Result<PathBuf> {
        let path = tempfile::Builder::new()
            .prefix("nocache")
            .tempfile_in(self.store.dir())?
            .into_temp_path();
        let owned = path.to_path_buf();
        self.nocache.push(path);
        Ok(owned)
    }

    fn mutate(&mut self, op: &CacheOp) -> Result<OpEffect> {
        let effect = self.strategy.mutate(&self.store, op)?;
        for (slot, url) in &effect.evicted {
            debug!(slot, url, "Evicting cache entry");
            unlink(&self.store.slot_path(*slot));
        }
        Ok(effect)
    }
}

fn unlink(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {},
        Err(e) if e.kind() == ErrorKind::NotFound => {},
        Err(e) => warn!(file = %path.display(), "Failed to remove cache file: {e}"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open(dir: &Path, capacity: usize, mode: CacheMode) -> ObjectCache {
        ObjectCache::open(&CacheConfig {
            enabled: true,
            dir: dir.to_path_buf(),
            capacity,
            mode,
        })
        .unwrap()
    }

    fn fill(cache: &mut ObjectCache, url: &str, status: CacheStatus) -> CacheHandle {
        let handle = cache.add(url).unwrap();
        fs::write(handle.path(), url).unwrap();
        cache.set_complete(&handle, status).unwrap();
        handle
    }

    #[test]
    fn test_table_ring_eviction() {
        let mut table = CacheTable::new(2);
        let a = table.apply(&CacheOp::Add { url: "a".into() });
        let b = table.apply(&CacheOp::Add { url: "b".into() });
        let c = table.apply(&CacheOp::Add { url: "c".into() });
        assert_eq!((a.slot, b.slot, c.slot), (Some(0), Some(1), Some(0)));
        assert_eq!(c.evicted, vec![(0, "a".to_string())]);
        assert_eq!(table.slot_of("a"), None);
        assert_eq!(table.cursor(), 1);
    }

    #[test]
    fn test_readding_url_keeps_slot() {
        let mut table = CacheTable::new(4);
        table.apply(&CacheOp::Add { url: "a".into() });
        table.apply(&CacheOp::Add { url: "b".into() });
        let again = table.apply(&CacheOp::Add { url: "a".into() });
        assert_eq!(again.slot, Some(0));
        assert!(again.evicted.is_empty());
        assert_eq!(table.len(), 2);
        assert_eq!(table.cursor(), 2);
    }

    #[test]
    fn test_encode_decode_and_status_codes() {
        let mut table = CacheTable::new(4);
        for url in ["a", "b", "c"] {
            table.apply(&CacheOp::Add { url: url.into() });
        }
        table.apply(&CacheOp::SetStatus {
            slot: 0,
            url: "a".into(),
            status: CacheStatus::Ok,
        });
        table.apply(&CacheOp::SetStatus {
            slot: 1,
            url: "b".into(),
            status: CacheStatus::Failed,
        });

        let text = table.encode();
        assert!(text.starts_with("HELPDB-CACHE-1 3\n"));
        assert!(text.contains("1 2 b\n"));
        assert_eq!(CacheTable::decode(&text, 4), table);

        let odd = CacheTable::decode("HELPDB-CACHE-1 0\n0 7 x\n", 4);
        assert_eq!(odd.status("x"), Some(CacheStatus::Incomplete));
    }

    #[test]
    fn test_damaged_directory_file_loads_empty() {
        assert!(CacheTable::decode("WRONG 0\n0 0 a\n", 4).is_empty());
        assert!(CacheTable::decode("HELPDB-CACHE-1 9\n0 0 a\n", 4).is_empty());
        assert!(CacheTable::decode("", 4).is_empty());

        let partial = CacheTable::decode("HELPDB-CACHE-1 1\ngarbage\n9 0 far\n0 0 a\n", 4);
        assert_eq!(partial.len(), 1);
        assert_eq!(partial.status("a"), Some(CacheStatus::Ok));
    }

    #[test]
    fn test_incomplete_entry_is_not_served() {
        let dir = TempDir::new().unwrap();
        let mut cache = open(dir.path(), 4, CacheMode::Local);
        let handle = cache.add("u").unwrap();
        fs::write(handle.path(), b"partial").unwrap();
        assert_eq!(cache.get("u"), CacheLookup::Miss);

        cache.set_complete(&handle, CacheStatus::Ok).unwrap();
        assert_eq!(cache.get("u"), CacheLookup::Hit(handle.path().to_path_buf()));

        fs::remove_file(handle.path()).unwrap();
        assert_eq!(cache.get("u"), CacheLookup::Miss);
    }

    #[test]
    fn test_failed_is_sticky_until_retry() {
        let dir = TempDir::new().unwrap();
        let mut cache = open(dir.path(), 4, CacheMode::External);
        fill(&mut cache, "bad", CacheStatus::Failed);
        fill(&mut cache, "good", CacheStatus::Ok);

        assert_eq!(cache.get("bad"), CacheLookup::Failed);
        assert_eq!(cache.retry_failures().unwrap(), 1);
        assert_eq!(cache.get("bad"), CacheLookup::Miss);
        assert!(matches!(cache.get("good"), CacheLookup::Hit(_)));
    }

    #[test]
    fn test_local_and_external_agree_through_shared_file() {
        let dir = TempDir::new().unwrap();
        let mut local = open(dir.path(), 4, CacheMode::Local);
        let mut external = open(dir.path(), 4, CacheMode::External);

        fill(&mut local, "a", CacheStatus::Ok);
        assert!(matches!(external.get("a"), CacheLookup::Hit(_)));

        let b = fill(&mut external, "b", CacheStatus::Ok);
        assert_eq!(b.slot(), 1);

        // The local table learns about "b" only when it next writes.
        assert_eq!(local.get("b"), CacheLookup::Miss);
        let c = local.add("c").unwrap();
        assert_eq!(c.slot(), 2);
    }

    #[test]
    fn test_stale_handle_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut first = open(dir.path(), 1, CacheMode::External);
        let mut second = open(dir.path(), 1, CacheMode::External);

        let handle = first.add("a").unwrap();
        second.add("b").unwrap();
        let err = first.set_complete(&handle, CacheStatus::Ok).unwrap_err();
        assert_eq!(err.category(), "cache");
    }

    #[test]
    fn test_resize_shrink_deletes_overflow_files() {
        let dir = TempDir::new().unwrap();
        let mut cache = open(dir.path(), 4, CacheMode::Local);
        let handles: Vec<_> = ["a", "b", "c"]
            .into_iter()
            .map(|u| fill(&mut cache, u, CacheStatus::Ok))
            .collect();

        cache.resize(2).unwrap();
        assert_eq!(cache.capacity(), 2);
        assert!(handles[0].path().exists());
        assert!(handles[1].path().exists());
        assert!(!handles[2].path().exists());
        assert_eq!(cache.get("c"), CacheLookup::Miss);
        assert!(cache.resize(0).is_err());
    }

    #[test]
    fn test_clear_and_entries() {
        let dir = TempDir::new().unwrap();
        let mut cache = open(dir.path(), 4, CacheMode::Local);
        let a = fill(&mut cache, "a", CacheStatus::Ok);
        let entries = cache.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].url, "a");
        assert_eq!(entries[0].path, a.path());

        cache.clear().unwrap();
        assert!(cache.entries().is_empty());
        assert!(!a.path().exists());
        assert!(!cache.remove("a").unwrap());
    }

    #[test]
    fn test_nocache_file_removed_on_drop() {
        let dir = TempDir::new().unwrap();
        let mut cache = open(dir.path(), 2, CacheMode::Local);
        let path = cache.add_nocache().unwrap();
        fs::write(&path, b"once").unwrap();
        assert!(path.exists());
        assert!(cache.entries().is_empty());

        drop(cache);
        assert!(!path.exists());
    }
}
