//! Per-directory keyword index.
//!
//! Every search-path directory gets a [`DirectoryIndex`]: three hash tables
//! of [`BUCKETS`] buckets each, one for topic keywords, one for redirects and
//! one for latex blocks. Tables are filled by running the directive
//! processor over every file with the database extension. Only the position
//! of each record is kept; bodies are re-read on demand.

use crate::directive::{ConditionStack, DirectiveKind, DirectiveReader, LineContent};
use crate::{Defines, Result};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

/// Number of buckets per hash table.
pub const BUCKETS: usize = 32;

/// Bucket a key hashes to.
#[must_use]
pub fn bucket_of(key: &str) -> usize {
    let hash = key
        .bytes()
        .fold(0u32, |h, b| h.wrapping_mul(31).wrapping_add(u32::from(b)));
    hash as usize % BUCKETS
}

/// Records that live in a [`BucketTable`].
pub trait Keyed {
    /// Lookup key of the record.
    fn key(&self) -> &str;
}

/// Fixed-size chained hash table. The first record inserted for a key wins.
#[derive(Debug, Clone)]
pub struct BucketTable<T> {
    buckets: Vec<Vec<T>>,
    len: usize,
}

impl<T> Default for BucketTable<T> {
    fn default() -> Self {
        Self {
            buckets: (0..BUCKETS).map(|_| Vec::new()).collect(),
            len: 0,
        }
    }
}

impl<T: Keyed> BucketTable<T> {
    /// Inserts `record` unless its key is already present.
    ///
    /// Returns `false` (and drops the record) for a duplicate key.
    pub fn insert(&mut self, record: T) -> bool {
        let bucket = &mut self.buckets[bucket_of(record.key())];
        if bucket.iter().any(|r| r.key() == record.key()) {
            return false;
        }
        bucket.push(record);
        self.len += 1;
        true
    }

    /// Scans the key's bucket.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&T> {
        self.buckets[bucket_of(key)].iter().find(|r| r.key() == key)
    }

    /// Iterates all records, bucket by bucket.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.buckets.iter().flatten()
    }

    /// Number of records.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the table holds no records.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Where a topic lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordRecord {
    /// Lookup keyword.
    pub keyword: String,
    /// Title from `!!TITLE`, or the keyword when absent.
    pub title: String,
    /// Database file holding the record.
    pub file: PathBuf,
    /// Tag from `!!TAG`.
    pub tag: Option<String>,
    /// Byte offset of the `!!KEYWORD` line.
    pub offset: u64,
    /// Body introduced by `!!HTML` rather than `!!TEXT`.
    pub is_html: bool,
    /// Conditional scopes open at the `!!KEYWORD` line.
    pub conditions: ConditionStack,
}

impl Keyed for KeywordRecord {
    fn key(&self) -> &str {
        &self.keyword
    }
}

/// `!!REDIRECT old new`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    /// Keyword being redirected.
    pub from: String,
    /// Keyword it now resolves to.
    pub to: String,
}

impl Keyed for Redirect {
    fn key(&self) -> &str {
        &self.from
    }
}

/// `!!LATEX kw outfile`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatexRecord {
    /// Lookup keyword.
    pub keyword: String,
    /// Output file name the block is meant for.
    pub outfile: String,
    /// Database file holding the block.
    pub file: PathBuf,
    /// Byte offset of the `!!LATEX` line.
    pub offset: u64,
    /// Conditional scopes open at the `!!LATEX` line.
    pub conditions: ConditionStack,
}

impl Keyed for LatexRecord {
    fn key(&self) -> &str {
        &self.keyword
    }
}

/// Database-wide blocks where the first occurrence across all files wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Globals {
    /// `!!HEADER` lines.
    pub header: Option<Vec<String>>,
    /// `!!FOOTER` lines.
    pub footer: Option<Vec<String>>,
    /// `!!MAINTAG` value.
    pub main_tag: Option<String>,
    /// `!!TAGTEXT` lines.
    pub tag_text: Option<Vec<String>>,
}

impl Globals {
    fn slot(&mut self, kind: DirectiveKind) -> Option<&mut Option<Vec<String>>> {
        match kind {
            DirectiveKind::Header => Some(&mut self.header),
            DirectiveKind::Footer => Some(&mut self.footer),
            DirectiveKind::TagText => Some(&mut self.tag_text),
            _ => None,
        }
    }
}

/// Shared state threaded through every directory build.
pub struct BuildContext<'a> {
    /// Active define table.
    pub defines: &'a Defines,
    /// Database file extension without the dot.
    pub extension: &'a str,
    /// Canonical paths of files already parsed via any directory.
    pub merged: &'a mut HashSet<PathBuf>,
    /// Global blocks collected so far.
    pub globals: &'a mut Globals,
}

/// Index of one search-path directory.
#[derive(Debug, Clone, Default)]
pub struct DirectoryIndex {
    path: PathBuf,
    keywords: BucketTable<KeywordRecord>,
    redirects: BucketTable<Redirect>,
    latex: BucketTable<LatexRecord>,
    files: Vec<PathBuf>,
    inactive: bool,
    empty: bool,
}

impl DirectoryIndex {
    /// Builds the index for `path`.
    ///
    /// An unopenable directory yields an index marked empty. Unreadable
    /// files are logged and skipped.
    pub fn build(path: &Path, ctx: &mut BuildContext<'_>) -> Self {
        let mut index = Self {
            path: path.to_path_buf(),
            ..Self::default()
        };

        let files = match database_files(path, ctx.extension) {
            Ok(files) => files,
            Err(e) => {
                warn!(dir = %path.display(), "Cannot open database directory: {e}");
                index.empty = true;
                return index;
            },
        };

        for file in files {
            let canonical = fs::canonicalize(&file).unwrap_or_else(|_| file.clone());
            if !ctx.merged.insert(canonical) {
                warn!(
                    file = %file.display(),
                    "Database file already merged via another search path entry, skipping"
                );
                continue;
            }
            match index.parse_file(&file, ctx) {
                Ok(()) => index.files.push(file),
                Err(e) => error!(file = %file.display(), "Failed to parse database file: {e}"),
            }
        }

        index.empty = index.files.is_empty();
        debug!(
            dir = %path.display(),
            files = index.files.len(),
            keywords = index.keywords.len(),
            redirects = index.redirects.len(),
            latex = index.latex.len(),
            "Indexed directory"
        );
        index
    }

    fn parse_file(&mut self, file: &Path, ctx: &mut BuildContext<'_>) -> Result<()> {
        let reader = BufReader::new(File::open(file)?);
        let mut pending: Vec<KeywordRecord> = Vec::new();
        let mut capture: Option<DirectiveKind> = None;

        let mut lines = DirectiveReader::new(reader, ctx.defines);
        while let Some(line) = lines.next() {
            let line = line?;
            let directive = match line.content {
                LineContent::Text(text) => {
                    if let Some(kind) = capture {
                        if let Some(Some(lines)) = ctx.globals.slot(kind) {
                            lines.push(text);
                        }
                    }
                    continue;
                },
                LineContent::Directive(directive) => directive,
            };

            capture = None;
            match directive.kind {
                DirectiveKind::Keyword => {
                    self.flush(&mut pending);
                    pending = directive
                        .tokens()
                        .map(|keyword| KeywordRecord {
                            keyword: keyword.to_string(),
                            title: keyword.to_string(),
                            file: file.to_path_buf(),
                            tag: None,
                            offset: line.offset,
                            is_html: false,
                            conditions: lines.conditions().clone(),
                        })
                        .collect();
                },
                DirectiveKind::Title => {
                    for record in &mut pending {
                        record.title.clone_from(&directive.args);
                    }
                },
                DirectiveKind::Html => pending.iter_mut().for_each(|r| r.is_html = true),
                DirectiveKind::Tag => {
                    let tag = directive.first_token().map(str::to_string);
                    pending.iter_mut().for_each(|r| r.tag.clone_from(&tag));
                },
                DirectiveKind::Latex => {
                    self.flush(&mut pending);
                    let mut tokens = directive.tokens();
                    if let Some(keyword) = tokens.next() {
                        let record = LatexRecord {
                            keyword: keyword.to_string(),
                            outfile: tokens.next().unwrap_or_default().to_string(),
                            file: file.to_path_buf(),
                            offset: line.offset,
                            conditions: lines.conditions().clone(),
                        };
                        if !self.latex.insert(record) {
                            debug!(keyword, "Duplicate latex block ignored");
                        }
                    }
                },
                DirectiveKind::Redirect => {
                    let mut tokens = directive.tokens();
                    if let (Some(from), Some(to)) = (tokens.next(), tokens.next()) {
                        let inserted = self.redirects.insert(Redirect {
                            from: from.to_string(),
                            to: to.to_string(),
                        });
                        if !inserted {
                            debug!(from, "Duplicate redirect ignored");
                        }
                    } else {
                        warn!(file = %file.display(), args = %directive.args, "Malformed REDIRECT");
                    }
                },
                DirectiveKind::MainTag => {
                    if ctx.globals.main_tag.is_none() {
                        ctx.globals.main_tag = directive.first_token().map(str::to_string);
                    }
                },
                kind if kind.is_global_block() => {
                    if let Some(slot) = ctx.globals.slot(kind) {
                        if slot.is_none() {
                            *slot = Some(Vec::new());
                            capture = Some(kind);
                        }
                    }
                },
                DirectiveKind::Unknown => self.flush(&mut pending),
                _ => {},
            }
        }

        self.flush(&mut pending);
        Ok(())
    }

    fn flush(&mut self, pending: &mut Vec<KeywordRecord>) {
        for record in pending.drain(..) {
            let keyword = record.keyword.clone();
            if !self.keywords.insert(record) {
                debug!(%keyword, dir = %self.path.display(), "Duplicate keyword ignored");
            }
        }
    }

    /// Directory this index covers.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Files parsed into this index, in scan order.
    #[must_use]
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Keyword lookup within this directory.
    #[must_use]
    pub fn keyword(&self, keyword: &str) -> Option<&KeywordRecord> {
        self.keywords.get(keyword)
    }

    /// Redirect lookup within this directory.
    #[must_use]
    pub fn redirect(&self, keyword: &str) -> Option<&Redirect> {
        self.redirects.get(keyword)
    }

    /// Latex block lookup within this directory.
    #[must_use]
    pub fn latex(&self, keyword: &str) -> Option<&LatexRecord> {
        self.latex.get(keyword)
    }

    /// All keyword records.
    pub fn keywords(&self) -> impl Iterator<Item = &KeywordRecord> {
        self.keywords.iter()
    }

    /// All latex records.
    pub fn latex_records(&self) -> impl Iterator<Item = &LatexRecord> {
        self.latex.iter()
    }

    /// Whether lookups currently skip this directory.
    #[must_use]
    pub const fn is_inactive(&self) -> bool {
        self.inactive
    }

    /// Enables or disables this directory for lookups.
    pub fn set_inactive(&mut self, inactive: bool) {
        self.inactive = inactive;
    }

    /// Directory could not be opened or held no database files.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.empty
    }

    /// Participates in lookups.
    #[must_use]
    pub const fn is_searchable(&self) -> bool {
        !self.inactive && !self.empty
    }
}

/// Database files in `dir`, sorted by file name.
fn database_files(dir: &Path, extension: &str) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
        })
        .collect();
    files.sort();
    Ok(files)
}
