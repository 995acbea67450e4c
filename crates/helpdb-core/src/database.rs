//! The merged help database.
//!
//! [`Database`] owns one [`DirectoryIndex`] per search-path directory, in
//! priority order, plus the define table and the global decoration blocks.
//! Lookups walk the directories in order and the first match wins. Topic
//! bodies are never held in the index; [`Database::read`] seeks to the
//! recorded offset and re-runs the directive processor from there.
//!
//! ## Example
//!
//! ```rust,no_run
//! use helpdb_core::{Database, config::DatabaseConfig};
//!
//! # fn main() -> helpdb_core::Result<()> {
//! let config = DatabaseConfig {
//!     system_path: vec!["/usr/share/helpdb".into()],
//!     ..DatabaseConfig::default()
//! };
//! let db = Database::open(&config)?;
//! if let Some(topic) = db.read("install")? {
//!     println!("{}", topic.rendered(db.globals()));
//! }
//! # Ok(())
//! # }
//! ```

use crate::config::DatabaseConfig;
use crate::directive::{ConditionStack, DirectiveKind, DirectiveReader, LineContent};
use crate::index::{BuildContext, DirectoryIndex, Globals, KeywordRecord, LatexRecord};
use crate::topic::{Topic, has_document_structure};
use crate::xref::{CrossRef, split_anchor};
use crate::{Defines, Error, Result};
use regex::{Regex, RegexBuilder};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Body lines of a `!!LATEX` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatexBlock {
    /// Lookup keyword.
    pub keyword: String,
    /// Output file the block is meant for.
    pub outfile: String,
    /// Raw lines up to the next record.
    pub lines: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Body,
    Subtopics,
    SeeAlso,
    Skip,
}

/// Keyword database built over an ordered search path.
#[derive(Debug)]
pub struct Database {
    search_path: Vec<PathBuf>,
    dirs: Vec<DirectoryIndex>,
    merged: HashSet<PathBuf>,
    globals: Globals,
    defines: Defines,
    extension: String,
    top_topic: String,
    debug: bool,
}

impl Database {
    /// Builds the database described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the effective search path is empty.
    /// Unopenable directories and unreadable files are logged, not fatal.
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        let search_path = config.effective_search_path();
        if search_path.is_empty() {
            return Err(Error::Config("No search path configured".into()));
        }

        let mut db = Self {
            search_path,
            dirs: Vec::new(),
            merged: HashSet::new(),
            globals: Globals::default(),
            defines: config.defines.iter().collect(),
            extension: config.extension.clone(),
            top_topic: config.top_topic.clone(),
            debug: config.debug,
        };
        db.rebuild();
        Ok(db)
    }

    /// Re-indexes every search-path directory from scratch.
    ///
    /// Picks up define changes and file edits. Directory activation flags
    /// survive the rebuild.
    pub fn rebuild(&mut self) {
        let inactive: HashSet<PathBuf> = self
            .dirs
            .iter()
            .filter(|d| d.is_inactive())
            .map(|d| d.path().to_path_buf())
            .collect();

        self.merged.clear();
        self.globals = Globals::default();
        let mut ctx = BuildContext {
            defines: &self.defines,
            extension: &self.extension,
            merged: &mut self.merged,
            globals: &mut self.globals,
        };

        self.dirs = self
            .search_path
            .iter()
            .map(|path| {
                let mut index = DirectoryIndex::build(path, &mut ctx);
                index.set_inactive(inactive.contains(path));
                index
            })
            .collect();

        if self.dirs.iter().all(DirectoryIndex::is_empty) {
            warn!("No database files found on the search path");
        } else {
            info!(
                directories = self.dirs.len(),
                files = self.merged.len(),
                "Database built"
            );
        }
    }

    /// Directory indexes in search-path order.
    #[must_use]
    pub fn directories(&self) -> &[DirectoryIndex] {
        &self.dirs
    }

    /// Enables or disables a search-path directory for lookups.
    ///
    /// Returns `false` if `path` is not on the search path.
    pub fn set_active(&mut self, path: &Path, active: bool) -> bool {
        match self.dirs.iter_mut().find(|d| d.path() == path) {
            Some(dir) => {
                dir.set_inactive(!active);
                debug!(dir = %path.display(), active, "Directory activation changed");
                true
            },
            None => false,
        }
    }

    /// Keeps unresolved cross-references as `unknown: <kw>` entries.
    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    /// Defines a conditional token. Takes effect for later reads and scans;
    /// call [`Database::rebuild`] to re-index.
    pub fn define(&mut self, token: &str) -> bool {
        self.defines.define(token)
    }

    /// Removes a conditional token.
    pub fn undef(&mut self, token: &str) -> bool {
        self.defines.undef(token)
    }

    /// Whether a conditional token is defined.
    #[must_use]
    pub fn isdef(&self, token: &str) -> bool {
        self.defines.isdef(token)
    }

    /// The define table.
    #[must_use]
    pub const fn defines(&self) -> &Defines {
        &self.defines
    }

    fn searchable(&self) -> impl Iterator<Item = &DirectoryIndex> {
        self.dirs.iter().filter(|d| d.is_searchable())
    }

    /// First keyword record for `keyword` across the active directories.
    #[must_use]
    pub fn resolve(&self, keyword: &str) -> Option<&KeywordRecord> {
        self.searchable().find_map(|d| d.keyword(keyword))
    }

    /// Redirect target for `keyword`, first match across active directories.
    #[must_use]
    pub fn alias(&self, keyword: &str) -> Option<&str> {
        self.searchable()
            .find_map(|d| d.redirect(keyword))
            .map(|r| r.to.as_str())
    }

    /// [`resolve`](Self::resolve), falling back to one level of redirect.
    #[must_use]
    pub fn lookup(&self, keyword: &str) -> Option<&KeywordRecord> {
        self.resolve(keyword)
            .or_else(|| self.alias(keyword).and_then(|to| self.resolve(to)))
    }

    /// Reads the topic for `keyword`.
    ///
    /// Returns `Ok(None)` when neither the keyword nor a redirect for it
    /// resolves.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the indexed file can no longer be read.
    pub fn read(&self, keyword: &str) -> Result<Option<Topic>> {
        let Some(record) = self.lookup(keyword) else {
            debug!(keyword, "No record");
            return Ok(None);
        };

        let mut topic = Topic::new(record.keyword.clone(), record.title.clone());
        topic.tag.clone_from(&record.tag);
        topic.flags.from_db = true;
        topic.flags.is_html = record.is_html;

        let mut body = Vec::new();
        let mut subtopics = Vec::new();
        let mut see_also = Vec::new();
        let mut section = Section::Preamble;

        // The first line is the record's own KEYWORD directive.
        for line in self
            .open_at(&record.file, record.offset, record.conditions.clone())?
            .skip(1)
        {
            let directive = match line?.content {
                LineContent::Text(text) => {
                    match section {
                        Section::Body => body.push(text),
                        Section::Subtopics => self.collect_refs(&text, &topic.keyword, &mut subtopics),
                        Section::SeeAlso => self.collect_refs(&text, &topic.keyword, &mut see_also),
                        Section::Preamble | Section::Skip => {},
                    }
                    continue;
                },
                LineContent::Directive(directive) => directive,
            };

            if directive.kind.ends_record() {
                break;
            }
            match directive.kind {
                DirectiveKind::Title => topic.title.clone_from(&directive.args),
                DirectiveKind::Tag => topic.tag = directive.first_token().map(str::to_string),
                DirectiveKind::Text => section = Section::Body,
                DirectiveKind::Html => {
                    topic.flags.is_html = true;
                    section = Section::Body;
                },
                DirectiveKind::Subtopics => {
                    section = Section::Subtopics;
                    self.collect_refs(&directive.args, &topic.keyword, &mut subtopics);
                },
                DirectiveKind::SeeAlso => {
                    section = Section::SeeAlso;
                    self.collect_refs(&directive.args, &topic.keyword, &mut see_also);
                },
                DirectiveKind::Include => {
                    if include(&record.file, &directive.args, &mut body) {
                        topic.flags.is_html = true;
                    }
                    section = Section::Body;
                },
                kind if kind.is_global_block() => section = Section::Skip,
                _ => {},
            }
        }

        if topic.flags.is_html {
            topic.flags.needs_body = !has_document_structure(&body);
        }
        topic.set_lines(body);
        topic.set_subtopics(subtopics);
        topic.set_see_also(see_also);
        Ok(Some(topic))
    }

    /// Reads the configured top-level topic.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the top-level keyword does not resolve.
    pub fn top(&self) -> Result<Topic> {
        self.read(&self.top_topic)?.ok_or_else(|| {
            Error::Config(format!("Top-level topic '{}' not found", self.top_topic))
        })
    }

    /// Configured top-level keyword.
    #[must_use]
    pub fn top_keyword(&self) -> &str {
        &self.top_topic
    }

    fn open_at<'a>(
        &'a self,
        file: &Path,
        offset: u64,
        conditions: ConditionStack,
    ) -> Result<DirectiveReader<'a, BufReader<File>>> {
        let mut handle = File::open(file)?;
        handle.seek(SeekFrom::Start(offset))?;
        Ok(DirectiveReader::resume(
            BufReader::new(handle),
            offset,
            &self.defines,
            conditions,
        ))
    }

    fn collect_refs(&self, tokens: &str, owner: &str, out: &mut Vec<CrossRef>) {
        for token in tokens.split_whitespace() {
            match self.resolve_ref(token) {
                Some((description, keyword)) => out.push(CrossRef::new(description, keyword, owner)),
                None if self.debug => {
                    out.push(CrossRef::new(format!("unknown: {token}"), token, owner));
                },
                None => debug!(owner, keyword = token, "Dropping unresolved cross-reference"),
            }
        }
    }

    // Direct, then redirect, then the same two without the anchor.
    fn resolve_ref(&self, token: &str) -> Option<(String, String)> {
        if let Some(record) = self.resolve(token) {
            return Some((record.title.clone(), token.to_string()));
        }
        if let Some(record) = self.alias(token).and_then(|to| self.resolve(to)) {
            return Some((record.title.clone(), record.keyword.clone()));
        }
        let (base, Some(anchor)) = split_anchor(token) else {
            return None;
        };
        self.lookup(base)
            .map(|record| (record.title.clone(), format!("{}#{anchor}", record.keyword)))
    }

    /// Lists topics whose keyword or title matches `pattern`.
    ///
    /// The pattern is a case-insensitive regular expression. The result is a
    /// synthetic topic whose subtopics are the matches.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPattern`] if `pattern` does not compile.
    pub fn search(&self, pattern: &str) -> Result<Topic> {
        let regex = compile(pattern)?;
        let mut seen = HashSet::new();
        let mut matches = Vec::new();

        for dir in self.searchable() {
            for record in dir.keywords() {
                if !seen.insert(record.keyword.as_str()) {
                    continue;
                }
                if regex.is_match(&record.keyword) || regex.is_match(&record.title) {
                    matches.push(CrossRef::new(
                        record.title.clone(),
                        record.keyword.clone(),
                        pattern,
                    ));
                }
            }
        }

        debug!(pattern, matches = matches.len(), "Search finished");
        Ok(listing(
            pattern,
            format!("{} matches for {pattern}", matches.len()),
            matches,
        ))
    }

    /// Full-text scan of every active database file.
    ///
    /// Each topic is listed once, on its first body line matching `target`
    /// (a case-insensitive regular expression). Header, footer and tag text
    /// blocks are not searched. Files are always re-read.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPattern`] if `target` does not compile.
    pub fn scan(&self, target: &str) -> Result<Topic> {
        let regex = compile(target)?;
        let mut seen: HashSet<String> = HashSet::new();
        let mut hits = Vec::new();

        for file in self.searchable().flat_map(DirectoryIndex::files) {
            if let Err(e) = self.scan_file(file, &regex, &mut seen, &mut hits) {
                error!(file = %file.display(), "Failed to scan database file: {e}");
            }
        }

        let refs: Vec<CrossRef> = hits
            .into_iter()
            .map(|keyword| {
                let title = self
                    .resolve(&keyword)
                    .map_or_else(|| keyword.clone(), |r| r.title.clone());
                CrossRef::new(title, keyword, target)
            })
            .collect();

        debug!(target, topics = refs.len(), "Scan finished");
        Ok(listing(
            target,
            format!("{} topics containing {target}", refs.len()),
            refs,
        ))
    }

    fn scan_file(
        &self,
        file: &Path,
        regex: &Regex,
        seen: &mut HashSet<String>,
        hits: &mut Vec<String>,
    ) -> Result<()> {
        let mut current: Option<String> = None;
        let mut in_global = false;

        for line in self.open_at(file, 0, ConditionStack::new())? {
            match line?.content {
                LineContent::Directive(directive) => {
                    in_global = directive.kind.is_global_block();
                    match directive.kind {
                        DirectiveKind::Keyword => {
                            current = directive.first_token().map(str::to_string);
                        },
                        kind if kind.ends_record() => current = None,
                        _ => {},
                    }
                },
                LineContent::Text(text) => {
                    let Some(keyword) = &current else { continue };
                    if !in_global && regex.is_match(&text) && seen.insert(keyword.clone()) {
                        hits.push(keyword.clone());
                    }
                },
            }
        }
        Ok(())
    }

    /// Reads a `!!LATEX` block.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the indexed file can no longer be read.
    pub fn latex(&self, keyword: &str) -> Result<Option<LatexBlock>> {
        let Some(record) = self.searchable().find_map(|d| d.latex(keyword)) else {
            return Ok(None);
        };

        let mut lines = Vec::new();
        for line in self
            .open_at(&record.file, record.offset, record.conditions.clone())?
            .skip(1)
        {
            match line?.content {
                LineContent::Text(text) => lines.push(text),
                LineContent::Directive(d) if d.kind.ends_record() => break,
                LineContent::Directive(_) => {},
            }
        }

        Ok(Some(LatexBlock {
            keyword: record.keyword.clone(),
            outfile: record.outfile.clone(),
            lines,
        }))
    }

    /// Every latex record visible through the active directories.
    pub fn latex_records(&self) -> impl Iterator<Item = &LatexRecord> {
        let mut seen = HashSet::new();
        self.searchable()
            .flat_map(DirectoryIndex::latex_records)
            .filter(move |r| seen.insert(r.keyword.as_str()))
    }

    /// Global decoration blocks.
    #[must_use]
    pub const fn globals(&self) -> &Globals {
        &self.globals
    }

    /// `!!HEADER` lines.
    #[must_use]
    pub fn header(&self) -> Option<&[String]> {
        self.globals.header.as_deref()
    }

    /// `!!FOOTER` lines.
    #[must_use]
    pub fn footer(&self) -> Option<&[String]> {
        self.globals.footer.as_deref()
    }

    /// `!!MAINTAG` value.
    #[must_use]
    pub fn main_tag(&self) -> Option<&str> {
        self.globals.main_tag.as_deref()
    }

    /// `!!TAGTEXT` lines.
    #[must_use]
    pub fn tag_text(&self) -> Option<&[String]> {
        self.globals.tag_text.as_deref()
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Ok(RegexBuilder::new(pattern).case_insensitive(true).build()?)
}

fn listing(keyword: &str, title: String, refs: Vec<CrossRef>) -> Topic {
    let mut topic = Topic::new(keyword, title);
    topic.set_subtopics(refs);
    topic
}

/// Splices the lines of an `!!INCLUDE "file" [hint]` target into `body`.
///
/// Relative names are resolved against the including file's directory.
/// Returns `true` when the hint marks the content as HTML.
fn include(from: &Path, args: &str, body: &mut Vec<String>) -> bool {
    let args = args.trim();
    let (name, rest) = match args.strip_prefix('"') {
        Some(quoted) => quoted.split_once('"').unwrap_or((quoted, "")),
        None => args.split_once(char::is_whitespace).unwrap_or((args, "")),
    };
    if name.is_empty() {
        warn!(file = %from.display(), "INCLUDE without a file name");
        return false;
    }

    let target = from
        .parent()
        .map_or_else(|| PathBuf::from(name), |dir| dir.join(name));
    match fs::read(&target) {
        Ok(bytes) => {
            body.extend(String::from_utf8_lossy(&bytes).lines().map(str::to_string));
        },
        Err(e) => {
            error!(file = %target.display(), "Failed to include file: {e}");
            return false;
        },
    }

    rest.split_whitespace()
        .next()
        .is_some_and(|hint| hint.eq_ignore_ascii_case("html"))
}
