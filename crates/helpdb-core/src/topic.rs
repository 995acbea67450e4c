//! Topic records.
//!
//! A [`Topic`] is either read from the database (`!!KEYWORD` record) or
//! synthesized (search listings, loaded files). Body lines are kept raw; the
//! rendered text is derived on first use and dropped whenever the lines
//! change.

use crate::index::Globals;
use crate::xref::{CrossRef, sort_cross_refs};
use crate::{Error, Result};
use std::cell::OnceCell;
use std::fs;
use std::path::Path;

/// Flags describing where a topic came from and how to show it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TopicFlags {
    /// Read from a database record.
    pub from_db: bool,
    /// Body is HTML.
    pub is_html: bool,
    /// HTML body lacks `<body>`/`<head>`/`<frame>` and needs wrapping.
    pub needs_body: bool,
    /// Show as plain text even if HTML.
    pub show_plain: bool,
}

/// A resolved or synthetic help topic.
#[derive(Debug, Clone, Default)]
pub struct Topic {
    /// Lookup keyword.
    pub keyword: String,
    /// Display title.
    pub title: String,
    /// `!!TAG` value.
    pub tag: Option<String>,
    /// Scroll position hint (line index) kept across navigation.
    pub position: usize,
    /// Origin and display flags.
    pub flags: TopicFlags,
    lines: Vec<String>,
    subtopics: Vec<CrossRef>,
    see_also: Vec<CrossRef>,
    rendered: OnceCell<String>,
}

impl Topic {
    /// Creates an empty topic.
    pub fn new(keyword: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            title: title.into(),
            ..Self::default()
        }
    }

    /// Loads a plain file as a topic. `.html`/`.htm` files are flagged HTML.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::NotFound(format!("{}: {e}", path.display())))?;
        let name = path.display().to_string();
        let mut topic = Self::new(name.clone(), name);
        topic.flags.is_html = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("html") || ext.eq_ignore_ascii_case("htm"));
        topic.set_lines(content.lines().map(str::to_string).collect());
        if topic.flags.is_html {
            topic.flags.needs_body = !has_document_structure(&topic.lines);
        }
        Ok(topic)
    }

    /// Raw body lines.
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Mutable body lines. Invalidates the rendered text.
    pub fn lines_mut(&mut self) -> &mut Vec<String> {
        self.rendered.take();
        &mut self.lines
    }

    /// Replaces the body. Invalidates the rendered text.
    pub fn set_lines(&mut self, lines: Vec<String>) {
        self.rendered.take();
        self.lines = lines;
    }

    /// Appends one body line. Invalidates the rendered text.
    pub fn push_line(&mut self, line: impl Into<String>) {
        self.rendered.take();
        self.lines.push(line.into());
    }

    /// Sorted subtopic list.
    #[must_use]
    pub fn subtopics(&self) -> &[CrossRef] {
        &self.subtopics
    }

    /// Sorted see-also list.
    #[must_use]
    pub fn see_also(&self) -> &[CrossRef] {
        &self.see_also
    }

    /// Replaces the subtopic list, sorting it.
    pub fn set_subtopics(&mut self, mut refs: Vec<CrossRef>) {
        sort_cross_refs(&mut refs);
        self.subtopics = refs;
    }

    /// Replaces the see-also list, sorting it.
    pub fn set_see_also(&mut self, mut refs: Vec<CrossRef>) {
        sort_cross_refs(&mut refs);
        self.see_also = refs;
    }

    /// Takes over the content of a newer copy of the same topic.
    ///
    /// The scroll position is kept.
    pub fn absorb(&mut self, newer: Self) {
        self.title = newer.title;
        self.tag = newer.tag;
        self.flags = newer.flags;
        self.subtopics = newer.subtopics;
        self.see_also = newer.see_also;
        self.set_lines(newer.lines);
    }

    /// Drops the cached rendering (e.g. after the database globals changed).
    pub fn invalidate(&mut self) {
        self.rendered.take();
    }

    /// Whether the rendered text is currently cached.
    #[must_use]
    pub fn is_rendered(&self) -> bool {
        self.rendered.get().is_some()
    }

    /// Display text: header, tag text, body, footer.
    ///
    /// Tag text is included only when the topic's tag differs from the main
    /// tag. HTML bodies without document structure get a synthetic
    /// `<html><body>` wrapper unless shown plain.
    pub fn rendered(&self, globals: &Globals) -> &str {
        self.rendered.get_or_init(|| self.render(globals))
    }

    fn render(&self, globals: &Globals) -> String {
        let mut out: Vec<&str> = Vec::with_capacity(self.lines.len() + 4);
        let wrap = self.flags.is_html && self.flags.needs_body && !self.flags.show_plain;

        if wrap {
            out.push("<html><body>");
        }
        if let Some(header) = &globals.header {
            out.extend(header.iter().map(String::as_str));
        }
        let off_main = match (&self.tag, &globals.main_tag) {
            (Some(tag), Some(main)) => tag != main,
            (Some(_), None) => true,
            _ => false,
        };
        if off_main {
            if let Some(tag_text) = &globals.tag_text {
                out.extend(tag_text.iter().map(String::as_str));
            }
        }
        out.extend(self.lines.iter().map(String::as_str));
        if let Some(footer) = &globals.footer {
            out.extend(footer.iter().map(String::as_str));
        }
        if wrap {
            out.push("</body></html>");
        }
        out.join("\n")
    }
}

/// Number of leading lines inspected for document structure tags.
pub const STRUCTURE_SCAN_LINES: usize = 50;

/// Whether the first [`STRUCTURE_SCAN_LINES`] lines contain a body, head or
/// frame tag.
#[must_use]
pub fn has_document_structure(lines: &[String]) -> bool {
    lines.iter().take(STRUCTURE_SCAN_LINES).any(|line| {
        let lower = line.to_ascii_lowercase();
        ["<body", "<head", "<frame"].iter().any(|tag| lower.contains(tag))
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn globals() -> Globals {
        Globals {
            header: Some(vec!["HEAD".into()]),
            footer: Some(vec!["FOOT".into()]),
            main_tag: Some("stable".into()),
            tag_text: Some(vec!["(beta feature)".into()]),
        }
    }

    #[test]
    fn test_rendered_includes_decorations() {
        let mut topic = Topic::new("k", "K");
        topic.set_lines(vec!["body".into()]);
        assert_eq!(topic.rendered(&globals()), "HEAD\nbody\nFOOT");

        topic.tag = Some("beta".into());
        topic.invalidate();
        assert_eq!(
            topic.rendered(&globals()),
            "HEAD\n(beta feature)\nbody\nFOOT"
        );
    }

    #[test]
    fn test_mutation_invalidates_rendering() {
        let mut topic = Topic::new("k", "K");
        topic.push_line("one");
        let empty = Globals::default();
        assert_eq!(topic.rendered(&empty), "one");
        assert!(topic.is_rendered());

        topic.lines_mut().push("two".into());
        assert!(!topic.is_rendered());
        assert_eq!(topic.rendered(&empty), "one\ntwo");
    }

    #[test]
    fn test_synthetic_body_wrapping() {
        let mut topic = Topic::new("k", "K");
        topic.flags.is_html = true;
        topic.flags.needs_body = true;
        topic.push_line("<p>hi</p>");
        assert_eq!(
            topic.rendered(&Globals::default()),
            "<html><body>\n<p>hi</p>\n</body></html>"
        );

        topic.flags.show_plain = true;
        topic.invalidate();
        assert_eq!(topic.rendered(&Globals::default()), "<p>hi</p>");
    }

    #[test]
    fn test_structure_detection_limited_to_leading_lines() {
        let mut lines: Vec<String> = vec!["<p>".into(); STRUCTURE_SCAN_LINES];
        lines.push("<BODY>".into());
        assert!(!has_document_structure(&lines));
        assert!(has_document_structure(&["<HEAD><title>x</title>".to_string()]));
        assert!(has_document_structure(&["<frameset>".to_string()]));
    }

    #[test]
    fn test_cross_refs_are_sorted_on_set() {
        let mut topic = Topic::new("top", "Top");
        topic.set_subtopics(vec![
            CrossRef::new("Item 10", "i10", "top"),
            CrossRef::new("Item 2", "i2", "top"),
        ]);
        let order: Vec<_> = topic.subtopics().iter().map(|r| r.keyword.as_str()).collect();
        assert_eq!(order, vec!["i2", "i10"]);
    }

    #[test]
    fn test_absorb_keeps_position() {
        let mut current = Topic::new("k", "Old");
        current.position = 42;
        current.push_line("old");

        let mut newer = Topic::new("k", "New");
        newer.push_line("new");
        current.absorb(newer);

        assert_eq!(current.title, "New");
        assert_eq!(current.lines(), ["new".to_string()]);
        assert_eq!(current.position, 42);
    }

    #[test]
    fn test_from_file_html_detection() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("page.html");
        fs::write(&path, "<p>fragment</p>\n").unwrap();
        let topic = Topic::from_file(&path).unwrap();
        assert!(topic.flags.is_html);
        assert!(topic.flags.needs_body);
        assert!(!topic.flags.from_db);

        assert!(Topic::from_file(&dir.path().join("missing.txt")).is_err());
    }
}
