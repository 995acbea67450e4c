//! Directive recognition and conditional line filtering.
//!
//! Database files are line oriented. Lines starting with `!!` are
//! directives; everything else is body text. [`DirectiveReader`] walks a
//! line stream, evaluates `!!IFDEF` / `!!IFNDEF` / `!!ELSE` / `!!ENDIF`
//! against a [`Defines`] table, honours `!!PROTECT` spans, and yields only
//! the lines that are active, each tagged with its byte offset so callers
//! can seek straight back to a record later.
//!
//! ```rust
//! use helpdb_core::directive::{DirectiveKind, DirectiveReader, LineContent};
//! use helpdb_core::Defines;
//!
//! let text = "!!IFDEF X\nA\n!!ELSE\nB\n!!ENDIF\n";
//! let defines: Defines = ["X"].into_iter().collect();
//! let lines: Vec<_> = DirectiveReader::new(text.as_bytes(), &defines)
//!     .map(|line| line.unwrap().content)
//!     .collect();
//! assert_eq!(lines, vec![LineContent::Text("A".to_string())]);
//! ```

use crate::Defines;
use std::io::{self, BufRead};

/// Deepest conditional nesting tracked. Deeper scopes reuse the last level.
pub const MAX_NESTING: usize = 16;

/// Every directive the processor distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectiveKind {
    /// `!!KEYWORD kw1 kw2 ...` starts a topic record.
    Keyword,
    /// `!!TITLE text`
    Title,
    /// `!!TEXT` starts a plain-text body.
    Text,
    /// `!!HTML` starts an HTML body.
    Html,
    /// `!!SUBTOPICS` starts a cross-reference token section.
    Subtopics,
    /// `!!SEEALSO` starts a cross-reference token section.
    SeeAlso,
    /// `!!HEADER` starts the global header block.
    Header,
    /// `!!FOOTER` starts the global footer block.
    Footer,
    /// `!!MAINTAG tag`
    MainTag,
    /// `!!TAG tag`
    Tag,
    /// `!!TAGTEXT` starts the global tag text block.
    TagText,
    /// `!!LATEX kw outfile` starts a latex block record.
    Latex,
    /// `!!INCLUDE "file" [hint]`
    Include,
    /// `!!REDIRECT oldkw newkw`
    Redirect,
    /// `!! comment`
    Comment,
    /// `!!IFDEF tok`
    IfDef,
    /// `!!IFNDEF tok`
    IfNDef,
    /// `!!ELSE`
    Else,
    /// `!!ENDIF`
    EndIf,
    /// `!!PROTECT` disables directive recognition.
    Protect,
    /// `!!UNPROTECT` re-enables directive recognition.
    Unprotect,
    /// Any other `!!` line. Terminates the enclosing record.
    Unknown,
}

// Longer names that share a prefix with shorter ones come first.
const DIRECTIVE_NAMES: &[(&str, DirectiveKind)] = &[
    ("KEYWORD", DirectiveKind::Keyword),
    ("TITLE", DirectiveKind::Title),
    ("TEXT", DirectiveKind::Text),
    ("HTML", DirectiveKind::Html),
    ("SUBTOPICS", DirectiveKind::Subtopics),
    ("SEEALSO", DirectiveKind::SeeAlso),
    ("HEADER", DirectiveKind::Header),
    ("FOOTER", DirectiveKind::Footer),
    ("MAINTAG", DirectiveKind::MainTag),
    ("TAGTEXT", DirectiveKind::TagText),
    ("TAG", DirectiveKind::Tag),
    ("LATEX", DirectiveKind::Latex),
    ("INCLUDE", DirectiveKind::Include),
    ("REDIRECT", DirectiveKind::Redirect),
    ("IFDEF", DirectiveKind::IfDef),
    ("IFNDEF", DirectiveKind::IfNDef),
    ("ELSE", DirectiveKind::Else),
    ("ENDIF", DirectiveKind::EndIf),
    ("UNPROTECT", DirectiveKind::Unprotect),
    ("PROTECT", DirectiveKind::Protect),
];

impl DirectiveKind {
    /// Conditional directives are consumed by the reader, never yielded.
    #[must_use]
    pub const fn is_conditional(self) -> bool {
        matches!(self, Self::IfDef | Self::IfNDef | Self::Else | Self::EndIf)
    }

    /// Directives that end the record in progress.
    #[must_use]
    pub const fn ends_record(self) -> bool {
        matches!(self, Self::Keyword | Self::Latex | Self::Unknown)
    }

    /// Directives that open a global block (first occurrence wins).
    #[must_use]
    pub const fn is_global_block(self) -> bool {
        matches!(self, Self::Header | Self::Footer | Self::TagText)
    }
}

/// A recognized directive line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    /// What kind of directive this is.
    pub kind: DirectiveKind,
    /// Everything after the directive word, trimmed.
    pub args: String,
}

impl Directive {
    /// Recognize a directive line. Returns `None` for body text.
    ///
    /// Matching is a case-insensitive prefix match on the word following
    /// `!!`, so `!!keywords` is a `KEYWORD` directive.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let rest = line.strip_prefix("!!")?;
        if rest.is_empty() || rest.starts_with(char::is_whitespace) {
            return Some(Self {
                kind: DirectiveKind::Comment,
                args: rest.trim().to_string(),
            });
        }

        let (word, args) = rest
            .split_once(char::is_whitespace)
            .unwrap_or((rest, ""));
        let upper = word.to_ascii_uppercase();
        let kind = DIRECTIVE_NAMES
            .iter()
            .find(|(name, _)| upper.starts_with(name))
            .map_or(DirectiveKind::Unknown, |&(_, kind)| kind);

        Some(Self {
            kind,
            args: args.trim().to_string(),
        })
    }

    /// Whitespace-separated argument tokens.
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.args.split_whitespace()
    }

    /// The first argument token, if any.
    #[must_use]
    pub fn first_token(&self) -> Option<&str> {
        self.tokens().next()
    }
}

/// Stack of conditional flags, one per open `!!IFDEF`/`!!IFNDEF` scope.
///
/// Indexing stores a copy of the stack as it stood at each record so a later
/// read can resume with the enclosing scopes still open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConditionStack {
    flags: [bool; MAX_NESTING],
    depth: usize,
}

impl ConditionStack {
    /// Creates an empty stack (every line active).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a scope. Past [`MAX_NESTING`] the deepest level is overwritten.
    pub fn push(&mut self, flag: bool) {
        if self.depth < MAX_NESTING {
            self.depth += 1;
        }
        self.flags[self.depth - 1] = flag;
    }

    /// Flips the innermost scope. No-op without an open scope.
    pub fn flip(&mut self) {
        if self.depth > 0 {
            self.flags[self.depth - 1] = !self.flags[self.depth - 1];
        }
    }

    /// Closes the innermost scope. No-op without an open scope.
    pub fn pop(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Current nesting depth.
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.depth
    }

    /// A line is active only if every open scope is true.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.flags[..self.depth].iter().all(|&flag| flag)
    }

    /// Applies a conditional directive.
    pub fn apply(&mut self, directive: &Directive, defines: &Defines) {
        match directive.kind {
            DirectiveKind::IfDef => {
                self.push(directive.first_token().is_some_and(|t| defines.isdef(t)));
            },
            DirectiveKind::IfNDef => {
                self.push(!directive.first_token().is_some_and(|t| defines.isdef(t)));
            },
            DirectiveKind::Else => self.flip(),
            DirectiveKind::EndIf => self.pop(),
            _ => {},
        }
    }
}

/// Content of an active line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineContent {
    /// A non-conditional directive.
    Directive(Directive),
    /// Body text, with the line terminator removed.
    Text(String),
}

/// An active line with the byte offset of its first character.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// Byte offset of the line start within the file.
    pub offset: u64,
    /// Directive or text.
    pub content: LineContent,
}

/// Iterator over the active lines of one database file.
///
/// LF and CRLF terminators are both accepted. Unterminated conditional
/// scopes at end of input are simply dropped.
pub struct DirectiveReader<'a, R> {
    reader: R,
    defines: &'a Defines,
    conditions: ConditionStack,
    protected: bool,
    offset: u64,
    buf: Vec<u8>,
}

impl<'a, R: BufRead> DirectiveReader<'a, R> {
    /// Reads from the start of a stream.
    pub fn new(reader: R, defines: &'a Defines) -> Self {
        Self::at_offset(reader, 0, defines)
    }

    /// Reads from a stream already positioned at `offset`.
    pub fn at_offset(reader: R, offset: u64, defines: &'a Defines) -> Self {
        Self::resume(reader, offset, defines, ConditionStack::new())
    }

    /// Reads from a stream positioned at `offset` with the scopes that were
    /// open there.
    pub fn resume(reader: R, offset: u64, defines: &'a Defines, conditions: ConditionStack) -> Self {
        Self {
            reader,
            defines,
            conditions,
            protected: false,
            offset,
            buf: Vec::with_capacity(256),
        }
    }

    /// Current conditional depth, mostly for diagnostics.
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.conditions.depth()
    }

    /// Scopes open after the last yielded line.
    #[must_use]
    pub const fn conditions(&self) -> &ConditionStack {
        &self.conditions
    }

    fn read_raw(&mut self) -> io::Result<Option<(u64, String)>> {
        self.buf.clear();
        let read = self.reader.read_until(b'\n', &mut self.buf)?;
        if read == 0 {
            return Ok(None);
        }
        let start = self.offset;
        self.offset += read as u64;

        let mut end = self.buf.len();
        if end > 0 && self.buf[end - 1] == b'\n' {
            end -= 1;
        }
        if end > 0 && self.buf[end - 1] == b'\r' {
            end -= 1;
        }
        Ok(Some((
            start,
            String::from_utf8_lossy(&self.buf[..end]).into_owned(),
        )))
    }
}

impl<R: BufRead> Iterator for DirectiveReader<'_, R> {
    type Item = io::Result<Line>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (offset, text) = match self.read_raw() {
                Ok(Some(raw)) => raw,
                Ok(None) => return None,
                Err(e) => return Some(Err(e)),
            };

            if self.protected {
                if let Some(directive) = Directive::parse(&text) {
                    if directive.kind == DirectiveKind::Unprotect {
                        self.protected = false;
                        continue;
                    }
                }
                if self.conditions.is_active() {
                    return Some(Ok(Line {
                        offset,
                        content: LineContent::Text(text),
                    }));
                }
                continue;
            }

            match Directive::parse(&text) {
                Some(directive) if directive.kind.is_conditional() => {
                    self.conditions.apply(&directive, self.defines);
                },
                _ if !self.conditions.is_active() => {},
                Some(directive) => match directive.kind {
                    DirectiveKind::Protect => self.protected = true,
                    DirectiveKind::Unprotect => {},
                    _ => {
                        return Some(Ok(Line {
                            offset,
                            content: LineContent::Directive(directive),
                        }));
                    },
                },
                None => {
                    return Some(Ok(Line {
                        offset,
                        content: LineContent::Text(text),
                    }));
                },
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn active_text(input: &str, defines: &Defines) -> Vec<String> {
        DirectiveReader::new(input.as_bytes(), defines)
            .map(|line| match line.unwrap().content {
                LineContent::Text(text) => text,
                LineContent::Directive(d) => format!("<{:?}>", d.kind),
            })
            .collect()
    }

    #[test]
    fn test_recognizes_directives_case_insensitively() {
        let d = Directive::parse("!!keyword foo bar").unwrap();
        assert_eq!(d.kind, DirectiveKind::Keyword);
        assert_eq!(d.tokens().collect::<Vec<_>>(), vec!["foo", "bar"]);

        assert_eq!(
            Directive::parse("!!TagText").unwrap().kind,
            DirectiveKind::TagText
        );
        assert_eq!(
            Directive::parse("!!TAG beta").unwrap().kind,
            DirectiveKind::Tag
        );
        assert_eq!(
            Directive::parse("!!SeeAlso").unwrap().kind,
            DirectiveKind::SeeAlso
        );
        assert_eq!(
            Directive::parse("!!KEYWORDS many").unwrap().kind,
            DirectiveKind::Keyword
        );
        assert_eq!(
            Directive::parse("!!UNPROTECT").unwrap().kind,
            DirectiveKind::Unprotect
        );
        assert_eq!(
            Directive::parse("!! just a comment").unwrap().kind,
            DirectiveKind::Comment
        );
        assert_eq!(Directive::parse("!!").unwrap().kind, DirectiveKind::Comment);
        assert_eq!(
            Directive::parse("!!BOGUS").unwrap().kind,
            DirectiveKind::Unknown
        );
        assert!(Directive::parse("plain ! text").is_none());
        assert!(Directive::parse(" !!KEYWORD indented").is_none());
    }

    #[test]
    fn test_ifdef_else_selects_defined_branch() {
        let defines: Defines = ["X"].into_iter().collect();
        let input = "!!IFDEF X\nA\n!!ELSE\nB\n!!ENDIF\n";
        assert_eq!(active_text(input, &defines), vec!["A"]);

        let input = "!!IFNDEF X\nA\n!!ELSE\nB\n!!ENDIF\n";
        assert_eq!(active_text(input, &defines), vec!["B"]);
    }

    #[test]
    fn test_nested_conditionals_require_all_flags() {
        let defines: Defines = ["OUTER"].into_iter().collect();
        let input = "\
!!IFDEF OUTER
a
!!IFDEF INNER
b
!!ELSE
c
!!ENDIF
d
!!ENDIF
e
";
        assert_eq!(active_text(input, &defines), vec!["a", "c", "d", "e"]);
    }

    #[test]
    fn test_stray_endif_and_unterminated_scope() {
        let defines = Defines::new();
        assert_eq!(active_text("!!ENDIF\na\n", &defines), vec!["a"]);
        assert_eq!(
            active_text("a\n!!IFDEF MISSING\nb\n", &defines),
            vec!["a"]
        );
    }

    #[test]
    fn test_depth_clamps_at_limit() {
        let mut stack = ConditionStack::new();
        for _ in 0..MAX_NESTING + 4 {
            stack.push(true);
        }
        assert_eq!(stack.depth(), MAX_NESTING);
        stack.push(false);
        assert_eq!(stack.depth(), MAX_NESTING);
        assert!(!stack.is_active());
        stack.pop();
        assert_eq!(stack.depth(), MAX_NESTING - 1);
        assert!(stack.is_active());
    }

    #[test]
    fn test_protect_span_is_literal() {
        let defines = Defines::new();
        let input = "!!PROTECT\n!!KEYWORD literal\n!!IFDEF NOPE\n!!UNPROTECT\n!!TEXT\n";
        assert_eq!(
            active_text(input, &defines),
            vec!["!!KEYWORD literal", "!!IFDEF NOPE", "<Text>"]
        );
    }

    #[test]
    fn test_crlf_and_offsets() {
        let defines = Defines::new();
        let input = "!!KEYWORD a\r\nhello\r\nworld";
        let lines: Vec<Line> = DirectiveReader::new(input.as_bytes(), &defines)
            .map(Result::unwrap)
            .collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].offset, 0);
        assert_eq!(lines[1].offset, 13);
        assert_eq!(lines[1].content, LineContent::Text("hello".into()));
        assert_eq!(lines[2].offset, 20);
        assert_eq!(lines[2].content, LineContent::Text("world".into()));
    }

    #[test]
    fn test_at_offset_reports_absolute_offsets() {
        let defines = Defines::new();
        let input = "skip\n!!TITLE T\n";
        let reader = std::io::Cursor::new(&input.as_bytes()[5..]);
        let first = DirectiveReader::at_offset(reader, 5, &defines)
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(first.offset, 5);
    }

    #[test]
    fn test_resume_keeps_enclosing_scopes() {
        let defines: Defines = ["X"].into_iter().collect();
        let input = "!!IFDEF X\n!!KEYWORD k\nA\n!!ELSE\nB\n!!ENDIF\nC\n";

        let mut reader = DirectiveReader::new(input.as_bytes(), &defines);
        let keyword = reader.next().unwrap().unwrap();
        let open = reader.conditions().clone();
        assert_eq!(open.depth(), 1);

        let start = usize::try_from(keyword.offset).unwrap();
        let resumed: Vec<_> = DirectiveReader::resume(
            &input.as_bytes()[start..],
            keyword.offset,
            &defines,
            open,
        )
        .skip(1)
        .map(|line| line.unwrap().content)
        .collect();
        assert_eq!(
            resumed,
            vec![
                LineContent::Text("A".into()),
                LineContent::Text("C".into()),
            ]
        );
    }

    proptest! {
        #[test]
        fn prop_reader_never_panics_and_depth_bounded(
            ops in prop::collection::vec(0u8..6, 0..64)
        ) {
            let defines: Defines = ["A"].into_iter().collect();
            let mut input = String::new();
            for op in ops {
                input.push_str(match op {
                    0 => "!!IFDEF A\n",
                    1 => "!!IFNDEF A\n",
                    2 => "!!ELSE\n",
                    3 => "!!ENDIF\n",
                    4 => "text\n",
                    _ => "!!TITLE t\n",
                });
            }
            let mut reader = DirectiveReader::new(input.as_bytes(), &defines);
            while let Some(line) = reader.next() {
                prop_assert!(line.is_ok());
                prop_assert!(reader.depth() <= MAX_NESTING);
            }
        }

        #[test]
        fn prop_defined_ifdef_matches_undefined_ifndef(body in "[a-z]{1,12}") {
            let defined: Defines = ["T"].into_iter().collect();
            let empty = Defines::new();
            let a = format!("!!IFDEF T\n{body}\n!!ENDIF\n");
            let b = format!("!!IFNDEF T\n{body}\n!!ENDIF\n");
            prop_assert_eq!(active_text(&a, &defined), active_text(&b, &empty));
        }
    }
}
