//! Define table consulted by `!!IFDEF` / `!!IFNDEF`.

use std::collections::BTreeSet;

/// Set of defined conditional-compilation tokens.
///
/// Tokens are compared case-sensitively, matching how they are written in
/// the database files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Defines {
    tokens: BTreeSet<String>,
}

impl Defines {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defines `token`. Returns `false` if it was already defined.
    pub fn define(&mut self, token: &str) -> bool {
        self.tokens.insert(token.trim().to_string())
    }

    /// Removes `token`. Returns `false` if it was not defined.
    pub fn undef(&mut self, token: &str) -> bool {
        self.tokens.remove(token.trim())
    }

    /// Whether `token` is currently defined.
    #[must_use]
    pub fn isdef(&self, token: &str) -> bool {
        self.tokens.contains(token.trim())
    }

    /// Iterates the defined tokens in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().map(String::as_str)
    }
}

impl<S: AsRef<str>> FromIterator<S> for Defines {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut defines = Self::new();
        for token in iter {
            defines.define(token.as_ref());
        }
        defines
    }
}
