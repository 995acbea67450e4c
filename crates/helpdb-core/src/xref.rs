//! Cross-references and their display ordering.
//!
//! Subtopic and see-also lists are sorted by description with a "natural"
//! comparison: leading markup is ignored, runs of ASCII digits compare as
//! integers, and digit runs with the same value fall back to character
//! comparison so that `"007"` and `"07"` still have a fixed order.

use std::cmp::Ordering;

/// One subtopic or see-also entry of a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossRef {
    /// Text shown for the link (usually the target's title).
    pub description: String,
    /// Keyword the link resolves to, including any `#anchor`.
    pub keyword: String,
    /// Keyword of the topic that owns the list.
    pub owner: String,
}

impl CrossRef {
    /// Creates an entry.
    pub fn new(
        description: impl Into<String>,
        keyword: impl Into<String>,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            description: description.into(),
            keyword: keyword.into(),
            owner: owner.into(),
        }
    }

    /// Keyword with any `#anchor` suffix removed.
    #[must_use]
    pub fn target(&self) -> &str {
        split_anchor(&self.keyword).0
    }

    /// The `#anchor` suffix without the `#`, if any.
    #[must_use]
    pub fn anchor(&self) -> Option<&str> {
        split_anchor(&self.keyword).1
    }
}

/// Splits `kw#anchor` into `("kw", Some("anchor"))`.
#[must_use]
pub fn split_anchor(token: &str) -> (&str, Option<&str>) {
    match token.split_once('#') {
        Some((keyword, anchor)) => (keyword, Some(anchor)),
        None => (token, None),
    }
}

/// Removes leading whitespace and leading `<...>` tags.
#[must_use]
pub fn strip_leading_markup(text: &str) -> &str {
    let mut rest = text.trim_start();
    while rest.starts_with('<') {
        match rest.find('>') {
            Some(end) => rest = rest[end + 1..].trim_start(),
            None => break,
        }
    }
    rest
}

/// Natural ordering of two strings.
///
/// ```rust
/// use helpdb_core::xref::natural_cmp;
/// use std::cmp::Ordering;
///
/// assert_eq!(natural_cmp("Item 9", "Item 10"), Ordering::Less);
/// assert_eq!(natural_cmp("007", "07"), Ordering::Less);
/// ```
#[must_use]
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    let (mut i, mut j) = (0, 0);

    while i < a.len() && j < b.len() {
        if a[i].is_ascii_digit() && b[j].is_ascii_digit() {
            let run_a = digit_run(&a[i..]);
            let run_b = digit_run(&b[j..]);
            let ord = numeric_cmp(run_a, run_b).then_with(|| run_a.cmp(run_b));
            if ord != Ordering::Equal {
                return ord;
            }
            i += run_a.len();
            j += run_b.len();
        } else {
            let ord = a[i].cmp(&b[j]);
            if ord != Ordering::Equal {
                return ord;
            }
            i += 1;
            j += 1;
        }
    }

    (a.len() - i).cmp(&(b.len() - j))
}

fn digit_run(bytes: &[u8]) -> &[u8] {
    let len = bytes.iter().take_while(|b| b.is_ascii_digit()).count();
    &bytes[..len]
}

// Compares digit runs by value without parsing, so arbitrarily long runs work.
fn numeric_cmp(a: &[u8], b: &[u8]) -> Ordering {
    let a = trim_zeros(a);
    let b = trim_zeros(b);
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn trim_zeros(run: &[u8]) -> &[u8] {
    let zeros = run.iter().take_while(|&&b| b == b'0').count();
    &run[zeros..]
}

/// Compares two descriptions the way cross-reference lists are ordered.
#[must_use]
pub fn description_cmp(a: &str, b: &str) -> Ordering {
    natural_cmp(strip_leading_markup(a), strip_leading_markup(b))
}

/// Sorts a cross-reference list in place (stable).
pub fn sort_cross_refs(refs: &mut [CrossRef]) {
    refs.sort_by(|x, y| description_cmp(&x.description, &y.description));
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sorted(items: &[&str]) -> Vec<String> {
        let mut v: Vec<String> = items.iter().map(|s| (*s).to_string()).collect();
        v.sort_by(|a, b| description_cmp(a, b));
        v
    }

    #[test]
    fn test_numeric_runs_compare_as_integers() {
        assert_eq!(
            sorted(&["Item 10", "Item 2", "Item 1"]),
            vec!["Item 1", "Item 2", "Item 10"]
        );
        assert_eq!(natural_cmp("a2b", "a10a"), Ordering::Less);
        assert_eq!(
            natural_cmp("v99999999999999999999999", "v100000000000000000000000"),
            Ordering::Less
        );
    }

    #[test]
    fn test_equal_values_fall_back_to_characters() {
        assert_eq!(sorted(&["7", "07", "007"]), vec!["007", "07", "7"]);
        assert_eq!(sorted(&["07", "7", "007"]), vec!["007", "07", "7"]);
        assert_ne!(natural_cmp("007", "07"), Ordering::Equal);
        assert_ne!(natural_cmp("07", "7"), Ordering::Equal);
    }

    #[test]
    fn test_leading_markup_is_ignored() {
        assert_eq!(strip_leading_markup("  <b><i>Bold</i></b>"), "Bold</i></b>");
        assert_eq!(strip_leading_markup("<unterminated"), "<unterminated");
        assert_eq!(
            sorted(&["<b>Zeta</b>", "Alpha", "<i>Beta"]),
            vec!["Alpha", "<i>Beta", "<b>Zeta</b>"]
        );
    }

    #[test]
    fn test_prefix_sorts_first() {
        assert_eq!(natural_cmp("Item", "Item 1"), Ordering::Less);
        assert_eq!(natural_cmp("", "a"), Ordering::Less);
        assert_eq!(natural_cmp("same", "same"), Ordering::Equal);
    }

    #[test]
    fn test_cross_ref_anchor_split() {
        let xref = CrossRef::new("Install", "setup#unix", "top");
        assert_eq!(xref.target(), "setup");
        assert_eq!(xref.anchor(), Some("unix"));
        assert_eq!(CrossRef::new("d", "plain", "o").anchor(), None);
    }

    #[test]
    fn test_sort_cross_refs_is_stable() {
        let mut refs = vec![
            CrossRef::new("B", "b", "top"),
            CrossRef::new("A", "a1", "top"),
            CrossRef::new("A", "a2", "top"),
        ];
        sort_cross_refs(&mut refs);
        let keys: Vec<_> = refs.iter().map(|r| r.keyword.as_str()).collect();
        assert_eq!(keys, vec!["a1", "a2", "b"]);
    }

    proptest! {
        #[test]
        fn prop_equal_only_for_identical(a in "[a-c0-9 ]{0,8}", b in "[a-c0-9 ]{0,8}") {
            prop_assert_eq!(natural_cmp(&a, &b) == Ordering::Equal, a == b);
        }

        #[test]
        fn prop_antisymmetric(a in "[a-c0-9]{0,8}", b in "[a-c0-9]{0,8}") {
            prop_assert_eq!(natural_cmp(&a, &b), natural_cmp(&b, &a).reverse());
        }

        #[test]
        fn prop_transitive(
            a in "[a0-9]{0,6}",
            b in "[a0-9]{0,6}",
            c in "[a0-9]{0,6}",
        ) {
            if natural_cmp(&a, &b) != Ordering::Greater && natural_cmp(&b, &c) != Ordering::Greater {
                prop_assert_ne!(natural_cmp(&a, &c), Ordering::Greater);
            }
        }
    }
}
