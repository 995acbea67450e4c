#![allow(clippy::unwrap_used)]

use helpdb_core::xref::{natural_cmp, sort_cross_refs};
use helpdb_core::{CrossRef, Database, DatabaseConfig};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn open(dir: &Path, defines: &[&str]) -> Database {
    Database::open(&DatabaseConfig {
        system_path: vec![dir.to_path_buf()],
        defines: defines.iter().map(ToString::to_string).collect(),
        ..DatabaseConfig::default()
    })
    .unwrap()
}

fn write(dir: &TempDir, name: &str, content: &str) {
    fs::write(dir.path().join(name), content).unwrap();
}

#[test]
fn test_minimal_topic() {
    let dir = TempDir::new().unwrap();
    write(&dir, "a.hlp", "!!KEYWORD foo\n!!TITLE Foo\n!!TEXT\nhello\n");
    let db = open(dir.path(), &[]);

    assert_eq!(db.resolve("foo").unwrap().title, "Foo");
    assert_eq!(db.read("foo").unwrap().unwrap().lines(), ["hello".to_string()]);
}

#[test]
fn test_alias_resolves_to_same_record() {
    let dir = TempDir::new().unwrap();
    write(
        &dir,
        "a.hlp",
        "!!REDIRECT setup install\n!!REDIRECT config install\n!!KEYWORD install\n!!TITLE Installing\n",
    );
    let db = open(dir.path(), &[]);

    for alias in ["setup", "config"] {
        let target = db.alias(alias).unwrap();
        let direct = db.resolve(target).unwrap();
        let via_alias = db.lookup(alias).unwrap();
        assert!(std::ptr::eq(direct, via_alias));
    }
    assert!(db.alias("install").is_none());
}

#[test]
fn test_ifdef_and_ifndef() {
    let dir = TempDir::new().unwrap();
    write(
        &dir,
        "a.hlp",
        "\
!!KEYWORD pos
!!TEXT
!!IFDEF X
A
!!ELSE
B
!!ENDIF
!!KEYWORD neg
!!TEXT
!!IFNDEF X
A
!!ELSE
B
!!ENDIF
",
    );
    let db = open(dir.path(), &["X"]);

    assert_eq!(db.read("pos").unwrap().unwrap().lines(), ["A".to_string()]);
    assert_eq!(db.read("neg").unwrap().unwrap().lines(), ["B".to_string()]);
}

#[test]
fn test_hidden_keywords_follow_defines() {
    let dir = TempDir::new().unwrap();
    write(
        &dir,
        "a.hlp",
        "!!IFDEF WIN\n!!KEYWORD win-only\n!!TEXT\nw\n!!ENDIF\n!!KEYWORD always\n",
    );
    let mut db = open(dir.path(), &[]);
    assert!(db.resolve("win-only").is_none());
    assert!(db.resolve("always").is_some());

    db.define("WIN");
    db.rebuild();
    assert!(db.resolve("win-only").is_some());
}

#[test]
fn test_reparse_is_stable() {
    let dir = TempDir::new().unwrap();
    write(
        &dir,
        "a.hlp",
        "\
!!KEYWORD k
!!TITLE K
!!TEXT
one
!!IFDEF A
two
!!IFNDEF B
three
!!ENDIF
!!ENDIF
four
",
    );
    let db = open(dir.path(), &["A"]);

    let first = db.read("k").unwrap().unwrap();
    let second = db.read("k").unwrap().unwrap();
    assert_eq!(first.lines(), second.lines());
    assert_eq!(
        first.lines(),
        ["one", "two", "three", "four"].map(String::from)
    );
}

#[test]
fn test_keywords_case_sensitive_across_files() {
    let dir = TempDir::new().unwrap();
    write(&dir, "a.hlp", "!!KEYWORD Foo\n!!TITLE Upper\n");
    write(&dir, "b.hlp", "!!KEYWORD foo\n!!TITLE Lower\n");
    let db = open(dir.path(), &[]);

    assert_eq!(db.resolve("Foo").unwrap().title, "Upper");
    assert_eq!(db.resolve("foo").unwrap().title, "Lower");
}

#[test]
fn test_search_and_scan_listings() {
    let dir = TempDir::new().unwrap();
    write(
        &dir,
        "a.hlp",
        "\
!!KEYWORD net
!!TITLE Networking
!!TEXT
Configure the proxy here.
!!KEYWORD disk
!!TITLE Disks
!!TEXT
Set a proxy here too.
!!KEYWORD other
!!TITLE Other
!!TEXT
unrelated
",
    );
    let db = open(dir.path(), &[]);

    let listing = db.search("^(net|disk)").unwrap();
    assert_eq!(listing.title, "2 matches for ^(net|disk)");
    let descriptions: Vec<_> = listing.subtopics().iter().map(|r| r.description.as_str()).collect();
    assert_eq!(descriptions, vec!["Disks", "Networking"]);

    let scanned = db.scan("PROXY").unwrap();
    assert_eq!(scanned.subtopics().len(), 2);
    assert!(db.search("(").is_err());
}

#[test]
fn test_scan_lists_each_keyword_once_across_files() {
    let user = TempDir::new().unwrap();
    let system = TempDir::new().unwrap();
    write(
        &user,
        "a.hlp",
        "!!KEYWORD net lan\n!!TITLE Networking\n!!TEXT\nproxy one\nproxy two\n",
    );
    write(&user, "b.hlp", "!!KEYWORD net\n!!TITLE Net again\n!!TEXT\nproxy three\n");
    write(&system, "s.hlp", "!!KEYWORD net\n!!TEXT\nproxy\n!!KEYWORD sys\n!!TITLE System\n!!TEXT\nproxy\n");
    let mut db = Database::open(&DatabaseConfig {
        system_path: vec![user.path().to_path_buf(), system.path().to_path_buf()],
        ..DatabaseConfig::default()
    })
    .unwrap();

    let scanned = db.scan("proxy").unwrap();
    let mut found: Vec<_> = scanned
        .subtopics()
        .iter()
        .map(|r| (r.keyword.as_str(), r.description.as_str()))
        .collect();
    found.sort_unstable();
    assert_eq!(found, vec![("net", "Networking"), ("sys", "System")]);

    assert!(db.set_active(user.path(), false));
    let scanned = db.scan("proxy").unwrap();
    let mut found: Vec<_> = scanned.subtopics().iter().map(|r| r.keyword.as_str()).collect();
    found.sort_unstable();
    assert_eq!(found, vec!["net", "sys"]);
    assert!(db.scan("one|two|three").unwrap().subtopics().is_empty());
}

#[test]
fn test_sorting_examples() {
    let mut refs: Vec<CrossRef> = ["Item 10", "Item 2", "Item 1"]
        .iter()
        .map(|d| CrossRef::new(*d, d.to_lowercase(), "top"))
        .collect();
    sort_cross_refs(&mut refs);
    let order: Vec<_> = refs.iter().map(|r| r.description.as_str()).collect();
    assert_eq!(order, vec!["Item 1", "Item 2", "Item 10"]);

    let mut zeros = vec!["7", "007", "07"];
    zeros.sort_by(|a, b| natural_cmp(a, b));
    let again = {
        let mut v = vec!["07", "7", "007"];
        v.sort_by(|a, b| natural_cmp(a, b));
        v
    };
    assert_eq!(zeros, again);
    assert_ne!(natural_cmp("007", "07"), std::cmp::Ordering::Equal);
    assert_ne!(natural_cmp("07", "7"), std::cmp::Ordering::Equal);
}

proptest! {
    #[test]
    fn prop_natural_order_is_antisymmetric(a in "[a-c0-9 ]{0,8}", b in "[a-c0-9 ]{0,8}") {
        prop_assert_eq!(natural_cmp(&a, &b), natural_cmp(&b, &a).reverse());
    }

    #[test]
    fn prop_numbered_items_sort_numerically(mut numbers in proptest::collection::vec(0u32..10_000, 1..20)) {
        let mut labels: Vec<String> = numbers.iter().map(|n| format!("Item {n}")).collect();
        labels.sort_by(|a, b| natural_cmp(a, b));
        numbers.sort_unstable();
        let expected: Vec<String> = numbers.iter().map(|n| format!("Item {n}")).collect();
        prop_assert_eq!(labels, expected);
    }
}
