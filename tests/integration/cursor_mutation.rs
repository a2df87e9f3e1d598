#![allow(missing_docs)]

use std::sync::Arc;

use strata::{
    Cursor, DefaultBalancePolicy, LoggableStore, MemoryLog, MutableTree, Result, StrataError,
    TreeOptions,
};

fn options(max: usize, dups: bool) -> Result<TreeOptions> {
    Ok(TreeOptions::default()
        .allow_duplicates(dups)
        .policy(Arc::new(DefaultBalancePolicy::new(max, max)?)))
}

/// Keys `1..=7` with value `v<k>0`; key 5 also holds `v51` and `v52`.
fn seeded() -> Result<MutableTree> {
    let log: Arc<dyn LoggableStore> = Arc::new(MemoryLog::default());
    let mut tree = MutableTree::new(log, options(4, true)?);
    for k in 1..=7 {
        tree.put(k.to_string().as_bytes(), format!("v{k}0").as_bytes())?;
    }
    tree.put(b"5", b"v51")?;
    tree.put(b"5", b"v52")?;
    tree.save()?;
    Ok(tree)
}

fn pair(cursor: &Cursor) -> (String, String) {
    let text = |b: Option<&bytes::Bytes>| {
        b.map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default()
    };
    (text(cursor.key()), text(cursor.value()))
}

fn p(key: &str, value: &str) -> (String, String) {
    (key.to_owned(), value.to_owned())
}

#[test]
fn cursor_survives_deletion_before_it() -> Result<()> {
    let mut tree = seeded()?;
    let mut cursor = tree.cursor();
    assert!(cursor.search_both(&tree, b"5", b"v51")?);

    assert!(tree.delete(b"1")?);
    assert!(cursor.next(&tree)?);
    assert_eq!(pair(&cursor), p("5", "v52"));
    assert!(cursor.next(&tree)?);
    assert_eq!(pair(&cursor), p("6", "v60"));
    Ok(())
}

#[test]
fn cursor_sees_insertions_ahead_of_it() -> Result<()> {
    let mut tree = seeded()?;
    let mut cursor = tree.cursor();
    assert_eq!(cursor.search_key(&tree, b"3")?.as_deref(), Some(&b"v30"[..]));
    tree.put(b"35", b"x")?;
    assert!(cursor.next(&tree)?);
    assert_eq!(pair(&cursor), p("35", "x"));
    assert!(cursor.next(&tree)?);
    assert_eq!(pair(&cursor), p("4", "v40"));
    Ok(())
}

#[test]
fn delete_current_reports_once_then_moves_on() -> Result<()> {
    let mut tree = seeded()?;
    let mut cursor = tree.cursor();
    assert!(cursor.search_both(&tree, b"5", b"v51")?);
    assert!(cursor.delete_current(&mut tree)?);
    assert!(!cursor.delete_current(&mut tree)?);
    assert!(!tree.has_pair(b"5", b"v51")?);
    assert_eq!(tree.size(), 8);
    assert_eq!(pair(&cursor), p("5", "v51"));
    assert!(!cursor.is_positioned());

    let mut back = cursor.clone();
    assert!(cursor.next(&tree)?);
    assert_eq!(pair(&cursor), p("5", "v52"));
    assert!(back.prev(&tree)?);
    assert_eq!(pair(&back), p("5", "v50"));
    Ok(())
}

#[test]
fn delete_current_can_drain_a_tree() -> Result<()> {
    let log: Arc<dyn LoggableStore> = Arc::new(MemoryLog::default());
    let mut tree = MutableTree::new(log, options(4, false)?);
    for n in 0..120u32 {
        tree.put(format!("{n:03}").as_bytes(), b"v")?;
    }
    tree.save()?;

    let mut cursor = tree.cursor();
    let mut deleted = 0;
    while cursor.next(&tree)? {
        let key = cursor.key().cloned().unwrap_or_default();
        assert!(cursor.delete_current(&mut tree)?);
        assert_eq!(tree.get(&key)?, None);
        deleted += 1;
        if deleted % 17 == 0 {
            tree.verify()?;
        }
    }
    assert_eq!(deleted, 120);
    assert!(tree.is_empty());
    tree.verify()?;
    Ok(())
}

#[test]
fn duplicate_and_distinct_key_moves() -> Result<()> {
    let tree = seeded()?.snapshot()?;
    let mut cursor = tree.cursor();
    assert_eq!(cursor.search_key(&tree, b"5")?.as_deref(), Some(&b"v50"[..]));
    assert_eq!(cursor.count(&tree)?, 3);
    assert!(cursor.next_dup(&tree)?);
    assert!(cursor.next_dup(&tree)?);
    assert_eq!(pair(&cursor), p("5", "v52"));
    assert!(!cursor.next_dup(&tree)?);
    assert_eq!(pair(&cursor), p("5", "v52"), "failed dup move stays put");
    assert!(cursor.prev_dup(&tree)?);
    assert_eq!(pair(&cursor), p("5", "v51"));

    assert!(cursor.next_no_dup(&tree)?);
    assert_eq!(pair(&cursor), p("6", "v60"));
    assert_eq!(cursor.count(&tree)?, 1);
    assert!(cursor.prev_no_dup(&tree)?);
    assert_eq!(pair(&cursor), p("5", "v52"));
    assert!(cursor.prev_no_dup(&tree)?);
    assert_eq!(pair(&cursor), p("4", "v40"));
    assert!(!cursor.prev_dup(&tree)?);
    Ok(())
}

#[test]
fn range_searches_and_edges() -> Result<()> {
    let tree = seeded()?.snapshot()?;
    let mut cursor = tree.cursor();
    assert!(!cursor.next_dup(&tree)?, "unpositioned cursor has no current key");

    assert_eq!(cursor.search_key_range(&tree, b"45")?.as_deref(), Some(&b"v50"[..]));
    assert_eq!(
        cursor.search_both_range(&tree, b"5", b"v505")?.as_deref(),
        Some(&b"v51"[..])
    );
    assert_eq!(cursor.search_both_range(&tree, b"5", b"v6")?, None);
    assert_eq!(pair(&cursor), p("5", "v51"), "failed search leaves the cursor");
    assert_eq!(cursor.search_key(&tree, b"9")?, None);
    assert_eq!(cursor.search_key_range(&tree, b"8")?, None);
    assert!(!cursor.search_both(&tree, b"5", b"v53")?);
    assert_eq!(pair(&cursor), p("5", "v51"));

    assert!(cursor.last(&tree)?);
    assert_eq!(pair(&cursor), p("7", "v70"));
    assert!(!cursor.next(&tree)?);
    assert!(!cursor.is_positioned());
    assert!(cursor.prev(&tree)?, "unpositioned prev starts from the end");
    assert_eq!(pair(&cursor), p("7", "v70"));

    let mut backwards = Vec::new();
    let mut cursor = tree.cursor();
    while cursor.prev(&tree)? {
        backwards.push(pair(&cursor));
    }
    assert_eq!(backwards.len(), 9);
    assert_eq!(backwards[0], p("7", "v70"));
    assert_eq!(backwards[2], p("5", "v52"));
    assert_eq!(backwards[8], p("1", "v10"));
    Ok(())
}

#[test]
fn snapshot_cursor_ignores_later_edits() -> Result<()> {
    let mut tree = seeded()?;
    let snapshot = tree.snapshot()?;
    let mut cursor = snapshot.cursor();
    assert!(cursor.next(&snapshot)?);
    for k in 1..=7 {
        tree.delete(k.to_string().as_bytes())?;
    }
    assert!(tree.is_empty());
    let mut seen = 1;
    while cursor.next(&snapshot)? {
        seen += 1;
    }
    assert_eq!(seen, 9);
    Ok(())
}

#[test]
fn cursor_rejects_other_trees() -> Result<()> {
    let tree = seeded()?;
    let other = seeded()?;
    let mut cursor = tree.cursor();
    assert!(matches!(cursor.next(&other), Err(StrataError::Invalid(_))));

    let snapshot = tree.snapshot()?;
    assert!(matches!(
        cursor.search_key(&snapshot, b"1"),
        Err(StrataError::Invalid(_))
    ));
    Ok(())
}

#[test]
fn dup_moves_are_noops_without_duplicates() -> Result<()> {
    let log: Arc<dyn LoggableStore> = Arc::new(MemoryLog::default());
    let mut tree = MutableTree::new(log, options(4, false)?);
    for k in [b"a", b"b", b"c"] {
        tree.put(k, b"v")?;
    }
    let mut cursor = tree.cursor();
    assert!(cursor.next(&tree)?);
    assert!(!cursor.next_dup(&tree)?);
    assert!(!cursor.prev_dup(&tree)?);
    assert!(cursor.next_no_dup(&tree)?);
    assert_eq!(cursor.key().map(|k| k.to_vec()), Some(b"b".to_vec()));
    assert_eq!(cursor.count(&tree)?, 1);
    assert!(matches!(
        tree.delete_pair(b"b", b"v"),
        Err(StrataError::Invalid(_))
    ));
    Ok(())
}

#[test]
fn overwriting_the_current_key_keeps_the_cursor_on_it() -> Result<()> {
    let log: Arc<dyn LoggableStore> = Arc::new(MemoryLog::default());
    let mut tree = MutableTree::new(log, options(4, false)?);
    for k in ["a", "b", "c", "d"] {
        tree.put(k.as_bytes(), b"1")?;
    }
    tree.save()?;

    let mut cursor = tree.cursor();
    assert!(cursor.next(&tree)?);
    assert!(cursor.next(&tree)?);
    assert_eq!(pair(&cursor), p("b", "1"));

    // Larger, then smaller replacement values.
    tree.put(b"b", b"2")?;
    assert_eq!(cursor.count(&tree)?, 1);
    assert_eq!(pair(&cursor), p("b", "2"));
    assert!(cursor.is_positioned());
    assert!(cursor.next(&tree)?);
    assert_eq!(pair(&cursor), p("c", "1"));

    tree.put(b"c", b"0")?;
    let mut rest = Vec::new();
    while cursor.next(&tree)? {
        rest.push(pair(&cursor));
    }
    assert_eq!(rest, vec![p("d", "1")]);

    // Walking back after an overwrite does not revisit the key either.
    assert!(cursor.prev(&tree)?);
    assert_eq!(pair(&cursor), p("d", "1"));
    tree.put(b"d", b"9")?;
    assert!(cursor.prev(&tree)?);
    assert_eq!(pair(&cursor), p("c", "0"));

    // Deleting the key still moves the cursor to its successor.
    tree.delete(b"c")?;
    assert!(cursor.next(&tree)?);
    assert_eq!(pair(&cursor), p("d", "9"));
    Ok(())
}
