#![allow(missing_docs)]

use std::sync::Arc;

use strata::{
    Address, BalanceConfig, DefaultBalancePolicy, LoggableStore, MemoryLog, MutableTree,
    RecordType, Result, StrataError, Tree, TreeOptions,
};

fn options(max: usize, dups: bool) -> Result<TreeOptions> {
    let policy = DefaultBalancePolicy::new(max, max)?;
    Ok(TreeOptions::default()
        .allow_duplicates(dups)
        .policy(Arc::new(policy)))
}

fn key(n: u32) -> Vec<u8> {
    format!("{n:04}").into_bytes()
}

/// Leaf count of every bottom page, left to right, read back from the log.
fn bottom_layout(log: &MemoryLog, tree: &Tree) -> Result<Vec<usize>> {
    let mut layout = Vec::new();
    for address in tree.address_iter() {
        let record = log.read(address?)?;
        match RecordType::from_u8(record.kind) {
            Some(RecordType::Bottom | RecordType::BottomRoot) => layout.push(0),
            Some(RecordType::Leaf) => {
                if let Some(count) = layout.last_mut() {
                    *count += 1;
                }
            }
            _ => {}
        }
    }
    Ok(layout)
}

fn record_kinds(log: &MemoryLog, tree: &MutableTree) -> Result<Vec<Option<RecordType>>> {
    let mut kinds = Vec::new();
    for address in tree.address_iter()? {
        kinds.push(RecordType::from_u8(log.read(address?)?.kind));
    }
    Ok(kinds)
}

#[test]
fn appends_split_near_the_right_edge() -> Result<()> {
    let log = Arc::new(MemoryLog::default());
    let mut tree = MutableTree::new(log.clone(), options(4, false)?);
    for n in 1..=7 {
        assert!(tree.put(&key(n), b"v")?);
    }
    tree.save()?;
    assert_eq!(bottom_layout(&log, &tree.snapshot()?)?, vec![3, 4]);

    assert!(tree.put(&key(8), b"v")?);
    tree.save()?;
    let saved = tree.snapshot()?;
    assert_eq!(bottom_layout(&log, &saved)?, vec![3, 3, 2]);
    assert_eq!(saved.stats().page_splits, 2);
    saved.verify()?;
    Ok(())
}

#[test]
fn duplicates_read_back_smallest_value_first() -> Result<()> {
    let log: Arc<dyn LoggableStore> = Arc::new(MemoryLog::default());
    let mut tree = MutableTree::new(log.clone(), options(4, true)?);
    for value in [b"53", b"51", b"52"] {
        assert!(tree.put(b"5", value)?);
    }
    assert!(!tree.put(b"5", b"52")?, "existing pair is not inserted twice");
    assert_eq!(tree.get(b"5")?.as_deref(), Some(&b"51"[..]));
    assert_eq!(tree.size(), 3);

    let root = tree.save()?;
    let reopened = Tree::open(log, options(4, true)?, root)?;
    assert_eq!(reopened.get(b"5")?.as_deref(), Some(&b"51"[..]));
    assert!(reopened.has_pair(b"5", b"53")?);
    assert!(!reopened.has_pair(b"5", b"54")?);
    assert_eq!(reopened.size(), 3);
    Ok(())
}

#[test]
fn promotion_and_demotion_change_record_kinds() -> Result<()> {
    let log = Arc::new(MemoryLog::default());
    let mut tree = MutableTree::new(log.clone(), options(4, true)?);
    tree.put(b"k", b"a")?;
    tree.put(b"k", b"b")?;
    tree.save()?;
    let kinds = record_kinds(&log, &tree)?;
    assert_eq!(
        kinds,
        vec![
            Some(RecordType::BottomRoot),
            Some(RecordType::DupBottomRoot),
            Some(RecordType::DupLeaf),
            Some(RecordType::DupLeaf),
        ]
    );

    assert!(tree.delete_pair(b"k", b"a")?);
    tree.save()?;
    let kinds = record_kinds(&log, &tree)?;
    assert_eq!(kinds, vec![Some(RecordType::BottomRoot), Some(RecordType::Leaf)]);
    assert_eq!(tree.get(b"k")?.as_deref(), Some(&b"b"[..]));

    let stats = tree.stats();
    assert_eq!(stats.dup_promotions, 1);
    assert_eq!(stats.dup_demotions, 1);
    Ok(())
}

#[test]
fn saved_tree_reopens_with_identical_contents() -> Result<()> {
    let log: Arc<dyn LoggableStore> = Arc::new(MemoryLog::default());
    let mut tree = MutableTree::new(log.clone(), options(8, false)?);
    for n in (0..300).rev() {
        tree.put(&key(n), format!("value-{n}").as_bytes())?;
    }
    for n in (0..300).step_by(3) {
        assert!(tree.delete(&key(n))?);
    }
    let root = tree.save()?;

    let reopened = Tree::open(log, options(8, false)?, root)?;
    reopened.verify()?;
    assert_eq!(reopened.size(), 200);
    assert_eq!(reopened.root_address(), root);
    for n in 0..300 {
        let expected = (n % 3 != 0).then(|| format!("value-{n}").into_bytes());
        assert_eq!(reopened.get(&key(n))?.map(|v| v.to_vec()), expected);
    }

    let mut cursor = reopened.cursor();
    let mut seen = 0;
    let mut last: Option<Vec<u8>> = None;
    while cursor.next(&reopened)? {
        let current = cursor.key().map(|k| k.to_vec());
        assert!(current > last, "cursor yields keys in ascending order");
        last = current;
        seen += 1;
    }
    assert_eq!(seen, 200);
    Ok(())
}

#[test]
fn opening_null_root_gives_an_empty_tree() -> Result<()> {
    let log: Arc<dyn LoggableStore> = Arc::new(MemoryLog::default());
    let tree = Tree::open(log, TreeOptions::default(), Address::NULL)?;
    assert!(tree.is_empty());
    assert_eq!(tree.root_address(), Address::NULL);
    assert_eq!(tree.address_iter().count(), 0);
    assert_eq!(tree.get(b"anything")?, None);
    assert!(!tree.cursor().next(&tree)?);
    Ok(())
}

#[test]
fn balance_config_deserializes_and_validates() -> Result<()> {
    let cfg: BalanceConfig =
        serde_json::from_str(r#"{ "page_max_size": 16 }"#).map_err(|_| StrataError::Invalid("json"))?;
    assert_eq!(cfg.page_max_size, 16);
    assert_eq!(cfg.dup_page_max_size, BalanceConfig::default().dup_page_max_size);
    let policy = DefaultBalancePolicy::from_config(cfg)?;
    assert_eq!(policy.config(), cfg);

    let bad = BalanceConfig {
        page_max_size: 1,
        ..BalanceConfig::default()
    };
    assert!(matches!(
        DefaultBalancePolicy::from_config(bad),
        Err(StrataError::Invalid(_))
    ));
    Ok(())
}

#[test]
fn opening_a_non_root_record_is_rejected() -> Result<()> {
    let log: Arc<dyn LoggableStore> = Arc::new(MemoryLog::default());
    let mut tree = MutableTree::new(log.clone(), options(4, false)?);
    tree.put(b"a", b"1")?;
    tree.save()?;
    let leaf = tree
        .address_iter()?
        .nth(1)
        .ok_or(StrataError::Invalid("missing leaf"))??;
    assert!(Tree::open(log, options(4, false)?, leaf).is_err());
    Ok(())
}

#[test]
fn stats_are_emitted_through_tracing() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let log: Arc<dyn LoggableStore> = Arc::new(MemoryLog::default());
    let mut tree = MutableTree::new(log, options(4, false)?);
    for n in 0..20 {
        tree.put(&key(n), b"v")?;
    }
    tree.save()?;
    tree.emit_stats();
    let stats = tree.stats();
    assert!(stats.page_splits > 0);
    assert!(stats.pages_written > 0);
    Ok(())
}
