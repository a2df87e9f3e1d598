#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::sync::Arc;

use strata::{
    Address, DefaultBalancePolicy, LoggableStore, MemoryLog, MemoryLogOptions, MutableTree,
    Record, RecordIter, Result, StructureId, Tree, TreeOptions,
};

fn options(max: usize, dups: bool) -> Result<TreeOptions> {
    Ok(TreeOptions::default()
        .allow_duplicates(dups)
        .policy(Arc::new(DefaultBalancePolicy::new(max, max)?)))
}

fn key(n: u32) -> Vec<u8> {
    format!("k{n:04}").into_bytes()
}

fn reachable(tree: &Tree) -> Result<BTreeSet<Address>> {
    tree.address_iter().collect()
}

fn contents(tree: &Tree) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let mut cursor = tree.cursor();
    let mut out = Vec::new();
    while cursor.next(tree)? {
        if let (Some(k), Some(v)) = (cursor.key(), cursor.value()) {
            out.push((k.to_vec(), v.to_vec()));
        }
    }
    Ok(out)
}

#[test]
fn deleting_a_promoted_key_expires_exactly_its_records() -> Result<()> {
    let log: Arc<dyn LoggableStore> = Arc::new(MemoryLog::default());
    let mut tree = MutableTree::new(log, options(4, true)?);
    tree.put(b"k", b"value-1")?;
    tree.save()?;
    tree.put(b"k", b"value-2")?;
    tree.save()?;
    let saved = tree.snapshot()?;
    let before = reachable(&saved)?;
    assert_eq!(before.len(), 4, "root, dup root and two duplicate leaves");

    let mut fresh = saved.to_mutable();
    assert!(fresh.delete(b"k")?);
    let expired: BTreeSet<Address> = fresh.expired_addresses().collect();
    assert_eq!(expired, before);
    Ok(())
}

#[test]
fn expired_addresses_are_unreachable_after_save() -> Result<()> {
    let log: Arc<dyn LoggableStore> = Arc::new(MemoryLog::default());
    let mut tree = MutableTree::new(log.clone(), options(4, true)?);
    for n in 0..60 {
        tree.put(&key(n % 20), format!("v{n}").as_bytes())?;
    }
    tree.save()?;
    let first = reachable(&tree.snapshot()?)?;
    tree.take_expired_addresses();

    let start = log.high_address();
    for n in (0..20).step_by(2) {
        tree.delete(&key(n))?;
    }
    tree.put(&key(3), b"zzz")?;
    tree.delete_pair(&key(5), b"v5")?;
    tree.save()?;
    let second = reachable(&tree.snapshot()?)?;

    let expired = tree.take_expired_addresses();
    assert!(!expired.is_empty());
    for address in &expired {
        assert!(*address < start, "only previously stored records expire");
        assert!(first.contains(address));
        assert!(!second.contains(address));
    }
    // Every record of the first save is either still reachable or expired.
    let expired: BTreeSet<Address> = expired.into_iter().collect();
    for address in &first {
        assert!(second.contains(address) ^ expired.contains(address));
    }
    assert_eq!(tree.expired_addresses().count(), 0);
    Ok(())
}

#[test]
fn single_save_writes_only_reachable_records() -> Result<()> {
    let log = Arc::new(MemoryLog::default());
    let mut tree = MutableTree::new(log.clone(), options(4, true)?);
    for n in 0..50 {
        tree.put(&key(n % 10), &key(n))?;
    }
    tree.save()?;
    let count = tree.address_iter()?.count() as u64;
    assert_eq!(count, log.stats().records_written);
    assert_eq!(tree.address_iter()?.next().transpose()?, Some(tree.snapshot()?.root_address()));
    Ok(())
}

#[test]
fn reclaim_forces_records_of_the_cleaned_range() -> Result<()> {
    let log = Arc::new(MemoryLog::default());
    let mut tree = MutableTree::new(log.clone(), options(4, false)?);
    for n in 0..40 {
        tree.put(&key(n), b"original")?;
    }
    tree.save()?;
    let start = log.high_address();
    tree.put(&key(17), b"changed")?;
    tree.save()?;
    let end = log.high_address();
    let before = tree.snapshot()?;

    let records: Vec<Record> = RecordIter::bounded(&*log, start, end.0).collect::<Result<_>>()?;
    let in_range = reachable(&before)?
        .into_iter()
        .filter(|a| *a >= start && *a < end)
        .count();
    assert_eq!(in_range, records.len());

    let generation = tree.generation();
    assert!(tree.reclaim(&records[0], &records[1..])?);
    assert!(tree.is_dirty());
    assert!(tree.generation() > generation);
    assert_eq!(tree.stats().records_reclaimed, records.len() as u64);

    tree.save()?;
    let after = tree.snapshot()?;
    after.verify()?;
    for address in reachable(&after)? {
        assert!(!(start..end).contains(&address), "{address} left in cleaned range");
    }
    assert_eq!(contents(&after)?, contents(&before)?);
    assert_eq!(after.get(&key(17))?.as_deref(), Some(&b"changed"[..]));
    Ok(())
}

#[test]
fn reclaim_ignores_ranges_without_live_records() -> Result<()> {
    let log = Arc::new(MemoryLog::default());
    let mut tree = MutableTree::new(log.clone(), options(4, false)?);
    for n in 0..40 {
        tree.put(&key(n), b"v")?;
    }
    let old_root = tree.save()?;
    tree.put(&key(3), b"w")?;
    tree.save()?;

    let stale = log.read(old_root)?;
    let generation = tree.generation();
    assert!(!tree.reclaim(&stale, [])?);
    assert!(!tree.is_dirty());
    assert_eq!(tree.generation(), generation);

    let mut other = MutableTree::new(
        log.clone(),
        options(4, false)?.structure_id(StructureId(2)),
    );
    other.put(b"x", b"y")?;
    let other_start = log.high_address();
    other.save()?;
    let foreign: Vec<Record> = log.iter_from(other_start).collect::<Result<_>>()?;
    assert_eq!(foreign.len(), 2);
    assert!(foreign.iter().all(|r| r.structure_id == StructureId(2)));
    assert!(!tree.reclaim(&foreign[0], &foreign[1..])?);
    assert!(!tree.is_dirty());
    Ok(())
}

#[test]
fn reclaiming_a_log_file_moves_duplicates_out_of_it() -> Result<()> {
    let log = Arc::new(MemoryLog::new(MemoryLogOptions::default().file_len(256)));
    let mut tree = MutableTree::new(log.clone(), options(4, true)?);
    for n in 0..30 {
        tree.put(&key(n % 6), format!("value-{n:02}").as_bytes())?;
    }
    tree.save()?;
    let before = tree.snapshot()?;

    let file = log.file_range(Address(0));
    let records = log.records_in_file(Address(0))?;
    assert!(!records.is_empty());
    let live = reachable(&before)?
        .into_iter()
        .filter(|a| file.contains(&a.0))
        .count() as u64;
    assert!(live > 0);

    assert!(tree.reclaim(&records[0], &records[1..])?);
    assert_eq!(tree.stats().records_reclaimed, live);
    tree.save()?;
    let after = tree.snapshot()?;
    after.verify()?;
    assert!(reachable(&after)?.iter().all(|a| !file.contains(&a.0)));
    assert_eq!(contents(&after)?, contents(&before)?);

    // A second pass over the same file finds nothing left to move.
    assert!(!tree.reclaim(&records[0], &records[1..])?);
    Ok(())
}
