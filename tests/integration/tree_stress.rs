#![allow(missing_docs)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use strata::{
    DefaultBalancePolicy, LoggableStore, MemoryLog, MutableTree, ReadTree, Result, Tree,
    TreeOptions,
};
use tracing_subscriber::EnvFilter;

type Model = BTreeMap<Vec<u8>, BTreeSet<Vec<u8>>>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn options(dups: bool) -> Result<TreeOptions> {
    Ok(TreeOptions::default()
        .allow_duplicates(dups)
        .cache_capacity(64)
        .policy(Arc::new(DefaultBalancePolicy::new(6, 4)?)))
}

fn random_bytes(rng: &mut ChaCha8Rng, range: u32) -> Vec<u8> {
    format!("{:05}", rng.gen_range(0..range)).into_bytes()
}

fn scan(tree: &impl ReadTree, mut cursor: strata::Cursor) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let mut out = Vec::new();
    while cursor.next(tree)? {
        if let (Some(k), Some(v)) = (cursor.key(), cursor.value()) {
            out.push((k.to_vec(), v.to_vec()));
        }
    }
    Ok(out)
}

fn flatten(model: &Model) -> Vec<(Vec<u8>, Vec<u8>)> {
    model
        .iter()
        .flat_map(|(k, vs)| vs.iter().map(move |v| (k.clone(), v.clone())))
        .collect()
}

fn check(tree: &MutableTree, model: &Model) -> Result<()> {
    tree.verify()?;
    let size: usize = model.values().map(BTreeSet::len).sum();
    assert_eq!(tree.size(), size as u64);
    assert_eq!(scan(tree, tree.cursor())?, flatten(model));
    Ok(())
}

#[test]
fn random_duplicate_workload_matches_model() -> Result<()> {
    init_tracing();
    let log: Arc<dyn LoggableStore> = Arc::new(MemoryLog::default());
    let mut tree = MutableTree::new(log.clone(), options(true)?);
    let mut model = Model::new();
    let mut rng = ChaCha8Rng::seed_from_u64(0x5EED_0001);

    for step in 0..4_000u32 {
        let key = random_bytes(&mut rng, 150);
        match rng.gen_range(0..100) {
            0..=54 => {
                let value = random_bytes(&mut rng, 12);
                let inserted = model.entry(key.clone()).or_default().insert(value.clone());
                assert_eq!(tree.put(&key, &value)?, inserted);
            }
            55..=69 => {
                let expected = model.remove(&key).is_some();
                assert_eq!(tree.delete(&key)?, expected);
            }
            70..=84 => {
                let value = random_bytes(&mut rng, 12);
                let expected = match model.get_mut(&key) {
                    Some(values) => {
                        let removed = values.remove(&value);
                        if values.is_empty() {
                            model.remove(&key);
                        }
                        removed
                    }
                    None => false,
                };
                assert_eq!(tree.delete_pair(&key, &value)?, expected);
            }
            85..=94 => {
                let expected = model.get(&key).and_then(|vs| vs.first()).cloned();
                assert_eq!(tree.get(&key)?.map(|v| v.to_vec()), expected);
            }
            _ => {
                let root = tree.save()?;
                let reopened = Tree::open(log.clone(), options(true)?, root)?;
                assert_eq!(reopened.size(), tree.size());
                tree = reopened.to_mutable();
            }
        }
        if step % 500 == 0 {
            check(&tree, &model)?;
        }
    }
    check(&tree, &model)?;
    tree.save()?;
    check(&tree, &model)?;
    tree.emit_stats();
    Ok(())
}

#[test]
fn interleaved_cursor_deletes_match_model() -> Result<()> {
    init_tracing();
    let log: Arc<dyn LoggableStore> = Arc::new(MemoryLog::default());
    let mut tree = MutableTree::new(log, options(true)?);
    let mut model = Model::new();
    let mut rng = ChaCha8Rng::seed_from_u64(0x5EED_0002);
    for _ in 0..800 {
        let key = random_bytes(&mut rng, 100);
        let value = random_bytes(&mut rng, 6);
        model.entry(key.clone()).or_default().insert(value.clone());
        tree.put(&key, &value)?;
    }
    tree.save()?;

    // Walk forward, deleting about a third of the pairs and inserting behind
    // the cursor; the walk must still see every surviving pair once.
    let mut cursor = tree.cursor();
    let mut walked = Vec::new();
    while cursor.next(&tree)? {
        let (Some(k), Some(v)) = (cursor.key().cloned(), cursor.value().cloned()) else {
            break;
        };
        if rng.gen_ratio(1, 3) {
            assert!(cursor.delete_current(&mut tree)?);
            if let Some(values) = model.get_mut(&k[..]) {
                values.remove(&v[..]);
                if values.is_empty() {
                    model.remove(&k[..]);
                }
            }
            continue;
        }
        walked.push((k.to_vec(), v.to_vec()));
        if rng.gen_ratio(1, 10) {
            // Strictly before the cursor, so the walk never sees it.
            let behind = b"!".to_vec();
            let value = random_bytes(&mut rng, 1_000);
            model.entry(behind.clone()).or_default().insert(value.clone());
            tree.put(&behind, &value)?;
        }
    }
    let survivors: Vec<_> = flatten(&model)
        .into_iter()
        .filter(|(k, _)| k.as_slice() != b"!")
        .collect();
    assert_eq!(walked, survivors);
    check(&tree, &model)?;
    Ok(())
}

#[test]
fn ascending_put_right_matches_put() -> Result<()> {
    let log: Arc<dyn LoggableStore> = Arc::new(MemoryLog::default());
    let mut by_put = MutableTree::new(log.clone(), options(false)?);
    let mut by_append = MutableTree::new(log, options(false)?);
    let mut rng = ChaCha8Rng::seed_from_u64(0x5EED_0003);
    let mut n = 0u64;
    for _ in 0..2_000 {
        n += rng.gen_range(1..5);
        let key = n.to_be_bytes();
        by_put.put(&key, b"v")?;
        by_append.put_right(&key, b"v")?;
    }
    by_put.save()?;
    by_append.save()?;
    by_append.verify()?;
    assert_eq!(by_put.size(), by_append.size());
    assert_eq!(
        scan(&by_put, by_put.cursor())?,
        scan(&by_append, by_append.cursor())?
    );
    Ok(())
}
