use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use serde::Serialize;

/// Snapshot of tree statistics at a point in time.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TreeStatsSnapshot {
    /// Number of page splits performed
    pub page_splits: u64,
    /// Number of page merges performed
    pub page_merges: u64,
    /// Number of keys promoted to duplicate sub-trees
    pub dup_promotions: u64,
    /// Number of duplicate sub-trees demoted back to single values
    pub dup_demotions: u64,
    /// Number of page records written by saves
    pub pages_written: u64,
    /// Number of page records read and decoded
    pub pages_loaded: u64,
    /// Number of page lookups served by the decoded-page cache
    pub cache_hits: u64,
    /// Number of stored records forced back into working form by reclaim
    pub records_reclaimed: u64,
}

/// Thread-safe statistics shared by a tree and all trees derived from it.
#[derive(Default, Debug)]
pub struct TreeStats {
    page_splits: AtomicU64,
    page_merges: AtomicU64,
    dup_promotions: AtomicU64,
    dup_demotions: AtomicU64,
    pages_written: AtomicU64,
    pages_loaded: AtomicU64,
    cache_hits: AtomicU64,
    records_reclaimed: AtomicU64,
}

impl TreeStats {
    pub(crate) fn inc_page_splits(&self) {
        self.page_splits.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_page_merges(&self) {
        self.page_merges.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_dup_promotions(&self) {
        self.dup_promotions.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_dup_demotions(&self) {
        self.dup_demotions.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_pages_written(&self) {
        self.pages_written.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_pages_loaded(&self) {
        self.pages_loaded.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_cache_hits(&self) {
        self.cache_hits.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn add_records_reclaimed(&self, n: u64) {
        self.records_reclaimed.fetch_add(n, AtomicOrdering::Relaxed);
    }

    /// Takes a snapshot of all counters.
    pub fn snapshot(&self) -> TreeStatsSnapshot {
        TreeStatsSnapshot {
            page_splits: self.page_splits.load(AtomicOrdering::Relaxed),
            page_merges: self.page_merges.load(AtomicOrdering::Relaxed),
            dup_promotions: self.dup_promotions.load(AtomicOrdering::Relaxed),
            dup_demotions: self.dup_demotions.load(AtomicOrdering::Relaxed),
            pages_written: self.pages_written.load(AtomicOrdering::Relaxed),
            pages_loaded: self.pages_loaded.load(AtomicOrdering::Relaxed),
            cache_hits: self.cache_hits.load(AtomicOrdering::Relaxed),
            records_reclaimed: self.records_reclaimed.load(AtomicOrdering::Relaxed),
        }
    }

    /// Emits current statistics to the tracing infrastructure.
    pub fn emit_tracing(&self) {
        let snapshot = self.snapshot();
        tracing::info!(
            target: "strata_btree::stats",
            page_splits = snapshot.page_splits,
            page_merges = snapshot.page_merges,
            dup_promotions = snapshot.dup_promotions,
            dup_demotions = snapshot.dup_demotions,
            pages_written = snapshot.pages_written,
            pages_loaded = snapshot.pages_loaded,
            cache_hits = snapshot.cache_hits,
            records_reclaimed = snapshot.records_reclaimed,
            "btree stats snapshot"
        );
    }
}
