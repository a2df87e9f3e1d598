use std::num::NonZeroUsize;
use std::sync::Arc;

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;

use crate::primitives::log::{LoggableStore, Record};
use crate::types::{Address, Result, StrataError, StructureId};

use super::page::{self, Page, RecordType};
use super::stats::TreeStats;

/// LRU of decoded pages keyed by address.
///
/// Stored pages never change, so entries never need invalidation.
pub(crate) struct PageCache {
    inner: Option<Mutex<LruCache<Address, Arc<Page>>>>,
}

impl PageCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            inner: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
        }
    }

    fn get(&self, address: Address) -> Option<Arc<Page>> {
        self.inner
            .as_ref()
            .and_then(|lru| lru.lock().get(&address).cloned())
    }

    fn insert(&self, address: Address, page: Arc<Page>) {
        if let Some(lru) = &self.inner {
            lru.lock().put(address, page);
        }
    }
}

/// Everything a tree needs to reach the log: the store, a decoded-page
/// cache, its structure id and its counters.
pub(crate) struct PageSource {
    store: Arc<dyn LoggableStore>,
    cache: PageCache,
    structure_id: StructureId,
    stats: Arc<TreeStats>,
}

impl PageSource {
    pub(crate) fn new(
        store: Arc<dyn LoggableStore>,
        structure_id: StructureId,
        cache_capacity: usize,
        stats: Arc<TreeStats>,
    ) -> Self {
        Self {
            store,
            cache: PageCache::new(cache_capacity),
            structure_id,
            stats,
        }
    }

    pub(crate) fn store(&self) -> &dyn LoggableStore {
        self.store.as_ref()
    }

    pub(crate) fn structure_id(&self) -> StructureId {
        self.structure_id
    }

    pub(crate) fn stats(&self) -> &TreeStats {
        &self.stats
    }

    /// Loads and decodes the page at `address`.
    pub(crate) fn page(&self, address: Address) -> Result<Arc<Page>> {
        if let Some(page) = self.cache.get(address) {
            self.stats.inc_cache_hits();
            return Ok(page);
        }
        let record = self.read(address)?;
        let page = Arc::new(Page::decode(&record)?);
        self.stats.inc_pages_loaded();
        self.cache.insert(address, Arc::clone(&page));
        Ok(page)
    }

    fn read(&self, address: Address) -> Result<Record> {
        let record = self.store.read(address)?;
        if record.structure_id != self.structure_id {
            return Err(StrataError::Corruption("record belongs to another structure"));
        }
        Ok(record)
    }

    /// Reads the `(key, value)` of a leaf record.
    pub(crate) fn leaf(&self, address: Address) -> Result<(Bytes, Bytes)> {
        let record = self.read(address)?;
        page::decode_leaf(&record)
    }

    /// Reads only the value of a leaf record.
    pub(crate) fn leaf_value(&self, address: Address) -> Result<Bytes> {
        Ok(self.leaf(address)?.1)
    }

    pub(crate) fn write(&self, kind: RecordType, payload: &[u8]) -> Result<Address> {
        self.store.write(kind.as_u8(), self.structure_id, payload)
    }

    /// Encodes and appends a page; `root_size` selects the root record kind.
    pub(crate) fn write_page(&self, page: &Page, root_size: Option<u64>) -> Result<Address> {
        let mut payload = Vec::new();
        page.encode(root_size, &mut payload)?;
        let address = self.write(page.record_type(root_size.is_some()), &payload)?;
        self.stats.inc_pages_written();
        Ok(address)
    }
}
