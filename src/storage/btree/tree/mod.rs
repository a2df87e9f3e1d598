//! Public tree handles.
//!
//! [`Tree`] is an immutable snapshot rooted at a persisted address.
//! [`MutableTree`] is a copy-on-write working copy of one: mutations touch
//! only in-memory pages until [`MutableTree::save`] appends them to the log.

mod arena;
pub(crate) mod cow;
pub(crate) mod dups;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, OnceLock};

use bytes::Bytes;

use crate::primitives::log::LoggableStore;
use crate::types::{Address, Result, StrataError, StructureId};

use super::address::AddressIter;
use super::cache::PageSource;
use super::cursor::Cursor;
use super::policy::{BalancePolicy, DefaultBalancePolicy};
use super::stats::{TreeStats, TreeStatsSnapshot};

pub(crate) use self::cow::{Ctx, PageTree, TreeView};

/// Source of unique tree identities, shared by every tree opened with the
/// same [`TreeOptions`]. Defaults to one process-wide source.
#[derive(Debug, Default)]
pub struct TreeIds {
    next: AtomicU64,
}

impl TreeIds {
    /// Creates a fresh id source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands out the next id.
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, AtomicOrdering::Relaxed)
    }

    fn process_wide() -> Arc<Self> {
        static IDS: OnceLock<Arc<TreeIds>> = OnceLock::new();
        Arc::clone(IDS.get_or_init(|| Arc::new(TreeIds::new())))
    }
}

/// Configuration knobs for opening a tree.
#[derive(Clone)]
pub struct TreeOptions {
    /// Structure id stamped on every record the tree writes.
    pub structure_id: StructureId,
    /// Whether a key may map to several values.
    pub allow_duplicates: bool,
    /// Split and merge strategy.
    pub policy: Arc<dyn BalancePolicy>,
    /// Number of decoded pages kept in the LRU cache; 0 disables caching.
    pub cache_capacity: usize,
    /// Source of tree identities used to bind cursors.
    pub ids: Arc<TreeIds>,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            structure_id: StructureId(1),
            allow_duplicates: false,
            policy: Arc::new(DefaultBalancePolicy::default()),
            cache_capacity: 1024,
            ids: TreeIds::process_wide(),
        }
    }
}

impl fmt::Debug for TreeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeOptions")
            .field("structure_id", &self.structure_id)
            .field("allow_duplicates", &self.allow_duplicates)
            .field("policy", &self.policy)
            .field("cache_capacity", &self.cache_capacity)
            .finish_non_exhaustive()
    }
}

impl TreeOptions {
    /// Sets the structure id.
    pub fn structure_id(mut self, id: StructureId) -> Self {
        self.structure_id = id;
        self
    }

    /// Enables or disables duplicate values per key.
    pub fn allow_duplicates(mut self, allow: bool) -> Self {
        self.allow_duplicates = allow;
        self
    }

    /// Replaces the balance policy.
    pub fn policy(mut self, policy: Arc<dyn BalancePolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the decoded-page cache capacity.
    pub fn cache_capacity(mut self, pages: usize) -> Self {
        self.cache_capacity = pages;
        self
    }

    /// Shares an id source with other trees.
    pub fn ids(mut self, ids: Arc<TreeIds>) -> Self {
        self.ids = ids;
        self
    }
}

pub(crate) struct Shared {
    pub(crate) src: PageSource,
    pub(crate) policy: Arc<dyn BalancePolicy>,
    pub(crate) allow_duplicates: bool,
    pub(crate) ids: Arc<TreeIds>,
    pub(crate) stats: Arc<TreeStats>,
}

impl Shared {
    fn new(store: Arc<dyn LoggableStore>, options: TreeOptions) -> Arc<Self> {
        let stats = Arc::new(TreeStats::default());
        Arc::new(Self {
            src: PageSource::new(
                store,
                options.structure_id,
                options.cache_capacity,
                Arc::clone(&stats),
            ),
            policy: options.policy,
            allow_duplicates: options.allow_duplicates,
            ids: options.ids,
            stats,
        })
    }
}

/// Borrowed read access to a tree, used by cursors.
///
/// Obtain one through [`ReadTree::tree_ref`]; it cannot be built directly.
pub struct TreeRef<'a> {
    pub(crate) src: &'a PageSource,
    pub(crate) view: TreeView<'a>,
    pub(crate) generation: u64,
    pub(crate) id: u64,
    pub(crate) dups: bool,
}

/// Anything a [`Cursor`] can read from.
pub trait ReadTree {
    /// Borrowed view of the current tree contents.
    fn tree_ref(&self) -> TreeRef<'_>;
}

/// Immutable tree snapshot.
#[derive(Clone)]
pub struct Tree {
    shared: Arc<Shared>,
    core: PageTree,
    id: u64,
}

impl fmt::Debug for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tree")
            .field("id", &self.id)
            .field("root", &self.root_address())
            .field("size", &self.core.size)
            .finish()
    }
}

impl Tree {
    /// Opens the tree rooted at `root`; [`Address::NULL`] opens an empty tree.
    pub fn open(store: Arc<dyn LoggableStore>, options: TreeOptions, root: Address) -> Result<Self> {
        let shared = Shared::new(store, options);
        Self::with_shared(shared, root)
    }

    fn with_shared(shared: Arc<Shared>, root: Address) -> Result<Self> {
        let core = if root.is_null() {
            PageTree::empty(false)
        } else {
            PageTree::open(&shared.src, root, false)?
        };
        let id = shared.ids.next_id();
        tracing::debug!(target: "strata_btree::open", tree = id, root = %root, size = core.size, "opened tree");
        Ok(Self { shared, core, id })
    }

    /// Persisted root address, or [`Address::NULL`] for a never-saved empty tree.
    pub fn root_address(&self) -> Address {
        self.core.root.stored().unwrap_or(Address::NULL)
    }

    /// Value for `key`; the smallest one when the key has duplicates.
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        self.core.view().get(&self.shared.src, key)
    }

    /// Whether `key` is present.
    pub fn has_key(&self, key: &[u8]) -> Result<bool> {
        self.core.view().contains(&self.shared.src, key)
    }

    /// Whether the exact pair is present.
    pub fn has_pair(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        self.core.view().has_pair(&self.shared.src, key, value)
    }

    /// Number of `(key, value)` pairs.
    pub fn size(&self) -> u64 {
        self.core.size
    }

    /// Whether the tree holds no pairs.
    pub fn is_empty(&self) -> bool {
        self.core.size == 0
    }

    /// Whether keys may carry several values.
    pub fn allows_duplicates(&self) -> bool {
        self.shared.allow_duplicates
    }

    /// Unpositioned cursor bound to this tree.
    pub fn cursor(&self) -> Cursor {
        Cursor::new(&self.tree_ref())
    }

    /// Every record address reachable from the root, root first.
    pub fn address_iter(&self) -> AddressIter<'_> {
        match self.core.root.stored() {
            Some(root) => AddressIter::new(&self.shared.src, root),
            None => AddressIter::empty(&self.shared.src),
        }
    }

    /// Working copy that shares this tree's store, cache and counters.
    pub fn to_mutable(&self) -> MutableTree {
        MutableTree {
            shared: Arc::clone(&self.shared),
            id: self.shared.ids.next_id(),
            core: self.core.clone(),
            expired: BTreeSet::new(),
            generation: 0,
        }
    }

    /// Checks structural invariants of every reachable page.
    pub fn verify(&self) -> Result<()> {
        self.core.verify(&self.shared.src, self.shared.policy.as_ref())
    }

    /// Current counter values.
    pub fn stats(&self) -> TreeStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Logs the current counters through `tracing`.
    pub fn emit_stats(&self) {
        self.shared.stats.emit_tracing();
    }
}

impl ReadTree for Tree {
    fn tree_ref(&self) -> TreeRef<'_> {
        TreeRef {
            src: &self.shared.src,
            view: self.core.view(),
            generation: 0,
            id: self.id,
            dups: self.shared.allow_duplicates,
        }
    }
}

/// Copy-on-write working tree.
pub struct MutableTree {
    pub(crate) shared: Arc<Shared>,
    pub(crate) id: u64,
    pub(crate) core: PageTree,
    pub(crate) expired: BTreeSet<Address>,
    pub(crate) generation: u64,
}

impl fmt::Debug for MutableTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutableTree")
            .field("id", &self.id)
            .field("size", &self.core.size)
            .field("dirty", &self.core.is_dirty())
            .field("working_pages", &self.core.arena.len())
            .field("expired", &self.expired.len())
            .field("generation", &self.generation)
            .finish()
    }
}

impl MutableTree {
    /// New empty working tree.
    pub fn new(store: Arc<dyn LoggableStore>, options: TreeOptions) -> Self {
        let shared = Shared::new(store, options);
        Self {
            id: shared.ids.next_id(),
            shared,
            core: PageTree::empty(false),
            expired: BTreeSet::new(),
            generation: 0,
        }
    }

    pub(crate) fn apply<T>(
        &mut self,
        changed: impl Fn(&T) -> bool,
        op: impl FnOnce(&mut PageTree, &mut Ctx<'_>, bool) -> Result<T>,
    ) -> Result<T> {
        let shared = &self.shared;
        let mut cx = Ctx {
            src: &shared.src,
            policy: shared.policy.as_ref(),
            expired: &mut self.expired,
        };
        let out = op(&mut self.core, &mut cx, shared.allow_duplicates)?;
        if changed(&out) {
            self.generation += 1;
        }
        Ok(out)
    }

    /// Inserts the pair. Returns false when nothing changed: the pair already
    /// exists, or (without duplicates) the key already has this value.
    /// Without duplicates an existing key gets its value replaced.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<bool> {
        self.apply(|changed| *changed, |core, cx, dups| core.put(cx, key, value, dups))
    }

    /// Appends a pair whose key is not below the current maximum.
    ///
    /// A smaller key is rejected with [`StrataError::Invalid`]; an equal key
    /// is rejected unless duplicates are allowed.
    pub fn put_right(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.apply(|_| true, |core, cx, dups| core.put_right(cx, key, value, dups))
    }

    /// Inserts only when `key` is absent.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<bool> {
        self.apply(|changed| *changed, |core, cx, _| core.add(cx, key, value))
    }

    /// Removes `key` with every value it has.
    pub fn delete(&mut self, key: &[u8]) -> Result<bool> {
        self.apply(|changed| *changed, |core, cx, _| core.delete(cx, key))
    }

    /// Removes one pair. Only available on trees with duplicates.
    pub fn delete_pair(&mut self, key: &[u8], value: &[u8]) -> Result<bool> {
        if !self.shared.allow_duplicates {
            return Err(StrataError::Invalid("delete_pair requires duplicates"));
        }
        self.apply(|changed| *changed, |core, cx, _| core.delete_pair(cx, key, value))
    }

    /// Value for `key`; the smallest one when the key has duplicates.
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        self.core.view().get(&self.shared.src, key)
    }

    /// Whether `key` is present.
    pub fn has_key(&self, key: &[u8]) -> Result<bool> {
        self.core.view().contains(&self.shared.src, key)
    }

    /// Whether the exact pair is present.
    pub fn has_pair(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        self.core.view().has_pair(&self.shared.src, key, value)
    }

    /// Number of `(key, value)` pairs.
    pub fn size(&self) -> u64 {
        self.core.size
    }

    /// Whether the tree holds no pairs.
    pub fn is_empty(&self) -> bool {
        self.core.size == 0
    }

    /// Whether keys may carry several values.
    pub fn allows_duplicates(&self) -> bool {
        self.shared.allow_duplicates
    }

    /// Whether there are unsaved changes.
    pub fn is_dirty(&self) -> bool {
        self.core.is_dirty()
    }

    /// Counter bumped by every effective mutation, save and reclaim.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Writes all working pages and returns the new root address.
    ///
    /// Children are always appended before their parents, so the root is the
    /// last record written. Saving a clean tree writes nothing.
    pub fn save(&mut self) -> Result<Address> {
        let before = self.shared.stats.snapshot().pages_written;
        let dirty = self.core.is_dirty();
        let root = self.core.save(&self.shared.src)?;
        if dirty {
            self.generation += 1;
        }
        tracing::debug!(
            target: "strata_btree::save",
            tree = self.id,
            root = %root,
            size = self.core.size,
            pages = self.shared.stats.snapshot().pages_written - before,
            expired = self.expired.len(),
            "saved tree"
        );
        Ok(root)
    }

    /// Immutable snapshot of the last save. Fails while changes are unsaved.
    pub fn snapshot(&self) -> Result<Tree> {
        let Some(root) = self.core.root.stored() else {
            return Err(StrataError::Invalid("tree has unsaved changes"));
        };
        Tree::with_shared(Arc::clone(&self.shared), root)
    }

    /// Addresses made obsolete since the tree was opened, ascending.
    pub fn expired_addresses(&self) -> impl Iterator<Item = Address> + '_ {
        self.expired.iter().copied()
    }

    /// Drains the expired address set.
    pub fn take_expired_addresses(&mut self) -> Vec<Address> {
        std::mem::take(&mut self.expired).into_iter().collect()
    }

    /// Unpositioned cursor bound to this tree.
    pub fn cursor(&self) -> Cursor {
        Cursor::new(&self.tree_ref())
    }

    /// Every record address reachable from the saved root. Fails while
    /// changes are unsaved.
    pub fn address_iter(&self) -> Result<AddressIter<'_>> {
        match self.core.root.stored() {
            Some(root) => Ok(AddressIter::new(&self.shared.src, root)),
            None => Err(StrataError::Invalid("tree has unsaved changes")),
        }
    }

    /// Checks structural invariants of every reachable page.
    pub fn verify(&self) -> Result<()> {
        self.core.verify(&self.shared.src, self.shared.policy.as_ref())
    }

    /// Current counter values.
    pub fn stats(&self) -> TreeStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Logs the current counters through `tracing`.
    pub fn emit_stats(&self) {
        self.shared.stats.emit_tracing();
    }

    /// Store the tree reads from and writes to.
    pub fn store(&self) -> &dyn LoggableStore {
        self.shared.src.store()
    }
}

impl ReadTree for MutableTree {
    fn tree_ref(&self) -> TreeRef<'_> {
        TreeRef {
            src: &self.shared.src,
            view: self.core.view(),
            generation: self.generation,
            id: self.id,
            dups: self.shared.allow_duplicates,
        }
    }
}
