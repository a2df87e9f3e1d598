use std::collections::BTreeSet;
use std::ops::Deref;
use std::sync::Arc;

use bytes::Bytes;

use crate::primitives::bytes::var;
use crate::storage::btree::address::AddressIter;
use crate::storage::btree::cache::PageSource;
use crate::storage::btree::page::{
    encode_leaf, BottomEntry, Entry, InternalEntry, LeafValue, NodeId, Page, PageBody,
    RecordType, Slot,
};
use crate::storage::btree::policy::{BalancePolicy, PageShape};
use crate::types::{Address, Result, StrataError};

use super::arena::Arena;

static EMPTY_ARENA: Arena = Arena::new();

/// A page reached during descent: shared from the cache or borrowed from
/// the owning tree's arena.
pub(crate) enum PageRef<'a> {
    Shared(Arc<Page>),
    Borrowed(&'a Page),
}

impl Deref for PageRef<'_> {
    type Target = Page;

    fn deref(&self) -> &Page {
        match self {
            PageRef::Shared(page) => page,
            PageRef::Borrowed(page) => page,
        }
    }
}

/// Read-only handle on a tree: its root plus the arena its working slots
/// point into.
#[derive(Clone, Copy)]
pub(crate) struct TreeView<'a> {
    pub(crate) root: Slot<NodeId>,
    pub(crate) arena: &'a Arena,
}

impl<'a> TreeView<'a> {
    /// View over a fully persisted tree.
    pub(crate) fn stored(root: Address) -> Self {
        Self {
            root: Slot::Stored(root),
            arena: &EMPTY_ARENA,
        }
    }

    pub(crate) fn page(&self, src: &PageSource, slot: Slot<NodeId>) -> Result<PageRef<'a>> {
        match slot {
            Slot::Stored(address) => Ok(PageRef::Shared(src.page(address)?)),
            Slot::Working(id) => Ok(PageRef::Borrowed(self.arena.get(id)?)),
        }
    }

    /// Bottom page and index holding `key`, if present.
    pub(crate) fn find(&self, src: &PageSource, key: &[u8]) -> Result<Option<(PageRef<'a>, usize)>> {
        let mut page = self.page(src, self.root)?;
        loop {
            if page.is_bottom() {
                let found = page.search(key).ok();
                return Ok(found.map(|idx| (page, idx)));
            }
            let entries = page.internal()?;
            if entries.is_empty() {
                return Err(StrataError::Corruption("internal page without children"));
            }
            let child = entries[page.route(key)].child;
            page = self.page(src, child)?;
        }
    }

    /// Smallest (`last == false`) or largest key of the tree.
    pub(crate) fn edge_key(&self, src: &PageSource, last: bool) -> Result<Option<Bytes>> {
        let mut page = self.page(src, self.root)?;
        loop {
            let len = page.len();
            if len == 0 {
                return Ok(None);
            }
            let idx = if last { len - 1 } else { 0 };
            if page.is_bottom() {
                return Ok(Some(page.key(idx).clone()));
            }
            let child = page.internal()?[idx].child;
            page = self.page(src, child)?;
        }
    }

    pub(crate) fn contains(&self, src: &PageSource, key: &[u8]) -> Result<bool> {
        Ok(self.find(src, key)?.is_some())
    }

    /// Value stored for `key`; the smallest duplicate when the key has several.
    pub(crate) fn get(&self, src: &PageSource, key: &[u8]) -> Result<Option<Bytes>> {
        let Some((page, idx)) = self.find(src, key)? else {
            return Ok(None);
        };
        match &page.bottom()?[idx].value {
            LeafValue::Single(slot) => single_value(src, slot).map(Some),
            LeafValue::Duplicates(slot) => dup_view(slot).edge_key(src, false),
        }
    }

    pub(crate) fn has_pair(&self, src: &PageSource, key: &[u8], value: &[u8]) -> Result<bool> {
        let Some((page, idx)) = self.find(src, key)? else {
            return Ok(false);
        };
        match &page.bottom()?[idx].value {
            LeafValue::Single(slot) => Ok(single_value(src, slot)?.as_ref() == value),
            LeafValue::Duplicates(slot) => dup_view(slot).contains(src, value),
        }
    }
}

/// Reads the value behind a single-value slot.
pub(crate) fn single_value(src: &PageSource, slot: &Slot<Bytes>) -> Result<Bytes> {
    match slot {
        Slot::Stored(address) => src.leaf_value(*address),
        Slot::Working(value) => Ok(value.clone()),
    }
}

/// View over the duplicate sub-tree behind a leaf value.
pub(crate) fn dup_view(slot: &Slot<Box<PageTree>>) -> TreeView<'_> {
    match slot {
        Slot::Stored(address) => TreeView::stored(*address),
        Slot::Working(sub) => sub.view(),
    }
}

/// Logical number of values in a duplicate sub-tree.
pub(crate) fn dup_size(src: &PageSource, slot: &Slot<Box<PageTree>>) -> Result<u64> {
    match slot {
        Slot::Stored(address) => src
            .page(*address)?
            .size
            .ok_or(StrataError::Corruption("duplicate sub-tree root without size")),
        Slot::Working(sub) => Ok(sub.size),
    }
}

/// Mutation context threaded through the algorithms: where pages come from,
/// how they balance, and where superseded addresses are recorded.
pub(crate) struct Ctx<'a> {
    pub(crate) src: &'a PageSource,
    pub(crate) policy: &'a dyn BalancePolicy,
    pub(crate) expired: &'a mut BTreeSet<Address>,
}

impl Ctx<'_> {
    pub(crate) fn expire(&mut self, address: Address) {
        self.expired.insert(address);
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct PathEntry {
    pub(crate) node: NodeId,
    pub(crate) slot_index: usize,
}

/// Result of a copy-on-write descent: the internal frames walked and the
/// bottom page reached, with the binary search result for the key.
pub(crate) struct Located {
    pub(crate) path: Vec<PathEntry>,
    pub(crate) bottom: NodeId,
    pub(crate) pos: std::result::Result<usize, usize>,
}

impl Located {
    pub(crate) fn found(&self) -> Result<usize> {
        self.pos
            .map_err(|_| StrataError::Corruption("key vanished during copy-on-write descent"))
    }

    pub(crate) fn vacant(&self) -> Result<usize> {
        match self.pos {
            Err(pos) => Ok(pos),
            Ok(_) => Err(StrataError::Corruption("key appeared during copy-on-write descent")),
        }
    }
}

/// A tree (outer or duplicate sub-tree) in working form: a root slot plus an
/// arena of copied or freshly built pages.
#[derive(Clone, Debug)]
pub(crate) struct PageTree {
    pub(crate) root: Slot<NodeId>,
    pub(crate) arena: Arena,
    pub(crate) size: u64,
    pub(crate) dup: bool,
}

impl PageTree {
    pub(crate) fn empty(dup: bool) -> Self {
        let mut arena = Arena::new();
        let root = arena.alloc(Page::empty_bottom(dup));
        Self {
            root: Slot::Working(root),
            arena,
            size: 0,
            dup,
        }
    }

    /// Opens the persisted tree rooted at `root`.
    pub(crate) fn open(src: &PageSource, root: Address, dup: bool) -> Result<Self> {
        let page = src.page(root)?;
        let size = page
            .size
            .ok_or(StrataError::Corruption("tree root record without size"))?;
        if page.dup != dup {
            return Err(StrataError::Corruption("duplicate sub-tree type confusion"));
        }
        Ok(Self {
            root: Slot::Stored(root),
            arena: Arena::new(),
            size,
            dup,
        })
    }

    pub(crate) fn view(&self) -> TreeView<'_> {
        TreeView {
            root: self.root,
            arena: &self.arena,
        }
    }

    /// Whether any page still needs to be written.
    pub(crate) fn is_dirty(&self) -> bool {
        matches!(self.root, Slot::Working(_))
    }

    fn check_dup(&self, page: &Page) -> Result<()> {
        if page.dup != self.dup {
            return Err(StrataError::Corruption("duplicate sub-tree type confusion"));
        }
        Ok(())
    }

    /// Working copy of an already loaded stored page; expires its address.
    fn adopt(cx: &mut Ctx<'_>, address: Address, page: &Page) -> Page {
        cx.expire(address);
        let mut copy = page.clone();
        copy.size = None;
        copy
    }

    fn load_working(&self, cx: &mut Ctx<'_>, address: Address) -> Result<Page> {
        let page = cx.src.page(address)?;
        self.check_dup(&page)?;
        Ok(Self::adopt(cx, address, &page))
    }

    fn install_root(&mut self, page: Page) -> NodeId {
        let id = self.arena.alloc(page);
        self.root = Slot::Working(id);
        id
    }

    fn install_child(&mut self, parent: NodeId, idx: usize, page: Page) -> Result<NodeId> {
        let id = self.arena.alloc(page);
        self.arena.get_mut(parent)?.internal_mut()?[idx].child = Slot::Working(id);
        Ok(id)
    }

    pub(crate) fn root_working(&mut self, cx: &mut Ctx<'_>) -> Result<NodeId> {
        match self.root {
            Slot::Working(id) => Ok(id),
            Slot::Stored(address) => {
                let page = self.load_working(cx, address)?;
                Ok(self.install_root(page))
            }
        }
    }

    pub(crate) fn child_working(
        &mut self,
        cx: &mut Ctx<'_>,
        parent: NodeId,
        idx: usize,
    ) -> Result<NodeId> {
        match self.child_slot(parent, idx)? {
            Slot::Working(id) => Ok(id),
            Slot::Stored(address) => {
                let page = self.load_working(cx, address)?;
                self.install_child(parent, idx, page)
            }
        }
    }

    pub(crate) fn child_slot(&self, parent: NodeId, idx: usize) -> Result<Slot<NodeId>> {
        self.arena
            .get(parent)?
            .internal()?
            .get(idx)
            .map(|entry| entry.child)
            .ok_or(StrataError::Corruption("child index out of range"))
    }

    fn child_shape(&self, src: &PageSource, parent: NodeId, idx: usize) -> Result<PageShape> {
        match self.child_slot(parent, idx)? {
            Slot::Working(id) => Ok(self.arena.get(id)?.shape()),
            Slot::Stored(address) => Ok(src.page(address)?.shape()),
        }
    }

    /// Stored pages on the descent path for `key`, top-down.
    fn stored_path(
        &self,
        src: &PageSource,
        key: &[u8],
        rightmost: bool,
    ) -> Result<Vec<(Address, Arc<Page>)>> {
        let view = self.view();
        let mut loaded = Vec::new();
        let mut slot = self.root;
        loop {
            let page = view.page(src, slot)?;
            if let (Slot::Stored(address), PageRef::Shared(shared)) = (slot, &page) {
                self.check_dup(shared)?;
                loaded.push((address, Arc::clone(shared)));
            }
            if page.is_bottom() {
                return Ok(loaded);
            }
            let len = page.len();
            if len == 0 {
                return Err(StrataError::Corruption("internal page without children"));
            }
            let idx = if rightmost { len - 1 } else { page.route(key) };
            slot = page.internal()?[idx].child;
        }
    }

    /// Descends to the bottom page for `key` (or the rightmost bottom page),
    /// turning every page on the way into a working page.
    ///
    /// All stored pages on the path are read before the first one is copied,
    /// so a failed read leaves the tree untouched.
    pub(crate) fn locate_mut(
        &mut self,
        cx: &mut Ctx<'_>,
        key: &[u8],
        rightmost: bool,
    ) -> Result<Located> {
        let mut stored = self.stored_path(cx.src, key, rightmost)?.into_iter();
        let mut take = |address: Address| match stored.next() {
            Some((at, page)) if at == address => Ok(page),
            _ => Err(StrataError::Corruption("descent path changed while copying")),
        };
        let mut path = Vec::new();
        let mut node = match self.root {
            Slot::Working(id) => id,
            Slot::Stored(address) => {
                let loaded = take(address)?;
                let page = Self::adopt(cx, address, &loaded);
                self.install_root(page)
            }
        };
        loop {
            let page = self.arena.get(node)?;
            let len = page.len();
            if page.is_bottom() {
                let pos = if rightmost { Err(len) } else { page.search(key) };
                return Ok(Located {
                    path,
                    bottom: node,
                    pos,
                });
            }
            if len == 0 {
                return Err(StrataError::Corruption("internal page without children"));
            }
            let slot_index = if rightmost { len - 1 } else { page.route(key) };
            let child = match self.child_slot(node, slot_index)? {
                Slot::Working(id) => id,
                Slot::Stored(address) => {
                    let loaded = take(address)?;
                    let page = Self::adopt(cx, address, &loaded);
                    self.install_child(node, slot_index, page)?
                }
            };
            path.push(PathEntry { node, slot_index });
            node = child;
        }
    }

    /// Inserts `entry` at `pos` of the located bottom page, splitting pages
    /// and refreshing routing keys up to the root.
    pub(crate) fn insert_at(
        &mut self,
        cx: &mut Ctx<'_>,
        path: &[PathEntry],
        bottom: NodeId,
        pos: usize,
        entry: BottomEntry,
    ) -> Result<()> {
        let mut split = self.insert_into(cx, bottom, pos, Entry::Bottom(entry))?;
        let mut child = bottom;
        for frame in path.iter().rev() {
            self.refresh_key(frame.node, frame.slot_index, child)?;
            if let Some(right) = split.take() {
                let key = self.min_key(right)?;
                let routed = Entry::Internal(InternalEntry {
                    key,
                    child: Slot::Working(right),
                });
                split = self.insert_into(cx, frame.node, frame.slot_index + 1, routed)?;
            }
            child = frame.node;
        }
        if let Some(right) = split {
            self.grow_root(child, right)?;
        }
        Ok(())
    }

    fn insert_into(
        &mut self,
        cx: &mut Ctx<'_>,
        node: NodeId,
        pos: usize,
        entry: Entry,
    ) -> Result<Option<NodeId>> {
        let shape = self.arena.get(node)?.shape();
        // A page needs two entries to split into two non-empty halves.
        if shape.size < 2 || !cx.policy.need_split(shape) {
            self.arena.get_mut(node)?.insert(pos, entry)?;
            return Ok(None);
        }
        let mut split_at = cx.policy.split_pos(shape, pos).clamp(1, shape.size);
        if split_at == shape.size && pos < shape.size {
            split_at = (shape.size / 2).max(1);
        }
        let right = self.arena.get_mut(node)?.split_off(split_at);
        let right_id = self.arena.alloc(right);
        if pos >= split_at {
            self.arena.get_mut(right_id)?.insert(pos - split_at, entry)?;
        } else {
            self.arena.get_mut(node)?.insert(pos, entry)?;
        }
        cx.src.stats().inc_page_splits();
        tracing::trace!(
            target: "strata_btree::split",
            bottom = shape.bottom,
            dup = shape.dup,
            size = shape.size,
            split_at,
            insert_pos = pos,
            "split page"
        );
        Ok(Some(right_id))
    }

    fn min_key(&self, node: NodeId) -> Result<Bytes> {
        self.arena
            .get(node)?
            .min_key()
            .cloned()
            .ok_or(StrataError::Corruption("empty page has no minimum key"))
    }

    fn refresh_key(&mut self, parent: NodeId, slot_index: usize, child: NodeId) -> Result<()> {
        let Some(min) = self.arena.get(child)?.min_key().cloned() else {
            return Ok(());
        };
        let entries = self.arena.get_mut(parent)?.internal_mut()?;
        match entries.get_mut(slot_index) {
            Some(entry) => {
                entry.key = min;
                Ok(())
            }
            None => Err(StrataError::Corruption("routing slot out of range")),
        }
    }

    fn grow_root(&mut self, left: NodeId, right: NodeId) -> Result<()> {
        let entries = vec![
            InternalEntry {
                key: self.min_key(left)?,
                child: Slot::Working(left),
            },
            InternalEntry {
                key: self.min_key(right)?,
                child: Slot::Working(right),
            },
        ];
        let root = self.arena.alloc(Page {
            body: PageBody::Internal(entries),
            dup: self.dup,
            size: None,
        });
        self.root = Slot::Working(root);
        tracing::trace!(target: "strata_btree::split", dup = self.dup, "tree height grew");
        Ok(())
    }

    /// Removes the entry at `idx` of the located bottom page and rebalances
    /// the path. The caller accounts for the removed leaf's addresses.
    pub(crate) fn remove_at(
        &mut self,
        cx: &mut Ctx<'_>,
        path: &[PathEntry],
        bottom: NodeId,
        idx: usize,
    ) -> Result<BottomEntry> {
        let entries = self.arena.get_mut(bottom)?.bottom_mut()?;
        if idx >= entries.len() {
            return Err(StrataError::Corruption("bottom slot out of range"));
        }
        let removed = entries.remove(idx);
        self.rebalance(cx, path, bottom)?;
        Ok(removed)
    }

    fn rebalance(&mut self, cx: &mut Ctx<'_>, path: &[PathEntry], bottom: NodeId) -> Result<()> {
        let mut child = bottom;
        for frame in path.iter().rev() {
            let parent = frame.node;
            let pos = frame.slot_index;
            let child_shape = self.arena.get(child)?.shape();
            self.refresh_key(parent, pos, child)?;
            let parent_len = self.arena.get(parent)?.len();
            if pos > 0 {
                let left_shape = self.child_shape(cx.src, parent, pos - 1)?;
                if cx.policy.need_merge(left_shape, child_shape) {
                    let left = self.child_working(cx, parent, pos - 1)?;
                    let absorbed = self.arena.take(child)?;
                    self.arena.get_mut(left)?.append(absorbed)?;
                    self.arena.get_mut(parent)?.internal_mut()?.remove(pos);
                    cx.src.stats().inc_page_merges();
                    self.note_merge(child_shape, "left");
                }
            } else if pos + 1 < parent_len {
                let right_shape = self.child_shape(cx.src, parent, pos + 1)?;
                if cx.policy.need_merge(child_shape, right_shape) {
                    let absorbed = self.detach_child(cx, parent, pos + 1)?;
                    self.arena.get_mut(child)?.append(absorbed)?;
                    self.refresh_key(parent, pos, child)?;
                    self.note_merge(child_shape, "right");
                }
            } else if child_shape.size == 0 {
                self.arena.take(child)?;
                self.arena.get_mut(parent)?.internal_mut()?.remove(pos);
            }
            child = parent;
        }
        self.shrink_root(cx)
    }

    fn note_merge(&self, shape: PageShape, direction: &'static str) {
        tracing::trace!(
            target: "strata_btree::merge",
            bottom = shape.bottom,
            dup = shape.dup,
            size = shape.size,
            direction,
            "merged sibling pages"
        );
    }

    /// Unlinks child `idx` from `parent` and returns its entries as a page.
    fn detach_child(&mut self, cx: &mut Ctx<'_>, parent: NodeId, idx: usize) -> Result<Page> {
        let entry = self.arena.get_mut(parent)?.internal_mut()?.remove(idx);
        cx.src.stats().inc_page_merges();
        match entry.child {
            Slot::Working(id) => self.arena.take(id),
            Slot::Stored(address) => self.load_working(cx, address),
        }
    }

    fn shrink_root(&mut self, cx: &mut Ctx<'_>) -> Result<()> {
        loop {
            let Slot::Working(root) = self.root else {
                return Ok(());
            };
            let page = self.arena.get(root)?;
            if page.is_bottom() || page.len() > 1 {
                return Ok(());
            }
            if page.len() == 0 {
                *self.arena.get_mut(root)? = Page::empty_bottom(self.dup);
                return Ok(());
            }
            let child = self.child_working(cx, root, 0)?;
            self.arena.take(root)?;
            self.root = Slot::Working(child);
            tracing::trace!(target: "strata_btree::merge", dup = self.dup, "tree height shrank");
        }
    }

    /// Records every stored address reachable from this tree as expired.
    pub(crate) fn expire_all(&self, cx: &mut Ctx<'_>) -> Result<()> {
        self.expire_slot(cx, self.root)
    }

    fn expire_slot(&self, cx: &mut Ctx<'_>, slot: Slot<NodeId>) -> Result<()> {
        match slot {
            Slot::Stored(address) => expire_stored(cx, address),
            Slot::Working(id) => match &self.arena.get(id)?.body {
                PageBody::Internal(entries) => {
                    for entry in entries {
                        self.expire_slot(cx, entry.child)?;
                    }
                    Ok(())
                }
                PageBody::Bottom(entries) => {
                    for entry in entries {
                        expire_leaf_value(cx, &entry.value)?;
                    }
                    Ok(())
                }
            },
        }
    }

    /// Writes every working page bottom-up and returns the root address.
    pub(crate) fn save(&mut self, src: &PageSource) -> Result<Address> {
        let address = match self.root {
            Slot::Stored(address) => address,
            Slot::Working(id) => self.write_node(src, id, Some(self.size))?,
        };
        self.arena.clear();
        self.root = Slot::Stored(address);
        Ok(address)
    }

    fn write_node(&mut self, src: &PageSource, id: NodeId, root_size: Option<u64>) -> Result<Address> {
        let mut page = self.arena.take(id)?;
        match &mut page.body {
            PageBody::Internal(entries) => {
                for entry in entries.iter_mut() {
                    if let Slot::Working(child) = entry.child {
                        entry.child = Slot::Stored(self.write_node(src, child, None)?);
                    }
                }
            }
            PageBody::Bottom(entries) => {
                for entry in entries.iter_mut() {
                    let stored = match &mut entry.value {
                        LeafValue::Single(Slot::Working(value)) => {
                            LeafValue::Single(Slot::Stored(self.write_leaf(src, &entry.key, value)?))
                        }
                        LeafValue::Duplicates(Slot::Working(sub)) => {
                            LeafValue::Duplicates(Slot::Stored(sub.save(src)?))
                        }
                        _ => continue,
                    };
                    entry.value = stored;
                }
            }
        }
        src.write_page(&page, root_size)
    }

    fn write_leaf(&self, src: &PageSource, key: &[u8], value: &[u8]) -> Result<Address> {
        if self.dup {
            return src.write(RecordType::DupLeaf, key);
        }
        let mut payload =
            Vec::with_capacity(var::encoded_len(key.len() as u64) + key.len() + value.len());
        encode_leaf(key, value, &mut payload);
        src.write(RecordType::Leaf, &payload)
    }
}

fn expire_stored(cx: &mut Ctx<'_>, root: Address) -> Result<()> {
    let src = cx.src;
    for address in AddressIter::new(src, root) {
        cx.expire(address?);
    }
    Ok(())
}

/// Records the stored addresses behind a leaf value as expired.
pub(crate) fn expire_leaf_value(cx: &mut Ctx<'_>, value: &LeafValue) -> Result<()> {
    match value {
        LeafValue::Single(Slot::Stored(address)) => {
            cx.expire(*address);
            Ok(())
        }
        LeafValue::Single(Slot::Working(_)) => Ok(()),
        LeafValue::Duplicates(Slot::Stored(address)) => expire_stored(cx, *address),
        LeafValue::Duplicates(Slot::Working(sub)) => sub.expire_all(cx),
    }
}
