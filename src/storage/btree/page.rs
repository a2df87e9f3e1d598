//! Page and leaf records plus their in-memory working form.

use bytes::Bytes;

use crate::primitives::bytes::{buf::Reader, var};
use crate::primitives::log::Record;
use crate::types::{Address, Result, StrataError};

use super::policy::PageShape;
use super::tree::PageTree;

/// Kind byte of every record the tree writes.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum RecordType {
    /// Outer-tree key/value pair.
    Leaf = 1,
    /// Duplicate sub-tree entry (the value is the key).
    DupLeaf = 2,
    /// Non-root bottom page.
    Bottom = 3,
    /// Root bottom page, carries the tree size.
    BottomRoot = 4,
    /// Non-root internal page.
    Internal = 5,
    /// Root internal page, carries the tree size.
    InternalRoot = 6,
    /// Non-root duplicate sub-tree bottom page.
    DupBottom = 7,
    /// Root bottom page of a duplicate sub-tree.
    DupBottomRoot = 8,
    /// Non-root duplicate sub-tree internal page.
    DupInternal = 9,
    /// Root internal page of a duplicate sub-tree.
    DupInternalRoot = 10,
}

impl RecordType {
    /// Converts a raw kind byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            1 => Self::Leaf,
            2 => Self::DupLeaf,
            3 => Self::Bottom,
            4 => Self::BottomRoot,
            5 => Self::Internal,
            6 => Self::InternalRoot,
            7 => Self::DupBottom,
            8 => Self::DupBottomRoot,
            9 => Self::DupInternal,
            10 => Self::DupInternalRoot,
            _ => return None,
        })
    }

    /// Raw kind byte.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Page record kind for the given page flavour.
    pub fn for_page(bottom: bool, dup: bool, root: bool) -> Self {
        match (bottom, dup, root) {
            (true, false, false) => Self::Bottom,
            (true, false, true) => Self::BottomRoot,
            (false, false, false) => Self::Internal,
            (false, false, true) => Self::InternalRoot,
            (true, true, false) => Self::DupBottom,
            (true, true, true) => Self::DupBottomRoot,
            (false, true, false) => Self::DupInternal,
            (false, true, true) => Self::DupInternalRoot,
        }
    }

    /// Whether records of this kind are pages.
    pub fn is_page(self) -> bool {
        !matches!(self, Self::Leaf | Self::DupLeaf)
    }

    /// Whether the page is a tree root.
    pub fn is_root(self) -> bool {
        matches!(
            self,
            Self::BottomRoot | Self::InternalRoot | Self::DupBottomRoot | Self::DupInternalRoot
        )
    }

    /// Whether the record belongs to a duplicate sub-tree.
    pub fn is_dup(self) -> bool {
        matches!(
            self,
            Self::DupLeaf
                | Self::DupBottom
                | Self::DupBottomRoot
                | Self::DupInternal
                | Self::DupInternalRoot
        )
    }

    /// Whether the page is a bottom page.
    pub fn is_bottom(self) -> bool {
        matches!(
            self,
            Self::Bottom | Self::BottomRoot | Self::DupBottom | Self::DupBottomRoot
        )
    }
}

/// Index of a working page inside a tree's arena.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub(crate) struct NodeId(pub(crate) u32);

/// Reference that is either persisted at an address or held in memory.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Slot<T> {
    Stored(Address),
    Working(T),
}

impl<T> Slot<T> {
    pub(crate) fn stored(&self) -> Option<Address> {
        match self {
            Slot::Stored(address) => Some(*address),
            Slot::Working(_) => None,
        }
    }
}

/// Value side of a bottom entry.
#[derive(Clone, Debug)]
pub(crate) enum LeafValue {
    Single(Slot<Bytes>),
    Duplicates(Slot<Box<PageTree>>),
}

#[derive(Clone, Debug)]
pub(crate) struct InternalEntry {
    pub(crate) key: Bytes,
    pub(crate) child: Slot<NodeId>,
}

#[derive(Clone, Debug)]
pub(crate) struct BottomEntry {
    pub(crate) key: Bytes,
    pub(crate) value: LeafValue,
}

/// Entry on its way into a page.
#[derive(Debug)]
pub(crate) enum Entry {
    Internal(InternalEntry),
    Bottom(BottomEntry),
}

#[derive(Clone, Debug)]
pub(crate) enum PageBody {
    Internal(Vec<InternalEntry>),
    Bottom(Vec<BottomEntry>),
}

/// One tree page. Pages decoded from the log only hold stored slots.
#[derive(Clone, Debug)]
pub(crate) struct Page {
    pub(crate) body: PageBody,
    pub(crate) dup: bool,
    /// Logical size of the tree, present on root records only.
    pub(crate) size: Option<u64>,
}

const FLAG_SINGLE: u8 = 0;
const FLAG_DUPLICATES: u8 = 1;

impl Page {
    pub(crate) fn empty_bottom(dup: bool) -> Self {
        Self {
            body: PageBody::Bottom(Vec::new()),
            dup,
            size: None,
        }
    }

    pub(crate) fn len(&self) -> usize {
        match &self.body {
            PageBody::Internal(entries) => entries.len(),
            PageBody::Bottom(entries) => entries.len(),
        }
    }

    pub(crate) fn is_bottom(&self) -> bool {
        matches!(self.body, PageBody::Bottom(_))
    }

    pub(crate) fn shape(&self) -> PageShape {
        PageShape {
            size: self.len(),
            bottom: self.is_bottom(),
            dup: self.dup,
        }
    }

    pub(crate) fn key(&self, idx: usize) -> &Bytes {
        match &self.body {
            PageBody::Internal(entries) => &entries[idx].key,
            PageBody::Bottom(entries) => &entries[idx].key,
        }
    }

    pub(crate) fn min_key(&self) -> Option<&Bytes> {
        (self.len() > 0).then(|| self.key(0))
    }

    /// Binary search for `key` among the page keys.
    pub(crate) fn search(&self, key: &[u8]) -> std::result::Result<usize, usize> {
        match &self.body {
            PageBody::Internal(entries) => entries.binary_search_by(|e| e.key.as_ref().cmp(key)),
            PageBody::Bottom(entries) => entries.binary_search_by(|e| e.key.as_ref().cmp(key)),
        }
    }

    /// Child index an internal page routes `key` to: the last entry whose key
    /// is not greater than `key`, or the first entry.
    pub(crate) fn route(&self, key: &[u8]) -> usize {
        match self.search(key) {
            Ok(idx) => idx,
            Err(0) => 0,
            Err(idx) => idx - 1,
        }
    }

    pub(crate) fn internal(&self) -> Result<&[InternalEntry]> {
        match &self.body {
            PageBody::Internal(entries) => Ok(entries),
            PageBody::Bottom(_) => Err(StrataError::Corruption("expected internal page")),
        }
    }

    pub(crate) fn internal_mut(&mut self) -> Result<&mut Vec<InternalEntry>> {
        match &mut self.body {
            PageBody::Internal(entries) => Ok(entries),
            PageBody::Bottom(_) => Err(StrataError::Corruption("expected internal page")),
        }
    }

    pub(crate) fn bottom(&self) -> Result<&[BottomEntry]> {
        match &self.body {
            PageBody::Bottom(entries) => Ok(entries),
            PageBody::Internal(_) => Err(StrataError::Corruption("expected bottom page")),
        }
    }

    pub(crate) fn bottom_mut(&mut self) -> Result<&mut Vec<BottomEntry>> {
        match &mut self.body {
            PageBody::Bottom(entries) => Ok(entries),
            PageBody::Internal(_) => Err(StrataError::Corruption("expected bottom page")),
        }
    }

    pub(crate) fn insert(&mut self, pos: usize, entry: Entry) -> Result<()> {
        match (&mut self.body, entry) {
            (PageBody::Internal(entries), Entry::Internal(entry)) => entries.insert(pos, entry),
            (PageBody::Bottom(entries), Entry::Bottom(entry)) => entries.insert(pos, entry),
            _ => return Err(StrataError::Corruption("entry kind does not match page level")),
        }
        Ok(())
    }

    /// Moves entries `[at..]` into a new page of the same kind.
    pub(crate) fn split_off(&mut self, at: usize) -> Page {
        let body = match &mut self.body {
            PageBody::Internal(entries) => PageBody::Internal(entries.split_off(at)),
            PageBody::Bottom(entries) => PageBody::Bottom(entries.split_off(at)),
        };
        Page {
            body,
            dup: self.dup,
            size: None,
        }
    }

    /// Appends every entry of `right` after this page's entries.
    pub(crate) fn append(&mut self, right: Page) -> Result<()> {
        match (&mut self.body, right.body) {
            (PageBody::Internal(left), PageBody::Internal(mut right)) => left.append(&mut right),
            (PageBody::Bottom(left), PageBody::Bottom(mut right)) => left.append(&mut right),
            _ => return Err(StrataError::Corruption("merging pages of different levels")),
        }
        Ok(())
    }

    /// Record kind this page is written as.
    pub(crate) fn record_type(&self, root: bool) -> RecordType {
        RecordType::for_page(self.is_bottom(), self.dup, root)
    }

    /// Encodes a page whose slots are all stored. `root_size` marks a root.
    pub(crate) fn encode(&self, root_size: Option<u64>, out: &mut Vec<u8>) -> Result<()> {
        if let Some(size) = root_size {
            var::encode_u64(size, out);
        }
        var::encode_u64(self.len() as u64, out);
        match &self.body {
            PageBody::Internal(entries) => {
                for entry in entries {
                    let Slot::Stored(child) = entry.child else {
                        return Err(StrataError::Invalid("internal page has an unsaved child"));
                    };
                    put_key(&entry.key, out);
                    var::encode_u64(child.0, out);
                }
            }
            PageBody::Bottom(entries) => {
                for entry in entries {
                    put_key(&entry.key, out);
                    let (address, flag) = match &entry.value {
                        LeafValue::Single(Slot::Stored(address)) => (*address, FLAG_SINGLE),
                        LeafValue::Duplicates(Slot::Stored(address)) => {
                            (*address, FLAG_DUPLICATES)
                        }
                        _ => return Err(StrataError::Invalid("bottom page has an unsaved leaf")),
                    };
                    var::encode_u64(address.0, out);
                    if !self.dup {
                        out.push(flag);
                    }
                }
            }
        }
        Ok(())
    }

    /// Decodes a page record.
    pub(crate) fn decode(record: &Record) -> Result<Page> {
        let kind = page_kind(record)?;
        let payload = &record.payload;
        let mut reader = Reader::new(payload);
        let size = if kind.is_root() {
            Some(reader.read_var_u64("page size field truncated")?)
        } else {
            None
        };
        let count = reader.read_len("page entry count truncated")?;
        if count > reader.remaining() {
            return Err(StrataError::Corruption("page entry count exceeds payload"));
        }
        let dup = kind.is_dup();
        let body = if kind.is_bottom() {
            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                let key = take_key(&mut reader, payload)?;
                let address = Address(reader.read_var_u64("leaf address truncated")?);
                let flag = if dup {
                    FLAG_SINGLE
                } else {
                    reader.read_u8("leaf flag truncated")?
                };
                let value = match flag {
                    FLAG_SINGLE => LeafValue::Single(Slot::Stored(address)),
                    FLAG_DUPLICATES => LeafValue::Duplicates(Slot::Stored(address)),
                    _ => return Err(StrataError::Corruption("unknown leaf flag")),
                };
                entries.push(BottomEntry { key, value });
            }
            PageBody::Bottom(entries)
        } else {
            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                let key = take_key(&mut reader, payload)?;
                let child = Address(reader.read_var_u64("child address truncated")?);
                entries.push(InternalEntry {
                    key,
                    child: Slot::Stored(child),
                });
            }
            if entries.is_empty() {
                return Err(StrataError::Corruption("internal page without children"));
            }
            PageBody::Internal(entries)
        };
        if reader.remaining() != 0 {
            return Err(StrataError::Corruption("trailing bytes after page entries"));
        }
        Ok(Page { body, dup, size })
    }
}

fn page_kind(record: &Record) -> Result<RecordType> {
    match RecordType::from_u8(record.kind) {
        Some(kind) if kind.is_page() => Ok(kind),
        _ => Err(StrataError::UnexpectedRecord {
            address: record.address,
            kind: record.kind,
        }),
    }
}

fn put_key(key: &[u8], out: &mut Vec<u8>) {
    var::encode_u64(key.len() as u64, out);
    out.extend_from_slice(key);
}

fn take_key(reader: &mut Reader<'_>, payload: &Bytes) -> Result<Bytes> {
    let len = reader.read_len("key length truncated")?;
    let start = reader.position();
    reader.take(len, "key truncated")?;
    Ok(payload.slice(start..start + len))
}

/// Encodes an outer leaf record body.
pub(crate) fn encode_leaf(key: &[u8], value: &[u8], out: &mut Vec<u8>) {
    put_key(key, out);
    out.extend_from_slice(value);
}

/// Decodes a leaf or duplicate leaf record into `(key, value)`.
///
/// Duplicate leaves carry no value; an empty one is returned.
pub(crate) fn decode_leaf(record: &Record) -> Result<(Bytes, Bytes)> {
    match RecordType::from_u8(record.kind) {
        Some(RecordType::Leaf) => {
            let mut reader = Reader::new(&record.payload);
            let key = take_key(&mut reader, &record.payload)?;
            let value = record.payload.slice(reader.position()..);
            Ok((key, value))
        }
        Some(RecordType::DupLeaf) => Ok((record.payload.clone(), Bytes::new())),
        _ => Err(StrataError::UnexpectedRecord {
            address: record.address,
            kind: record.kind,
        }),
    }
}
