//! Key/value operations layered over [`PageTree`]: outer-tree semantics with
//! optional per-key duplicate sub-trees.
//!
//! Every operation probes the tree read-only first, so a call that changes
//! nothing copies no page and expires no address.

use bytes::Bytes;

use crate::storage::btree::cache::PageSource;
use crate::storage::btree::page::{BottomEntry, LeafValue, Slot};
use crate::types::{Result, StrataError};

use super::cow::{dup_size, dup_view, expire_leaf_value, single_value, Ctx, PageTree};

/// What a key currently maps to.
enum Probe {
    Absent,
    Single(Bytes),
    Duplicates { has_value: bool },
}

impl PageTree {
    fn probe(&self, src: &PageSource, key: &[u8], value: &[u8]) -> Result<Probe> {
        let Some((page, idx)) = self.view().find(src, key)? else {
            return Ok(Probe::Absent);
        };
        match &page.bottom()?[idx].value {
            LeafValue::Single(slot) => Ok(Probe::Single(single_value(src, slot)?)),
            LeafValue::Duplicates(slot) => Ok(Probe::Duplicates {
                has_value: dup_view(slot).contains(src, value)?,
            }),
        }
    }

    /// Inserts a new single-value leaf for a key known to be absent.
    fn insert_new(&mut self, cx: &mut Ctx<'_>, key: &[u8], value: Bytes, rightmost: bool) -> Result<()> {
        let located = self.locate_mut(cx, key, rightmost)?;
        let pos = located.vacant()?;
        let entry = BottomEntry {
            key: Bytes::copy_from_slice(key),
            value: LeafValue::Single(Slot::Working(value)),
        };
        self.insert_at(cx, &located.path, located.bottom, pos, entry)?;
        self.size += 1;
        Ok(())
    }

    /// Adds `key` to a duplicate sub-tree. Returns false if present.
    pub(crate) fn insert_key(&mut self, cx: &mut Ctx<'_>, key: &[u8]) -> Result<bool> {
        if self.view().contains(cx.src, key)? {
            return Ok(false);
        }
        self.insert_new(cx, key, Bytes::new(), false)?;
        Ok(true)
    }

    /// Removes `key` from a duplicate sub-tree. Returns false if absent.
    pub(crate) fn remove_key(&mut self, cx: &mut Ctx<'_>, key: &[u8]) -> Result<bool> {
        if !self.view().contains(cx.src, key)? {
            return Ok(false);
        }
        let located = self.locate_mut(cx, key, false)?;
        let idx = located.found()?;
        let removed = self.remove_at(cx, &located.path, located.bottom, idx)?;
        expire_leaf_value(cx, &removed.value)?;
        self.size -= 1;
        Ok(true)
    }

    pub(crate) fn put(
        &mut self,
        cx: &mut Ctx<'_>,
        key: &[u8],
        value: &[u8],
        allow_dups: bool,
    ) -> Result<bool> {
        match self.probe(cx.src, key, value)? {
            Probe::Absent => {
                self.insert_new(cx, key, Bytes::copy_from_slice(value), false)?;
                Ok(true)
            }
            Probe::Single(existing) if existing.as_ref() == value => Ok(false),
            Probe::Single(existing) => {
                let located = self.locate_mut(cx, key, false)?;
                let idx = located.found()?;
                let entry = &mut self.arena.get_mut(located.bottom)?.bottom_mut()?[idx];
                if let LeafValue::Single(Slot::Stored(address)) = entry.value {
                    cx.expire(address);
                }
                if !allow_dups {
                    entry.value = LeafValue::Single(Slot::Working(Bytes::copy_from_slice(value)));
                    return Ok(true);
                }
                let mut sub = PageTree::empty(true);
                sub.insert_key(cx, &existing)?;
                sub.insert_key(cx, value)?;
                entry.value = LeafValue::Duplicates(Slot::Working(Box::new(sub)));
                self.size += 1;
                cx.src.stats().inc_dup_promotions();
                tracing::trace!(target: "strata_btree::dups", key_len = key.len(), "promoted key to duplicate sub-tree");
                Ok(true)
            }
            Probe::Duplicates { .. } if !allow_dups => Err(StrataError::Corruption(
                "duplicate sub-tree in a tree without duplicates",
            )),
            Probe::Duplicates { has_value: true } => Ok(false),
            Probe::Duplicates { has_value: false } => {
                let located = self.locate_mut(cx, key, false)?;
                let idx = located.found()?;
                let entry = &mut self.arena.get_mut(located.bottom)?.bottom_mut()?[idx];
                let sub = dup_working(cx, &mut entry.value)?;
                sub.insert_key(cx, value)?;
                self.size += 1;
                Ok(true)
            }
        }
    }

    /// Inserts only when `key` is absent.
    pub(crate) fn add(&mut self, cx: &mut Ctx<'_>, key: &[u8], value: &[u8]) -> Result<bool> {
        if self.view().contains(cx.src, key)? {
            return Ok(false);
        }
        self.insert_new(cx, key, Bytes::copy_from_slice(value), false)?;
        Ok(true)
    }

    /// Appends past the current maximum key without searching.
    pub(crate) fn put_right(
        &mut self,
        cx: &mut Ctx<'_>,
        key: &[u8],
        value: &[u8],
        allow_dups: bool,
    ) -> Result<()> {
        match self.view().edge_key(cx.src, true)? {
            Some(last) if key < last.as_ref() => {
                Err(StrataError::Invalid("put_right key is below the current maximum"))
            }
            Some(last) if key == last.as_ref() => {
                if !allow_dups {
                    return Err(StrataError::Invalid("put_right key equals the current maximum"));
                }
                self.put(cx, key, value, true).map(|_| ())
            }
            _ => self.insert_new(cx, key, Bytes::copy_from_slice(value), true),
        }
    }

    /// Deletes `key` with all its values.
    pub(crate) fn delete(&mut self, cx: &mut Ctx<'_>, key: &[u8]) -> Result<bool> {
        if !self.view().contains(cx.src, key)? {
            return Ok(false);
        }
        let located = self.locate_mut(cx, key, false)?;
        let idx = located.found()?;
        let removed = self.remove_at(cx, &located.path, located.bottom, idx)?;
        let count = match &removed.value {
            LeafValue::Single(_) => 1,
            LeafValue::Duplicates(slot) => dup_size(cx.src, slot)?,
        };
        expire_leaf_value(cx, &removed.value)?;
        self.size = self
            .size
            .checked_sub(count)
            .ok_or(StrataError::Corruption("tree size underflow"))?;
        Ok(true)
    }

    /// Deletes one `(key, value)` pair, demoting a duplicate sub-tree left
    /// with a single value back to a plain leaf.
    pub(crate) fn delete_pair(&mut self, cx: &mut Ctx<'_>, key: &[u8], value: &[u8]) -> Result<bool> {
        match self.probe(cx.src, key, value)? {
            Probe::Absent | Probe::Duplicates { has_value: false } => Ok(false),
            Probe::Single(existing) if existing.as_ref() == value => self.delete(cx, key),
            Probe::Single(_) => Ok(false),
            Probe::Duplicates { has_value: true } => {
                let located = self.locate_mut(cx, key, false)?;
                let idx = located.found()?;
                let entry = &mut self.arena.get_mut(located.bottom)?.bottom_mut()?[idx];
                let demoted = {
                    let sub = dup_working(cx, &mut entry.value)?;
                    sub.remove_key(cx, value)?;
                    if sub.size == 1 {
                        let last = sub
                            .view()
                            .edge_key(cx.src, false)?
                            .ok_or(StrataError::Corruption("duplicate sub-tree lost its values"))?;
                        sub.expire_all(cx)?;
                        Some(last)
                    } else {
                        None
                    }
                };
                if let Some(last) = demoted {
                    entry.value = LeafValue::Single(Slot::Working(last));
                    cx.src.stats().inc_dup_demotions();
                    tracing::trace!(target: "strata_btree::dups", key_len = key.len(), "demoted duplicate sub-tree");
                }
                self.size -= 1;
                Ok(true)
            }
        }
    }
}

/// Turns a stored duplicate sub-tree reference into a working one in place.
pub(crate) fn dup_working<'v>(cx: &mut Ctx<'_>, value: &'v mut LeafValue) -> Result<&'v mut PageTree> {
    if let LeafValue::Duplicates(Slot::Stored(address)) = *value {
        let sub = PageTree::open(cx.src, address, true)?;
        *value = LeafValue::Duplicates(Slot::Working(Box::new(sub)));
    }
    match value {
        LeafValue::Duplicates(Slot::Working(sub)) => Ok(&mut **sub),
        _ => Err(StrataError::Corruption("expected a duplicate sub-tree")),
    }
}
