//! Log-cleaning cooperation: force every record of the tree that lives in a
//! log range about to be reclaimed back into working form, so the next save
//! rewrites it elsewhere.

use std::ops::Range;

use crate::primitives::log::Record;
use crate::types::{Address, Result};

use super::cache::PageSource;
use super::page::{LeafValue, NodeId, PageBody, Slot};
use super::tree::cow::{dup_view, Ctx, PageTree, TreeView};
use super::tree::dups::dup_working;
use super::tree::MutableTree;

fn in_range(range: &Range<u64>, address: Option<Address>) -> bool {
    address.is_some_and(|address| range.contains(&address.0))
}

/// Whether the subtree behind `slot` holds any record inside `range`.
///
/// A page is always written after its children, so a stored page below the
/// range start has no descendant inside the range.
fn touches(view: TreeView<'_>, src: &PageSource, slot: Slot<NodeId>, range: &Range<u64>) -> Result<bool> {
    if let Slot::Stored(address) = slot {
        if address.0 < range.start {
            return Ok(false);
        }
        if range.contains(&address.0) {
            return Ok(true);
        }
    }
    let page = view.page(src, slot)?;
    match &page.body {
        PageBody::Internal(entries) => {
            for entry in entries {
                if touches(view, src, entry.child, range)? {
                    return Ok(true);
                }
            }
        }
        PageBody::Bottom(entries) => {
            for entry in entries {
                let hit = match &entry.value {
                    LeafValue::Single(slot) => in_range(range, slot.stored()),
                    LeafValue::Duplicates(slot) => {
                        let sub = dup_view(slot);
                        touches(sub, src, sub.root, range)?
                    }
                };
                if hit {
                    return Ok(true);
                }
            }
        }
    }
    Ok(false)
}

impl PageTree {
    /// Forces records inside `range` into working form; returns how many.
    pub(crate) fn reclaim(&mut self, cx: &mut Ctx<'_>, range: &Range<u64>) -> Result<u64> {
        if !touches(self.view(), cx.src, self.root, range)? {
            return Ok(0);
        }
        let mut forced = u64::from(in_range(range, self.root.stored()));
        let root = self.root_working(cx)?;
        forced += self.reclaim_node(cx, root, range)?;
        Ok(forced)
    }

    fn reclaim_node(&mut self, cx: &mut Ctx<'_>, node: NodeId, range: &Range<u64>) -> Result<u64> {
        let mut forced = 0;
        let len = self.arena.get(node)?.len();
        if !self.arena.get(node)?.is_bottom() {
            for idx in 0..len {
                let slot = self.child_slot(node, idx)?;
                if !touches(self.view(), cx.src, slot, range)? {
                    continue;
                }
                forced += u64::from(in_range(range, slot.stored()));
                let child = self.child_working(cx, node, idx)?;
                forced += self.reclaim_node(cx, child, range)?;
            }
            return Ok(forced);
        }
        for idx in 0..len {
            let entry = &mut self.arena.get_mut(node)?.bottom_mut()?[idx];
            match &entry.value {
                LeafValue::Single(Slot::Stored(address)) if range.contains(&address.0) => {
                    let address = *address;
                    let value = cx.src.leaf_value(address)?;
                    cx.expire(address);
                    entry.value = LeafValue::Single(Slot::Working(value));
                    forced += 1;
                }
                LeafValue::Duplicates(slot) => {
                    let sub = dup_view(slot);
                    if touches(sub, cx.src, sub.root, range)? {
                        forced += dup_working(cx, &mut entry.value)?.reclaim(cx, range)?;
                    }
                }
                LeafValue::Single(_) => {}
            }
        }
        Ok(forced)
    }
}

impl MutableTree {
    /// Cooperates with log cleaning: every record of this tree whose address
    /// lies in `[first.address, end of the last supplied record)` is forced,
    /// together with its ancestors, into working form without changing any
    /// key or value. Returns whether anything was forced, that is, whether a
    /// subsequent [`save`](MutableTree::save) is worthwhile.
    ///
    /// Returns false without walking the tree when none of the records
    /// belongs to this tree's structure.
    pub fn reclaim<'r>(
        &mut self,
        first: &'r Record,
        rest: impl IntoIterator<Item = &'r Record>,
    ) -> Result<bool> {
        let structure_id = self.shared.src.structure_id();
        let mut end = first.end();
        let mut ours = first.structure_id == structure_id;
        for record in rest {
            end = end.max(record.end());
            ours |= record.structure_id == structure_id;
        }
        if !ours {
            return Ok(false);
        }
        let range = first.address.0..end;
        let forced = self.apply(|forced| *forced > 0, |core, cx, _| core.reclaim(cx, &range))?;
        if forced > 0 {
            self.shared.stats.add_records_reclaimed(forced);
        }
        tracing::debug!(
            target: "strata_btree::reclaim",
            tree = self.id,
            start = range.start,
            end = range.end,
            forced,
            "reclaimed log range"
        );
        Ok(forced > 0)
    }
}
