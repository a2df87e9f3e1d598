use std::sync::Arc;

use bytes::Bytes;
use smallvec::SmallVec;

use crate::types::{Result, StrataError};

use super::cache::PageSource;
use super::page::{BottomEntry, NodeId, Page, Slot};
use super::tree::cow::PageRef;
use super::tree::TreeView;

/// Page held by a traversal frame. Working pages are named by arena id and
/// are only valid while the tree's generation is unchanged.
#[derive(Clone, Debug)]
enum FramePage {
    Shared(Arc<Page>),
    Working(NodeId),
}

#[derive(Clone, Debug)]
struct Frame {
    page: FramePage,
    index: usize,
}

/// Root-to-bottom path of `(page, index)` frames through one tree.
#[derive(Clone, Debug, Default)]
pub(crate) struct Stack {
    frames: SmallVec<[Frame; 8]>,
}

fn resolve(src: &PageSource, slot: Slot<NodeId>) -> Result<FramePage> {
    match slot {
        Slot::Stored(address) => Ok(FramePage::Shared(src.page(address)?)),
        Slot::Working(id) => Ok(FramePage::Working(id)),
    }
}

fn page_of<'a>(view: TreeView<'a>, page: &FramePage) -> Result<PageRef<'a>> {
    match page {
        FramePage::Shared(page) => Ok(PageRef::Shared(Arc::clone(page))),
        FramePage::Working(id) => Ok(PageRef::Borrowed(view.arena.get(*id)?)),
    }
}

fn child_at(page: &Page, index: usize) -> Result<Slot<NodeId>> {
    page.internal()?
        .get(index)
        .map(|entry| entry.child)
        .ok_or(StrataError::Corruption("cursor frame index out of range"))
}

/// Entry `idx` of a bottom page.
pub(crate) fn bottom_entry(page: &Page, idx: usize) -> Result<&BottomEntry> {
    page.bottom()?
        .get(idx)
        .ok_or(StrataError::Corruption("cursor frame index out of range"))
}

impl Stack {
    /// Pushes frames from `slot` down to a bottom page, taking the first (or
    /// last) entry at every level. Returns false if that bottom page is empty.
    pub(crate) fn descend(
        &mut self,
        view: TreeView<'_>,
        src: &PageSource,
        slot: Slot<NodeId>,
        last: bool,
    ) -> Result<bool> {
        let mut next = resolve(src, slot)?;
        loop {
            let page = page_of(view, &next)?;
            let len = page.len();
            if len == 0 {
                if !page.is_bottom() {
                    return Err(StrataError::Corruption("internal page without children"));
                }
                self.frames.push(Frame {
                    page: next,
                    index: 0,
                });
                return Ok(false);
            }
            let index = if last { len - 1 } else { 0 };
            let child = if page.is_bottom() {
                None
            } else {
                Some(child_at(&page, index)?)
            };
            self.frames.push(Frame { page: next, index });
            match child {
                Some(child) => next = resolve(src, child)?,
                None => return Ok(true),
            }
        }
    }

    /// Positions on the first entry whose key is not less than `key`.
    pub(crate) fn seek(&mut self, view: TreeView<'_>, src: &PageSource, key: &[u8]) -> Result<bool> {
        self.frames.clear();
        let mut next = resolve(src, view.root)?;
        loop {
            let page = page_of(view, &next)?;
            if page.is_bottom() {
                let index = match page.search(key) {
                    Ok(idx) | Err(idx) => idx,
                };
                let len = page.len();
                self.frames.push(Frame { page: next, index });
                if index < len {
                    return Ok(true);
                }
                return self.advance_page(view, src);
            }
            let index = page.route(key);
            let child = child_at(&page, index)?;
            self.frames.push(Frame { page: next, index });
            next = resolve(src, child)?;
        }
    }

    pub(crate) fn advance(&mut self, view: TreeView<'_>, src: &PageSource) -> Result<bool> {
        let Some(frame) = self.frames.last_mut() else {
            return Ok(false);
        };
        let len = page_of(view, &frame.page)?.len();
        if frame.index + 1 < len {
            frame.index += 1;
            return Ok(true);
        }
        self.advance_page(view, src)
    }

    fn advance_page(&mut self, view: TreeView<'_>, src: &PageSource) -> Result<bool> {
        self.frames.pop();
        while let Some(frame) = self.frames.last_mut() {
            let page = page_of(view, &frame.page)?;
            if frame.index + 1 < page.len() {
                frame.index += 1;
                let child = child_at(&page, frame.index)?;
                return self.descend(view, src, child, false);
            }
            self.frames.pop();
        }
        Ok(false)
    }

    pub(crate) fn retreat(&mut self, view: TreeView<'_>, src: &PageSource) -> Result<bool> {
        let Some(frame) = self.frames.last_mut() else {
            return Ok(false);
        };
        if frame.index > 0 {
            frame.index -= 1;
            return Ok(true);
        }
        self.frames.pop();
        while let Some(frame) = self.frames.last_mut() {
            if frame.index > 0 {
                frame.index -= 1;
                let page = page_of(view, &frame.page)?;
                let child = child_at(&page, frame.index)?;
                return self.descend(view, src, child, true);
            }
            self.frames.pop();
        }
        Ok(false)
    }

    /// Bottom page and index the stack points at.
    pub(crate) fn current<'a>(&self, view: TreeView<'a>) -> Result<(PageRef<'a>, usize)> {
        let frame = self
            .frames
            .last()
            .ok_or(StrataError::Corruption("cursor stack is empty"))?;
        Ok((page_of(view, &frame.page)?, frame.index))
    }

    pub(crate) fn current_key(&self, view: TreeView<'_>) -> Result<Bytes> {
        let (page, idx) = self.current(view)?;
        Ok(bottom_entry(&page, idx)?.key.clone())
    }
}
