use crate::storage::btree::page::{NodeId, Page};
use crate::types::{Result, StrataError};

/// Slab of working pages owned by one tree.
///
/// Freed slots are recycled; a [`NodeId`] is only meaningful until the tree
/// is mutated again, which is why cursors re-validate against the tree's
/// generation before trusting one.
#[derive(Clone, Debug, Default)]
pub(crate) struct Arena {
    pages: Vec<Option<Page>>,
    free: Vec<u32>,
}

impl Arena {
    pub(crate) const fn new() -> Self {
        Self {
            pages: Vec::new(),
            free: Vec::new(),
        }
    }

    pub(crate) fn alloc(&mut self, page: Page) -> NodeId {
        match self.free.pop() {
            Some(slot) => {
                self.pages[slot as usize] = Some(page);
                NodeId(slot)
            }
            None => {
                self.pages.push(Some(page));
                NodeId((self.pages.len() - 1) as u32)
            }
        }
    }

    pub(crate) fn get(&self, id: NodeId) -> Result<&Page> {
        self.pages
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(StrataError::Corruption("dangling working page reference"))
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Result<&mut Page> {
        self.pages
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(StrataError::Corruption("dangling working page reference"))
    }

    /// Removes the page from the arena and returns it.
    pub(crate) fn take(&mut self, id: NodeId) -> Result<Page> {
        let page = self
            .pages
            .get_mut(id.0 as usize)
            .and_then(Option::take)
            .ok_or(StrataError::Corruption("dangling working page reference"))?;
        self.free.push(id.0);
        Ok(page)
    }

    pub(crate) fn clear(&mut self) {
        self.pages.clear();
        self.free.clear();
    }

    /// Number of live working pages.
    pub(crate) fn len(&self) -> usize {
        self.pages.len() - self.free.len()
    }
}
