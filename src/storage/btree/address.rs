use crate::types::{Address, Result};

use super::cache::PageSource;
use super::page::{LeafValue, PageBody, Slot};

enum Pending {
    Page(Address),
    Leaf(Address),
}

/// Lazy pre-order walk over every record address reachable from a persisted
/// root: pages, leaves and duplicate sub-trees.
///
/// Yields an error and then stops if a page cannot be read.
pub struct AddressIter<'a> {
    src: &'a PageSource,
    stack: Vec<Pending>,
}

impl<'a> AddressIter<'a> {
    pub(crate) fn new(src: &'a PageSource, root: Address) -> Self {
        Self {
            src,
            stack: vec![Pending::Page(root)],
        }
    }

    pub(crate) fn empty(src: &'a PageSource) -> Self {
        Self {
            src,
            stack: Vec::new(),
        }
    }
}

impl Iterator for AddressIter<'_> {
    type Item = Result<Address>;

    fn next(&mut self) -> Option<Self::Item> {
        let address = match self.stack.pop()? {
            Pending::Leaf(address) => return Some(Ok(address)),
            Pending::Page(address) => address,
        };
        let page = match self.src.page(address) {
            Ok(page) => page,
            Err(err) => {
                self.stack.clear();
                return Some(Err(err));
            }
        };
        // Pushed in reverse so children pop in key order.
        match &page.body {
            PageBody::Internal(entries) => {
                for entry in entries.iter().rev() {
                    if let Slot::Stored(child) = entry.child {
                        self.stack.push(Pending::Page(child));
                    }
                }
            }
            PageBody::Bottom(entries) => {
                for entry in entries.iter().rev() {
                    match entry.value {
                        LeafValue::Single(Slot::Stored(leaf)) => self.stack.push(Pending::Leaf(leaf)),
                        LeafValue::Duplicates(Slot::Stored(root)) => {
                            self.stack.push(Pending::Page(root))
                        }
                        _ => {}
                    }
                }
            }
        }
        Some(Ok(address))
    }
}
