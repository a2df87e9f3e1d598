use bytes::Bytes;

use crate::types::{Result, StrataError};

use super::cache::PageSource;
use super::page::{LeafValue, NodeId, PageBody, Slot};
use super::policy::BalancePolicy;
use super::tree::cow::{dup_size, dup_view, PageTree, TreeView};

struct Checker<'a> {
    src: &'a PageSource,
    policy: &'a dyn BalancePolicy,
}

struct Level {
    depth: usize,
    leaf_depth: Option<usize>,
}

impl Checker<'_> {
    fn tree(&self, view: TreeView<'_>, dup: bool, expected_size: u64) -> Result<()> {
        let mut level = Level {
            depth: 0,
            leaf_depth: None,
        };
        let count = self.page(view, view.root, dup, None, &mut level)?;
        if count != expected_size {
            return Err(StrataError::Corruption("tree size does not match its contents"));
        }
        Ok(())
    }

    fn page(
        &self,
        view: TreeView<'_>,
        slot: Slot<NodeId>,
        dup: bool,
        expected_min: Option<&Bytes>,
        level: &mut Level,
    ) -> Result<u64> {
        let page = view.page(self.src, slot)?;
        if page.dup != dup {
            return Err(StrataError::Corruption("duplicate sub-tree type confusion"));
        }
        let len = page.len();
        if expected_min.is_some() && len == 0 {
            return Err(StrataError::Corruption("empty non-root page"));
        }
        if len > self.policy.max_size_for(page.shape()) {
            return Err(StrataError::Corruption("page exceeds policy maximum"));
        }
        for idx in 1..len {
            if page.key(idx - 1) >= page.key(idx) {
                return Err(StrataError::Corruption("page keys out of order"));
            }
        }
        if let Some(min) = expected_min {
            if page.min_key() != Some(min) {
                return Err(StrataError::Corruption("routing key differs from child minimum"));
            }
        }
        let mut count = 0;
        match &page.body {
            PageBody::Internal(entries) => {
                level.depth += 1;
                for entry in entries {
                    count += self.page(view, entry.child, dup, Some(&entry.key), level)?;
                }
                level.depth -= 1;
            }
            PageBody::Bottom(entries) => {
                match level.leaf_depth {
                    Some(depth) if depth != level.depth => {
                        return Err(StrataError::Corruption("bottom pages at different depths"));
                    }
                    _ => level.leaf_depth = Some(level.depth),
                }
                for entry in entries {
                    count += match &entry.value {
                        LeafValue::Single(_) => 1,
                        LeafValue::Duplicates(_) if dup => {
                            return Err(StrataError::Corruption("nested duplicate sub-tree"));
                        }
                        LeafValue::Duplicates(slot) => {
                            let size = dup_size(self.src, slot)?;
                            if size < 2 {
                                return Err(StrataError::Corruption(
                                    "duplicate sub-tree with fewer than two values",
                                ));
                            }
                            self.tree(dup_view(slot), true, size)?;
                            size
                        }
                    };
                }
            }
        }
        Ok(count)
    }
}

impl PageTree {
    /// Checks ordering, routing keys, page sizes, uniform depth and the
    /// logical size of this tree and every duplicate sub-tree under it.
    pub(crate) fn verify(&self, src: &PageSource, policy: &dyn BalancePolicy) -> Result<()> {
        Checker { src, policy }.tree(self.view(), self.dup, self.size)
    }
}
