use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{Result, StrataError};

/// Size and position facts a [`BalancePolicy`] decides on.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PageShape {
    /// Number of entries currently in the page.
    pub size: usize,
    /// Whether the page is a bottom (leaf-level) page.
    pub bottom: bool,
    /// Whether the page belongs to a duplicate sub-tree.
    pub dup: bool,
}

/// Strategy deciding when pages split or merge and where splits happen.
///
/// Every method must be a pure function of its arguments.
pub trait BalancePolicy: Send + Sync + fmt::Debug {
    /// Maximum entry count of an outer-tree page.
    fn page_max_size(&self) -> usize;

    /// Maximum entry count of a duplicate sub-tree page.
    fn dup_page_max_size(&self) -> usize;

    /// Maximum entry count that applies to `page`.
    fn max_size_for(&self, page: PageShape) -> usize {
        if page.dup {
            self.dup_page_max_size()
        } else {
            self.page_max_size()
        }
    }

    /// Whether inserting one more entry into `page` requires a split.
    fn need_split(&self, page: PageShape) -> bool {
        page.size >= self.max_size_for(page)
    }

    /// Index of the first entry that moves into the new right page when
    /// `page` splits while inserting at `insert_pos`.
    fn split_pos(&self, page: PageShape, insert_pos: usize) -> usize;

    /// Whether `left` and its right sibling `right` should become one page.
    fn need_merge(&self, left: PageShape, right: PageShape) -> bool;
}

/// Serializable limits for [`DefaultBalancePolicy`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalanceConfig {
    /// Maximum entries per outer-tree page.
    pub page_max_size: usize,
    /// Maximum entries per duplicate sub-tree page.
    pub dup_page_max_size: usize,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            page_max_size: 128,
            dup_page_max_size: 32,
        }
    }
}

/// Default policy: half splits inside a page, 7/8 splits at the right edge,
/// merge siblings whose combined size fits in 7/8 of a page.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DefaultBalancePolicy {
    page_max_size: usize,
    dup_page_max_size: usize,
}

impl Default for DefaultBalancePolicy {
    fn default() -> Self {
        let cfg = BalanceConfig::default();
        Self {
            page_max_size: cfg.page_max_size,
            dup_page_max_size: cfg.dup_page_max_size,
        }
    }
}

impl DefaultBalancePolicy {
    /// Creates a policy with the given page limits.
    pub fn new(page_max_size: usize, dup_page_max_size: usize) -> Result<Self> {
        Self::from_config(BalanceConfig {
            page_max_size,
            dup_page_max_size,
        })
    }

    /// Validates `cfg` and builds a policy from it.
    pub fn from_config(cfg: BalanceConfig) -> Result<Self> {
        if cfg.page_max_size < 2 || cfg.dup_page_max_size < 2 {
            return Err(StrataError::Invalid("page max size must be at least 2"));
        }
        Ok(Self {
            page_max_size: cfg.page_max_size,
            dup_page_max_size: cfg.dup_page_max_size,
        })
    }

    /// Returns the limits this policy was built with.
    pub fn config(&self) -> BalanceConfig {
        BalanceConfig {
            page_max_size: self.page_max_size,
            dup_page_max_size: self.dup_page_max_size,
        }
    }
}

impl BalancePolicy for DefaultBalancePolicy {
    fn page_max_size(&self) -> usize {
        self.page_max_size
    }

    fn dup_page_max_size(&self) -> usize {
        self.dup_page_max_size
    }

    fn split_pos(&self, page: PageShape, insert_pos: usize) -> usize {
        if insert_pos < page.size {
            page.size >> 1
        } else {
            (page.size * 7) >> 3
        }
    }

    fn need_merge(&self, left: PageShape, right: PageShape) -> bool {
        if left.size == 0 || right.size == 0 {
            return true;
        }
        left.size + right.size <= (self.max_size_for(left) * 7) >> 3
    }
}
