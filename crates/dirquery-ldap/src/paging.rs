//! Page-shaped search results.

use serde::{Deserialize, Serialize};

/// One page of a larger result set.
///
/// `total_count` comes from a separate count query and can disagree with `items` when
/// the directory changes between the two queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagedResult<T> {
    /// Records on this page (at most `page_size`).
    pub items: Vec<T>,
    /// 1-based page number.
    pub page: u32,
    /// Requested page size.
    pub page_size: u32,
    /// Number of entries matching the filter.
    pub total_count: usize,
}

impl<T> PagedResult<T> {
    /// Creates a page.
    #[must_use]
    pub fn new(items: Vec<T>, page: u32, page_size: u32, total_count: usize) -> Self {
        Self {
            items,
            page,
            page_size,
            total_count,
        }
    }

    /// Number of pages needed to hold `total_count` entries.
    #[must_use]
    pub fn total_pages(&self) -> usize {
        if self.page_size == 0 {
            return 0;
        }
        self.total_count.div_ceil(self.page_size as usize)
    }

    /// Returns true if a page after this one exists.
    #[must_use]
    pub fn has_next_page(&self) -> bool {
        (self.page as usize) < self.total_pages()
    }

    /// Returns true if this is not the first page.
    #[must_use]
    pub fn has_previous_page(&self) -> bool {
        self.page > 1
    }

    /// Maps the items, keeping the paging metadata.
    #[must_use]
    pub fn map<U, F>(self, f: F) -> PagedResult<U>
    where
        F: FnMut(T) -> U,
    {
        PagedResult {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            page_size: self.page_size,
            total_count: self.total_count,
        }
    }
}
