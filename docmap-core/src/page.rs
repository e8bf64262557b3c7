//! Paged query results.
//!
//! [`PaginationParams`] turns a 1-indexed page number into the skip/limit
//! pair of a query, and [`Page`] carries one page of decoded entities
//! together with the total match count reported by the driver.

use serde::{Deserialize, Serialize};

/// A single page of query results.
///
/// # Example
///
/// ```ignore
/// let page = Page::builder(vec!["a", "b"])
///     .with_count(12)
///     .with_next_page(Some(2))
///     .build();
///
/// assert_eq!(page.items.len(), 2);
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Number of matching documents across all pages.
    pub count: u64,
    pub next_page: Option<u64>,
    pub previous_page: Option<u64>,
}

impl<T> Page<T> {
    pub fn builder(items: Vec<T>) -> PageBuilder<T> {
        PageBuilder::new(items)
    }

    /// Assembles the page `params` selects out of `count` matches.
    pub fn from_count(items: Vec<T>, count: u64, params: &PaginationParams) -> Self {
        let end = params.offset().saturating_add(params.per_page);
        Page::builder(items)
            .with_count(count)
            .with_next_page((end < count).then(|| params.page + 1))
            .with_previous_page((params.page > 1).then(|| params.page - 1))
            .build()
    }

    /// Converts the items, keeping the navigation data.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            count: self.count,
            next_page: self.next_page,
            previous_page: self.previous_page,
        }
    }
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            count: 0,
            next_page: None,
            previous_page: None,
        }
    }
}

pub struct PageBuilder<T> {
    items: Vec<T>,
    count: u64,
    next_page: Option<u64>,
    previous_page: Option<u64>,
}

impl<T> PageBuilder<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            count: 0,
            next_page: None,
            previous_page: None,
        }
    }

    pub fn with_count(mut self, count: u64) -> Self {
        self.count = count;
        self
    }

    pub fn with_next_page(mut self, next_page: Option<u64>) -> Self {
        self.next_page = next_page;
        self
    }

    pub fn with_previous_page(mut self, previous_page: Option<u64>) -> Self {
        self.previous_page = previous_page;
        self
    }

    pub fn build(self) -> Page<T> {
        Page {
            items: self.items,
            count: self.count,
            next_page: self.next_page,
            previous_page: self.previous_page,
        }
    }
}

/// Which page of a result set to fetch. Pages are 1-indexed; page 0 is
/// treated as page 1.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationParams {
    pub page: u64,
    pub per_page: u64,
}

impl PaginationParams {
    pub fn new(page: u64, per_page: u64) -> Self {
        Self { page, per_page }
    }

    pub fn builder() -> PaginationParamsBuilder {
        PaginationParamsBuilder::new()
    }

    /// Number of documents to skip before this page.
    pub fn offset(&self) -> u64 {
        self.page.saturating_sub(1).saturating_mul(self.per_page)
    }

    /// The page size as a query limit.
    pub fn limit(&self) -> i64 {
        i64::try_from(self.per_page).unwrap_or(i64::MAX)
    }
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self { page: 1, per_page: 10 }
    }
}

pub struct PaginationParamsBuilder {
    page: Option<u64>,
    per_page: Option<u64>,
}

impl PaginationParamsBuilder {
    pub fn new() -> Self {
        Self { page: None, per_page: None }
    }

    pub fn with_page(mut self, page: u64) -> Self {
        self.page = Some(page);
        self
    }

    pub fn with_per_page(mut self, per_page: u64) -> Self {
        self.per_page = Some(per_page);
        self
    }

    /// Uses page 1 and 10 items per page for unset values.
    pub fn build(self) -> PaginationParams {
        PaginationParams {
            page: self.page.unwrap_or(1),
            per_page: self.per_page.unwrap_or(10),
        }
    }
}

impl Default for PaginationParamsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_offset_is_saturating() {
        assert_eq!(PaginationParams::new(3, 20).offset(), 40);
        assert_eq!(PaginationParams::new(0, 20).offset(), 0);
        assert_eq!(PaginationParams::new(u64::MAX, u64::MAX).offset(), u64::MAX);
        assert_eq!(PaginationParams::new(1, u64::MAX).limit(), i64::MAX);
    }

    #[test]
    fn test_page_navigation_from_count() {
        let params = PaginationParams::new(2, 10);
        let page = Page::from_count(vec![11, 12], 25, &params);
        assert_eq!(page.next_page, Some(3));
        assert_eq!(page.previous_page, Some(1));

        let last = Page::from_count(vec![21], 25, &PaginationParams::new(3, 10));
        assert_eq!(last.next_page, None);
        assert_eq!(last.map(|n| n * 2).items, vec![42]);
    }

    #[test]
    fn test_builder_defaults() {
        assert_eq!(PaginationParams::builder().with_per_page(5).build(), PaginationParams::new(1, 5));
    }
}
