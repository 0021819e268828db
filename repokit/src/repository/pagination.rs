//! Paging and ordering parameters
//!
//! [`PagedOptions`] is what callers pass to `get_paged`: a sort direction, a
//! 1-based page index, and a page size. Out-of-range values are clamped
//! rather than rejected, and [`PagedOptions::window`] turns the result into an
//! offset/limit [`Window`] for the engine.
//!
//! # Example
//!
//! ```rust
//! use repokit::repository::PagedOptions;
//!
//! let options = PagedOptions::new().descending().with_index(3).with_size(20);
//! let window = options.window();
//! assert_eq!(window.offset, 40);
//! assert_eq!(window.limit, 20);
//!
//! // Zero is clamped to 1
//! let clamped = PagedOptions::new().with_index(0).with_size(0).normalized(None);
//! assert_eq!((clamped.index, clamped.size), (1, 1));
//! ```

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Page size used when the caller does not choose one
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Direction for ordering results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
    /// Sort in ascending order (A-Z, 0-9)
    #[default]
    #[serde(alias = "asc")]
    Ascending,
    /// Sort in descending order (Z-A, 9-0)
    #[serde(alias = "desc")]
    Descending,
}

impl OrderDirection {
    /// Orient an ascending comparison result
    pub fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            Self::Ascending => ordering,
            Self::Descending => ordering.reverse(),
        }
    }
}

impl fmt::Display for OrderDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ascending => write!(f, "asc"),
            Self::Descending => write!(f, "desc"),
        }
    }
}

/// Options for a paged query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PagedOptions {
    /// Sort ascending (`true`) or descending (`false`)
    pub ascending: bool,
    /// 1-based page number
    pub index: u32,
    /// Rows per page
    pub size: u32,
}

impl Default for PagedOptions {
    fn default() -> Self {
        Self {
            ascending: true,
            index: 1,
            size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PagedOptions {
    /// First page, ascending, default size
    pub fn new() -> Self {
        Self::default()
    }

    /// Sort ascending
    #[must_use]
    pub fn ascending(mut self) -> Self {
        self.ascending = true;
        self
    }

    /// Sort descending
    #[must_use]
    pub fn descending(mut self) -> Self {
        self.ascending = false;
        self
    }

    /// Select a 1-based page
    #[must_use]
    pub fn with_index(mut self, index: u32) -> Self {
        self.index = index;
        self
    }

    /// Set the page size
    #[must_use]
    pub fn with_size(mut self, size: u32) -> Self {
        self.size = size;
        self
    }

    /// Sort direction
    pub fn direction(&self) -> OrderDirection {
        if self.ascending {
            OrderDirection::Ascending
        } else {
            OrderDirection::Descending
        }
    }

    /// Clamp index and size to at least 1, and size to `max_size` if given
    #[must_use]
    pub fn normalized(self, max_size: Option<u32>) -> Self {
        let size = self.size.max(1);
        Self {
            ascending: self.ascending,
            index: self.index.max(1),
            size: max_size.map_or(size, |max| size.min(max.max(1))),
        }
    }

    /// Offset/limit window selected by these options
    pub fn window(&self) -> Window {
        let options = self.normalized(None);
        Window::page(u64::from(options.index), u64::from(options.size))
    }
}

/// Offset/limit window over an ordered result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// Number of rows to skip
    pub offset: u64,
    /// Maximum number of rows to return
    pub limit: u64,
}

impl Window {
    /// Skip `offset` rows, then take at most `limit`
    pub const fn new(offset: u64, limit: u64) -> Self {
        Self { offset, limit }
    }

    /// Window for a 1-based page number
    #[must_use]
    pub const fn page(page_number: u64, page_size: u64) -> Self {
        let offset = page_number.saturating_sub(1).saturating_mul(page_size);
        Self {
            offset,
            limit: page_size,
        }
    }

    pub(crate) fn bounds(&self) -> (usize, usize) {
        (
            usize::try_from(self.offset).unwrap_or(usize::MAX),
            usize::try_from(self.limit).unwrap_or(usize::MAX),
        )
    }
}
