pub mod anchors;
pub mod feed_items;
pub mod live;
pub mod window;

pub use feed_items::{FeedItemList, FeedItemPager, PageResult, Selection};
pub use live::{ItemChange, LiveIdSet, LiveQuery, LiveRegistry};
pub use window::{Progress, Step, WindowController};

/// Page geometry shared by the window controller and the binder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagingOptions {
    /// Rows between consecutive anchors.
    pub page_size: usize,
    /// Anchors requested from the cursor pager per refill.
    pub anchor_batch: usize,
}

impl Default for PagingOptions {
    fn default() -> Self {
        Self {
            page_size: 20,
            anchor_batch: 10,
        }
    }
}
