use std::collections::{BTreeSet, VecDeque};

use futures::future::{select_all, FutureExt};
use tokio::sync::Mutex;

use crate::db::{CompositeKey, IndexName, KeyRange, Repository};
use crate::error::Result;
use crate::models::{FeedItem, FilterPredicate, ItemFilter};
use crate::now_millis;

use super::live::LiveQuery;
use super::window::WindowController;
use super::PagingOptions;

/// What the item list shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Empty means every feed.
    pub feed_ids: BTreeSet<i64>,
    pub filter: ItemFilter,
    /// Newest first.
    pub order_desc: bool,
}

impl Default for Selection {
    fn default() -> Self {
        Self {
            feed_ids: BTreeSet::new(),
            filter: ItemFilter::default(),
            order_desc: true,
        }
    }
}

impl Selection {
    pub fn feeds(feed_ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            feed_ids: feed_ids.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn with_filter(mut self, filter: ItemFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn ascending(mut self) -> Self {
        self.order_desc = false;
        self
    }

    /// A single feed walks its own slice of the feed-prefixed index; anything
    /// else walks the global publication order and leaves the feed set to the
    /// predicate.
    fn index_range(&self) -> (IndexName, KeyRange) {
        match self.feed_ids.iter().next() {
            Some(&feed_id) if self.feed_ids.len() == 1 => (
                IndexName::FeedPubDate,
                KeyRange::prefix(IndexName::FeedPubDate, &[feed_id]),
            ),
            _ => (IndexName::PubDate, KeyRange::full(IndexName::PubDate)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageResult {
    /// Matching items in the windows opened by this call.
    pub added: usize,
    pub done: bool,
    /// Another page load was already running; nothing was done.
    pub loading: bool,
}

impl PageResult {
    fn loading() -> Self {
        Self {
            loading: true,
            ..Self::default()
        }
    }
}

struct PagerState {
    controller: WindowController,
    windows: VecDeque<LiveQuery>,
    /// First and last boundary handed out, in traversal order.
    head: Option<CompositeKey>,
    tail: Option<CompositeKey>,
}

/// Binds the window controller to live range subscriptions: every pair of
/// adjacent boundaries becomes one window that re-emits on its own, and the
/// visible list is the concatenation of the window snapshots.
pub struct FeedItemPager {
    repo: Repository,
    index: IndexName,
    range: KeyRange,
    reverse: bool,
    predicate: FilterPredicate,
    page_size: usize,
    state: Mutex<PagerState>,
}

impl FeedItemPager {
    /// `now` fixes the read grace window for the pager's lifetime.
    pub fn new(repo: Repository, selection: &Selection, options: PagingOptions, now: i64) -> Self {
        let (index, range) = selection.index_range();
        let reverse = selection.order_desc;
        let controller = WindowController::new(repo.clone(), index, range.clone(), reverse, options);
        Self {
            repo,
            index,
            range: range.normalized(index),
            reverse,
            predicate: FilterPredicate::new(selection.feed_ids.iter().copied(), selection.filter, now),
            page_size: options.page_size,
            state: Mutex::new(PagerState {
                controller,
                windows: VecDeque::new(),
                head: None,
                tail: None,
            }),
        }
    }

    pub fn index(&self) -> IndexName {
        self.index
    }

    pub fn predicate(&self) -> &FilterPredicate {
        &self.predicate
    }

    /// Opens windows after the current tail until a page worth of matching
    /// items arrived or the traversal ran out.
    pub async fn next_page(&self) -> Result<PageResult> {
        let Ok(mut state) = self.state.try_lock() else {
            return Ok(PageResult::loading());
        };
        let mut added = 0;
        let mut done = false;
        while added < self.page_size {
            let step = state.controller.next().await?;
            let Some(key) = step.value else {
                added += self.open_single_window(&mut state).await?;
                done = true;
                break;
            };
            let Some(tail) = state.tail.replace(key.clone()) else {
                state.head = Some(key);
                continue;
            };
            let include_from = state.windows.is_empty();
            let range = KeyRange::traversal(tail, key, include_from, true, self.reverse);
            let window = self.open(range).await?;
            added += window.len();
            state.windows.push_back(window);
        }
        tracing::debug!(
            "next_page: {} items in {} windows, done={}",
            added,
            state.windows.len(),
            done
        );
        Ok(PageResult {
            added,
            done,
            loading: false,
        })
    }

    /// Opens windows before the current head. Their items go in front of the
    /// list.
    pub async fn prev_page(&self) -> Result<PageResult> {
        let Ok(mut state) = self.state.try_lock() else {
            return Ok(PageResult::loading());
        };
        let mut added = 0;
        let mut done = false;
        while added < self.page_size {
            let step = state.controller.prev().await?;
            let Some(key) = step.value else {
                added += self.open_single_window(&mut state).await?;
                done = true;
                break;
            };
            let Some(head) = state.head.replace(key.clone()) else {
                state.tail = Some(key);
                continue;
            };
            let include_to = state.windows.is_empty();
            let range = KeyRange::traversal(key, head, true, include_to, self.reverse);
            let window = self.open(range).await?;
            added += window.len();
            state.windows.push_front(window);
        }
        tracing::debug!(
            "prev_page: {} items in {} windows, done={}",
            added,
            state.windows.len(),
            done
        );
        Ok(PageResult {
            added,
            done,
            loading: false,
        })
    }

    /// A range holding a single anchor still gets a window of its own.
    async fn open_single_window(&self, state: &mut PagerState) -> Result<usize> {
        if !state.windows.is_empty() {
            return Ok(0);
        }
        let Some(key) = state.head.clone() else {
            return Ok(0);
        };
        let window = self.open(KeyRange::inclusive(key.clone(), key)).await?;
        let count = window.len();
        state.windows.push_back(window);
        Ok(count)
    }

    async fn open(&self, range: KeyRange) -> Result<LiveQuery> {
        let mut window = self
            .repo
            .subscribe(self.index, range, self.reverse, self.predicate.clone())
            .await?;
        window.latest();
        Ok(window)
    }

    /// The visible list: window snapshots in traversal order.
    pub async fn items(&self) -> Vec<FeedItem> {
        let mut state = self.state.lock().await;
        state.windows.iter_mut().flat_map(|w| w.latest()).collect()
    }

    pub async fn window_count(&self) -> usize {
        self.state.lock().await.windows.len()
    }

    /// Waits until any open window re-emitted since the last `items` call.
    /// Returns false when there is nothing to wait on.
    pub async fn changed(&self) -> bool {
        let watchers: Vec<_> = {
            let state = self.state.lock().await;
            state.windows.iter().map(|w| w.watcher()).collect()
        };
        if watchers.is_empty() {
            return false;
        }
        let waits = watchers
            .into_iter()
            .map(|mut rx| async move { rx.changed().await.is_ok() }.boxed());
        let (ok, _, _) = select_all(waits).await;
        ok
    }

    /// Rows between the start of the traversal and the first loaded
    /// boundary, i.e. items that arrived above the list.
    pub async fn new_item_count(&self) -> Result<usize> {
        let head = self.state.lock().await.head.clone();
        let Some(head) = head else {
            return Ok(0);
        };
        let above = if self.reverse {
            KeyRange {
                lower: head,
                include_lower: false,
                ..self.range.clone()
            }
        } else {
            KeyRange {
                upper: head,
                include_upper: false,
                ..self.range.clone()
            }
        };
        self.repo.count_range(self.index, above).await
    }

    /// Unsubscribes every window.
    pub fn destroy(self) {
        let state = self.state.into_inner();
        let count = state.windows.len();
        for window in state.windows {
            window.unsubscribe();
        }
        tracing::debug!("pager destroyed, {} windows released", count);
    }
}

/// Holds the pager for the current selection and swaps it out when the
/// selection changes.
pub struct FeedItemList {
    repo: Repository,
    options: PagingOptions,
    selection: Selection,
    pager: Option<FeedItemPager>,
}

impl FeedItemList {
    pub fn new(repo: Repository, options: PagingOptions) -> Self {
        Self {
            repo,
            options,
            selection: Selection::default(),
            pager: None,
        }
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn pager(&self) -> Option<&FeedItemPager> {
        self.pager.as_ref()
    }

    /// Tears down the old pager before building one for `selection`.
    pub fn select(&mut self, selection: Selection) -> &FeedItemPager {
        self.selection = selection;
        self.reset()
    }

    /// Rebuilds the pager for the current selection, restarting the read
    /// grace window from now.
    pub fn reset(&mut self) -> &FeedItemPager {
        if let Some(old) = self.pager.take() {
            old.destroy();
        }
        self.pager.insert(FeedItemPager::new(
            self.repo.clone(),
            &self.selection,
            self.options,
            now_millis(),
        ))
    }

    pub fn clear(&mut self) {
        if let Some(old) = self.pager.take() {
            old.destroy();
        }
    }
}
