//! Live range queries.
//!
//! Every subscription is registered under the index it reads, sorted by the
//! lower bound of its key range. A commit reports the before/after images of
//! the items it touched; only subscriptions whose range contains one of those
//! keys are re-queried, and each re-run result is delivered through a
//! `tokio::sync::watch` channel.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::select_all;
use futures::Stream;
use tokio::sync::watch;

use crate::db::{CompositeKey, IndexName, KeyRange};
use crate::models::{FeedItem, FilterPredicate};

/// Before/after images of one item touched by a commit.
#[derive(Debug, Clone)]
pub struct ItemChange {
    pub before: Option<FeedItem>,
    pub after: Option<FeedItem>,
}

impl ItemChange {
    pub fn inserted(item: FeedItem) -> Self {
        Self {
            before: None,
            after: Some(item),
        }
    }

    pub fn updated(before: FeedItem, after: FeedItem) -> Self {
        Self {
            before: Some(before),
            after: Some(after),
        }
    }

    pub fn deleted(item: FeedItem) -> Self {
        Self {
            before: Some(item),
            after: None,
        }
    }

    fn keys(&self, index: IndexName) -> impl Iterator<Item = CompositeKey> + '_ {
        self.before
            .iter()
            .chain(self.after.iter())
            .map(move |item| index.key_of(item))
    }
}

/// What a subscription reads. The range is stored normalized to the index
/// arity so bound comparisons agree with SQLite's.
#[derive(Debug, Clone)]
pub(crate) struct QuerySpec {
    pub index: IndexName,
    pub range: KeyRange,
    pub reverse: bool,
    pub predicate: FilterPredicate,
}

struct Subscriber {
    spec: QuerySpec,
    tx: watch::Sender<Vec<FeedItem>>,
    /// Commit sequence of the snapshot last delivered.
    seen: Option<u64>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: HashMap<u64, Subscriber>,
    /// Per index: `(lower bound, subscription id)` sorted ascending.
    by_lower: HashMap<IndexName, Vec<(CompositeKey, u64)>>,
}

#[derive(Default)]
pub struct LiveRegistry {
    inner: Mutex<Registry>,
}

impl LiveRegistry {
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn register(self: &Arc<Self>, spec: QuerySpec) -> LiveQuery {
        let (tx, rx) = watch::channel(Vec::new());
        let mut registry = self.lock();
        registry.next_id += 1;
        let id = registry.next_id;

        let entries = registry.by_lower.entry(spec.index).or_default();
        let at = entries.partition_point(|(lower, other)| (lower, *other) < (&spec.range.lower, id));
        entries.insert(at, (spec.range.lower.clone(), id));
        registry.subscribers.insert(id, Subscriber { spec, tx, seen: None });

        LiveQuery {
            id,
            rx,
            registry: Some(Arc::clone(self)),
        }
    }

    fn remove(&self, id: u64) {
        let mut registry = self.lock();
        if let Some(sub) = registry.subscribers.remove(&id) {
            if let Some(entries) = registry.by_lower.get_mut(&sub.spec.index) {
                entries.retain(|(_, other)| *other != id);
                if entries.is_empty() {
                    registry.by_lower.remove(&sub.spec.index);
                }
            }
        }
    }

    /// Subscriptions whose range contains a key touched by `changes`.
    pub(crate) fn affected(&self, changes: &[ItemChange]) -> Vec<(u64, QuerySpec)> {
        let registry = self.lock();
        let mut hits = BTreeSet::new();
        for (index, entries) in &registry.by_lower {
            for key in changes.iter().flat_map(|c| c.keys(*index)) {
                let candidates = entries.partition_point(|(lower, _)| lower <= &key);
                for (_, id) in &entries[..candidates] {
                    if hits.contains(id) {
                        continue;
                    }
                    if let Some(sub) = registry.subscribers.get(id) {
                        if sub.spec.range.contains(&key) {
                            hits.insert(*id);
                        }
                    }
                }
            }
        }
        hits.into_iter()
            .filter_map(|id| registry.subscribers.get(&id).map(|s| (id, s.spec.clone())))
            .collect()
    }

    /// Publishes a snapshot read at commit sequence `seq`. Snapshots older
    /// than the last delivered one are dropped; unchanged results do not wake
    /// receivers. Returns whether receivers were notified.
    pub(crate) fn deliver(&self, id: u64, seq: u64, items: Vec<FeedItem>) -> bool {
        let mut registry = self.lock();
        let Some(sub) = registry.subscribers.get_mut(&id) else {
            return false;
        };
        if sub.seen.is_some_and(|seen| seq < seen) {
            return false;
        }
        sub.seen = Some(seq);
        sub.tx.send_if_modified(|current| {
            if *current == items {
                false
            } else {
                *current = items;
                true
            }
        })
    }

    pub fn len(&self) -> usize {
        self.lock().subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A registered range subscription. Dropping it unsubscribes.
pub struct LiveQuery {
    id: u64,
    rx: watch::Receiver<Vec<FeedItem>>,
    registry: Option<Arc<LiveRegistry>>,
}

impl LiveQuery {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The latest delivered result.
    pub fn snapshot(&self) -> Vec<FeedItem> {
        self.rx.borrow().clone()
    }

    /// The latest result, marked as seen so `changed` waits for the next one.
    pub fn latest(&mut self) -> Vec<FeedItem> {
        self.rx.borrow_and_update().clone()
    }

    pub fn len(&self) -> usize {
        self.rx.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.borrow().is_empty()
    }

    /// Waits for the next re-emission. Returns false once unsubscribed.
    pub async fn changed(&mut self) -> bool {
        self.registry.is_some() && self.rx.changed().await.is_ok()
    }

    /// A second receiver on the same result, for waiting without holding the query.
    pub fn watcher(&self) -> watch::Receiver<Vec<FeedItem>> {
        self.rx.clone()
    }

    /// Yields the current result, then every re-emission.
    pub fn into_stream(self) -> impl Stream<Item = Vec<FeedItem>> {
        futures::stream::unfold((self, true), |(mut query, first)| async move {
            if first {
                let items = query.rx.borrow_and_update().clone();
                return Some((items, (query, false)));
            }
            if query.changed().await {
                let items = query.rx.borrow_and_update().clone();
                Some((items, (query, false)))
            } else {
                None
            }
        })
    }

    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if let Some(registry) = self.registry.take() {
            registry.remove(self.id);
        }
    }
}

impl Drop for LiveQuery {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Ids of the items matched by a set of live range queries, kept as one
/// merged set. A background task owns the queries; dropping the set stops
/// it and unsubscribes them.
pub struct LiveIdSet {
    rx: watch::Receiver<BTreeSet<i64>>,
}

impl LiveIdSet {
    pub(crate) fn spawn(mut queries: Vec<LiveQuery>) -> Self {
        let initial = merge_ids(&mut queries);
        let (tx, rx) = watch::channel(initial);
        tokio::spawn(track_ids(queries, tx));
        Self { rx }
    }

    pub fn ids(&self) -> BTreeSet<i64> {
        self.rx.borrow().clone()
    }

    /// The current set, marked as seen so `changed` waits for the next one.
    pub fn latest(&mut self) -> BTreeSet<i64> {
        self.rx.borrow_and_update().clone()
    }

    /// Waits until the set differs from the last one seen. Returns false
    /// once the tracking task has stopped.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

fn merge_ids(queries: &mut [LiveQuery]) -> BTreeSet<i64> {
    queries
        .iter_mut()
        .flat_map(|q| q.latest())
        .map(|item| item.id)
        .collect()
}

async fn track_ids(mut queries: Vec<LiveQuery>, tx: watch::Sender<BTreeSet<i64>>) {
    loop {
        let ids = merge_ids(&mut queries);
        tx.send_if_modified(|current| {
            if *current == ids {
                false
            } else {
                *current = ids;
                true
            }
        });

        if queries.is_empty() {
            tx.closed().await;
            return;
        }
        let any_changed = select_all(queries.iter_mut().map(|q| Box::pin(q.changed())));
        tokio::select! {
            _ = tx.closed() => return,
            (alive, _, _) = any_changed => {
                if !alive {
                    return;
                }
            }
        }
    }
}
