use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, Transaction};

use crate::error::{Result, StoreError};
use crate::models::{FeedItem, FilterPredicate, ItemChanges, NewFeedItem, READ_GRACE_MS};
use crate::now_millis;
use crate::paging::anchors::{first_key, scan_anchors};
use crate::paging::live::{ItemChange, LiveIdSet, LiveQuery, LiveRegistry, QuerySpec};

use super::key::{CompositeKey, IndexName, KeyRange};
use super::schema::{apply_migrations, configure_connection};

pub(super) const ITEM_COLUMNS: &str = "id, feed_id, title, link, description, short_description, image, pub_date, is_read, is_favorite, read_time";

/// Handle to the feed store. Cloning is cheap: every clone talks to the same
/// background connection and live-query registry.
#[derive(Clone)]
pub struct Repository {
    pub(super) conn: tokio_rusqlite::Connection,
    live: Arc<LiveRegistry>,
    commit_seq: Arc<AtomicU64>,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = tokio_rusqlite::Connection::open(db_path).await?;

        let version = conn
            .call(|conn| {
                configure_connection(conn)?;
                Ok(apply_migrations(conn)?)
            })
            .await?;
        tracing::debug!("opened {} at schema v{}", db_path, version);

        Ok(Self {
            conn,
            live: Arc::new(LiveRegistry::default()),
            commit_seq: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Runs `f` in one transaction, then re-runs the live queries whose
    /// ranges contain a key touched by the returned changes.
    ///
    /// The commit stands even if that refresh fails. It is retried once;
    /// after a second failure the affected queries keep their previous
    /// snapshot until a later commit touches their range.
    pub(super) async fn write<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction<'_>) -> tokio_rusqlite::Result<(R, Vec<ItemChange>)> + Send + 'static,
        R: Send + 'static,
    {
        let seq = Arc::clone(&self.commit_seq);
        let (value, changes) = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let (value, changes) = f(&tx)?;
                tx.commit()?;
                seq.fetch_add(1, Ordering::SeqCst);
                Ok((value, changes))
            })
            .await?;

        if !changes.is_empty() {
            if let Err(e) = self.publish(&changes).await {
                tracing::warn!("failed to refresh live queries, retrying: {}", e);
                if let Err(e) = self.publish(&changes).await {
                    tracing::error!("live queries left stale after commit: {}", e);
                }
            }
        }
        Ok(value)
    }

    async fn publish(&self, changes: &[ItemChange]) -> Result<()> {
        let targets = self.live.affected(changes);
        if targets.is_empty() {
            return Ok(());
        }
        tracing::debug!(
            "{} changes invalidate {} of {} live queries",
            changes.len(),
            targets.len(),
            self.live.len()
        );

        let seq = Arc::clone(&self.commit_seq);
        let (stamp, results) = self
            .conn
            .call(move |conn| {
                let stamp = seq.load(Ordering::SeqCst);
                let results = targets
                    .into_iter()
                    .map(|(id, spec)| Ok((id, run_spec(conn, &spec)?)))
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok((stamp, results))
            })
            .await?;

        for (id, items) in results {
            self.live.deliver(id, stamp, items);
        }
        Ok(())
    }

    // Live queries

    /// Subscribes to the items of `index` within `range` accepted by
    /// `predicate`. The returned query re-emits whenever a commit touches a
    /// key inside the range, and unsubscribes when dropped.
    pub async fn subscribe(
        &self,
        index: IndexName,
        range: KeyRange,
        reverse: bool,
        predicate: FilterPredicate,
    ) -> Result<LiveQuery> {
        let spec = QuerySpec {
            index,
            range: range.normalized(index),
            reverse,
            predicate,
        };
        let query = self.live.register(spec.clone());

        let seq = Arc::clone(&self.commit_seq);
        let (stamp, items) = self
            .conn
            .call(move |conn| {
                let stamp = seq.load(Ordering::SeqCst);
                Ok((stamp, run_spec(conn, &spec)?))
            })
            .await?;
        self.live.deliver(query.id(), stamp, items);
        Ok(query)
    }

    pub fn live_query_count(&self) -> usize {
        self.live.len()
    }

    // Range reads

    pub async fn query_range(
        &self,
        index: IndexName,
        range: KeyRange,
        reverse: bool,
    ) -> Result<Vec<FeedItem>> {
        let items = self
            .conn
            .call(move |conn| Ok(query_range_sync(conn, index, &range, reverse)?))
            .await?;
        Ok(items)
    }

    pub async fn count_range(&self, index: IndexName, range: KeyRange) -> Result<usize> {
        let count = self
            .conn
            .call(move |conn| {
                if !range.is_valid() {
                    return Ok(0);
                }
                let (condition, params) = range.sql_condition(index);
                let sql = format!("SELECT COUNT(*) FROM feed_items WHERE {condition}");
                let count: i64 = conn.query_row(&sql, params_from_iter(params), |row| row.get(0))?;
                Ok(count as usize)
            })
            .await?;
        Ok(count)
    }

    /// Anchor keys over `range`, one every `page_size` rows.
    pub async fn page_anchors(
        &self,
        index: IndexName,
        range: KeyRange,
        reverse: bool,
        page_size: usize,
        max_anchors: usize,
    ) -> Result<Vec<CompositeKey>> {
        let anchors = self
            .conn
            .call(move |conn| {
                Ok(scan_anchors(conn, index, &range, reverse, page_size, max_anchors)?)
            })
            .await?;
        Ok(anchors)
    }

    /// First key of `range` walking in the given direction.
    pub async fn boundary_key(
        &self,
        index: IndexName,
        range: KeyRange,
        reverse: bool,
    ) -> Result<Option<CompositeKey>> {
        let key = self
            .conn
            .call(move |conn| Ok(first_key(conn, index, &range, reverse)?))
            .await?;
        Ok(key)
    }

    /// Ids of every item the predicate accepts, read through the read-state
    /// index ranges derived from it.
    pub async fn query_item_ids(&self, predicate: FilterPredicate) -> Result<Vec<i64>> {
        let ids = self
            .conn
            .call(move |conn| {
                let (index, ranges) = predicate.index_ranges();
                let mut ids = Vec::new();
                for range in ranges {
                    let (condition, params) = range.sql_condition(index);
                    let sql = format!(
                        "SELECT id FROM feed_items WHERE {condition} ORDER BY {}",
                        index.order_by(false)
                    );
                    let mut stmt = conn.prepare_cached(&sql)?;
                    let rows = stmt.query_map(params_from_iter(params), |row| row.get::<_, i64>(0))?;
                    for id in rows {
                        ids.push(id?);
                    }
                }
                Ok(ids)
            })
            .await?;
        Ok(ids)
    }

    /// Live form of `query_item_ids`: one subscription per index range of
    /// the predicate, merged into a single id set that follows every commit.
    pub async fn subscribe_item_ids(&self, predicate: FilterPredicate) -> Result<LiveIdSet> {
        let (index, ranges) = predicate.index_ranges();
        let mut queries = Vec::with_capacity(ranges.len());
        for range in ranges {
            queries.push(self.subscribe(index, range, false, predicate.clone()).await?);
        }
        tracing::debug!("tracking item ids over {} {:?} ranges", queries.len(), index);
        Ok(LiveIdSet::spawn(queries))
    }

    // Item operations

    /// Inserts the items whose link is not yet stored for this feed.
    /// Returns how many were inserted.
    pub async fn store_feed_items(&self, feed_id: i64, items: Vec<NewFeedItem>) -> Result<usize> {
        if items.is_empty() {
            return Ok(0);
        }
        let total = items.len();
        let stored = self
            .write(move |tx| {
                let changes = insert_items(tx, feed_id, items)?;
                Ok((changes.len(), changes))
            })
            .await?;
        tracing::info!(
            "[store_feed_items] feed {}: {} stored, {} duplicated",
            feed_id,
            stored,
            total - stored
        );
        Ok(stored)
    }

    /// Marks the items read now. The returned token restores their previous
    /// read state.
    pub async fn read_items(&self, ids: Vec<i64>) -> Result<ReadUndo> {
        let now = now_millis();
        let previous = self
            .write(move |tx| {
                let before = load_items_by_id(tx, &ids)?;
                let mut update = tx.prepare_cached(
                    "UPDATE feed_items SET is_read = 1, read_time = ?1 WHERE id = ?2",
                )?;
                let mut previous = Vec::new();
                let mut changes = Vec::new();
                for item in before.into_iter().filter(|item| !item.is_read) {
                    update.execute(params![now, item.id])?;
                    previous.push(PriorReadState {
                        id: item.id,
                        is_read: item.is_read,
                        read_time: item.read_time,
                    });
                    let after = FeedItem {
                        is_read: true,
                        read_time: now,
                        ..item.clone()
                    };
                    changes.push(ItemChange::updated(item, after));
                }
                Ok((previous, changes))
            })
            .await?;
        Ok(ReadUndo { previous })
    }

    pub async fn update_item(&self, id: i64, changes: ItemChanges) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        self.write(move |tx| {
            let before = load_item_sync(tx, id)?.ok_or_else(|| StoreError::ItemNotFound(id).into_db())?;
            tx.execute(
                r#"UPDATE feed_items SET
                       title = COALESCE(?1, title),
                       description = COALESCE(?2, description),
                       short_description = COALESCE(?3, short_description),
                       image = COALESCE(?4, image),
                       is_read = COALESCE(?5, is_read),
                       is_favorite = COALESCE(?6, is_favorite),
                       read_time = COALESCE(?7, read_time)
                   WHERE id = ?8"#,
                params![
                    changes.title,
                    changes.description,
                    changes.short_description,
                    changes.image,
                    changes.is_read,
                    changes.is_favorite,
                    changes.read_time,
                    id,
                ],
            )?;
            let after = load_item_sync(tx, id)?.ok_or_else(|| StoreError::ItemNotFound(id).into_db())?;
            Ok(((), vec![ItemChange::updated(before, after)]))
        })
        .await
    }

    pub async fn delete_item(&self, id: i64) -> Result<()> {
        self.write(move |tx| {
            let Some(before) = load_item_sync(tx, id)? else {
                return Ok(((), Vec::new()));
            };
            tx.execute("DELETE FROM feed_items WHERE id = ?1", params![id])?;
            Ok(((), vec![ItemChange::deleted(before)]))
        })
        .await
    }

    pub async fn load_item(&self, id: i64) -> Result<Option<FeedItem>> {
        let item = self
            .conn
            .call(move |conn| Ok(load_item_sync(conn, id)?))
            .await?;
        Ok(item)
    }

    /// Items of one feed, or of every feed, in `(pub_date, id)` order.
    pub async fn load_items(&self, feed_id: Option<i64>) -> Result<Vec<FeedItem>> {
        let items = self
            .conn
            .call(move |conn| {
                let items = match feed_id {
                    Some(feed_id) => query_range_sync(
                        conn,
                        IndexName::FeedPubDate,
                        &KeyRange::prefix(IndexName::FeedPubDate, &[feed_id]),
                        false,
                    )?,
                    None => query_range_sync(
                        conn,
                        IndexName::PubDate,
                        &KeyRange::full(IndexName::PubDate),
                        false,
                    )?,
                };
                Ok(items)
            })
            .await?;
        Ok(items)
    }

    /// Up to five items read within the grace window, most recently read first.
    pub async fn recent_read_items(&self, feed_id: Option<i64>, now: i64) -> Result<Vec<FeedItem>> {
        let items = self
            .conn
            .call(move |conn| {
                let since = now.saturating_sub(READ_GRACE_MS);
                let sql = format!(
                    "SELECT {ITEM_COLUMNS} FROM feed_items
                     WHERE is_read = 1 AND read_time > ?1 AND (?2 IS NULL OR feed_id = ?2)
                     ORDER BY read_time DESC, id DESC
                     LIMIT 5"
                );
                let mut stmt = conn.prepare_cached(&sql)?;
                let items = stmt
                    .query_map(params![since, feed_id], item_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(items)
            })
            .await?;
        Ok(items)
    }

    pub async fn count_items(&self) -> Result<usize> {
        let count = self
            .conn
            .call(|conn| {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM feed_items", [], |row| row.get(0))?;
                Ok(count as usize)
            })
            .await?;
        Ok(count)
    }

    /// Inserts fully formed items, ids included.
    #[cfg(test)]
    pub(crate) async fn bulk_add_items(&self, items: Vec<FeedItem>) -> Result<()> {
        self.write(move |tx| {
            let mut insert = tx.prepare_cached(&format!(
                "INSERT INTO feed_items ({ITEM_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ))?;
            let mut changes = Vec::with_capacity(items.len());
            for item in items {
                insert.execute(params![
                    item.id,
                    item.feed_id,
                    item.title,
                    item.link,
                    item.description,
                    item.short_description,
                    item.image,
                    item.pub_date,
                    item.is_read,
                    item.is_favorite,
                    item.read_time,
                ])?;
                changes.push(ItemChange::inserted(item));
            }
            Ok(((), changes))
        })
        .await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PriorReadState {
    id: i64,
    is_read: bool,
    read_time: i64,
}

/// Inverse of a `read_items` call.
#[derive(Debug, Clone)]
#[must_use = "dropping the undo token makes the read permanent"]
pub struct ReadUndo {
    previous: Vec<PriorReadState>,
}

impl ReadUndo {
    pub fn ids(&self) -> Vec<i64> {
        self.previous.iter().map(|p| p.id).collect()
    }

    pub async fn undo(self, repo: &Repository) -> Result<()> {
        let previous = self.previous;
        repo.write(move |tx| {
            let ids: Vec<i64> = previous.iter().map(|p| p.id).collect();
            let before = load_items_by_id(tx, &ids)?;
            let mut update = tx.prepare_cached(
                "UPDATE feed_items SET is_read = ?1, read_time = ?2 WHERE id = ?3",
            )?;
            let mut changes = Vec::new();
            for item in before {
                let Some(prior) = previous.iter().find(|p| p.id == item.id) else {
                    continue;
                };
                update.execute(params![prior.is_read, prior.read_time, item.id])?;
                let after = FeedItem {
                    is_read: prior.is_read,
                    read_time: prior.read_time,
                    ..item.clone()
                };
                changes.push(ItemChange::updated(item, after));
            }
            Ok(((), changes))
        })
        .await
    }
}

pub(super) fn item_from_row(row: &Row) -> rusqlite::Result<FeedItem> {
    Ok(FeedItem {
        id: row.get(0)?,
        feed_id: row.get(1)?,
        title: row.get(2)?,
        link: row.get(3)?,
        description: row.get(4)?,
        short_description: row.get(5)?,
        image: row.get(6)?,
        pub_date: row.get(7)?,
        is_read: row.get::<_, i64>(8)? != 0,
        is_favorite: row.get::<_, i64>(9)? != 0,
        read_time: row.get(10)?,
    })
}

/// Inserts `items` for `feed_id`, skipping links already stored for the feed
/// or repeated within the batch.
pub(super) fn insert_items(
    conn: &Connection,
    feed_id: i64,
    items: Vec<NewFeedItem>,
) -> rusqlite::Result<Vec<ItemChange>> {
    let mut exists =
        conn.prepare_cached("SELECT 1 FROM feed_items WHERE feed_id = ?1 AND link = ?2 LIMIT 1")?;
    let mut insert = conn.prepare_cached(
        r#"INSERT INTO feed_items (feed_id, title, link, description, short_description, image, pub_date, is_read, is_favorite, read_time)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, 0, 0)"#,
    )?;

    let mut batch_links = HashSet::new();
    let mut changes = Vec::new();
    for item in items {
        if !batch_links.insert(item.link.clone()) {
            continue;
        }
        if exists
            .query_row(params![feed_id, item.link], |_| Ok(()))
            .optional()?
            .is_some()
        {
            continue;
        }
        insert.execute(params![
            feed_id,
            item.title,
            item.link,
            item.description,
            item.short_description,
            item.image,
            item.pub_date,
        ])?;
        changes.push(ItemChange::inserted(FeedItem {
            id: conn.last_insert_rowid(),
            feed_id,
            title: item.title,
            link: item.link,
            description: item.description,
            short_description: item.short_description,
            image: item.image,
            pub_date: item.pub_date,
            is_read: false,
            is_favorite: false,
            read_time: 0,
        }));
    }
    Ok(changes)
}

pub(super) fn load_item_sync(conn: &Connection, id: i64) -> rusqlite::Result<Option<FeedItem>> {
    conn.query_row(
        &format!("SELECT {ITEM_COLUMNS} FROM feed_items WHERE id = ?1"),
        params![id],
        item_from_row,
    )
    .optional()
}

fn load_items_by_id(conn: &Connection, ids: &[i64]) -> rusqlite::Result<Vec<FeedItem>> {
    let mut items = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(item) = load_item_sync(conn, *id)? {
            items.push(item);
        }
    }
    Ok(items)
}

pub(super) fn query_range_sync(
    conn: &Connection,
    index: IndexName,
    range: &KeyRange,
    reverse: bool,
) -> rusqlite::Result<Vec<FeedItem>> {
    if !range.is_valid() {
        return Ok(Vec::new());
    }
    let (condition, params) = range.sql_condition(index);
    let sql = format!(
        "SELECT {ITEM_COLUMNS} FROM feed_items WHERE {condition} ORDER BY {}",
        index.order_by(reverse)
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let items = stmt
        .query_map(params_from_iter(params), item_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(items)
}

fn run_spec(conn: &Connection, spec: &QuerySpec) -> rusqlite::Result<Vec<FeedItem>> {
    let mut items = query_range_sync(conn, spec.index, &spec.range, spec.reverse)?;
    items.retain(|item| spec.predicate.includes(item));
    Ok(items)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::models::ItemFilter;
    use crate::test_support::{fixture_items, test_repo, BASE};

    fn new_items(links: &[&str]) -> Vec<NewFeedItem> {
        links
            .iter()
            .enumerate()
            .map(|(i, link)| NewFeedItem::new(format!("item {link}"), *link, BASE + i as i64))
            .collect()
    }

    #[tokio::test]
    async fn reingesting_overlapping_links_only_adds_new_items() {
        let (_dir, repo) = test_repo().await;

        let first = repo.store_feed_items(1, new_items(&["a", "b", "c"])).await.unwrap();
        assert_eq!(first, 3);

        let second = repo
            .store_feed_items(1, new_items(&["b", "c", "d", "e", "e"]))
            .await
            .unwrap();
        assert_eq!(second, 2);
        assert_eq!(repo.count_items().await.unwrap(), 5);

        // Same links in another feed are not duplicates.
        let other = repo.store_feed_items(2, new_items(&["a"])).await.unwrap();
        assert_eq!(other, 1);

        // Idempotent.
        assert_eq!(repo.store_feed_items(1, new_items(&["a", "e"])).await.unwrap(), 0);
        assert_eq!(repo.count_items().await.unwrap(), 6);
    }

    #[tokio::test]
    async fn read_items_can_be_undone() {
        let (_dir, repo) = test_repo().await;
        repo.bulk_add_items(fixture_items(1, 1..4)).await.unwrap();
        repo.update_item(3, ItemChanges::read_at(BASE)).await.unwrap();

        let undo = repo.read_items(vec![1, 2, 3]).await.unwrap();
        // Item 3 was already read and is left alone.
        assert_eq!(undo.ids(), vec![1, 2]);
        let item = repo.load_item(1).await.unwrap().unwrap();
        assert!(item.is_read);
        assert!(item.read_time > 0);

        undo.undo(&repo).await.unwrap();
        let item = repo.load_item(1).await.unwrap().unwrap();
        assert!(!item.is_read);
        assert_eq!(item.read_time, 0);
        let untouched = repo.load_item(3).await.unwrap().unwrap();
        assert!(untouched.is_read);
        assert_eq!(untouched.read_time, BASE);
    }

    #[tokio::test]
    async fn update_and_delete_items() {
        let (_dir, repo) = test_repo().await;
        repo.bulk_add_items(fixture_items(1, 1..3)).await.unwrap();

        repo.update_item(1, ItemChanges::favorite(true)).await.unwrap();
        let item = repo.load_item(1).await.unwrap().unwrap();
        assert!(item.is_favorite);
        assert_eq!(item.title, "title 1:1");

        let missing = repo.update_item(99, ItemChanges::favorite(true)).await;
        assert!(matches!(
            missing,
            Err(crate::error::AppError::Store(StoreError::ItemNotFound(99)))
        ));

        repo.delete_item(2).await.unwrap();
        assert!(repo.load_item(2).await.unwrap().is_none());
        assert_eq!(repo.load_items(Some(1)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn recent_read_items_respect_the_grace_window() {
        let (_dir, repo) = test_repo().await;
        repo.bulk_add_items(fixture_items(1, 1..10)).await.unwrap();
        let now = BASE + 1_000_000;
        for (id, ago) in [(1, 10_000), (2, 20_000), (3, 30_000), (4, 40_000), (5, 50_000), (6, 60_000), (7, 200_000)] {
            repo.update_item(id, ItemChanges::read_at(now - ago)).await.unwrap();
        }

        let recent = repo.recent_read_items(None, now).await.unwrap();
        let ids: Vec<i64> = recent.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);

        assert!(repo.recent_read_items(Some(2), now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn index_range_query_agrees_with_predicate() {
        let (_dir, repo) = test_repo().await;
        let now = BASE + 10_000_000;
        let mut items = fixture_items(1, 1..20);
        items.extend(fixture_items(2, 20..40));
        for item in items.iter_mut() {
            match item.id % 4 {
                0 => {
                    item.is_read = true;
                    item.read_time = now - 30_000;
                }
                1 => {
                    item.is_read = true;
                    item.read_time = now - 500_000;
                }
                2 => item.is_favorite = true,
                _ => {}
            }
        }
        repo.bulk_add_items(items.clone()).await.unwrap();

        for mode in [ItemFilter::All, ItemFilter::Unread, ItemFilter::Favorite] {
            for feeds in [vec![], vec![2], vec![1, 2]] {
                let predicate = FilterPredicate::new(feeds.clone(), mode, now);
                let mut expected: Vec<i64> = items
                    .iter()
                    .filter(|i| predicate.includes(i))
                    .map(|i| i.id)
                    .collect();
                let mut actual = repo.query_item_ids(predicate).await.unwrap();
                expected.sort_unstable();
                actual.sort_unstable();
                assert_eq!(actual, expected, "mode {mode:?} feeds {feeds:?}");
            }
        }
    }

    #[tokio::test]
    async fn favorite_id_set_follows_item_updates() {
        let (_dir, repo) = test_repo().await;
        repo.bulk_add_items(fixture_items(1, 1..6)).await.unwrap();
        repo.bulk_add_items(fixture_items(2, 6..8)).await.unwrap();
        repo.update_item(2, ItemChanges::favorite(true)).await.unwrap();
        repo.update_item(7, ItemChanges::favorite(true)).await.unwrap();

        let predicate = FilterPredicate::new([1], ItemFilter::Favorite, BASE);
        let mut ids = repo.subscribe_item_ids(predicate).await.unwrap();
        // One range per read state of the favorite clause.
        assert_eq!(repo.live_query_count(), 2);
        assert_eq!(ids.latest(), BTreeSet::from([2]));

        repo.update_item(4, ItemChanges::favorite(true)).await.unwrap();
        assert!(ids.changed().await);
        assert_eq!(ids.latest(), BTreeSet::from([2, 4]));

        // Reading a favorite moves it to the other range; it stays in the set.
        repo.read_items(vec![2]).await.unwrap();
        repo.update_item(2, ItemChanges::favorite(false)).await.unwrap();
        assert!(ids.changed().await);
        assert_eq!(ids.latest(), BTreeSet::from([4]));

        drop(ids);
        for _ in 0..10 {
            if repo.live_query_count() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(repo.live_query_count(), 0);
    }

    #[tokio::test]
    async fn unread_id_set_keeps_items_inside_the_grace_window() {
        let (_dir, repo) = test_repo().await;
        repo.bulk_add_items(fixture_items(1, 1..6)).await.unwrap();

        let predicate = FilterPredicate::new([], ItemFilter::Unread, BASE);
        let mut ids = repo.subscribe_item_ids(predicate.clone()).await.unwrap();
        assert_eq!(ids.latest(), BTreeSet::from([1, 2, 3, 4, 5]));

        repo.update_item(3, ItemChanges::read_at(BASE - 10 * 60_000)).await.unwrap();
        assert!(ids.changed().await);
        assert_eq!(ids.latest(), BTreeSet::from([1, 2, 4, 5]));

        // Read just now: still unread for the grace window.
        repo.update_item(5, ItemChanges::read_at(BASE - 10_000)).await.unwrap();
        repo.delete_item(1).await.unwrap();
        assert!(ids.changed().await);
        assert_eq!(ids.latest(), BTreeSet::from([2, 4, 5]));

        let one_shot: BTreeSet<i64> = repo.query_item_ids(predicate).await.unwrap().into_iter().collect();
        assert_eq!(one_shot, ids.ids());
    }

    #[tokio::test]
    async fn publishing_a_commit_twice_notifies_once() {
        let (_dir, repo) = test_repo().await;
        repo.bulk_add_items(fixture_items(1, 1..4)).await.unwrap();
        let mut query = repo
            .subscribe(IndexName::PubDate, KeyRange::full(IndexName::PubDate), false, FilterPredicate::all())
            .await
            .unwrap();
        query.latest();

        let before = repo.load_item(2).await.unwrap().unwrap();
        repo.update_item(2, ItemChanges::favorite(true)).await.unwrap();
        assert!(query.changed().await);
        let after = query.latest();

        // A retried refresh of the same commit reads the same rows.
        let change = ItemChange::updated(before, after[1].clone());
        repo.publish(&[change]).await.unwrap();
        assert!(!query.watcher().has_changed().unwrap());
        assert_eq!(query.snapshot(), after);
    }
}
