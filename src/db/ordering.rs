use std::collections::{BTreeMap, HashMap, HashSet};

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{Result, StoreError};
use crate::models::{Feed, FeedChanges, FeedKind, FeedNode, NewFeed, NewFeedItem};
use crate::now_millis;
use crate::paging::live::ItemChange;

use super::repository::{insert_items, item_from_row, Repository, ITEM_COLUMNS};

const FEED_COLUMNS: &str = "id, parent_id, prev_id, next_id, kind, source, title, description, link, image_url, last_update_time, config";

/// A parent whose children no longer form one clean chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainIssue {
    pub parent_id: i64,
    /// Children reachable from the head by following `next_id`.
    pub linked: usize,
    pub total: usize,
}

impl Repository {
    // Feed operations

    /// Appends a feed or group to the end of its parent's chain, together
    /// with its first batch of items. Returns the new id.
    pub async fn store_feed(&self, feed: NewFeed, items: Vec<NewFeedItem>) -> Result<i64> {
        let last_update_time = if items.is_empty() { 0 } else { now_millis() };
        let id = self
            .write(move |tx| {
                require_parent(tx, feed.parent_id)?;
                let tail = tail_of(tx, feed.parent_id)?.unwrap_or(0);
                tx.execute(
                    r#"INSERT INTO feeds (parent_id, prev_id, next_id, kind, source, title, description, link, image_url, last_update_time)
                       VALUES (?1, ?2, 0, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
                    params![
                        feed.parent_id,
                        tail,
                        feed.kind.as_str(),
                        feed.source,
                        feed.title,
                        feed.description,
                        feed.link,
                        feed.image_url,
                        last_update_time,
                    ],
                )?;
                let id = tx.last_insert_rowid();
                set_next(tx, tail, id)?;
                let changes = insert_items(tx, id, items)?;
                Ok((id, changes))
            })
            .await?;
        tracing::info!("[store_feed] stored feed {}", id);
        Ok(id)
    }

    pub async fn store_group(&self, title: &str, parent_id: i64) -> Result<i64> {
        self.store_feed(NewFeed::group(title).under(parent_id), Vec::new())
            .await
    }

    /// Moves a node to position `new_index` among the children of
    /// `to_parent_id`, counted without the node itself. Indexes past the end
    /// append.
    pub async fn move_feed(&self, id: i64, to_parent_id: i64, new_index: usize) -> Result<()> {
        self.write(move |tx| {
            let feed = require_feed(tx, id)?;
            require_parent(tx, to_parent_id)?;
            if to_parent_id == id {
                return Err(StoreError::InvalidMove(format!("{id} into itself")).into_db());
            }
            if feed.is_group() && ancestors(tx, to_parent_id)?.contains(&id) {
                return Err(
                    StoreError::InvalidMove(format!("{id} into its descendant {to_parent_id}")).into_db(),
                );
            }

            unlink(tx, &feed)?;
            let (chain, _) = walk_chain(tx, to_parent_id, Some(id))?;
            let at = new_index.min(chain.len());
            let prev_id = if at > 0 { chain[at - 1].id } else { 0 };
            let next_id = chain.get(at).map_or(0, |f| f.id);
            tx.execute(
                "UPDATE feeds SET parent_id = ?1, prev_id = ?2, next_id = ?3 WHERE id = ?4",
                params![to_parent_id, prev_id, next_id, id],
            )?;
            set_next(tx, prev_id, id)?;
            set_prev(tx, next_id, id)?;
            Ok(((), Vec::new()))
        })
        .await
    }

    /// Deletes a node. A group's children move to the root: in place of a
    /// root group, or after the root tail for a nested one. A feed takes its
    /// items with it.
    pub async fn delete_feed(&self, id: i64) -> Result<()> {
        let removed = self
            .write(move |tx| {
                let feed = require_feed(tx, id)?;
                let mut changes = Vec::new();

                if feed.is_group() {
                    let (mut kids, stray) = walk_chain(tx, id, None)?;
                    kids.extend(stray);
                    let kid_ids: Vec<i64> = kids.iter().map(|f| f.id).collect();
                    if kid_ids.is_empty() {
                        unlink(tx, &feed)?;
                    } else if feed.parent_id == 0 {
                        relink(tx, 0, &kid_ids, feed.prev_id, feed.next_id)?;
                    } else {
                        unlink(tx, &feed)?;
                        let tail = tail_of(tx, 0)?.unwrap_or(0);
                        relink(tx, 0, &kid_ids, tail, 0)?;
                    }
                } else {
                    unlink(tx, &feed)?;
                    let mut stmt = tx.prepare_cached(&format!(
                        "SELECT {ITEM_COLUMNS} FROM feed_items WHERE feed_id = ?1"
                    ))?;
                    let items = stmt
                        .query_map(params![id], item_from_row)?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    tx.execute("DELETE FROM feed_items WHERE feed_id = ?1", params![id])?;
                    changes.extend(items.into_iter().map(ItemChange::deleted));
                }

                tx.execute("DELETE FROM feeds WHERE id = ?1", params![id])?;
                let removed = changes.len();
                Ok((removed, changes))
            })
            .await?;
        tracing::info!("[delete_feed] deleted feed {} with {} items", id, removed);
        Ok(())
    }

    pub async fn update_feed(&self, id: i64, changes: FeedChanges) -> Result<()> {
        let config = changes.config.as_ref().map(serde_json::to_string).transpose()?;
        self.write(move |tx| {
            let updated = tx.execute(
                r#"UPDATE feeds SET
                       title = COALESCE(?1, title),
                       source = COALESCE(?2, source),
                       description = COALESCE(?3, description),
                       link = COALESCE(?4, link),
                       image_url = COALESCE(?5, image_url),
                       last_update_time = COALESCE(?6, last_update_time),
                       config = COALESCE(?7, config)
                   WHERE id = ?8"#,
                params![
                    changes.title,
                    changes.source,
                    changes.description,
                    changes.link,
                    changes.image_url,
                    changes.last_update_time,
                    config,
                    id,
                ],
            )?;
            if updated == 0 {
                return Err(StoreError::FeedNotFound(id).into_db());
            }
            Ok(((), Vec::new()))
        })
        .await
    }

    pub async fn load_feed(&self, id: i64) -> Result<Option<Feed>> {
        let feed = self.conn.call(move |conn| Ok(load_feed_sync(conn, id)?)).await?;
        Ok(feed)
    }

    /// Every feed and group, depth first in chain order.
    pub async fn load_feeds(&self) -> Result<Vec<Feed>> {
        fn flatten(nodes: Vec<FeedNode>, out: &mut Vec<Feed>) {
            for node in nodes {
                out.push(node.feed);
                flatten(node.children, out);
            }
        }
        let mut feeds = Vec::new();
        flatten(self.feed_tree().await?, &mut feeds);
        Ok(feeds)
    }

    /// Children of `parent_id` in chain order. Children cut off from the
    /// chain follow in id order.
    pub async fn children(&self, parent_id: i64) -> Result<Vec<Feed>> {
        let feeds = self
            .conn
            .call(move |conn| {
                let (mut chain, stray) = walk_chain(conn, parent_id, None)?;
                chain.extend(stray);
                Ok(chain)
            })
            .await?;
        Ok(feeds)
    }

    /// The whole forest, siblings in chain order.
    pub async fn feed_tree(&self) -> Result<Vec<FeedNode>> {
        let feeds = self.conn.call(|conn| Ok(all_feeds(conn)?)).await?;

        let mut by_parent: HashMap<i64, Vec<Feed>> = HashMap::new();
        for feed in feeds {
            by_parent.entry(feed.parent_id).or_default().push(feed);
        }

        fn build(parent_id: i64, by_parent: &mut HashMap<i64, Vec<Feed>>) -> Vec<FeedNode> {
            // Taking the siblings out also stops parent cycles.
            let Some(siblings) = by_parent.remove(&parent_id) else {
                return Vec::new();
            };
            let (mut ordered, stray) = order_siblings(siblings);
            ordered.extend(stray);
            ordered
                .into_iter()
                .map(|feed| {
                    let children = build(feed.id, by_parent);
                    FeedNode { feed, children }
                })
                .collect()
        }
        Ok(build(0, &mut by_parent))
    }

    pub async fn head_id(&self, parent_id: i64) -> Result<Option<i64>> {
        let id = self.conn.call(move |conn| Ok(head_of(conn, parent_id)?)).await?;
        Ok(id)
    }

    pub async fn tail_id(&self, parent_id: i64) -> Result<Option<i64>> {
        let id = self.conn.call(move |conn| Ok(tail_of(conn, parent_id)?)).await?;
        Ok(id)
    }

    // Chain maintenance

    pub async fn check_chains(&self) -> Result<Vec<ChainIssue>> {
        let issues = self.conn.call(|conn| Ok(broken_chains(conn)?)).await?;
        Ok(issues.into_iter().map(|(issue, _)| issue).collect())
    }

    /// Rebuilds every broken chain as its reachable prefix followed by the
    /// cut-off children in id order. Returns how many chains were rebuilt.
    pub async fn repair_chains(&self) -> Result<usize> {
        let repaired = self
            .write(|tx| {
                let broken = broken_chains(tx)?;
                for (issue, order) in &broken {
                    tracing::warn!(
                        "repairing chain of parent {}: {} of {} children linked",
                        issue.parent_id,
                        issue.linked,
                        issue.total
                    );
                    relink(tx, issue.parent_id, order, 0, 0)?;
                }
                Ok((broken.len(), Vec::new()))
            })
            .await?;
        Ok(repaired)
    }
}

fn feed_from_row(row: &Row) -> rusqlite::Result<Feed> {
    let kind: String = row.get(4)?;
    let config: Option<String> = row.get(11)?;
    Ok(Feed {
        id: row.get(0)?,
        parent_id: row.get(1)?,
        prev_id: row.get(2)?,
        next_id: row.get(3)?,
        kind: FeedKind::parse(&kind).unwrap_or(FeedKind::Feed),
        source: row.get(5)?,
        title: row.get(6)?,
        description: row.get(7)?,
        link: row.get(8)?,
        image_url: row.get(9)?,
        last_update_time: row.get(10)?,
        config: config.and_then(|c| serde_json::from_str(&c).ok()),
    })
}

fn load_feed_sync(conn: &Connection, id: i64) -> rusqlite::Result<Option<Feed>> {
    conn.query_row(
        &format!("SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?1"),
        params![id],
        feed_from_row,
    )
    .optional()
}

fn all_feeds(conn: &Connection) -> rusqlite::Result<Vec<Feed>> {
    let mut stmt = conn.prepare_cached(&format!("SELECT {FEED_COLUMNS} FROM feeds ORDER BY id"))?;
    let feeds = stmt
        .query_map([], feed_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(feeds)
}

fn require_feed(conn: &Connection, id: i64) -> tokio_rusqlite::Result<Feed> {
    load_feed_sync(conn, id)?.ok_or_else(|| StoreError::FeedNotFound(id).into_db())
}

/// Root, or an existing group.
fn require_parent(conn: &Connection, parent_id: i64) -> tokio_rusqlite::Result<()> {
    if parent_id == 0 {
        return Ok(());
    }
    let parent = require_feed(conn, parent_id)?;
    if !parent.is_group() {
        return Err(StoreError::NotAGroup(parent_id).into_db());
    }
    Ok(())
}

/// `id` and every group above it.
fn ancestors(conn: &Connection, mut id: i64) -> rusqlite::Result<HashSet<i64>> {
    let mut seen = HashSet::new();
    while id != 0 && seen.insert(id) {
        id = conn
            .query_row("SELECT parent_id FROM feeds WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?
            .unwrap_or(0);
    }
    Ok(seen)
}

fn head_of(conn: &Connection, parent_id: i64) -> rusqlite::Result<Option<i64>> {
    conn.query_row(
        "SELECT id FROM feeds WHERE parent_id = ?1 AND prev_id = 0 ORDER BY id LIMIT 1",
        params![parent_id],
        |row| row.get(0),
    )
    .optional()
}

fn tail_of(conn: &Connection, parent_id: i64) -> rusqlite::Result<Option<i64>> {
    conn.query_row(
        "SELECT id FROM feeds WHERE parent_id = ?1 AND next_id = 0 ORDER BY id DESC LIMIT 1",
        params![parent_id],
        |row| row.get(0),
    )
    .optional()
}

fn set_next(conn: &Connection, id: i64, next_id: i64) -> rusqlite::Result<()> {
    if id != 0 {
        conn.execute("UPDATE feeds SET next_id = ?1 WHERE id = ?2", params![next_id, id])?;
    }
    Ok(())
}

fn set_prev(conn: &Connection, id: i64, prev_id: i64) -> rusqlite::Result<()> {
    if id != 0 {
        conn.execute("UPDATE feeds SET prev_id = ?1 WHERE id = ?2", params![prev_id, id])?;
    }
    Ok(())
}

/// Joins the node's neighbours and clears its own pointers.
fn unlink(conn: &Connection, feed: &Feed) -> rusqlite::Result<()> {
    set_next(conn, feed.prev_id, feed.next_id)?;
    set_prev(conn, feed.next_id, feed.prev_id)?;
    conn.execute(
        "UPDATE feeds SET prev_id = 0, next_id = 0 WHERE id = ?1",
        params![feed.id],
    )?;
    Ok(())
}

/// Writes `ids` as a run under `parent_id` between `before` and `after`
/// (0 for a chain end) and points those neighbours at the run.
fn relink(conn: &Connection, parent_id: i64, ids: &[i64], before: i64, after: i64) -> rusqlite::Result<()> {
    let (Some(&first), Some(&last)) = (ids.first(), ids.last()) else {
        return Ok(());
    };
    let mut update = conn.prepare_cached(
        "UPDATE feeds SET parent_id = ?1, prev_id = ?2, next_id = ?3 WHERE id = ?4",
    )?;
    for (i, id) in ids.iter().enumerate() {
        let prev_id = if i > 0 { ids[i - 1] } else { before };
        let next_id = ids.get(i + 1).copied().unwrap_or(after);
        update.execute(params![parent_id, prev_id, next_id, id])?;
    }
    set_next(conn, before, first)?;
    set_prev(conn, after, last)?;
    Ok(())
}

/// Orders siblings by following `next_id` from the lowest-id head. Returns
/// the reachable chain and the siblings it never reached, in id order.
fn order_siblings(mut siblings: Vec<Feed>) -> (Vec<Feed>, Vec<Feed>) {
    siblings.sort_by_key(|f| f.id);
    let position: HashMap<i64, usize> = siblings.iter().enumerate().map(|(i, f)| (f.id, i)).collect();

    let mut visited = vec![false; siblings.len()];
    let mut order = Vec::with_capacity(siblings.len());
    let mut cursor = siblings.iter().position(|f| f.prev_id == 0);
    while let Some(i) = cursor {
        if visited[i] {
            break;
        }
        visited[i] = true;
        order.push(i);
        cursor = position.get(&siblings[i].next_id).copied();
    }

    let mut slots: Vec<Option<Feed>> = siblings.into_iter().map(Some).collect();
    let chain = order.iter().filter_map(|&i| slots[i].take()).collect();
    let stray = slots.into_iter().flatten().collect();
    (chain, stray)
}

fn walk_chain(
    conn: &Connection,
    parent_id: i64,
    excluding: Option<i64>,
) -> rusqlite::Result<(Vec<Feed>, Vec<Feed>)> {
    let mut stmt =
        conn.prepare_cached(&format!("SELECT {FEED_COLUMNS} FROM feeds WHERE parent_id = ?1"))?;
    let siblings = stmt
        .query_map(params![parent_id], feed_from_row)?
        .filter(|f| !matches!((f, excluding), (Ok(f), Some(id)) if f.id == id))
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(order_siblings(siblings))
}

fn is_clean_chain(chain: &[Feed]) -> bool {
    chain.iter().enumerate().all(|(i, f)| {
        let expected_prev = if i > 0 { chain[i - 1].id } else { 0 };
        f.prev_id == expected_prev
    }) && chain.last().map_or(true, |f| f.next_id == 0)
}

/// Broken chains with the order a repair would write.
fn broken_chains(conn: &Connection) -> rusqlite::Result<Vec<(ChainIssue, Vec<i64>)>> {
    let mut by_parent: BTreeMap<i64, Vec<Feed>> = BTreeMap::new();
    for feed in all_feeds(conn)? {
        by_parent.entry(feed.parent_id).or_default().push(feed);
    }

    let mut broken = Vec::new();
    for (parent_id, siblings) in by_parent {
        let total = siblings.len();
        let (chain, stray) = order_siblings(siblings);
        if stray.is_empty() && is_clean_chain(&chain) {
            continue;
        }
        let issue = ChainIssue {
            parent_id,
            linked: chain.len(),
            total,
        };
        let order = chain.iter().chain(stray.iter()).map(|f| f.id).collect();
        broken.push((issue, order));
    }
    Ok(broken)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::models::FeedConfig;
    use crate::test_support::{test_repo, BASE};

    async fn ids(repo: &Repository, parent_id: i64) -> Vec<i64> {
        repo.children(parent_id).await.unwrap().iter().map(|f| f.id).collect()
    }

    async fn feed(repo: &Repository, title: &str, parent_id: i64) -> i64 {
        repo.store_feed(NewFeed::feed(format!("https://{title}.example/rss"), title).under(parent_id), Vec::new())
            .await
            .unwrap()
    }

    async fn assert_clean(repo: &Repository) {
        assert_eq!(repo.check_chains().await.unwrap(), Vec::new());
    }

    #[tokio::test]
    async fn appends_keep_insertion_order() {
        let (_dir, repo) = test_repo().await;
        let a = feed(&repo, "a", 0).await;
        let g = repo.store_group("news", 0).await.unwrap();
        let b = feed(&repo, "b", 0).await;
        let x = feed(&repo, "x", g).await;
        let y = feed(&repo, "y", g).await;

        assert_eq!(ids(&repo, 0).await, vec![a, g, b]);
        assert_eq!(ids(&repo, g).await, vec![x, y]);
        assert_eq!(repo.head_id(0).await.unwrap(), Some(a));
        assert_eq!(repo.tail_id(0).await.unwrap(), Some(b));
        assert_eq!(repo.head_id(x).await.unwrap(), None);
        assert_clean(&repo).await;

        let flat: Vec<i64> = repo.load_feeds().await.unwrap().iter().map(|f| f.id).collect();
        assert_eq!(flat, vec![a, g, x, y, b]);
    }

    #[tokio::test]
    async fn store_feed_inserts_its_items() {
        let (_dir, repo) = test_repo().await;
        let items = vec![
            NewFeedItem::new("one", "l1", BASE),
            NewFeedItem::new("two", "l2", BASE + 1),
            NewFeedItem::new("dup", "l1", BASE + 2),
        ];
        let id = repo
            .store_feed(NewFeed::feed("https://a.example/rss", "a"), items)
            .await
            .unwrap();
        assert_eq!(repo.load_items(Some(id)).await.unwrap().len(), 2);
        assert!(repo.load_feed(id).await.unwrap().unwrap().last_update_time > 0);
    }

    #[tokio::test]
    async fn moves_within_and_across_parents() {
        let (_dir, repo) = test_repo().await;
        let a = feed(&repo, "a", 0).await;
        let b = feed(&repo, "b", 0).await;
        let c = feed(&repo, "c", 0).await;
        let g = repo.store_group("g", 0).await.unwrap();

        repo.move_feed(a, 0, 2).await.unwrap();
        assert_eq!(ids(&repo, 0).await, vec![b, c, a, g]);

        repo.move_feed(g, 0, 0).await.unwrap();
        assert_eq!(ids(&repo, 0).await, vec![g, b, c, a]);

        repo.move_feed(c, g, 5).await.unwrap();
        repo.move_feed(b, g, 0).await.unwrap();
        assert_eq!(ids(&repo, 0).await, vec![g, a]);
        assert_eq!(ids(&repo, g).await, vec![b, c]);

        // Past the end appends.
        repo.move_feed(a, 0, 99).await.unwrap();
        assert_eq!(ids(&repo, 0).await, vec![g, a]);

        let moved = repo.load_feed(c).await.unwrap().unwrap();
        assert_eq!((moved.parent_id, moved.prev_id, moved.next_id), (g, b, 0));
        assert_clean(&repo).await;
    }

    #[tokio::test]
    async fn invalid_moves_are_rejected_without_changes() {
        let (_dir, repo) = test_repo().await;
        let outer = repo.store_group("outer", 0).await.unwrap();
        let inner = repo.store_group("inner", outer).await.unwrap();
        let f = feed(&repo, "f", 0).await;

        let err = repo.move_feed(outer, inner, 0).await.unwrap_err();
        assert!(matches!(err, AppError::Store(StoreError::InvalidMove(_))));
        let err = repo.move_feed(outer, outer, 0).await.unwrap_err();
        assert!(matches!(err, AppError::Store(StoreError::InvalidMove(_))));
        let err = repo.move_feed(outer, f, 0).await.unwrap_err();
        assert!(matches!(err, AppError::Store(StoreError::NotAGroup(id)) if id == f));
        let err = repo.move_feed(404, 0, 0).await.unwrap_err();
        assert!(matches!(err, AppError::Store(StoreError::FeedNotFound(404))));
        let err = repo.store_feed(NewFeed::feed("u", "t").under(f), Vec::new()).await.unwrap_err();
        assert!(matches!(err, AppError::Store(StoreError::NotAGroup(_))));

        assert_eq!(ids(&repo, 0).await, vec![outer, f]);
        assert_eq!(ids(&repo, outer).await, vec![inner]);
        assert_clean(&repo).await;
    }

    #[tokio::test]
    async fn deleting_a_root_group_splices_children_in_place() {
        let (_dir, repo) = test_repo().await;
        let a = feed(&repo, "a", 0).await;
        let g = repo.store_group("g", 0).await.unwrap();
        let b = feed(&repo, "b", 0).await;
        let x = feed(&repo, "x", g).await;
        let y = feed(&repo, "y", g).await;

        repo.delete_feed(g).await.unwrap();
        assert_eq!(ids(&repo, 0).await, vec![a, x, y, b]);
        assert!(repo.load_feed(g).await.unwrap().is_none());
        assert_clean(&repo).await;
    }

    #[tokio::test]
    async fn deleting_a_nested_group_moves_children_to_root_tail() {
        let (_dir, repo) = test_repo().await;
        let outer = repo.store_group("outer", 0).await.unwrap();
        let a = feed(&repo, "a", 0).await;
        let inner = repo.store_group("inner", outer).await.unwrap();
        let x = feed(&repo, "x", inner).await;

        repo.delete_feed(inner).await.unwrap();
        assert_eq!(ids(&repo, 0).await, vec![outer, a, x]);
        assert!(ids(&repo, outer).await.is_empty());
        assert_clean(&repo).await;
    }

    #[tokio::test]
    async fn deleting_a_feed_removes_its_items() {
        let (_dir, repo) = test_repo().await;
        let a = feed(&repo, "a", 0).await;
        let b = repo
            .store_feed(
                NewFeed::feed("https://b.example/rss", "b"),
                vec![NewFeedItem::new("one", "l1", BASE), NewFeedItem::new("two", "l2", BASE)],
            )
            .await
            .unwrap();
        let c = feed(&repo, "c", 0).await;
        repo.store_feed_items(a, vec![NewFeedItem::new("keep", "k", BASE)]).await.unwrap();

        repo.delete_feed(b).await.unwrap();
        assert_eq!(ids(&repo, 0).await, vec![a, c]);
        assert_eq!(repo.count_items().await.unwrap(), 1);
        assert_clean(&repo).await;

        // Head and tail deletions.
        repo.delete_feed(a).await.unwrap();
        repo.delete_feed(c).await.unwrap();
        assert!(ids(&repo, 0).await.is_empty());
    }

    #[tokio::test]
    async fn chains_stay_valid_through_mixed_operations() {
        let (_dir, repo) = test_repo().await;
        let mut feeds = Vec::new();
        let g1 = repo.store_group("g1", 0).await.unwrap();
        let g2 = repo.store_group("g2", 0).await.unwrap();
        for i in 0..6 {
            feeds.push(feed(&repo, &format!("f{i}"), if i % 2 == 0 { g1 } else { 0 }).await);
        }
        repo.move_feed(feeds[0], g2, 0).await.unwrap();
        repo.move_feed(feeds[1], g1, 1).await.unwrap();
        repo.move_feed(g2, g1, 0).await.unwrap();
        repo.delete_feed(feeds[2]).await.unwrap();
        repo.move_feed(feeds[3], g2, 3).await.unwrap();
        repo.delete_feed(g1).await.unwrap();
        repo.move_feed(feeds[4], 0, 0).await.unwrap();
        assert_clean(&repo).await;

        let tree = repo.feed_tree().await.unwrap();
        let total: usize = tree.iter().map(|n| 1 + n.children.len()).sum();
        assert_eq!(total, repo.load_feeds().await.unwrap().len());
    }

    #[tokio::test]
    async fn broken_chains_are_reported_and_repaired() {
        let (_dir, repo) = test_repo().await;
        let a = feed(&repo, "a", 0).await;
        let b = feed(&repo, "b", 0).await;
        let c = feed(&repo, "c", 0).await;
        let d = feed(&repo, "d", 0).await;

        // Cut c and d off: b points nowhere.
        repo.conn
            .call(move |conn| {
                conn.execute("UPDATE feeds SET next_id = 0 WHERE id = ?1", params![b])?;
                Ok(())
            })
            .await
            .unwrap();

        let issues = repo.check_chains().await.unwrap();
        assert_eq!(issues, vec![ChainIssue { parent_id: 0, linked: 2, total: 4 }]);
        // Reads still see every child.
        assert_eq!(ids(&repo, 0).await, vec![a, b, c, d]);

        assert_eq!(repo.repair_chains().await.unwrap(), 1);
        assert_clean(&repo).await;
        assert_eq!(ids(&repo, 0).await, vec![a, b, c, d]);
        assert_eq!(repo.repair_chains().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn update_feed_changes_content_only() {
        let (_dir, repo) = test_repo().await;
        let a = feed(&repo, "a", 0).await;
        let b = feed(&repo, "b", 0).await;
        let config = FeedConfig {
            custom_style: Some("serif".into()),
            replace_link: None,
        };
        repo.update_feed(
            a,
            FeedChanges {
                title: Some("renamed".into()),
                last_update_time: Some(BASE),
                config: Some(config.clone()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let stored = repo.load_feed(a).await.unwrap().unwrap();
        assert_eq!(stored.title, "renamed");
        assert_eq!(stored.last_update_time, BASE);
        assert_eq!(stored.config, Some(config));
        assert_eq!(stored.next_id, b);

        let err = repo.update_feed(999, FeedChanges::default()).await.unwrap_err();
        assert!(matches!(err, AppError::Store(StoreError::FeedNotFound(999))));
    }
}
