use std::time::Duration;

use crate::config::Config;
use crate::db::Repository;
use crate::error::Result;
use crate::models::{Feed, FeedChanges};
use crate::now_millis;

use super::fetcher::FeedFetcher;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Feeds that were due.
    pub due: usize,
    pub fetched: usize,
    pub failed: usize,
    /// New items stored across all feeds.
    pub stored: usize,
}

/// Feeds never synced or last synced more than `interval_ms` ago.
pub fn due_feeds(feeds: Vec<Feed>, now: i64, interval_ms: i64) -> Vec<Feed> {
    feeds
        .into_iter()
        .filter(|f| !f.is_group())
        .filter(|f| f.last_update_time == 0 || now - f.last_update_time > interval_ms)
        .collect()
}

/// Fetches every due feed (every feed with `force`) and stores the new
/// items. A failing feed is logged and keeps its old update time.
pub async fn sync_all_feeds(
    repo: &Repository,
    fetcher: &FeedFetcher,
    config: &Config,
    force: bool,
) -> Result<SyncReport> {
    let now = now_millis();
    let feeds = repo.load_feeds().await?;
    let due = if force {
        due_feeds(feeds, now, -1)
    } else {
        due_feeds(feeds, now, config.sync_interval_ms())
    };

    let mut report = SyncReport {
        due: due.len(),
        ..SyncReport::default()
    };
    if due.is_empty() {
        return Ok(report);
    }

    let results = fetcher.refresh_all(due, config.fetch_concurrency).await;
    report.failed = report.due - results.len();

    for (feed, parsed) in results {
        let stored = match repo.store_feed_items(feed.id, parsed.items).await {
            Ok(stored) => stored,
            Err(e) => {
                tracing::error!("Failed to store items of {}: {}", feed.source, e);
                report.failed += 1;
                continue;
            }
        };
        let touched = FeedChanges {
            last_update_time: Some(now),
            ..FeedChanges::default()
        };
        if let Err(e) = repo.update_feed(feed.id, touched).await {
            tracing::error!("Failed to update {}: {}", feed.source, e);
        }
        report.fetched += 1;
        report.stored += stored;
    }

    tracing::info!(
        "[sync] {} due, {} fetched, {} failed, {} new items",
        report.due,
        report.fetched,
        report.failed,
        report.stored
    );
    Ok(report)
}

/// Runs `sync_all_feeds` now and then every `sync_tick_minutes`. Never
/// returns; errors are logged and the loop carries on.
pub async fn run_sync_loop(repo: Repository, fetcher: FeedFetcher, config: Config) {
    let tick = Duration::from_secs(u64::from(config.sync_tick_minutes.max(1)) * 60);
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        if let Err(e) = sync_all_feeds(&repo, &fetcher, &config, false).await {
            tracing::error!("Sync failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewFeed;
    use crate::test_support::{test_repo, BASE};

    #[tokio::test]
    async fn only_stale_feeds_are_due() {
        let (_dir, repo) = test_repo().await;
        let never = repo.store_feed(NewFeed::feed("https://a.example", "a"), Vec::new()).await.unwrap();
        let stale = repo.store_feed(NewFeed::feed("https://b.example", "b"), Vec::new()).await.unwrap();
        let fresh = repo.store_feed(NewFeed::feed("https://c.example", "c"), Vec::new()).await.unwrap();
        repo.store_group("g", 0).await.unwrap();

        let hour = 60 * 60 * 1000;
        for (id, at) in [(stale, BASE - 3 * hour), (fresh, BASE - hour)] {
            let changes = FeedChanges {
                last_update_time: Some(at),
                ..FeedChanges::default()
            };
            repo.update_feed(id, changes).await.unwrap();
        }

        let feeds = repo.load_feeds().await.unwrap();
        let due: Vec<i64> = due_feeds(feeds.clone(), BASE, 2 * hour).iter().map(|f| f.id).collect();
        assert_eq!(due, vec![never, stale]);
        assert_eq!(due_feeds(feeds, BASE, -1).len(), 3);
    }

    #[tokio::test]
    async fn unreachable_feeds_are_skipped() {
        let (_dir, repo) = test_repo().await;
        // A port that was just free refuses the connection.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let source = format!("http://127.0.0.1:{port}/rss");
        repo.store_feed(NewFeed::feed(source, "down"), Vec::new())
            .await
            .unwrap();
        let fetcher = FeedFetcher::new().unwrap();
        let config = Config {
            db_path: String::new(),
            ..Config::default()
        };

        let report = sync_all_feeds(&repo, &fetcher, &config, false).await.unwrap();
        assert_eq!(report, SyncReport { due: 1, fetched: 0, failed: 1, stored: 0 });
        let feed = &repo.load_feeds().await.unwrap()[0];
        assert_eq!(feed.last_update_time, 0);
    }
}
