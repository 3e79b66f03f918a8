use tempfile::TempDir;

use crate::db::Repository;
use crate::models::FeedItem;

pub(crate) const BASE: i64 = 1_699_129_845_568;

pub(crate) async fn test_repo() -> (TempDir, Repository) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("feeds.db");
    let repo = Repository::new(path.to_str().unwrap()).await.unwrap();
    (dir, repo)
}

/// Items `ids` of `feed_id` with `pub_date = BASE + id * 1000`.
pub(crate) fn fixture_items(feed_id: i64, ids: std::ops::Range<i64>) -> Vec<FeedItem> {
    ids.map(|id| FeedItem {
        id,
        feed_id,
        title: format!("title {feed_id}:{id}"),
        link: format!("link {feed_id}:{id}"),
        description: None,
        short_description: None,
        image: None,
        pub_date: BASE + id * 1000,
        is_read: false,
        is_favorite: false,
        read_time: 0,
    })
    .collect()
}
