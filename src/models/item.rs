use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedItem {
    pub id: i64,
    pub feed_id: i64,
    pub title: String,
    pub link: String,
    pub description: Option<String>,
    pub short_description: Option<String>,
    pub image: Option<String>,
    /// Publication time, ms since the epoch.
    pub pub_date: i64,
    pub is_read: bool,
    pub is_favorite: bool,
    /// 0 until the item is marked read.
    pub read_time: i64,
}

/// An item as produced by ingestion, before it has an id.
#[derive(Debug, Clone)]
pub struct NewFeedItem {
    pub title: String,
    pub link: String,
    pub description: Option<String>,
    pub short_description: Option<String>,
    pub image: Option<String>,
    pub pub_date: i64,
}

impl NewFeedItem {
    pub fn new(title: impl Into<String>, link: impl Into<String>, pub_date: i64) -> Self {
        Self {
            title: title.into(),
            link: link.into(),
            description: None,
            short_description: None,
            image: None,
            pub_date,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ItemChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub short_description: Option<String>,
    pub image: Option<String>,
    pub is_read: Option<bool>,
    pub is_favorite: Option<bool>,
    pub read_time: Option<i64>,
}

impl ItemChanges {
    pub fn read_at(now: i64) -> Self {
        Self {
            is_read: Some(true),
            read_time: Some(now),
            ..Default::default()
        }
    }

    pub fn favorite(is_favorite: bool) -> Self {
        Self {
            is_favorite: Some(is_favorite),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.short_description.is_none()
            && self.image.is_none()
            && self.is_read.is_none()
            && self.is_favorite.is_none()
            && self.read_time.is_none()
    }
}
