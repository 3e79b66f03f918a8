use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    Feed,
    Group,
}

impl FeedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedKind::Feed => "feed",
            FeedKind::Group => "group",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "feed" => Some(FeedKind::Feed),
            "group" => Some(FeedKind::Group),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaceLink {
    pub from: Option<String>,
    pub to: Option<String>,
}

impl ReplaceLink {
    /// Rewrites the `from` prefix of an item link to `to`.
    pub fn apply(&self, link: &str) -> String {
        match (&self.from, &self.to) {
            (Some(from), Some(to)) if !from.is_empty() => match link.strip_prefix(from.as_str()) {
                Some(rest) => format!("{to}{rest}"),
                None => link.to_string(),
            },
            _ => link.to_string(),
        }
    }
}

/// Per-feed presentation tweaks, persisted as JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace_link: Option<ReplaceLink>,
}

/// A node of the subscription forest. `prev_id`/`next_id` link siblings that
/// share `parent_id`; 0 means "no neighbour" (and "root" for `parent_id`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feed {
    pub id: i64,
    pub parent_id: i64,
    pub prev_id: i64,
    pub next_id: i64,
    pub kind: FeedKind,
    pub source: String,
    pub title: String,
    pub description: Option<String>,
    pub link: Option<String>,
    pub image_url: Option<String>,
    pub last_update_time: i64,
    pub config: Option<FeedConfig>,
}

impl Feed {
    pub fn is_group(&self) -> bool {
        self.kind == FeedKind::Group
    }

    /// The link to open for one of this feed's items.
    pub fn item_link(&self, link: &str) -> String {
        match self.config.as_ref().and_then(|c| c.replace_link.as_ref()) {
            Some(replace) => replace.apply(link),
            None => link.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewFeed {
    pub parent_id: i64,
    pub kind: FeedKind,
    pub source: String,
    pub title: String,
    pub description: Option<String>,
    pub link: Option<String>,
    pub image_url: Option<String>,
}

impl NewFeed {
    pub fn feed(source: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            parent_id: 0,
            kind: FeedKind::Feed,
            source: source.into(),
            title: title.into(),
            description: None,
            link: None,
            image_url: None,
        }
    }

    pub fn group(title: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            parent_id: 0,
            kind: FeedKind::Group,
            source: String::new(),
            link: Some(title.clone()),
            title,
            description: None,
            image_url: None,
        }
    }

    pub fn under(mut self, parent_id: i64) -> Self {
        self.parent_id = parent_id;
        self
    }
}

/// Content changes for a feed. Chain pointers and parent are owned by the
/// ordering operations and cannot be changed here.
#[derive(Debug, Clone, Default)]
pub struct FeedChanges {
    pub title: Option<String>,
    pub source: Option<String>,
    pub description: Option<String>,
    pub link: Option<String>,
    pub image_url: Option<String>,
    pub last_update_time: Option<i64>,
    pub config: Option<FeedConfig>,
}

/// A feed with its children in chain order.
#[derive(Debug, Clone)]
pub struct FeedNode {
    pub feed: Feed,
    pub children: Vec<FeedNode>,
}
