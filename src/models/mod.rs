mod feed;
mod filter;
mod item;

pub use feed::{Feed, FeedChanges, FeedConfig, FeedKind, FeedNode, NewFeed, ReplaceLink};
pub use filter::{include, FilterPredicate, ItemFilter, READ_GRACE_MS};
pub use item::{FeedItem, ItemChanges, NewFeedItem};
