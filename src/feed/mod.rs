mod fetcher;
mod opml;
mod sync;

pub use fetcher::{parse_feed, FeedFetcher, ParsedFeed};
pub use opml::{export_opml, import_opml, import_opml_str, ImportSummary};
pub use sync::{due_feeds, run_sync_loop, sync_all_feeds, SyncReport};
