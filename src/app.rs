use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;

use chrono::{TimeZone, Utc};

use crate::cli::AppAction;
use crate::config::Config;
use crate::db::Repository;
use crate::error::Result;
use crate::feed::{export_opml, import_opml, run_sync_loop, sync_all_feeds, FeedFetcher};
use crate::models::{Feed, FeedItem, FeedNode};
use crate::paging::{FeedItemList, Selection};

const WRAP_WIDTH: usize = 78;

pub struct App {
    pub repository: Repository,
    pub items: FeedItemList,
    fetcher: FeedFetcher,
    config: Config,
}

impl App {
    pub async fn new(config: &Config) -> Result<Self> {
        let repository = Repository::new(&config.db_path).await?;
        let fetcher = FeedFetcher::new()?;
        let items = FeedItemList::new(repository.clone(), config.paging_options());

        Ok(Self {
            repository,
            items,
            fetcher,
            config: config.clone(),
        })
    }

    /// Runs one action and returns what to print.
    pub async fn handle_action(&mut self, action: AppAction) -> Result<String> {
        match action {
            AppAction::ImportOpml(path) => {
                let summary = import_opml(&self.repository, &path).await?;
                let report = sync_all_feeds(&self.repository, &self.fetcher, &self.config, false).await?;
                Ok(format!(
                    "Imported {} groups and {} feeds ({} already subscribed), {} new items",
                    summary.groups, summary.feeds, summary.skipped, report.stored
                ))
            }
            AppAction::ExportOpml(path) => {
                self.export_opml(&path).await?;
                Ok(format!("Exported subscriptions to {:?}", path))
            }
            AppAction::Refresh => {
                let report = sync_all_feeds(&self.repository, &self.fetcher, &self.config, true).await?;
                Ok(format!(
                    "Refreshed {} of {} feeds, {} new items",
                    report.fetched, report.due, report.stored
                ))
            }
            AppAction::Watch => {
                run_sync_loop(self.repository.clone(), self.fetcher.clone(), self.config.clone()).await;
                Ok(String::new())
            }
            AppAction::AddFeed { url, parent_id } => {
                let parsed = self.fetcher.discover_feed(&url).await?;
                let feed = parsed.new_feed().under(parent_id);
                let count = parsed.items.len();
                let id = self.repository.store_feed(feed, parsed.items).await?;
                Ok(format!("Added feed {} \"{}\" with {} items", id, parsed.title, count))
            }
            AppAction::AddGroup { title, parent_id } => {
                let id = self.repository.store_group(&title, parent_id).await?;
                Ok(format!("Added group {} \"{}\"", id, title))
            }
            AppAction::MoveFeed { id, parent_id, index } => {
                self.repository.move_feed(id, parent_id, index).await?;
                Ok(format!("Moved {} to position {} under {}", id, index, parent_id))
            }
            AppAction::DeleteFeed(id) => {
                self.repository.delete_feed(id).await?;
                Ok(format!("Deleted {}", id))
            }
            AppAction::ShowTree => Ok(render_tree(&self.repository.feed_tree().await?)),
            AppAction::ListItems { selection, pages } => self.list_items(selection, pages).await,
            AppAction::MarkRead(ids) => {
                let undo = self.repository.read_items(ids).await?;
                Ok(format!("Marked {} items read", undo.ids().len()))
            }
            AppAction::RepairChains => {
                let issues = self.repository.check_chains().await?;
                if issues.is_empty() {
                    return Ok("All chains are intact".to_string());
                }
                let repaired = self.repository.repair_chains().await?;
                Ok(format!("Rebuilt {} chains", repaired))
            }
        }
    }

    pub async fn export_opml(&self, path: &Path) -> Result<()> {
        let xml = export_opml(&self.repository).await?;
        std::fs::write(path, xml)?;
        Ok(())
    }

    /// Loads `pages` pages of the selection and renders them.
    pub async fn list_items(&mut self, selection: Selection, pages: usize) -> Result<String> {
        let feeds: HashMap<i64, Feed> = self
            .repository
            .load_feeds()
            .await?
            .into_iter()
            .map(|f| (f.id, f))
            .collect();

        let pager = self.items.select(selection);
        for _ in 0..pages.max(1) {
            if pager.next_page().await?.done {
                break;
            }
        }
        let items = pager.items().await;
        let waiting = pager.new_item_count().await?;

        let mut out = String::new();
        for item in &items {
            render_item(&mut out, item, feeds.get(&item.feed_id));
        }
        if items.is_empty() {
            out.push_str("No items\n");
        }
        if waiting > 0 {
            let _ = writeln!(out, "({} newer items above)", waiting);
        }
        Ok(out)
    }
}

fn render_item(out: &mut String, item: &FeedItem, feed: Option<&Feed>) {
    let marker = match (item.is_read, item.is_favorite) {
        (_, true) => '*',
        (false, false) => '•',
        (true, false) => ' ',
    };
    let date = Utc
        .timestamp_millis_opt(item.pub_date)
        .single()
        .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default();
    let source = feed.map(|f| f.title.as_str()).unwrap_or("?");
    let _ = writeln!(out, "{} [{}] {}  ({}, {})", marker, item.id, item.title, source, date);

    let link = feed.map_or_else(|| item.link.clone(), |f| f.item_link(&item.link));
    let _ = writeln!(out, "    {}", link);
    if let Some(text) = &item.short_description {
        let options = textwrap::Options::new(WRAP_WIDTH)
            .initial_indent("    ")
            .subsequent_indent("    ");
        for line in textwrap::wrap(text, options) {
            let _ = writeln!(out, "{}", line);
        }
    }
}

/// Indented outline of the forest, one node per line.
pub fn render_tree(nodes: &[FeedNode]) -> String {
    fn walk(nodes: &[FeedNode], depth: usize, out: &mut String) {
        for node in nodes {
            let feed = &node.feed;
            let indent = "  ".repeat(depth);
            if feed.is_group() {
                let _ = writeln!(out, "{}+ {} [{}]", indent, feed.title, feed.id);
                walk(&node.children, depth + 1, out);
            } else {
                let _ = writeln!(out, "{}- {} [{}] {}", indent, feed.title, feed.id, feed.source);
            }
        }
    }
    let mut out = String::new();
    walk(nodes, 0, &mut out);
    out
}
