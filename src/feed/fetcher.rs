use std::time::Duration;

use feed_rs::parser;
use futures::stream::{self, StreamExt};
use regex::Regex;
use reqwest::Client;

use crate::error::Result;
use crate::models::{Feed, NewFeed, NewFeedItem};
use crate::now_millis;

const PREVIEW_CHARS: usize = 200;

/// A fetched and parsed feed document.
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    /// The URL the document was finally read from.
    pub source: String,
    pub title: String,
    pub description: Option<String>,
    pub link: Option<String>,
    pub image_url: Option<String>,
    pub items: Vec<NewFeedItem>,
}

impl ParsedFeed {
    pub fn new_feed(&self) -> NewFeed {
        NewFeed {
            description: self.description.clone(),
            link: self.link.clone(),
            image_url: self.image_url.clone(),
            ..NewFeed::feed(self.source.clone(), self.title.clone())
        }
    }
}

#[derive(Clone)]
pub struct FeedFetcher {
    client: Client,
}

impl FeedFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("feedflow/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }

    pub async fn fetch_feed(&self, url: &str) -> Result<ParsedFeed> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Failed to fetch feed: HTTP {}", response.status()).into());
        }

        let source = response.url().to_string();
        let bytes = response.bytes().await?;
        parse_feed(&bytes, source)
    }

    /// Fetch every feed, at most `concurrency` at a time. Feeds that fail are
    /// logged and left out.
    pub async fn refresh_all(&self, feeds: Vec<Feed>, concurrency: usize) -> Vec<(Feed, ParsedFeed)> {
        stream::iter(feeds)
            .map(|feed| async move {
                match self.fetch_feed(&feed.source).await {
                    Ok(parsed) => {
                        tracing::debug!("Fetched {} items from {}", parsed.items.len(), feed.title);
                        Some((feed, parsed))
                    }
                    Err(e) => {
                        tracing::warn!("Failed to fetch {}: {}", feed.source, e);
                        None
                    }
                }
            })
            .buffer_unordered(concurrency.max(1))
            .filter_map(|r| async { r })
            .collect()
            .await
    }

    /// Discover a feed from a URL.
    /// A direct RSS/Atom URL is parsed as is; an HTML page is searched for
    /// an alternate feed link.
    pub async fn discover_feed(&self, url: &str) -> Result<ParsedFeed> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Failed to fetch URL: HTTP {}", response.status()).into());
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let bytes = response.bytes().await?;

        if let Ok(parsed) = parse_feed(&bytes, final_url.clone()) {
            return Ok(parsed);
        }

        if content_type.contains("html") || bytes.starts_with(b"<!") || bytes.starts_with(b"<html") {
            let html = String::from_utf8_lossy(&bytes);
            if let Some(feed_url) = find_feed_link(&html, &final_url) {
                return self.fetch_feed(&feed_url).await;
            }
        }

        Err(anyhow::anyhow!("Could not find RSS/Atom feed at {}", url).into())
    }
}

/// Parses an RSS/Atom/JSON feed document. Items without a link fall back to
/// their entry id so dedup by link still works.
pub fn parse_feed(bytes: &[u8], source: String) -> Result<ParsedFeed> {
    let feed = parser::parse(bytes)?;
    let now = now_millis();

    let items = feed
        .entries
        .into_iter()
        .map(|entry| {
            // Try content first, then fall back to summary
            let html = entry
                .content
                .as_ref()
                .and_then(|c| c.body.clone())
                .or_else(|| entry.summary.as_ref().map(|s| s.content.clone()));
            let short_description = html.as_deref().and_then(preview);
            let image = entry
                .media
                .iter()
                .flat_map(|m| m.thumbnails.iter())
                .map(|t| t.image.uri.clone())
                .next();

            NewFeedItem {
                title: entry
                    .title
                    .map(|t| t.content)
                    .unwrap_or_else(|| "Untitled".to_string()),
                link: entry
                    .links
                    .first()
                    .map(|l| l.href.clone())
                    .unwrap_or(entry.id),
                description: html,
                short_description,
                image,
                pub_date: entry
                    .published
                    .or(entry.updated)
                    .map(|d| d.timestamp_millis())
                    .unwrap_or(now),
            }
        })
        .collect();

    Ok(ParsedFeed {
        title: feed
            .title
            .map(|t| t.content)
            .unwrap_or_else(|| "Untitled Feed".to_string()),
        description: feed.description.map(|d| d.content),
        link: feed.links.first().map(|l| l.href.clone()),
        image_url: feed.logo.or(feed.icon).map(|i| i.uri),
        source,
        items,
    })
}

/// Plain-text preview of an HTML body.
fn preview(html: &str) -> Option<String> {
    let text = html2text::from_read(html.as_bytes(), 80).ok()?;
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        return None;
    }
    Some(match text.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text,
    })
}

/// Search HTML for an RSS/Atom feed link
fn find_feed_link(html: &str, base_url: &str) -> Option<String> {
    // <link rel="alternate" type="application/rss+xml" href="...">
    let link_re = Regex::new(
        r#"<link[^>]*rel=["']alternate["'][^>]*type=["']application/(rss|atom)\+xml["'][^>]*href=["']([^"']+)["']"#,
    )
    .ok()?;

    // type before rel
    let link_re2 =
        Regex::new(r#"<link[^>]*type=["']application/(rss|atom)\+xml["'][^>]*href=["']([^"']+)["']"#).ok()?;

    let href = link_re
        .captures(html)
        .or_else(|| link_re2.captures(html))
        .and_then(|cap| cap.get(2))
        .map(|m| m.as_str().to_string())?;

    Some(resolve_url(&href, base_url))
}

/// Resolve a potentially relative URL against a base URL
fn resolve_url(href: &str, base_url: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }

    url::Url::parse(base_url)
        .and_then(|base| base.join(href))
        .map(|resolved| resolved.to_string())
        .unwrap_or_else(|_| href.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Example</title>
    <link>https://example.com/</link>
    <description>An example feed</description>
    <item>
      <title>First</title>
      <link>https://example.com/1</link>
      <description>&lt;p&gt;Hello &lt;b&gt;world&lt;/b&gt;&lt;/p&gt;</description>
      <pubDate>Sat, 04 Nov 2023 20:30:45 GMT</pubDate>
    </item>
    <item>
      <title>Second</title>
      <guid>urn:second</guid>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn parses_items_with_previews_and_dates() {
        let parsed = parse_feed(RSS.as_bytes(), "https://example.com/rss".into()).unwrap();
        assert_eq!(parsed.title, "Example");
        assert_eq!(parsed.description.as_deref(), Some("An example feed"));
        assert_eq!(parsed.items.len(), 2);

        let first = &parsed.items[0];
        assert_eq!(first.link, "https://example.com/1");
        assert_eq!(first.pub_date, 1_699_129_845_000);
        let preview = first.short_description.as_deref().unwrap();
        assert!(preview.starts_with("Hello") && preview.contains("world"));
        assert!(!preview.contains('<'));

        // No link: the guid stands in.
        assert_eq!(parsed.items[1].link, "urn:second");
        assert_eq!(parsed.new_feed().source, "https://example.com/rss");
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(parse_feed(b"not a feed", String::new()).is_err());
    }

    #[test]
    fn previews_are_truncated() {
        let long = format!("<p>{}</p>", "word ".repeat(100));
        let text = preview(&long).unwrap();
        assert_eq!(text.chars().count(), PREVIEW_CHARS + 1);
        assert!(text.ends_with('…'));
        assert_eq!(preview("<p> </p>"), None);
    }

    #[test]
    fn finds_alternate_links_in_html() {
        let html = r#"<html><head>
            <link rel="alternate" type="application/atom+xml" href="/feed.xml">
        </head></html>"#;
        assert_eq!(
            find_feed_link(html, "https://blog.example/posts/").as_deref(),
            Some("https://blog.example/feed.xml")
        );
        assert_eq!(find_feed_link("<html></html>", "https://blog.example/"), None);
        assert_eq!(resolve_url("https://x.example/f", "not a url"), "https://x.example/f");
    }
}
