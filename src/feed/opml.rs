use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;

use opml::{Body, Head, Outline, OPML};

use crate::db::Repository;
use crate::error::Result;
use crate::models::{FeedNode, NewFeed};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub groups: usize,
    pub feeds: usize,
    /// Feeds whose source was already subscribed.
    pub skipped: usize,
}

pub async fn import_opml(repo: &Repository, path: &Path) -> Result<ImportSummary> {
    let xml = std::fs::read_to_string(path)?;
    import_opml_str(repo, &xml).await
}

/// Outlines with children become groups (an existing group with the same
/// title is reused), outlines with an `xmlUrl` become feeds appended to
/// their parent's chain in document order.
pub async fn import_opml_str(repo: &Repository, xml: &str) -> Result<ImportSummary> {
    let document = OPML::from_str(xml)?;

    let existing = repo.load_feeds().await?;
    let mut sources: HashSet<String> = existing
        .iter()
        .filter(|f| !f.is_group())
        .map(|f| f.source.clone())
        .collect();
    let mut groups: HashMap<String, i64> = existing
        .iter()
        .filter(|f| f.is_group())
        .map(|f| (f.title.clone(), f.id))
        .collect();

    let mut summary = ImportSummary::default();
    let mut pending: VecDeque<(Outline, i64)> =
        document.body.outlines.into_iter().map(|o| (o, 0)).collect();

    while let Some((outline, parent_id)) = pending.pop_front() {
        let title = outline
            .title
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| outline.text.clone());
        if title.is_empty() {
            continue;
        }

        if !outline.outlines.is_empty() {
            let group_id = match groups.get(&title) {
                Some(id) => *id,
                None => {
                    let id = repo.store_group(&title, parent_id).await?;
                    groups.insert(title, id);
                    summary.groups += 1;
                    id
                }
            };
            // Depth first, so document order decides which duplicate wins.
            for child in outline.outlines.into_iter().rev() {
                pending.push_front((child, group_id));
            }
        } else if let Some(source) = outline.xml_url.filter(|s| !s.is_empty()) {
            if !sources.insert(source.clone()) {
                summary.skipped += 1;
                continue;
            }
            let feed = NewFeed {
                description: outline.description,
                link: outline.html_url,
                ..NewFeed::feed(source, title)
            };
            repo.store_feed(feed.under(parent_id), Vec::new()).await?;
            summary.feeds += 1;
        }
    }

    tracing::info!(
        "[import_opml] {} groups, {} feeds, {} already subscribed",
        summary.groups,
        summary.feeds,
        summary.skipped
    );
    Ok(summary)
}

/// The subscription forest as an OPML 2.0 document, in chain order.
pub async fn export_opml(repo: &Repository) -> Result<String> {
    let tree = repo.feed_tree().await?;
    let document = OPML {
        head: Some(Head {
            title: Some("feedflow subscriptions".to_string()),
            ..Head::default()
        }),
        body: Body {
            outlines: tree.iter().map(outline_of).collect(),
        },
        ..OPML::default()
    };
    Ok(document.to_string()?)
}

fn outline_of(node: &FeedNode) -> Outline {
    let feed = &node.feed;
    if feed.is_group() {
        Outline {
            text: feed.title.clone(),
            title: Some(feed.title.clone()),
            outlines: node.children.iter().map(outline_of).collect(),
            ..Outline::default()
        }
    } else {
        Outline {
            text: feed.title.clone(),
            title: Some(feed.title.clone()),
            r#type: Some("rss".to_string()),
            xml_url: Some(feed.source.clone()),
            html_url: feed.link.clone(),
            ..Outline::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_repo;

    const DOC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<opml version="2.0">
  <head><title>subs</title></head>
  <body>
    <outline text="Solo" type="rss" xmlUrl="https://solo.example/rss"/>
    <outline text="Tech" title="Tech">
      <outline text="A" type="rss" xmlUrl="https://a.example/rss" htmlUrl="https://a.example/"/>
      <outline text="B" type="rss" xmlUrl="https://b.example/rss"/>
    </outline>
    <outline text="Dup" type="rss" xmlUrl="https://a.example/rss"/>
  </body>
</opml>"#;

    #[tokio::test]
    async fn import_builds_groups_and_skips_known_sources() {
        let (_dir, repo) = test_repo().await;
        let summary = import_opml_str(&repo, DOC).await.unwrap();
        assert_eq!(
            summary,
            ImportSummary {
                groups: 1,
                feeds: 3,
                skipped: 1
            }
        );

        let root: Vec<String> = repo.children(0).await.unwrap().into_iter().map(|f| f.title).collect();
        assert_eq!(root, vec!["Solo", "Tech"]);
        let tech = repo.children(0).await.unwrap()[1].id;
        let kids = repo.children(tech).await.unwrap();
        assert_eq!(kids.len(), 2);
        assert_eq!(kids[0].link.as_deref(), Some("https://a.example/"));

        // A second import reuses the group and adds nothing.
        let again = import_opml_str(&repo, DOC).await.unwrap();
        assert_eq!(again, ImportSummary { groups: 0, feeds: 0, skipped: 4 });
        assert!(repo.check_chains().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn export_follows_chain_order() {
        let (_dir, repo) = test_repo().await;
        import_opml_str(&repo, DOC).await.unwrap();
        let solo = repo.children(0).await.unwrap()[0].id;
        repo.move_feed(solo, 0, 1).await.unwrap();

        let xml = export_opml(&repo).await.unwrap();
        let document = OPML::from_str(&xml).unwrap();
        let titles: Vec<&str> = document.body.outlines.iter().map(|o| o.text.as_str()).collect();
        assert_eq!(titles, vec!["Tech", "Solo"]);
        assert_eq!(document.body.outlines[0].outlines.len(), 2);
        assert_eq!(
            document.body.outlines[1].xml_url.as_deref(),
            Some("https://solo.example/rss")
        );
    }
}
