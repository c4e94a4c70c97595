//! Parses RSS/Atom XML bytes into a normalized in-memory representation.
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("feed parse error: {0}")]
pub struct ParseError(String);

#[derive(Debug, Clone, Default)]
pub struct ParsedFeed {
    pub title: String,
    pub link: String,
    pub icon_url: String,
    pub entries: Vec<FeedEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct FeedEntry {
    pub guid: String,
    pub title: String,
    pub description: String,
    pub content: String,
    pub link: String,
    pub image_url: String,
    pub published: Option<DateTime<Utc>>,
}

pub fn parse(bytes: &[u8]) -> Result<ParsedFeed, ParseError> {
    let feed = feed_rs::parser::parse(bytes).map_err(|e| ParseError(e.to_string()))?;

    let mut entries = Vec::new();
    for e in feed.entries {
        let published: Option<DateTime<Utc>> = e.published.or(e.updated);
        let content = e.content.and_then(|c| c.body).unwrap_or_default();
        let description = e.summary.map(|s| s.content).unwrap_or_default();
        let image_url = e
            .media
            .first()
            .and_then(|m| m.content.first())
            .and_then(|c| c.url.as_ref())
            .map(|u| u.to_string())
            .unwrap_or_default();

        entries.push(FeedEntry {
            guid: e.id,
            title: e.title.map(|t| t.content).unwrap_or_default(),
            description,
            content,
            link: e.links.first().map(|l| l.href.clone()).unwrap_or_default(),
            image_url,
            published,
        });
    }

    // Oldest first, so downstream posting preserves publication order.
    // Entries without a timestamp sort to the front.
    entries.sort_by_key(|e| e.published);

    Ok(ParsedFeed {
        title: feed.title.map(|t| t.content).unwrap_or_default(),
        link: feed.links.first().map(|l| l.href.clone()).unwrap_or_default(),
        icon_url: feed
            .icon
            .map(|i| i.uri)
            .or(feed.logo.map(|l| l.uri))
            .unwrap_or_default(),
        entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Example Feed</title>
  <link href="https://example.org/"/>
  <updated>2024-08-22T12:00:00Z</updated>
  <id>urn:uuid:60a76c80-d399-11d9-b93C-0003939e0af6</id>
  <entry>
    <title>Second</title>
    <link href="https://example.org/2"/>
    <id>urn:2</id>
    <updated>2024-08-22T11:00:00Z</updated>
    <summary>later entry</summary>
  </entry>
  <entry>
    <title>First</title>
    <link href="https://example.org/1"/>
    <id>urn:1</id>
    <updated>2024-08-22T10:00:00Z</updated>
    <summary>earlier entry</summary>
  </entry>
</feed>"#;

    #[test]
    fn parses_and_sorts_ascending() {
        let feed = parse(ATOM.as_bytes()).unwrap();
        assert_eq!(feed.title, "Example Feed");
        assert_eq!(feed.entries.len(), 2);
        assert_eq!(feed.entries[0].title, "First");
        assert_eq!(feed.entries[1].title, "Second");
        assert!(feed.entries[0].published < feed.entries[1].published);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse(b"not xml at all").is_err());
    }
}
