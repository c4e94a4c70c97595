//! Materialized feed items and their conversion to Discord messages.
//!
//! A [`FeedItem`] carries everything needed to render the message, so a
//! queued entry can be sent after a restart without consulting the feed
//! or the store again.
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::dhook::message::is_valid_public_url;
use crate::dhook::{Embed, EmbedFooter, Message};
use crate::feed::parser::{FeedEntry, ParsedFeed};

const EMBED_FIELD_MAX_LENGTH: usize = 256;
const EMBED_DESCRIPTION_MAX_LENGTH: usize = 4096;
const USERNAME: &str = "Feedrelay";
const AVATAR_URL: &str = "https://i.imgur.com/J8pDxRO.png";

/// A feed item to be posted to a webhook.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub feed_name: String,
    #[serde(default)]
    pub feed_title: String,
    #[serde(default)]
    pub feed_url: String,
    #[serde(default)]
    pub icon_url: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub is_updated: bool,
    #[serde(default)]
    pub item_url: String,
    #[serde(default)]
    pub published: Option<DateTime<Utc>>,
    #[serde(default)]
    pub title: String,
}

impl FeedItem {
    pub fn new(feed_name: &str, feed: &ParsedFeed, entry: &FeedEntry, is_updated: bool) -> Self {
        let raw = if !entry.content.is_empty() {
            &entry.content
        } else {
            &entry.description
        };
        Self {
            description: html_to_text(raw),
            feed_name: feed_name.to_string(),
            feed_title: feed.title.clone(),
            feed_url: feed.link.clone(),
            icon_url: feed.icon_url.clone(),
            image_url: entry.image_url.clone(),
            is_updated,
            item_url: entry.link.clone(),
            published: entry.published,
            title: entry.title.clone(),
        }
    }

    /// Renders the item as a Discord message with a single embed.
    pub fn to_discord_message(&self, branding_disabled: bool) -> Message {
        let (description, _) =
            truncate_string(&self.description, EMBED_DESCRIPTION_MAX_LENGTH);
        let title = unescape_entities(&self.title);
        let title = if self.is_updated {
            format!("UPDATED: {title}")
        } else {
            title
        };
        let (title, _) = truncate_string(&title, EMBED_FIELD_MAX_LENGTH);

        let mut em = Embed {
            description,
            title,
            ..Default::default()
        };
        if !self.item_url.is_empty() && is_valid_public_url(&self.item_url) {
            em.url = self.item_url.clone();
        }
        if let Some(published) = self.published {
            em.timestamp = published.to_rfc3339_opts(SecondsFormat::Secs, true);
        }
        let feed_title = unescape_entities(&self.feed_title);
        (em.author.name, _) = truncate_string(&feed_title, EMBED_FIELD_MAX_LENGTH);
        if !self.feed_url.is_empty() && is_valid_public_url(&self.feed_url) {
            em.author.url = self.feed_url.clone();
        }
        if !self.icon_url.is_empty() {
            em.author.icon_url = self.icon_url.clone();
        }
        if !self.image_url.is_empty() && is_valid_public_url(&self.image_url) {
            em.image.url = self.image_url.clone();
        }
        em.footer = EmbedFooter {
            text: self.feed_name.clone(),
            icon_url: String::new(),
        };

        let mut dm = Message {
            embeds: vec![em],
            ..Default::default()
        };
        if !branding_disabled {
            dm.username = USERNAME.to_string();
            dm.avatar_url = AVATAR_URL.to_string();
        }
        dm
    }
}

/// Wrapper around a feed item with header information for queue processing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub item: FeedItem,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Envelope {
    pub fn new(item: FeedItem, now: DateTime<Utc>) -> Self {
        Self {
            item,
            timestamp: Some(now),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Truncates a string to a limit of code points, appending an ellipsis to
/// truncated strings. Reports whether truncation happened.
fn truncate_string(s: &str, max_len: usize) -> (String, bool) {
    debug_assert!(max_len >= 3);
    let count = s.chars().count();
    if count <= max_len {
        return (s.to_string(), false);
    }
    let truncated: String = s.chars().take(max_len - 3).collect();
    (truncated + "...", true)
}

/// Best-effort conversion of feed HTML into plain text: block-level tags
/// become line breaks, remaining tags are dropped, entities unescaped.
/// Good enough for a Discord embed; anything fancier is the feed's problem.
fn html_to_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut chars = html.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '<' {
            out.push(c);
            continue;
        }
        let mut tag = String::new();
        for t in chars.by_ref() {
            if t == '>' {
                break;
            }
            tag.push(t);
        }
        let name: String = tag
            .trim_start_matches('/')
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        if matches!(name.as_str(), "br" | "p" | "div" | "li" | "tr") && !out.ends_with('\n') {
            out.push('\n');
        }
    }
    let text = unescape_entities(&out);
    text.trim().to_string()
}

fn unescape_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn feed() -> ParsedFeed {
        ParsedFeed {
            title: "Example Feed".to_string(),
            link: "https://example.org/".to_string(),
            icon_url: "https://example.org/icon.png".to_string(),
            entries: Vec::new(),
        }
    }

    fn entry() -> FeedEntry {
        FeedEntry {
            guid: "urn:1".to_string(),
            title: "A".to_string(),
            description: "body".to_string(),
            content: String::new(),
            link: "https://example.org/1".to_string(),
            image_url: String::new(),
            published: Some(Utc.with_ymd_and_hms(2024, 8, 22, 11, 0, 0).unwrap()),
        }
    }

    #[test]
    fn converts_to_valid_message() {
        let fi = FeedItem::new("feed1", &feed(), &entry(), false);
        let m = fi.to_discord_message(false);
        assert!(m.validate().is_ok());
        assert_eq!(m.embeds[0].title, "A");
        assert_eq!(m.embeds[0].description, "body");
        assert_eq!(m.embeds[0].url, "https://example.org/1");
        assert_eq!(m.embeds[0].footer.text, "feed1");
        assert_eq!(m.embeds[0].author.name, "Example Feed");
        assert_eq!(m.embeds[0].timestamp, "2024-08-22T11:00:00Z");
        assert_eq!(m.username, USERNAME);
    }

    #[test]
    fn updated_items_are_prefixed() {
        let fi = FeedItem::new("feed1", &feed(), &entry(), true);
        let m = fi.to_discord_message(false);
        assert_eq!(m.embeds[0].title, "UPDATED: A");
    }

    #[test]
    fn branding_can_be_disabled() {
        let fi = FeedItem::new("feed1", &feed(), &entry(), false);
        let m = fi.to_discord_message(true);
        assert!(m.username.is_empty());
        assert!(m.avatar_url.is_empty());
    }

    #[test]
    fn content_takes_precedence_over_description() {
        let mut e = entry();
        e.content = "full content".to_string();
        let fi = FeedItem::new("feed1", &feed(), &e, false);
        assert_eq!(fi.description, "full content");
    }

    #[test]
    fn long_fields_are_truncated() {
        let mut e = entry();
        e.title = "x".repeat(300);
        e.description = "y".repeat(5000);
        let fi = FeedItem::new("feed1", &feed(), &e, false);
        let m = fi.to_discord_message(false);
        assert_eq!(m.embeds[0].title.chars().count(), 256);
        assert!(m.embeds[0].title.ends_with("..."));
        assert_eq!(m.embeds[0].description.chars().count(), 4096);
        assert!(m.validate().is_ok());
    }

    #[test]
    fn invalid_urls_are_omitted() {
        let mut e = entry();
        e.link = "not a url".to_string();
        e.image_url = "ftp://example.org/i.png".to_string();
        let fi = FeedItem::new("feed1", &feed(), &e, false);
        let m = fi.to_discord_message(false);
        assert!(m.embeds[0].url.is_empty());
        assert!(m.embeds[0].image.url.is_empty());
        assert!(m.validate().is_ok());
    }

    #[test]
    fn envelope_round_trips() {
        let fi = FeedItem::new("feed1", &feed(), &entry(), true);
        let env = Envelope::new(fi, Utc.with_ymd_and_hms(2024, 8, 22, 12, 0, 0).unwrap());
        let bytes = env.to_bytes().unwrap();
        assert_eq!(Envelope::from_bytes(&bytes).unwrap(), env);
    }

    #[test]
    fn strips_html_from_description() {
        let mut e = entry();
        e.description =
            "<p>Hello <b>world</b></p><p>Second &amp; last line</p>".to_string();
        let fi = FeedItem::new("feed1", &feed(), &e, false);
        assert_eq!(fi.description, "Hello world\nSecond & last line");
    }

    #[test]
    fn unescapes_title_entities() {
        let mut e = entry();
        e.title = "Tom &amp; Jerry".to_string();
        let fi = FeedItem::new("feed1", &feed(), &e, false);
        let m = fi.to_discord_message(false);
        assert_eq!(m.embeds[0].title, "Tom & Jerry");
    }
}
