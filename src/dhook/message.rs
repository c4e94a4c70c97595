//! Discord message model and validation against the documented limits.
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use url::Url;

use super::HookError;

// Discord message limits
const AUTHOR_NAME_LENGTH: usize = 256;
const CONTENT_LENGTH: usize = 2000;
const DESCRIPTION_LENGTH: usize = 4096;
const EMBED_COMBINED_LENGTH: usize = 6000;
const EMBEDS_QUANTITY: usize = 10;
const FIELD_NAME_LENGTH: usize = 256;
const FIELDS_QUANTITY: usize = 25;
const FIELD_VALUE_LENGTH: usize = 1024;
const FOOTER_TEXT_LENGTH: usize = 2048;
const TITLE_LENGTH: usize = 256;
const USERNAME_LENGTH: usize = 80;

/// A message that can be sent to a Discord webhook.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub avatar_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
}

impl Message {
    /// Checks the message against the known Discord limits. Messages
    /// failing validation would usually produce a 400 from the API.
    pub fn validate(&self) -> Result<(), HookError> {
        if self.content.is_empty() && self.embeds.is_empty() {
            return Err(invalid("needs to contain content or embeds"));
        }
        if length(&self.content) > CONTENT_LENGTH {
            return Err(invalid("content too long"));
        }
        if length(&self.username) > USERNAME_LENGTH {
            return Err(invalid("username too long"));
        }
        if self.embeds.len() > EMBEDS_QUANTITY {
            return Err(invalid("too many embeds"));
        }
        let mut total = 0;
        for em in &self.embeds {
            em.validate()?;
            total += em.size();
        }
        if total > EMBED_COMBINED_LENGTH {
            return Err(invalid("too many characters in combined embeds"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Embed {
    #[serde(default, skip_serializing_if = "EmbedAuthor::is_empty")]
    pub author: EmbedAuthor,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(default, skip_serializing_if = "EmbedFooter::is_empty")]
    pub footer: EmbedFooter,
    #[serde(default, skip_serializing_if = "EmbedImage::is_empty")]
    pub image: EmbedImage,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "EmbedThumbnail::is_empty")]
    pub thumbnail: EmbedThumbnail,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
}

impl Embed {
    fn size(&self) -> usize {
        let mut x = length(&self.title)
            + length(&self.description)
            + length(&self.author.name)
            + length(&self.footer.text);
        for f in &self.fields {
            x += f.size();
        }
        x
    }

    fn validate(&self) -> Result<(), HookError> {
        if length(&self.description) > DESCRIPTION_LENGTH {
            return Err(invalid("embed description too long"));
        }
        if self.fields.len() > FIELDS_QUANTITY {
            return Err(invalid("embed has too many fields"));
        }
        for f in &self.fields {
            f.validate()?;
        }
        if length(&self.title) > TITLE_LENGTH {
            return Err(invalid("embed title too long"));
        }
        if !self.timestamp.is_empty()
            && DateTime::parse_from_rfc3339(&self.timestamp).is_err()
        {
            return Err(invalid("embed timestamp does not conform to RFC3339"));
        }
        if !self.url.is_empty() && !is_valid_public_url(&self.url) {
            return Err(invalid("embed URL not valid"));
        }
        self.author.validate()?;
        self.footer.validate()?;
        self.image.validate()?;
        self.thumbnail.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbedAuthor {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub icon_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
}

impl EmbedAuthor {
    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.icon_url.is_empty() && self.url.is_empty()
    }

    fn validate(&self) -> Result<(), HookError> {
        if length(&self.name) > AUTHOR_NAME_LENGTH {
            return Err(invalid("embed author name too long"));
        }
        if !self.icon_url.is_empty() && !is_valid_public_url(&self.icon_url) {
            return Err(invalid("embed author icon URL not valid"));
        }
        if !self.url.is_empty() && !is_valid_public_url(&self.url) {
            return Err(invalid("embed author URL not valid"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbedField {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub inline: bool,
}

impl EmbedField {
    fn size(&self) -> usize {
        length(&self.name) + length(&self.value)
    }

    fn validate(&self) -> Result<(), HookError> {
        if length(&self.name) > FIELD_NAME_LENGTH {
            return Err(invalid("embed field name too long"));
        }
        if length(&self.value) > FIELD_VALUE_LENGTH {
            return Err(invalid("embed field value too long"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbedFooter {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub icon_url: String,
}

impl EmbedFooter {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.icon_url.is_empty()
    }

    fn validate(&self) -> Result<(), HookError> {
        if length(&self.text) > FOOTER_TEXT_LENGTH {
            return Err(invalid("embed footer text too long"));
        }
        if !self.icon_url.is_empty() && !is_valid_public_url(&self.icon_url) {
            return Err(invalid("footer icon URL not valid"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbedImage {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
}

impl EmbedImage {
    pub fn is_empty(&self) -> bool {
        self.url.is_empty()
    }

    fn validate(&self) -> Result<(), HookError> {
        if !self.url.is_empty() && !is_valid_public_url(&self.url) {
            return Err(invalid("embed image URL not valid"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbedThumbnail {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
}

impl EmbedThumbnail {
    pub fn is_empty(&self) -> bool {
        self.url.is_empty()
    }

    fn validate(&self) -> Result<(), HookError> {
        if !self.url.is_empty() && !is_valid_public_url(&self.url) {
            return Err(invalid("embed thumbnail URL not valid"));
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> HookError {
    HookError::InvalidMessage(msg.to_string())
}

/// Number of Unicode code points in a string. Discord counts code points,
/// not bytes.
fn length(s: &str) -> usize {
    s.chars().count()
}

/// Reports whether a raw URL is an absolute http(s) URL.
pub fn is_valid_public_url(raw: &str) -> bool {
    match Url::parse(raw) {
        Ok(u) => matches!(u.scheme(), "http" | "https"),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> Message {
        Message {
            content: "hello".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn accepts_minimal_message() {
        assert!(minimal().validate().is_ok());
    }

    #[test]
    fn rejects_empty_message() {
        let m = Message::default();
        assert!(matches!(m.validate(), Err(HookError::InvalidMessage(_))));
    }

    #[test]
    fn rejects_too_long_content() {
        let m = Message {
            content: "x".repeat(2001),
            ..Default::default()
        };
        assert!(m.validate().is_err());
    }

    #[test]
    fn counts_code_points_not_bytes() {
        // 2000 umlauts are 4000 bytes but still within the limit.
        let m = Message {
            content: "ü".repeat(2000),
            ..Default::default()
        };
        assert!(m.validate().is_ok());
    }

    #[test]
    fn rejects_too_long_username() {
        let mut m = minimal();
        m.username = "x".repeat(81);
        assert!(m.validate().is_err());
    }

    #[test]
    fn rejects_too_many_embeds() {
        let m = Message {
            embeds: vec![
                Embed {
                    title: "t".to_string(),
                    ..Default::default()
                };
                11
            ],
            ..Default::default()
        };
        assert!(m.validate().is_err());
    }

    #[test]
    fn rejects_combined_embeds_too_large() {
        let m = Message {
            embeds: vec![
                Embed {
                    description: "x".repeat(3500),
                    ..Default::default()
                };
                2
            ],
            ..Default::default()
        };
        assert!(m.validate().is_err());
    }

    #[test]
    fn rejects_too_long_embed_description() {
        let m = Message {
            embeds: vec![Embed {
                description: "x".repeat(4097),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(m.validate().is_err());
    }

    #[test]
    fn rejects_too_long_embed_title() {
        let m = Message {
            embeds: vec![Embed {
                title: "x".repeat(257),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(m.validate().is_err());
    }

    #[test]
    fn rejects_bad_timestamp() {
        let m = Message {
            embeds: vec![Embed {
                title: "t".to_string(),
                timestamp: "yesterday".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(m.validate().is_err());
    }

    #[test]
    fn accepts_rfc3339_timestamp() {
        let m = Message {
            embeds: vec![Embed {
                title: "t".to_string(),
                timestamp: "2024-08-22T11:00:00Z".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(m.validate().is_ok());
    }

    #[test]
    fn rejects_invalid_urls() {
        for bad in ["ftp://example.com/x", "not a url", "/relative"] {
            let m = Message {
                embeds: vec![Embed {
                    title: "t".to_string(),
                    image: EmbedImage {
                        url: bad.to_string(),
                    },
                    ..Default::default()
                }],
                ..Default::default()
            };
            assert!(m.validate().is_err(), "should reject {bad}");
        }
    }

    #[test]
    fn rejects_too_many_fields() {
        let m = Message {
            embeds: vec![Embed {
                fields: vec![
                    EmbedField {
                        name: "n".to_string(),
                        value: "v".to_string(),
                        inline: false,
                    };
                    26
                ],
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(m.validate().is_err());
    }

    #[test]
    fn serializes_without_empty_fields() {
        let m = minimal();
        let json = serde_json::to_string(&m).unwrap();
        assert_eq!(json, r#"{"content":"hello"}"#);
    }
}
