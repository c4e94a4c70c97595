//! Loads the TOML configuration and normalizes it into validated domain types.
use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;
use tracing::warn;
use url::Url;

use crate::domain::model::{Config, ConfigApp, ConfigFeed, ConfigWebhook};

const TIMEOUT_DEFAULT: u64 = 30;
const OLDEST_DEFAULT: i64 = 7200;
const TICKER_DEFAULT: u64 = 30;
const LOG_LEVEL_DEFAULT: &str = "INFO";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("toml: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize, Default)]
struct RawFile {
    #[serde(default)]
    app: RawApp,
    #[serde(default)]
    feeds: Vec<RawFeed>,
    #[serde(default)]
    webhooks: Vec<RawWebhook>,
}

#[derive(Debug, Deserialize, Default)]
struct RawApp {
    #[serde(default)]
    branding_disabled: bool,
    #[serde(default)]
    loglevel: Option<String>,
    #[serde(default)]
    oldest: Option<i64>,
    #[serde(default)]
    ticker: Option<i64>,
    #[serde(default)]
    timeout: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawFeed {
    name: String,
    url: String,
    #[serde(default)]
    webhooks: Vec<String>,
    #[serde(default)]
    disabled: bool,
}

#[derive(Debug, Deserialize)]
struct RawWebhook {
    name: String,
    url: String,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Config, ConfigError> {
        let raw: RawFile = toml::from_str(content)?;

        let mut webhook_names = HashSet::new();
        let mut webhook_urls = HashSet::new();
        let mut webhooks = Vec::new();
        for w in &raw.webhooks {
            if w.name.is_empty() {
                return Err(ConfigError::Invalid("a webhook has no name".into()));
            }
            if w.url.is_empty() {
                return Err(ConfigError::Invalid(format!("webhook '{}' has no url", w.name)));
            }
            check_absolute_http_url(&w.url)
                .map_err(|e| ConfigError::Invalid(format!("webhook '{}': {e}", w.name)))?;
            if !webhook_names.insert(w.name.clone()) {
                return Err(ConfigError::Invalid(format!(
                    "webhook name '{}' not unique",
                    w.name
                )));
            }
            if !webhook_urls.insert(w.url.clone()) {
                return Err(ConfigError::Invalid(format!(
                    "webhook url of '{}' not unique",
                    w.name
                )));
            }
            webhooks.push(ConfigWebhook {
                name: w.name.clone(),
                url: w.url.clone(),
            });
        }

        if raw.feeds.is_empty() {
            return Err(ConfigError::Invalid("no feeds defined".into()));
        }
        let mut feed_names = HashSet::new();
        let mut webhooks_used = HashSet::new();
        let mut feeds = Vec::new();
        for f in &raw.feeds {
            if f.name.is_empty() {
                return Err(ConfigError::Invalid("a feed has no name".into()));
            }
            if f.url.is_empty() {
                return Err(ConfigError::Invalid(format!("feed '{}' has no url", f.name)));
            }
            check_absolute_http_url(&f.url)
                .map_err(|e| ConfigError::Invalid(format!("feed '{}': {e}", f.name)))?;
            if f.webhooks.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "feed '{}' has no webhooks",
                    f.name
                )));
            }
            if !feed_names.insert(f.name.clone()) {
                return Err(ConfigError::Invalid(format!(
                    "feed name '{}' not unique",
                    f.name
                )));
            }
            let mut feed_webhooks = HashSet::new();
            for wh in &f.webhooks {
                if !webhook_names.contains(wh.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "feed '{}': unknown webhook '{wh}'",
                        f.name
                    )));
                }
                if !feed_webhooks.insert(wh.clone()) {
                    return Err(ConfigError::Invalid(format!(
                        "feed '{}': webhook '{wh}' used more than once",
                        f.name
                    )));
                }
                webhooks_used.insert(wh.clone());
            }
            feeds.push(ConfigFeed {
                name: f.name.clone(),
                url: f.url.clone(),
                webhooks: f.webhooks.clone(),
                disabled: f.disabled,
            });
        }
        for w in &webhooks {
            if !webhooks_used.contains(&w.name) {
                warn!(name = %w.name, "Webhook defined, but not used");
            }
        }

        Ok(Config {
            app: normalize_app(&raw.app),
            feeds,
            webhooks,
        })
    }
}

fn normalize_app(raw: &RawApp) -> ConfigApp {
    let timeout = match raw.timeout {
        Some(t) if t > 0 => t as u64,
        _ => TIMEOUT_DEFAULT,
    };
    // In the file, a negative value disables the age filter and an absent
    // or zero value means "use the default". At runtime 0 disables.
    let oldest = match raw.oldest {
        Some(o) if o < 0 => 0,
        Some(0) | None => OLDEST_DEFAULT,
        Some(o) => o,
    };
    let ticker = match raw.ticker {
        Some(t) if t > 0 => t as u64,
        _ => TICKER_DEFAULT,
    };
    let log_level = match raw.loglevel.as_deref() {
        Some(l)
            if ["DEBUG", "INFO", "WARN", "ERROR"]
                .contains(&l.to_ascii_uppercase().as_str()) =>
        {
            l.to_ascii_uppercase()
        }
        _ => LOG_LEVEL_DEFAULT.to_string(),
    };
    ConfigApp {
        branding_disabled: raw.branding_disabled,
        log_level,
        oldest,
        ticker,
        timeout,
    }
}

fn check_absolute_http_url(raw: &str) -> Result<(), String> {
    let url = Url::parse(raw).map_err(|e| format!("invalid url '{raw}': {e}"))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!("invalid url scheme '{other}' in '{raw}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
[app]
timeout = 10
oldest = 3600
ticker = 5
loglevel = "debug"

[[webhooks]]
name = "hook-1"
url = "https://discord.example/api/webhooks/1"

[[feeds]]
name = "Feed 1"
url = "https://example.com/feed.rss"
webhooks = ["hook-1"]
"#;

    #[test]
    fn parses_valid_config() {
        let cfg = ConfigLoader::parse(VALID).unwrap();
        assert_eq!(cfg.app.timeout, 10);
        assert_eq!(cfg.app.oldest, 3600);
        assert_eq!(cfg.app.ticker, 5);
        assert_eq!(cfg.app.log_level, "DEBUG");
        assert_eq!(cfg.feeds.len(), 1);
        assert_eq!(cfg.webhooks.len(), 1);
        assert_eq!(cfg.enabled_feeds().len(), 1);
    }

    #[test]
    fn applies_defaults() {
        let cfg = ConfigLoader::parse(
            r#"
[[webhooks]]
name = "h"
url = "https://example.com/h"

[[feeds]]
name = "f"
url = "https://example.com/f"
webhooks = ["h"]
"#,
        )
        .unwrap();
        assert_eq!(cfg.app.timeout, 30);
        assert_eq!(cfg.app.oldest, 7200);
        assert_eq!(cfg.app.ticker, 30);
        assert_eq!(cfg.app.log_level, "INFO");
        assert!(!cfg.app.branding_disabled);
    }

    #[test]
    fn negative_oldest_disables_filter() {
        let cfg = ConfigLoader::parse(
            r#"
[app]
oldest = -1

[[webhooks]]
name = "h"
url = "https://example.com/h"

[[feeds]]
name = "f"
url = "https://example.com/f"
webhooks = ["h"]
"#,
        )
        .unwrap();
        assert_eq!(cfg.app.oldest, 0);
    }

    fn assert_invalid(content: &str) {
        match ConfigLoader::parse(content) {
            Err(ConfigError::Invalid(_)) => {}
            other => panic!("expected invalid config, got {other:?}"),
        }
    }

    #[test]
    fn rejects_empty_webhook_name() {
        assert_invalid(
            r#"
[[webhooks]]
name = ""
url = "https://example.com/h"

[[feeds]]
name = "f"
url = "https://example.com/f"
webhooks = ["h"]
"#,
        );
    }

    #[test]
    fn rejects_relative_url() {
        assert_invalid(
            r#"
[[webhooks]]
name = "h"
url = "/relative"

[[feeds]]
name = "f"
url = "https://example.com/f"
webhooks = ["h"]
"#,
        );
    }

    #[test]
    fn rejects_duplicate_webhook_name() {
        assert_invalid(
            r#"
[[webhooks]]
name = "h"
url = "https://example.com/1"

[[webhooks]]
name = "h"
url = "https://example.com/2"

[[feeds]]
name = "f"
url = "https://example.com/f"
webhooks = ["h"]
"#,
        );
    }

    #[test]
    fn rejects_duplicate_webhook_url() {
        assert_invalid(
            r#"
[[webhooks]]
name = "a"
url = "https://example.com/1"

[[webhooks]]
name = "b"
url = "https://example.com/1"

[[feeds]]
name = "f"
url = "https://example.com/f"
webhooks = ["a"]
"#,
        );
    }

    #[test]
    fn rejects_duplicate_feed_name() {
        assert_invalid(
            r#"
[[webhooks]]
name = "h"
url = "https://example.com/h"

[[feeds]]
name = "f"
url = "https://example.com/f1"
webhooks = ["h"]

[[feeds]]
name = "f"
url = "https://example.com/f2"
webhooks = ["h"]
"#,
        );
    }

    #[test]
    fn rejects_feed_without_webhooks() {
        assert_invalid(
            r#"
[[webhooks]]
name = "h"
url = "https://example.com/h"

[[feeds]]
name = "f"
url = "https://example.com/f"
webhooks = []
"#,
        );
    }

    #[test]
    fn rejects_unknown_webhook_reference() {
        assert_invalid(
            r#"
[[webhooks]]
name = "h"
url = "https://example.com/h"

[[feeds]]
name = "f"
url = "https://example.com/f"
webhooks = ["nope"]
"#,
        );
    }

    #[test]
    fn rejects_webhook_listed_twice_on_feed() {
        assert_invalid(
            r#"
[[webhooks]]
name = "h"
url = "https://example.com/h"

[[feeds]]
name = "f"
url = "https://example.com/f"
webhooks = ["h", "h"]
"#,
        );
    }

    #[test]
    fn rejects_zero_feeds() {
        assert_invalid(
            r#"
[[webhooks]]
name = "h"
url = "https://example.com/h"
"#,
        );
    }
}
