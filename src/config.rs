use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "ad_watcher.toml";
const PASSWORD_ENV: &str = "AD_WATCHER_SMTP_PASSWORD";

/// TOML-backed configuration, read once at startup and passed down immutably.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub feeds: Vec<Feed>,
    pub scrape_delay_secs: u64,
    #[serde(default = "default_site_base")]
    pub site_base: String,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_page_delay")]
    pub page_delay_ms: u64,
    #[serde(default)]
    pub max_pages: Option<u32>,
    #[serde(default = "default_exclude_words")]
    pub exclude_words: Vec<String>,
    pub mail: MailConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Feed {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MailConfig {
    pub sender: String,
    #[serde(default)]
    pub password: Option<String>,
    pub recipients: Vec<String>,
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
}

fn default_site_base() -> String {
    "http://www.kijiji.ca".to_string()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/ads.sqlite")
}

fn default_request_timeout() -> u64 {
    30
}

fn default_page_delay() -> u64 {
    1000
}

fn default_smtp_host() -> String {
    "smtp.gmail.com".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_exclude_words() -> Vec<String> {
    [
        "free", "wanted", "parts", "tires", "brake", "bumper", "set", "tire", "wheel", "wheels",
    ]
    .iter()
    .map(|w| w.to_string())
    .collect()
}

impl Config {
    pub fn scrape_delay(&self) -> Duration {
        Duration::from_secs(self.scrape_delay_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    pub fn feed(&self, name: &str) -> Option<&Feed> {
        self.feeds.iter().find(|f| f.name == name)
    }

    /// Reject configurations the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.feeds.is_empty() {
            bail!("no feeds configured");
        }
        if self.scrape_delay_secs == 0 {
            bail!("scrape_delay_secs must be greater than zero");
        }
        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be greater than zero");
        }

        let mut names = HashSet::new();
        for feed in &self.feeds {
            if feed.name.trim().is_empty() {
                bail!("feed with url {} has an empty name", feed.url);
            }
            if !names.insert(feed.name.as_str()) {
                bail!("duplicate feed name: {}", feed.name);
            }
            let url = reqwest::Url::parse(&feed.url)
                .with_context(|| format!("feed {}: invalid url {}", feed.name, feed.url))?;
            if !matches!(url.scheme(), "http" | "https") {
                bail!("feed {}: unsupported scheme {}", feed.name, url.scheme());
            }
            if url.path() == "/" {
                bail!("feed {}: url {} has no search path", feed.name, feed.url);
            }
        }

        reqwest::Url::parse(&self.site_base)
            .with_context(|| format!("invalid site_base {}", self.site_base))?;
        Ok(())
    }
}

/// Load, apply env overrides, and validate a TOML config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let mut config = parse_config(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    // Secrets may stay out of the file.
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        config.mail.password = Some(password);
    }

    config.validate()?;
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<Config> {
    Ok(toml::from_str(content)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
scrape_delay_secs = 600

[[feeds]]
name = "cars"
url = "https://www.kijiji.ca/b-cars-trucks/ottawa/c174l1700185"

[mail]
sender = "watcher@example.com"
recipients = ["a@example.com", "b@example.com"]
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let c = parse_config(MINIMAL).unwrap();
        c.validate().unwrap();
        assert_eq!(c.feeds.len(), 1);
        assert_eq!(c.site_base, "http://www.kijiji.ca");
        assert_eq!(c.db_path, PathBuf::from("data/ads.sqlite"));
        assert_eq!(c.request_timeout(), Duration::from_secs(30));
        assert_eq!(c.scrape_delay(), Duration::from_secs(600));
        assert!(c.exclude_words.iter().any(|w| w == "tires"));
        assert_eq!(c.mail.smtp_host, "smtp.gmail.com");
        assert_eq!(c.mail.smtp_port, 587);
        assert!(c.mail.password.is_none());
        assert!(c.max_pages.is_none());
    }

    #[test]
    fn duplicate_feed_names_rejected() {
        let mut c = parse_config(MINIMAL).unwrap();
        c.feeds.push(Feed {
            name: "cars".into(),
            url: "https://example.com/b-x/y".into(),
        });
        assert!(c.validate().is_err());
    }

    #[test]
    fn bad_feed_url_rejected() {
        let mut c = parse_config(MINIMAL).unwrap();
        c.feeds[0].url = "not a url".into();
        assert!(c.validate().is_err());

        c.feeds[0].url = "ftp://example.com/b-x/y".into();
        assert!(c.validate().is_err());

        c.feeds[0].url = "https://example.com".into();
        assert!(c.validate().is_err());
    }

    #[test]
    fn zero_delay_rejected() {
        let mut c = parse_config(MINIMAL).unwrap();
        c.scrape_delay_secs = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn example_config_is_valid() {
        let c = parse_config(include_str!("../ad_watcher.example.toml")).unwrap();
        c.validate().unwrap();
        assert_eq!(c.feeds.len(), 2);
        assert!(c.feed("motorcycles").is_some());
    }

    #[test]
    fn unknown_keys_rejected() {
        let text = MINIMAL.replace("scrape_delay_secs = 600", "scrape_delay_secs = 600\nbogus = 1");
        assert!(parse_config(&text).is_err());
    }
}
