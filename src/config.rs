//! Crawl settings.
//!
//! Every key is optional and falls back to the defaults the bookstore crawl
//! was tuned with. [`CrawlSettings::from_env`] reads a `.env` file if one is
//! present, then the process environment.

use crate::error::CrawlError;
use crate::throttle::ThrottleConfig;
use dotenvy::dotenv;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/128.0.0.0 Safari/537.36 Vivaldi/6.9.3447.54";

#[derive(Debug, Clone, PartialEq)]
pub struct CrawlSettings {
    pub user_agent: String,
    /// Hard cap on fetches in flight.
    pub concurrent_requests: usize,
    /// Minimum spacing between dispatches; the throttle never goes below it.
    pub download_delay: Duration,
    pub dns_timeout: Duration,
    pub download_timeout: Duration,
    /// Extra attempts after the first failed fetch.
    pub retry_times: u32,
    pub autothrottle_enabled: bool,
    pub autothrottle_start_delay: Duration,
    pub autothrottle_max_delay: Duration,
    pub autothrottle_target_concurrency: f64,
    /// Stop after this many items reach the sink. `None` is unlimited.
    pub item_limit: Option<usize>,
    pub browser_headless: bool,
    pub feed_uri: PathBuf,
    /// JSON site profile to crawl instead of the built-in bookstore preset.
    pub site_profile: Option<PathBuf>,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            concurrent_requests: 8,
            download_delay: Duration::from_secs(2),
            dns_timeout: Duration::from_secs(60),
            download_timeout: Duration::from_secs(30),
            retry_times: 2,
            autothrottle_enabled: true,
            autothrottle_start_delay: Duration::from_secs(5),
            autothrottle_max_delay: Duration::from_secs(60),
            autothrottle_target_concurrency: 1.0,
            item_limit: Some(100),
            browser_headless: false,
            feed_uri: PathBuf::from("products.csv"),
            site_profile: None,
        }
    }
}

impl CrawlSettings {
    /// Loads settings from `.env` and the environment.
    pub fn from_env() -> Result<Self, CrawlError> {
        // Load .env file if present (development)
        let _ = dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads settings from any key/value source, starting from the defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CrawlError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut settings = Self::default();

        if let Some(agent) = get("USER_AGENT") {
            settings.user_agent = agent;
        }
        if let Some(raw) = get("CONCURRENT_REQUESTS") {
            settings.concurrent_requests = parse_value("CONCURRENT_REQUESTS", &raw)?;
        }
        if let Some(raw) = get("DOWNLOAD_DELAY") {
            settings.download_delay = parse_seconds("DOWNLOAD_DELAY", &raw)?;
        }
        if let Some(raw) = get("DNS_TIMEOUT") {
            settings.dns_timeout = parse_seconds("DNS_TIMEOUT", &raw)?;
        }
        if let Some(raw) = get("DOWNLOAD_TIMEOUT") {
            settings.download_timeout = parse_seconds("DOWNLOAD_TIMEOUT", &raw)?;
        }
        if let Some(raw) = get("RETRY_TIMES") {
            settings.retry_times = parse_value("RETRY_TIMES", &raw)?;
        }
        if let Some(raw) = get("AUTOTHROTTLE_ENABLED") {
            settings.autothrottle_enabled = parse_bool("AUTOTHROTTLE_ENABLED", &raw)?;
        }
        if let Some(raw) = get("AUTOTHROTTLE_START_DELAY") {
            settings.autothrottle_start_delay = parse_seconds("AUTOTHROTTLE_START_DELAY", &raw)?;
        }
        if let Some(raw) = get("AUTOTHROTTLE_MAX_DELAY") {
            settings.autothrottle_max_delay = parse_seconds("AUTOTHROTTLE_MAX_DELAY", &raw)?;
        }
        if let Some(raw) = get("AUTOTHROTTLE_TARGET_CONCURRENCY") {
            settings.autothrottle_target_concurrency =
                parse_value("AUTOTHROTTLE_TARGET_CONCURRENCY", &raw)?;
        }
        if let Some(raw) = get("CLOSESPIDER_ITEMCOUNT") {
            let count: usize = parse_value("CLOSESPIDER_ITEMCOUNT", &raw)?;
            settings.item_limit = (count > 0).then_some(count);
        }
        if let Some(raw) = get("ROBOTSTXT_OBEY") {
            if parse_bool("ROBOTSTXT_OBEY", &raw)? {
                return Err(CrawlError::Configuration(
                    "ROBOTSTXT_OBEY=true is not supported".into(),
                ));
            }
        }
        if let Some(raw) = get("BROWSER_HEADLESS") {
            settings.browser_headless = parse_bool("BROWSER_HEADLESS", &raw)?;
        }
        if let Some(path) = get("FEED_URI") {
            settings.feed_uri = PathBuf::from(path);
        }
        if let Some(encoding) = get("FEED_EXPORT_ENCODING") {
            if !matches!(encoding.to_ascii_lowercase().as_str(), "utf-8" | "utf8") {
                return Err(CrawlError::Configuration(format!(
                    "FEED_EXPORT_ENCODING `{}` is not supported, only utf-8",
                    encoding
                )));
            }
        }
        if let Some(path) = get("SITE_PROFILE") {
            settings.site_profile = Some(PathBuf::from(path));
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Rejects settings the crawler cannot run with.
    pub fn validate(&self) -> Result<(), CrawlError> {
        if self.concurrent_requests == 0 {
            return Err(CrawlError::Configuration(
                "CONCURRENT_REQUESTS must be at least 1".into(),
            ));
        }
        if self.download_timeout.is_zero() {
            return Err(CrawlError::Configuration(
                "DOWNLOAD_TIMEOUT must be positive".into(),
            ));
        }
        if self.autothrottle_max_delay < self.download_delay {
            return Err(CrawlError::Configuration(format!(
                "AUTOTHROTTLE_MAX_DELAY ({:?}) is below DOWNLOAD_DELAY ({:?})",
                self.autothrottle_max_delay, self.download_delay
            )));
        }
        let target = self.autothrottle_target_concurrency;
        if target.is_nan() || target <= 0.0 {
            return Err(CrawlError::Configuration(
                "AUTOTHROTTLE_TARGET_CONCURRENCY must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn throttle_config(&self) -> ThrottleConfig {
        ThrottleConfig {
            enabled: self.autothrottle_enabled,
            floor: self.download_delay,
            start_delay: self.autothrottle_start_delay,
            ceiling: self.autothrottle_max_delay,
            target_concurrency: self.autothrottle_target_concurrency,
            max_concurrency: self.concurrent_requests,
        }
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, CrawlError> {
    raw.parse()
        .map_err(|_| CrawlError::Configuration(format!("{} has invalid value `{}`", key, raw)))
}

fn parse_seconds(key: &str, raw: &str) -> Result<Duration, CrawlError> {
    let seconds: f64 = parse_value(key, raw)?;
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(CrawlError::Configuration(format!(
            "{} must be a non-negative number of seconds, got `{}`",
            key, raw
        )));
    }
    Ok(Duration::from_secs_f64(seconds))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, CrawlError> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(CrawlError::Configuration(format!(
            "{} must be a boolean, got `{}`",
            key, raw
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings_from(pairs: &[(&str, &str)]) -> Result<CrawlSettings, CrawlError> {
        let source: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        CrawlSettings::from_lookup(|key| source.get(key).cloned())
    }

    #[test]
    fn empty_source_gives_defaults() {
        let settings = settings_from(&[]).unwrap();
        assert_eq!(settings, CrawlSettings::default());
        assert_eq!(settings.item_limit, Some(100));
        assert_eq!(settings.throttle_config().seed_delay(), Duration::from_secs(5));
    }

    #[test]
    fn overrides_are_parsed() {
        let settings = settings_from(&[
            ("CONCURRENT_REQUESTS", "4"),
            ("DOWNLOAD_DELAY", "0.5"),
            ("AUTOTHROTTLE_ENABLED", "false"),
            ("CLOSESPIDER_ITEMCOUNT", "0"),
            ("BROWSER_HEADLESS", "true"),
            ("FEED_EXPORT_ENCODING", "UTF-8"),
            ("FEED_URI", "out/books.csv"),
        ])
        .unwrap();

        assert_eq!(settings.concurrent_requests, 4);
        assert_eq!(settings.download_delay, Duration::from_millis(500));
        assert!(!settings.autothrottle_enabled);
        assert_eq!(settings.item_limit, None);
        assert!(settings.browser_headless);
        assert_eq!(settings.feed_uri, PathBuf::from("out/books.csv"));
    }

    #[test]
    fn invalid_values_are_configuration_errors() {
        for pairs in [
            vec![("CONCURRENT_REQUESTS", "eight")],
            vec![("CONCURRENT_REQUESTS", "0")],
            vec![("DOWNLOAD_DELAY", "-1")],
            vec![("AUTOTHROTTLE_ENABLED", "maybe")],
            vec![("AUTOTHROTTLE_TARGET_CONCURRENCY", "0")],
            vec![("DOWNLOAD_DELAY", "90")],
            vec![("ROBOTSTXT_OBEY", "true")],
            vec![("FEED_EXPORT_ENCODING", "latin-1")],
        ] {
            assert!(
                matches!(settings_from(&pairs), Err(CrawlError::Configuration(_))),
                "{:?} should be rejected",
                pairs
            );
        }
    }
}
