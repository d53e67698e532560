use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::errors::{AppError, AppResult};

pub mod defaults;
pub mod duration_serde;

use defaults::*;
use duration_serde::duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub playlist: PlaylistConfig,
    pub epg: EpgConfig,
    pub cache: CacheConfig,
    pub http: HttpConfig,
    pub web: WebConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlaylistConfig {
    /// Playlist location: http(s) URL, `file://` URL or a local path
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EpgConfig {
    pub enabled: bool,
    /// Comma separated list of XMLTV sources
    pub urls: String,
    pub max_programs_per_channel: usize,
    #[serde(with = "duration")]
    pub cache_expiry: Duration,
    /// Zone applied to XMLTV timestamps that carry no offset
    pub default_timezone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    #[serde(with = "duration")]
    pub update_interval: Duration,
    #[serde(with = "duration")]
    pub max_age: Duration,
    /// Total attempts per refresh, including the first one
    pub retry_attempts: u32,
    #[serde(with = "duration")]
    pub retry_delay: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpConfig {
    #[serde(with = "duration")]
    pub request_timeout: Duration,
    #[serde(with = "duration")]
    pub connect_timeout: Duration,
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WebConfig {
    /// Public domain the service is reachable on, e.g. `https://tv.example.com`
    pub domain: Option<String>,
    pub subpath: String,
    pub port: u16,
}

impl Default for PlaylistConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_PLAYLIST_URL.to_string(),
        }
    }
}

impl Default for EpgConfig {
    fn default() -> Self {
        Self {
            enabled: DEFAULT_EPG_ENABLED,
            urls: DEFAULT_EPG_URLS.to_string(),
            max_programs_per_channel: DEFAULT_MAX_PROGRAMS_PER_CHANNEL,
            cache_expiry: DEFAULT_EPG_CACHE_EXPIRY,
            default_timezone: DEFAULT_TIMEZONE.to_string(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            update_interval: DEFAULT_CACHE_UPDATE_INTERVAL,
            max_age: DEFAULT_CACHE_MAX_AGE,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            domain: None,
            subpath: DEFAULT_SUBPATH.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl EpgConfig {
    /// Configured guide sources, split on commas with blanks dropped
    pub fn source_urls(&self) -> Vec<String> {
        split_url_list(&self.urls)
    }

    pub fn timezone(&self) -> AppResult<chrono_tz::Tz> {
        self.default_timezone.parse::<chrono_tz::Tz>().map_err(|e| {
            AppError::configuration(format!(
                "epg.default_timezone '{}' is not a known zone: {e}",
                self.default_timezone
            ))
        })
    }
}

impl Config {
    /// Load configuration from a TOML file, writing the defaults there when
    /// the file does not exist yet.
    pub fn load_from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();

        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&contents).map_err(|e| {
                AppError::configuration(format!("Failed to parse {}: {e}", path.display()))
            })?;
            debug!("Configuration read from {}", path.display());
            Ok(config)
        } else {
            let default_config = Self::default();
            let contents = toml::to_string_pretty(&default_config).map_err(|e| {
                AppError::configuration(format!("Failed to render default configuration: {e}"))
            })?;
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            std::fs::write(path, contents)?;
            info!("Wrote default configuration to {}", path.display());
            Ok(default_config)
        }
    }

    /// Apply the deployment environment variables on top of the file values.
    ///
    /// `lookup` is usually `|key| std::env::var(key).ok()`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> AppResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("M3U_URL").filter(|v| !v.trim().is_empty()) {
            self.playlist.url = url.trim().to_string();
        }
        if let Some(urls) = lookup("EPG_URL").filter(|v| !v.trim().is_empty()) {
            self.epg.urls = urls.trim().to_string();
        }
        if let Some(enabled) = lookup("ENABLE_EPG") {
            self.epg.enabled = matches!(
                enabled.trim().to_ascii_lowercase().as_str(),
                "yes" | "true" | "1"
            );
        }
        if let Some(interval) = lookup("CACHE_INTERVAL") {
            self.cache.update_interval =
                duration_serde::parse(&interval).map_err(AppError::configuration)?;
        }
        if let Some(port) = lookup("PORT") {
            self.web.port = port
                .trim()
                .parse()
                .map_err(|e| AppError::configuration(format!("PORT '{port}' is invalid: {e}")))?;
        }
        if let Some(domain) = lookup("DOMAIN").filter(|v| !v.trim().is_empty()) {
            self.web.domain = Some(domain.trim().to_string());
        }
        if let Some(subpath) = lookup("SUBPATH") {
            self.web.subpath = subpath.trim().to_string();
        }
        Ok(())
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.playlist.url.trim().is_empty() {
            return Err(AppError::configuration("playlist.url must not be empty"));
        }
        if self.cache.retry_attempts == 0 {
            return Err(AppError::configuration(
                "cache.retry_attempts must be at least 1",
            ));
        }
        if self.cache.update_interval.is_zero() || self.cache.max_age.is_zero() {
            return Err(AppError::configuration(
                "cache.update_interval and cache.max_age must be non-zero",
            ));
        }
        if self.http.request_timeout.is_zero() {
            return Err(AppError::configuration(
                "http.request_timeout must be non-zero",
            ));
        }
        if self.epg.enabled {
            if self.epg.max_programs_per_channel == 0 {
                return Err(AppError::configuration(
                    "epg.max_programs_per_channel must be at least 1",
                ));
            }
            if self.epg.cache_expiry.is_zero() {
                return Err(AppError::configuration("epg.cache_expiry must be non-zero"));
            }
            self.epg.timezone()?;
        }
        Ok(())
    }
}

/// Split a comma separated URL list, trimming entries and dropping blanks.
pub fn split_url_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Public base URL of the service.
pub fn base_url(web: &WebConfig) -> String {
    match web.domain.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
        Some(domain) => {
            let domain = domain.trim_end_matches('/');
            let subpath = web.subpath.trim_matches('/');
            if subpath.is_empty() {
                domain.to_string()
            } else {
                format!("{domain}/{subpath}")
            }
        }
        None => format!("http://localhost:{}", web.port),
    }
}

pub fn manifest_url(web: &WebConfig) -> String {
    format!("{}/manifest.json", base_url(web))
}

/// Scheme-less address clients use to reach the service, when a domain is set.
pub fn transport_url(web: &WebConfig) -> Option<String> {
    let domain = web.domain.as_deref().map(str::trim).filter(|d| !d.is_empty())?;
    let lower = domain.to_ascii_lowercase();
    let host = if lower.starts_with("https://") {
        &domain[8..]
    } else if lower.starts_with("http://") {
        &domain[7..]
    } else {
        domain
    };
    let host = host.trim_end_matches('/');
    let subpath = web.subpath.trim_matches('/');
    if subpath.is_empty() {
        Some(host.to_string())
    } else {
        Some(format!("{host}/{subpath}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_match_service_settings() {
        let config = Config::default();
        assert_eq!(config.cache.update_interval, Duration::from_secs(12 * 3600));
        assert_eq!(config.cache.max_age, Duration::from_secs(24 * 3600));
        assert_eq!(config.cache.retry_attempts, 3);
        assert_eq!(config.cache.retry_delay, Duration::from_secs(5));
        assert_eq!(config.epg.max_programs_per_channel, 50);
        assert_eq!(config.epg.cache_expiry, Duration::from_secs(24 * 3600));
        assert_eq!(config.web.port, 10000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let config: Config = toml::from_str(
            r#"
            [playlist]
            url = "http://example.com/list.m3u"

            [cache]
            retry_delay = "250ms"
            "#,
        )
        .unwrap();

        assert_eq!(config.playlist.url, "http://example.com/list.m3u");
        assert_eq!(config.cache.retry_delay, Duration::from_millis(250));
        assert_eq!(config.cache.retry_attempts, DEFAULT_RETRY_ATTEMPTS);
        assert_eq!(config.epg, EpgConfig::default());
    }

    #[test]
    fn test_load_from_file_writes_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let first = Config::load_from_file(&path).unwrap();
        assert!(path.exists());

        let second = Config::load_from_file(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env_overrides(env(&[
                ("M3U_URL", "http://a/list.m3u"),
                ("EPG_URL", "http://a/guide.xml, http://b/guide.xml.gz"),
                ("ENABLE_EPG", "no"),
                ("CACHE_INTERVAL", "30m"),
                ("PORT", "7000"),
                ("DOMAIN", "https://tv.example.com/"),
                ("SUBPATH", "/addon/"),
            ]))
            .unwrap();

        assert_eq!(config.playlist.url, "http://a/list.m3u");
        assert_eq!(
            config.epg.source_urls(),
            vec!["http://a/guide.xml", "http://b/guide.xml.gz"]
        );
        assert!(!config.epg.enabled);
        assert_eq!(config.cache.update_interval, Duration::from_secs(1800));
        assert_eq!(config.web.port, 7000);
        assert_eq!(base_url(&config.web), "https://tv.example.com/addon");
    }

    #[test]
    fn test_invalid_port_override_rejected() {
        let mut config = Config::default();
        let result = config.apply_env_overrides(env(&[("PORT", "not-a-port")]));
        assert!(matches!(result, Err(AppError::Configuration { .. })));
    }

    #[test]
    fn test_base_and_manifest_url() {
        let mut web = WebConfig::default();
        assert_eq!(base_url(&web), "http://localhost:10000");
        assert_eq!(manifest_url(&web), "http://localhost:10000/manifest.json");
        assert_eq!(transport_url(&web), None);

        web.domain = Some("https://tv.example.com/".to_string());
        assert_eq!(base_url(&web), "https://tv.example.com");
        assert_eq!(transport_url(&web).as_deref(), Some("tv.example.com"));

        web.subpath = "omg/".to_string();
        assert_eq!(manifest_url(&web), "https://tv.example.com/omg/manifest.json");
        assert_eq!(transport_url(&web).as_deref(), Some("tv.example.com/omg"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.cache.retry_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.epg.default_timezone = "Mars/Olympus".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.epg.enabled = false;
        config.epg.default_timezone = "Mars/Olympus".to_string();
        assert!(config.validate().is_ok());
    }
}
