//! Configuration default values
//!
//! This module contains all the default values for configuration options,
//! making them easily changeable in one central location.

use std::time::Duration;

// Playlist defaults
pub const DEFAULT_PLAYLIST_URL: &str =
    "https://raw.githubusercontent.com/mccoy88f/OMG-TV-Stremio-Addon/refs/heads/main/link.playlist";

// Guide defaults
pub const DEFAULT_EPG_URLS: &str =
    "https://raw.githubusercontent.com/mccoy88f/OMG-TV-Stremio-Addon/refs/heads/main/link.epg";
pub const DEFAULT_EPG_ENABLED: bool = true;
pub const DEFAULT_MAX_PROGRAMS_PER_CHANNEL: usize = 50;
pub const DEFAULT_EPG_CACHE_EXPIRY: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_TIMEZONE: &str = "UTC";

// Playlist cache defaults
pub const DEFAULT_CACHE_UPDATE_INTERVAL: Duration = Duration::from_secs(12 * 60 * 60);
pub const DEFAULT_CACHE_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

// HTTP client defaults
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_USER_AGENT: &str = concat!("m3u-epg-cache/", env!("CARGO_PKG_VERSION"));

// Web defaults
pub const DEFAULT_PORT: u16 = 10000;
pub const DEFAULT_SUBPATH: &str = "";

// Catalog defaults
pub const DEFAULT_GENRE: &str = "Other";
pub const CHANNEL_ID_PREFIX: &str = "tv";
pub const MAX_SKIPPED_DETAILS: usize = 100;
