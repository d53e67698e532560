use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

pub mod epg;

pub use epg::*;

/// A playable channel accepted from the playlist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// Stable catalog identifier, `tv|<guide id or name>`
    pub id: String,
    pub name: String,
    pub logo_url: Option<String>,
    pub genre: String,
    pub stream_url: String,
    /// Guide identifier used to correlate with EPG data (`tvg-id`)
    pub guide_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Metadata line followed by another metadata line or end of input
    DanglingMetadata,
    /// URL line with no metadata line before it
    OrphanUrl,
    /// Metadata line without a display name or `tvg-name`
    MissingName,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::DanglingMetadata => write!(f, "metadata line without a stream URL"),
            SkipReason::OrphanUrl => write!(f, "stream URL without a metadata line"),
            SkipReason::MissingName => write!(f, "metadata line without a display name"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedEntry {
    /// 1-based line number of the offending line
    pub line: usize,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseDiagnostics {
    pub total_lines: usize,
    pub accepted: usize,
    pub skipped_entries: usize,
    /// First skipped entries, bounded so a garbage feed cannot grow it unchecked
    pub skipped_details: Vec<SkippedEntry>,
    pub header_present: bool,
}

/// One committed view of the playlist. Replaced wholesale on refresh.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub channels: Vec<Channel>,
    /// Guide URLs announced by the playlist header
    pub epg_urls: Vec<String>,
    /// `None` only for the placeholder served before the first successful refresh
    pub fetched_at: Option<DateTime<Utc>>,
    pub source_url: String,
    pub diagnostics: ParseDiagnostics,
}

impl CatalogSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Distinct genre labels in first-seen order
    pub fn genres(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.channels
            .iter()
            .filter(|c| seen.insert(c.genre.as_str()))
            .map(|c| c.genre.clone())
            .collect()
    }

    pub fn age_at(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.fetched_at.map(|fetched| now - fetched)
    }

    pub fn find_channel(&self, id: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.id == id)
    }

    pub fn channels_in_genre<'a>(&'a self, genre: &'a str) -> impl Iterator<Item = &'a Channel> + 'a {
        self.channels.iter().filter(move |c| c.genre == genre)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum RefreshState {
    Idle,
    Fetching { attempt: u32, max_attempts: u32 },
    Committed,
    FailedRetry { error: String },
}

/// Refresh bookkeeping for a single cached resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshProgress {
    pub resource: String,
    pub state: RefreshState,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub error: Option<String>,
}

impl RefreshProgress {
    pub fn idle(resource: &str) -> Self {
        Self {
            resource: resource.to_string(),
            state: RefreshState::Idle,
            started_at: None,
            updated_at: Utc::now(),
            completed_at: None,
            last_success_at: None,
            consecutive_failures: 0,
            error: None,
        }
    }
}
