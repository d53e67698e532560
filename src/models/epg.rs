use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::Channel;
use crate::utils::guide_id::{normalize_channel_name, normalize_guide_id};

/// A single guide entry. `start < stop` always holds for ingested programmes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub channel_guide_id: String,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub icon: Option<String>,
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
}

impl Program {
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.start <= now && now < self.stop
    }

    pub fn has_ended_at(&self, now: DateTime<Utc>) -> bool {
        self.stop <= now
    }
}

/// `<channel>` record of an XMLTV document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpgChannel {
    pub guide_id: String,
    pub display_names: Vec<String>,
    pub icon: Option<String>,
}

/// Outcome of ingesting one guide source
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpgSourceStatus {
    pub source_id: String,
    pub ok: bool,
    pub channels: usize,
    pub programmes_accepted: usize,
    pub programmes_skipped: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpgStats {
    pub channels: usize,
    pub programs: usize,
    pub sources_ok: usize,
    pub sources_failed: usize,
}

/// Per-channel programme index built from every configured guide source.
///
/// Programme lists are keyed by canonical guide id, ordered by start and
/// bounded in length. Lookups go through two alias tables so that loosely
/// matching identifiers and display names still resolve.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpgIndex {
    pub programs: HashMap<String, Vec<Program>>,
    pub channels: HashMap<String, EpgChannel>,
    /// normalized guide id -> canonical guide id
    pub id_aliases: HashMap<String, String>,
    /// normalized display name -> canonical guide id
    pub name_aliases: HashMap<String, String>,
    pub sources: Vec<EpgSourceStatus>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl EpgIndex {
    pub fn empty() -> Self {
        Self::default()
    }

    /// An index that was never filled is always considered expired.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expires| now >= expires)
    }

    /// Resolve a guide identifier to the canonical key used in `programs`.
    pub fn resolve(&self, guide_id: &str) -> Option<&str> {
        if let Some((key, _)) = self.programs.get_key_value(guide_id) {
            return Some(key.as_str());
        }
        if let Some((key, _)) = self.channels.get_key_value(guide_id) {
            return Some(key.as_str());
        }
        let normalized = normalize_guide_id(guide_id);
        if normalized.is_empty() {
            return None;
        }
        self.id_aliases.get(&normalized).map(String::as_str)
    }

    /// Resolve a playlist channel by guide id first, then by display name.
    pub fn resolve_channel(&self, channel: &Channel) -> Option<&str> {
        let by_id = channel
            .guide_id
            .as_deref()
            .and_then(|id| self.resolve(id))
            .filter(|key| self.has_programs(key));
        if by_id.is_some() {
            return by_id;
        }

        let name_key = normalize_channel_name(&channel.name);
        if name_key.is_empty() {
            return None;
        }
        self.name_aliases
            .get(&name_key)
            .or_else(|| self.id_aliases.get(&name_key))
            .map(String::as_str)
    }

    fn has_programs(&self, key: &str) -> bool {
        self.programs.get(key).is_some_and(|p| !p.is_empty())
    }

    /// Programmes for a guide id, ordered by start. Empty when unknown.
    pub fn lookup_programs(&self, guide_id: &str) -> &[Program] {
        self.resolve(guide_id)
            .and_then(|key| self.programs.get(key))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn lookup_for_channel(&self, channel: &Channel) -> &[Program] {
        self.resolve_channel(channel)
            .and_then(|key| self.programs.get(key))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Channels, in input order, for which no guide data can be resolved.
    pub fn check_missing_epg(&self, channels: &[Channel]) -> Vec<Channel> {
        channels
            .iter()
            .filter(|channel| self.lookup_for_channel(channel).is_empty())
            .cloned()
            .collect()
    }

    pub fn current_program(&self, guide_id: &str, now: DateTime<Utc>) -> Option<&Program> {
        self.lookup_programs(guide_id)
            .iter()
            .find(|program| program.is_live_at(now))
    }

    pub fn upcoming_programs(&self, guide_id: &str, now: DateTime<Utc>, limit: usize) -> Vec<&Program> {
        self.lookup_programs(guide_id)
            .iter()
            .filter(|program| program.start > now)
            .take(limit)
            .collect()
    }

    pub fn stats(&self) -> EpgStats {
        let sources_ok = self.sources.iter().filter(|s| s.ok).count();
        EpgStats {
            channels: self.programs.len(),
            programs: self.programs.values().map(Vec::len).sum(),
            sources_ok,
            sources_failed: self.sources.len() - sources_ok,
        }
    }
}
