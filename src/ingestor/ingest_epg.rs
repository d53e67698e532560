use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::config::EpgConfig;
use crate::errors::{AppResult, SourceError, SourceResult};
use crate::models::{EpgChannel, EpgIndex, EpgSourceStatus, Program};
use crate::utils::guide_id::{normalize_channel_name, normalize_guide_id};
use crate::utils::time::parse_xmltv_datetime;
use crate::utils::xmltv_parser::{parse_xmltv, XmltvDocument, XmltvProgramme};
use crate::utils::UrlUtils;

/// Builds an [`EpgIndex`] from one or more XMLTV payloads.
#[derive(Debug, Clone)]
pub struct EpgIngestor {
    max_programs_per_channel: usize,
    cache_expiry: Duration,
    default_tz: Tz,
}

impl EpgIngestor {
    pub fn new(max_programs_per_channel: usize, cache_expiry: Duration, default_tz: Tz) -> Self {
        Self {
            max_programs_per_channel: max_programs_per_channel.max(1),
            cache_expiry,
            default_tz,
        }
    }

    pub fn from_config(config: &EpgConfig) -> AppResult<Self> {
        Ok(Self::new(
            config.max_programs_per_channel,
            config.cache_expiry,
            config.timezone()?,
        ))
    }

    /// Ingest `(source_id, text)` payloads in order.
    pub fn ingest(&self, payloads: &[(String, String)]) -> SourceResult<EpgIndex> {
        self.ingest_at(payloads, Utc::now())
    }

    /// Ingest with an explicit clock, used for retention and expiry.
    ///
    /// Sources that are not parseable are recorded as failed and skipped. The
    /// call fails only when no source could be parsed.
    pub fn ingest_at(
        &self,
        payloads: &[(String, String)],
        now: DateTime<Utc>,
    ) -> SourceResult<EpgIndex> {
        let mut builder = IndexBuilder::default();
        let mut failures = Vec::new();

        for (source_id, text) in payloads {
            let display_id = UrlUtils::obfuscate_credentials(source_id);
            match parse_xmltv(text) {
                Ok(document) => {
                    let status = builder.add_document(source_id, document, &self.default_tz);
                    debug!(
                        "EPG source {}: {} channels, {} programmes accepted, {} skipped",
                        display_id,
                        status.channels,
                        status.programmes_accepted,
                        status.programmes_skipped
                    );
                    builder.sources.push(status);
                }
                Err(e) => {
                    warn!("EPG source {} could not be parsed: {}", display_id, e);
                    failures.push(format!("{display_id}: {e}"));
                    builder.sources.push(EpgSourceStatus {
                        source_id: source_id.clone(),
                        ok: false,
                        error: Some(e.to_string()),
                        ..Default::default()
                    });
                }
            }
        }

        if !builder.sources.iter().any(|s| s.ok) {
            return Err(SourceError::parse_error(
                "xmltv",
                if payloads.is_empty() {
                    "no guide payloads to ingest".to_string()
                } else {
                    format!(
                        "none of {} guide payload(s) could be parsed: {}",
                        payloads.len(),
                        failures.join("; ")
                    )
                },
            ));
        }

        let index = builder.finish(self.max_programs_per_channel, self.cache_expiry, now);
        let stats = index.stats();
        info!(
            "EPG ingestion completed: {} channels, {} programmes from {}/{} source(s)",
            stats.channels,
            stats.programs,
            stats.sources_ok,
            stats.sources_ok + stats.sources_failed
        );
        Ok(index)
    }
}

#[derive(Default)]
struct IndexBuilder {
    programs: HashMap<String, Vec<Program>>,
    seen_slots: HashMap<String, HashSet<(DateTime<Utc>, String)>>,
    channels: HashMap<String, EpgChannel>,
    id_aliases: HashMap<String, String>,
    name_aliases: HashMap<String, String>,
    sources: Vec<EpgSourceStatus>,
}

impl IndexBuilder {
    /// First identifier seen for a normalized key becomes the canonical one.
    fn canonical_id(&mut self, guide_id: &str) -> String {
        let normalized = normalize_guide_id(guide_id);
        if normalized.is_empty() {
            return guide_id.to_string();
        }
        self.id_aliases
            .entry(normalized)
            .or_insert_with(|| guide_id.to_string())
            .clone()
    }

    fn add_document(&mut self, source_id: &str, document: XmltvDocument, tz: &Tz) -> EpgSourceStatus {
        let mut status = EpgSourceStatus {
            source_id: source_id.to_string(),
            ok: true,
            ..Default::default()
        };

        for channel in document.channels {
            let id = channel.id.trim();
            if id.is_empty() {
                trace!("Ignoring <channel> without id in {}", source_id);
                continue;
            }
            let canonical = self.canonical_id(id);
            for name in &channel.display_names {
                let key = normalize_channel_name(name);
                if !key.is_empty() {
                    self.name_aliases
                        .entry(key)
                        .or_insert_with(|| canonical.clone());
                }
            }

            let entry = self
                .channels
                .entry(canonical.clone())
                .or_insert_with(|| EpgChannel {
                    guide_id: canonical.clone(),
                    ..Default::default()
                });
            for name in channel.display_names {
                if !entry.display_names.contains(&name) {
                    entry.display_names.push(name);
                }
            }
            if entry.icon.is_none() {
                entry.icon = channel.icon;
            }
            status.channels += 1;
        }

        for programme in document.programmes {
            match self.validate_programme(programme, tz) {
                Some(program) => {
                    let slot = (program.start, program.title.clone());
                    let seen = self
                        .seen_slots
                        .entry(program.channel_guide_id.clone())
                        .or_default();
                    if seen.insert(slot) {
                        self.programs
                            .entry(program.channel_guide_id.clone())
                            .or_default()
                            .push(program);
                    } else {
                        trace!(
                            "Duplicate programme '{}' at {} for {}",
                            program.title,
                            program.start,
                            program.channel_guide_id
                        );
                    }
                    status.programmes_accepted += 1;
                }
                None => status.programmes_skipped += 1,
            }
        }

        status
    }

    fn validate_programme(&mut self, programme: XmltvProgramme, tz: &Tz) -> Option<Program> {
        let channel = programme.channel.as_deref().map(str::trim).filter(|c| !c.is_empty());
        let Some(channel) = channel else {
            trace!("Skipping programme without channel");
            return None;
        };

        let start = programme
            .start
            .as_deref()
            .and_then(|s| parse_xmltv_datetime(s, tz));
        let stop = programme
            .stop
            .as_deref()
            .and_then(|s| parse_xmltv_datetime(s, tz));
        let (Some(start), Some(stop)) = (start, stop) else {
            trace!(
                "Skipping programme for {} with missing or invalid start/stop ({:?} / {:?})",
                channel,
                programme.start,
                programme.stop
            );
            return None;
        };
        if stop <= start {
            trace!(
                "Skipping programme for {} ending before it starts ({} / {})",
                channel,
                start,
                stop
            );
            return None;
        }

        Some(Program {
            channel_guide_id: self.canonical_id(channel),
            title: programme.title.unwrap_or_default(),
            description: programme.description,
            category: programme.category,
            icon: programme.icon,
            start,
            stop,
        })
    }

    fn finish(self, max_per_channel: usize, cache_expiry: Duration, now: DateTime<Utc>) -> EpgIndex {
        let mut programs = self.programs;
        for list in programs.values_mut() {
            list.sort_by_key(|p| p.start);
            apply_retention(list, max_per_channel, now);
        }

        let expiry = chrono::Duration::from_std(cache_expiry)
            .unwrap_or_else(|_| chrono::Duration::days(365));

        EpgIndex {
            programs,
            channels: self.channels,
            id_aliases: self.id_aliases,
            name_aliases: self.name_aliases,
            sources: self.sources,
            fetched_at: Some(now),
            expires_at: Some(now + expiry),
        }
    }
}

/// Bound a start-ordered list to `max` entries.
///
/// Entries that already ended are dropped first, oldest first. If the list is
/// still too long the earliest remaining entries (current and nearest
/// upcoming slots) are kept.
fn apply_retention(list: &mut Vec<Program>, max: usize, now: DateTime<Utc>) {
    if list.len() <= max {
        return;
    }

    let mut excess = list.len() - max;
    list.retain(|program| {
        if excess > 0 && program.has_ended_at(now) {
            excess -= 1;
            false
        } else {
            true
        }
    });

    list.truncate(max);
}
