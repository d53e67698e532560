use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, trace, warn};

use crate::config::defaults::{CHANNEL_ID_PREFIX, DEFAULT_GENRE, MAX_SKIPPED_DETAILS};
use crate::config::split_url_list;
use crate::errors::{SourceError, SourceResult};
use crate::models::{CatalogSnapshot, Channel, ParseDiagnostics, SkipReason, SkippedEntry};
use crate::utils::UrlUtils;

const SOURCE_TYPE: &str = "m3u";

/// Attributes of interest from one `#EXTINF` line
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct ExtinfEntry {
    line: usize,
    display_name: Option<String>,
    tvg_name: Option<String>,
    guide_id: Option<String>,
    logo: Option<String>,
    genre: Option<String>,
    /// `#EXTGRP` seen between the metadata line and its URL
    group_fallback: Option<String>,
}

/// Turns playlist text into a [`CatalogSnapshot`].
///
/// Malformed entries are skipped and counted; the transform only fails when
/// nothing usable is left.
#[derive(Debug, Default, Clone)]
pub struct PlaylistTransformer;

impl PlaylistTransformer {
    pub fn new() -> Self {
        Self
    }

    pub fn transform(&self, raw: &str, source_url: &str) -> SourceResult<CatalogSnapshot> {
        self.transform_at(raw, source_url, Utc::now())
    }

    /// Same as [`transform`](Self::transform) with an explicit fetch instant.
    pub fn transform_at(
        &self,
        raw: &str,
        source_url: &str,
        fetched_at: DateTime<Utc>,
    ) -> SourceResult<CatalogSnapshot> {
        let display_url = UrlUtils::obfuscate_credentials(source_url);

        if raw.trim().is_empty() {
            return Err(SourceError::parse_error(
                SOURCE_TYPE,
                format!("empty playlist payload from {display_url}"),
            ));
        }

        let mut builder = CatalogBuilder::default();
        let mut pending: Option<ExtinfEntry> = None;

        for (idx, raw_line) in raw.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw_line.trim();
            builder.diagnostics.total_lines = line_no;

            if line.is_empty() {
                continue;
            }

            if let Some(rest) = strip_prefix_ignore_case(line, "#EXTM3U") {
                builder.diagnostics.header_present = true;
                builder.add_header_urls(rest);
                continue;
            }

            if let Some(rest) = strip_prefix_ignore_case(line, "#EXTINF:") {
                if let Some(previous) = pending.take() {
                    builder.skip(previous.line, SkipReason::DanglingMetadata);
                }
                pending = Some(parse_extinf(rest, line_no));
                continue;
            }

            if let Some(rest) = strip_prefix_ignore_case(line, "#EXTGRP:") {
                if let Some(entry) = pending.as_mut() {
                    let group = rest.trim();
                    if !group.is_empty() {
                        entry.group_fallback = Some(group.to_string());
                    }
                }
                continue;
            }

            if line.starts_with('#') {
                trace!("Ignoring directive on line {}: {}", line_no, line);
                continue;
            }

            match pending.take() {
                Some(entry) => builder.accept(entry, line),
                None => builder.skip(line_no, SkipReason::OrphanUrl),
            }
        }

        if let Some(entry) = pending.take() {
            builder.skip(entry.line, SkipReason::DanglingMetadata);
        }

        if !builder.diagnostics.header_present {
            warn!("Playlist from {} has no #EXTM3U header", display_url);
        }

        let diagnostics = builder.diagnostics;
        if builder.channels.is_empty() {
            return Err(SourceError::parse_error(
                SOURCE_TYPE,
                format!(
                    "no parseable entries in {} lines from {} ({} skipped)",
                    diagnostics.total_lines, display_url, diagnostics.skipped_entries
                ),
            ));
        }

        info!(
            "M3U parsing completed for {}: {} channels, {} skipped entries, {} guide URL(s) in header",
            display_url,
            builder.channels.len(),
            diagnostics.skipped_entries,
            builder.epg_urls.len()
        );

        Ok(CatalogSnapshot {
            channels: builder.channels,
            epg_urls: builder.epg_urls,
            fetched_at: Some(fetched_at),
            source_url: source_url.to_string(),
            diagnostics,
        })
    }
}

#[derive(Default)]
struct CatalogBuilder {
    channels: Vec<Channel>,
    epg_urls: Vec<String>,
    id_suffixes: HashMap<String, usize>,
    emitted_ids: HashSet<String>,
    diagnostics: ParseDiagnostics,
}

impl CatalogBuilder {
    fn add_header_urls(&mut self, header_rest: &str) {
        for (key, value) in parse_attributes(header_rest) {
            if matches!(key.as_str(), "url-tvg" | "x-tvg-url" | "tvg-url") {
                for url in split_url_list(&value) {
                    if !self.epg_urls.contains(&url) {
                        self.epg_urls.push(url);
                    }
                }
            }
        }
    }

    fn skip(&mut self, line: usize, reason: SkipReason) {
        debug!("Skipping playlist entry at line {}: {}", line, reason);
        self.diagnostics.skipped_entries += 1;
        if self.diagnostics.skipped_details.len() < MAX_SKIPPED_DETAILS {
            self.diagnostics
                .skipped_details
                .push(SkippedEntry { line, reason });
        }
    }

    fn accept(&mut self, entry: ExtinfEntry, stream_url: &str) {
        let Some(name) = entry.display_name.clone().or_else(|| entry.tvg_name.clone()) else {
            self.skip(entry.line, SkipReason::MissingName);
            return;
        };

        let genre = entry
            .genre
            .or(entry.group_fallback)
            .map(|g| g.trim().to_string())
            .filter(|g| !g.is_empty())
            .unwrap_or_else(|| DEFAULT_GENRE.to_string());

        let base_id = format!(
            "{}|{}",
            CHANNEL_ID_PREFIX,
            entry.guide_id.as_deref().unwrap_or(&name)
        );
        // A suffixed id may equal a later entry's base id, so check every candidate
        let suffix = self.id_suffixes.entry(base_id.clone()).or_insert(1);
        let mut id = base_id.clone();
        while self.emitted_ids.contains(&id) {
            *suffix += 1;
            id = format!("{}|{}", base_id, suffix);
        }
        if id != base_id {
            debug!("Duplicate channel id {} at line {}, using {}", base_id, entry.line, id);
        }
        self.emitted_ids.insert(id.clone());

        self.channels.push(Channel {
            id,
            name,
            logo_url: entry.logo,
            genre,
            stream_url: stream_url.to_string(),
            guide_id: entry.guide_id,
        });
        self.diagnostics.accepted += 1;
    }
}

fn strip_prefix_ignore_case<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let head = line.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&line[prefix.len()..])
    } else {
        None
    }
}

/// Parse the part after `#EXTINF:`: `<duration> key="value" ...,Display Name`
fn parse_extinf(rest: &str, line: usize) -> ExtinfEntry {
    let (attributes_part, name_part) = match find_unquoted_comma(rest) {
        Some(pos) => (&rest[..pos], Some(&rest[pos + 1..])),
        None => (rest, None),
    };

    let mut entry = ExtinfEntry {
        line,
        display_name: name_part
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string),
        ..Default::default()
    };

    for (key, value) in parse_attributes(attributes_part) {
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        let slot = match key.as_str() {
            "tvg-id" | "guide-id" => &mut entry.guide_id,
            "tvg-name" => &mut entry.tvg_name,
            "tvg-logo" | "logo" => &mut entry.logo,
            "group-title" | "group" | "genre" => &mut entry.genre,
            _ => continue,
        };
        if slot.is_none() {
            *slot = Some(value.to_string());
        }
    }

    entry
}

fn find_unquoted_comma(input: &str) -> Option<usize> {
    let mut in_quotes = false;
    let mut escape_next = false;
    for (pos, ch) in input.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_quotes => escape_next = true,
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => return Some(pos),
            _ => {}
        }
    }
    None
}

/// Tokenize `key="value"` / `key=value` pairs. Keys are lowercased; bare
/// tokens such as the duration are dropped.
fn parse_attributes(input: &str) -> Vec<(String, String)> {
    let mut attrs = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(&ch) = chars.peek() {
            if ch == '=' || ch.is_whitespace() {
                break;
            }
            key.push(ch);
            chars.next();
        }
        if chars.peek() != Some(&'=') {
            continue;
        }
        chars.next();

        let mut value = String::new();
        match chars.peek() {
            Some(&quote) if quote == '"' || quote == '\'' => {
                chars.next();
                let mut escape_next = false;
                for ch in chars.by_ref() {
                    if escape_next {
                        value.push(ch);
                        escape_next = false;
                    } else if ch == '\\' {
                        escape_next = true;
                    } else if ch == quote {
                        break;
                    } else {
                        value.push(ch);
                    }
                }
            }
            _ => {
                while let Some(&ch) = chars.peek() {
                    if ch.is_whitespace() {
                        break;
                    }
                    value.push(ch);
                    chars.next();
                }
            }
        }

        if !key.is_empty() {
            attrs.push((key.to_ascii_lowercase(), value));
        }
    }

    attrs
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "http://example.com/list.m3u";

    fn transform(raw: &str) -> SourceResult<CatalogSnapshot> {
        PlaylistTransformer::new().transform(raw, SOURCE)
    }

    #[test]
    fn test_parse_attributes_handles_quotes_and_duration() {
        let attrs = parse_attributes(
            r#"-1 tvg-id="Rai1.it" tvg-name="Rai 1, HD" TVG-LOGO='http://l/a.png' group-title=News"#,
        );
        assert_eq!(
            attrs,
            vec![
                ("tvg-id".to_string(), "Rai1.it".to_string()),
                ("tvg-name".to_string(), "Rai 1, HD".to_string()),
                ("tvg-logo".to_string(), "http://l/a.png".to_string()),
                ("group-title".to_string(), "News".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_attributes_escapes() {
        let attrs = parse_attributes(r#"tvg-name="Say \"Hi\"""#);
        assert_eq!(attrs, vec![("tvg-name".to_string(), r#"Say "Hi""#.to_string())]);
    }

    #[test]
    fn test_comma_inside_quotes_is_not_the_name_separator() {
        let entry = parse_extinf(r#"-1 tvg-name="A, B" group-title="X",Channel, With Comma"#, 2);
        assert_eq!(entry.display_name.as_deref(), Some("Channel, With Comma"));
        assert_eq!(entry.tvg_name.as_deref(), Some("A, B"));
        assert_eq!(entry.genre.as_deref(), Some("X"));
    }

    #[test]
    fn test_three_pairs_and_dangling_metadata() {
        let raw = "#EXTM3U\n\
            #EXTINF:-1 tvg-id=\"a\" group-title=\"News\",Alpha\n\
            http://s/a\n\
            #EXTINF:-1 tvg-id=\"b\",Beta\n\
            http://s/b\n\
            #EXTINF:-1 tvg-id=\"c\" group-title=\"Sport\",Gamma\n\
            http://s/c\n\
            #EXTINF:-1 tvg-id=\"d\",Delta\n";

        let snapshot = transform(raw).unwrap();
        assert_eq!(snapshot.channels.len(), 3);
        assert_eq!(snapshot.diagnostics.skipped_entries, 1);
        assert_eq!(
            snapshot.diagnostics.skipped_details,
            vec![SkippedEntry {
                line: 8,
                reason: SkipReason::DanglingMetadata
            }]
        );
        assert!(snapshot.diagnostics.header_present);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let raw = "#EXTM3U\n\
            http://s/orphan\n\
            #EXTINF:-1,First\n\
            #EXTINF:-1,Second\n\
            http://s/2\n\
            #EXTINF:-1 tvg-logo=\"x\",\n\
            http://s/nameless\n\
            #EXTINF:-1,Third\n\
            #EXTVLCOPT:http-user-agent=foo\n\
            http://s/3\n";

        let snapshot = transform(raw).unwrap();
        let names: Vec<_> = snapshot.channels.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Second", "Third"]);
        assert_eq!(snapshot.diagnostics.skipped_entries, 3);
        let reasons: Vec<_> = snapshot
            .diagnostics
            .skipped_details
            .iter()
            .map(|s| s.reason)
            .collect();
        assert_eq!(
            reasons,
            vec![
                SkipReason::OrphanUrl,
                SkipReason::DanglingMetadata,
                SkipReason::MissingName
            ]
        );
    }

    #[test]
    fn test_empty_payload_fails() {
        assert!(matches!(transform(""), Err(SourceError::ParseError { .. })));
        assert!(matches!(transform("  \n\t\n"), Err(SourceError::ParseError { .. })));
    }

    #[test]
    fn test_no_parseable_entries_fails() {
        let raw = "#EXTM3U\n#EXTINF:-1,Lonely\n";
        assert!(matches!(transform(raw), Err(SourceError::ParseError { .. })));
    }

    #[test]
    fn test_missing_header_is_tolerated() {
        let snapshot = transform("#EXTINF:-1,Solo\nhttp://s/solo\n").unwrap();
        assert_eq!(snapshot.channels.len(), 1);
        assert!(!snapshot.diagnostics.header_present);
    }

    #[test]
    fn test_genres_and_fallback() {
        let raw = "#EXTM3U\n\
            #EXTINF:-1 group-title=\" Sport \",A\nhttp://s/a\n\
            #EXTINF:-1,B\nhttp://s/b\n\
            #EXTINF:-1 group-title=\"News\",C\nhttp://s/c\n\
            #EXTINF:-1 group-title=\"Sport\",D\nhttp://s/d\n\
            #EXTINF:-1 group-title=\"   \",E\nhttp://s/e\n\
            #EXTINF:-1 group-title=\"news\",F\nhttp://s/f\n";

        let snapshot = transform(raw).unwrap();
        assert_eq!(snapshot.genres(), vec!["Sport", "Other", "News", "news"]);
        assert_eq!(snapshot.channels[4].genre, DEFAULT_GENRE);
    }

    #[test]
    fn test_extgrp_fallback_and_alternate_keys() {
        let raw = "#EXTM3U\n\
            #EXTINF:-1 logo=\"http://l/a.png\" guide-id=\"a.id\",A\n\
            #EXTGRP:Movies\n\
            http://s/a\n\
            #EXTINF:-1 genre=\"Kids\",B\n\
            #EXTGRP:Ignored\n\
            http://s/b\n";

        let snapshot = transform(raw).unwrap();
        let a = &snapshot.channels[0];
        assert_eq!(a.genre, "Movies");
        assert_eq!(a.logo_url.as_deref(), Some("http://l/a.png"));
        assert_eq!(a.guide_id.as_deref(), Some("a.id"));
        assert_eq!(a.id, "tv|a.id");
        assert_eq!(snapshot.channels[1].genre, "Kids");
    }

    #[test]
    fn test_header_guide_urls() {
        let raw = "#EXTM3U url-tvg=\"http://g/1.xml,http://g/2.xml.gz\" x-tvg-url=\"http://g/1.xml\"\n\
            #EXTINF:-1,A\nhttp://s/a\n\
            #EXTM3U x-tvg-url=\"http://g/3.xml\"\n\
            #EXTINF:-1,B\nhttp://s/b\n";

        let snapshot = transform(raw).unwrap();
        assert_eq!(
            snapshot.epg_urls,
            vec!["http://g/1.xml", "http://g/2.xml.gz", "http://g/3.xml"]
        );
    }

    #[test]
    fn test_ids_are_stable_and_unique() {
        let raw = "#EXTM3U\n\
            #EXTINF:-1 tvg-id=\"x\",One\nhttp://s/1\n\
            #EXTINF:-1 tvg-id=\"x\",One Backup\nhttp://s/2\n\
            #EXTINF:-1 tvg-name=\"Named\",\nhttp://s/3\n";

        let snapshot = transform(raw).unwrap();
        let ids: Vec<_> = snapshot.channels.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["tv|x", "tv|x|2", "tv|Named"]);
        assert_eq!(snapshot.channels[2].name, "Named");
        assert_eq!(snapshot.source_url, SOURCE);
        assert!(snapshot.fetched_at.is_some());
    }

    #[test]
    fn test_suffixed_ids_do_not_collide_with_later_entries() {
        let raw = "#EXTM3U\n\
            #EXTINF:-1 tvg-id=\"x\",One\nhttp://s/1\n\
            #EXTINF:-1 tvg-id=\"x\",One Backup\nhttp://s/2\n\
            #EXTINF:-1 tvg-id=\"x|2\",Two\nhttp://s/3\n\
            #EXTINF:-1 tvg-id=\"x\",One Third\nhttp://s/4\n";

        let snapshot = transform(raw).unwrap();
        let ids: Vec<_> = snapshot.channels.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["tv|x", "tv|x|2", "tv|x|2|2", "tv|x|3"]);
    }
}
