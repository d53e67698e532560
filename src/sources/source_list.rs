//! Link file expansion
//!
//! Some deployments point the playlist or guide setting at a small text file
//! that lists the real feed URLs, one per line. Such a payload is neither M3U
//! nor XML; each listed URL is fetched in its place.
//!
//! Every fetch here, the link file itself and each listed entry, runs under
//! its own [`with_retry`] budget, so one hung entry cannot time out the
//! entries that did arrive.

use futures::future::join_all;
use tracing::{debug, info, warn};

use super::SourceFetcher;
use crate::errors::{SourceError, SourceResult};
use crate::utils::{with_retry, RetryPolicy, UrlUtils};

/// Return the listed URLs if `payload` is a link file rather than a feed.
pub fn source_list_entries(payload: &str) -> Option<Vec<String>> {
    if payload.trim_start().starts_with('<') {
        return None;
    }

    let mut entries = Vec::new();
    for line in payload.lines().map(str::trim) {
        if line.is_empty() {
            continue;
        }
        if line.starts_with('#') {
            if has_directive(line, "#EXTM3U") || has_directive(line, "#EXTINF") {
                return None;
            }
            continue;
        }
        if !UrlUtils::looks_like_source(line) {
            return None;
        }
        if !entries.iter().any(|e| e == line) {
            entries.push(line.to_string());
        }
    }

    if entries.is_empty() {
        None
    } else {
        Some(entries)
    }
}

/// M3U directives are matched without regard to case, like the playlist parser does.
fn has_directive(line: &str, directive: &str) -> bool {
    line.get(..directive.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(directive))
}

/// Fetch `location` with retries, following one level of link file indirection.
///
/// Returns `(source_id, body)` pairs: the location itself for a direct feed,
/// or every listed URL that could be fetched.
pub async fn fetch_expanded(
    fetcher: &dyn SourceFetcher,
    policy: &RetryPolicy,
    resource: &str,
    location: &str,
) -> SourceResult<Vec<(String, String)>> {
    let body = with_retry(policy, resource, location, |_| fetcher.fetch_text(location)).await?;

    match source_list_entries(&body) {
        Some(entries) => fetch_listed(fetcher, policy, resource, location, entries).await,
        None => Ok(vec![(location.to_string(), body)]),
    }
}

/// Fetch the entries of the link file at `location` concurrently.
///
/// Each entry gets its own retry budget and per-attempt deadline. Failing
/// entries are logged and skipped; the call fails only when all of them do.
pub async fn fetch_listed(
    fetcher: &dyn SourceFetcher,
    policy: &RetryPolicy,
    resource: &str,
    location: &str,
    entries: Vec<String>,
) -> SourceResult<Vec<(String, String)>> {
    info!(
        "{} lists {} source(s), fetching each",
        UrlUtils::obfuscate_credentials(location),
        entries.len()
    );

    let results = join_all(entries.iter().map(|entry| {
        with_retry(policy, resource, entry, move |_| fetcher.fetch_text(entry))
    }))
    .await;

    let mut payloads = Vec::new();
    let mut failures = Vec::new();
    for (entry, result) in entries.into_iter().zip(results) {
        match result {
            Ok(text) => {
                debug!(
                    "Fetched listed source {} ({} bytes)",
                    UrlUtils::obfuscate_credentials(&entry),
                    text.len()
                );
                payloads.push((entry, text));
            }
            Err(e) => {
                warn!(
                    "Listed source {} failed: {}",
                    UrlUtils::obfuscate_credentials(&entry),
                    e
                );
                failures.push(e.to_string());
            }
        }
    }

    if payloads.is_empty() {
        return Err(SourceError::AllSourcesFailed {
            resource: UrlUtils::obfuscate_credentials(location),
            failures,
        });
    }
    Ok(payloads)
}
