use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{EpgIngestor, RefreshStateManager};
use crate::cache::CacheStore;
use crate::config::{split_url_list, Config};
use crate::errors::{AppResult, SourceError, SourceResult};
use crate::models::{EpgIndex, EpgSourceStatus};
use crate::sources::{fetch_expanded, SourceFetcher};
use crate::utils::{RetryPolicy, SingleFlight, UrlUtils};

pub const EPG_RESOURCE: &str = "epg";

type EpgOutcome = SourceResult<Arc<EpgIndex>>;

/// Configured guide URLs first, then auxiliary ones, without duplicates.
pub fn merge_source_urls(configured: &[String], auxiliary: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(configured.len() + auxiliary.len());
    for url in configured.iter().chain(auxiliary) {
        let url = url.trim();
        if !url.is_empty() && !merged.iter().any(|u| u == url) {
            merged.push(url.to_string());
        }
    }
    merged
}

/// Keeps the guide index in [`CacheStore`] fresh.
///
/// Sources are fetched concurrently, each with its own retry budget. A
/// refresh succeeds when at least one source yields a parseable document.
pub struct EpgScheduler {
    configured_urls: Vec<String>,
    sources: RwLock<Vec<String>>,
    cache_expiry: Duration,
    retry: RetryPolicy,
    ingestor: EpgIngestor,
    fetcher: Arc<dyn SourceFetcher>,
    store: CacheStore,
    state_manager: RefreshStateManager,
    flight: SingleFlight<EpgOutcome>,
}

impl EpgScheduler {
    pub fn new(
        config: &Config,
        fetcher: Arc<dyn SourceFetcher>,
        store: CacheStore,
        state_manager: RefreshStateManager,
    ) -> AppResult<Self> {
        let configured_urls = config.epg.source_urls();
        Ok(Self {
            sources: RwLock::new(configured_urls.clone()),
            configured_urls,
            cache_expiry: config.epg.cache_expiry,
            retry: RetryPolicy::from_config(&config.cache, &config.http),
            ingestor: EpgIngestor::from_config(&config.epg)?,
            fetcher,
            store,
            state_manager,
            flight: SingleFlight::new(),
        })
    }

    pub async fn sources(&self) -> Vec<String> {
        self.sources.read().await.clone()
    }

    /// Rebuild the source set from the configured URLs plus `auxiliary`.
    /// Returns `true` when the set changed.
    pub async fn set_auxiliary_sources(&self, auxiliary: &[String]) -> bool {
        let merged = merge_source_urls(&self.configured_urls, auxiliary);
        let mut sources = self.sources.write().await;
        if *sources == merged {
            return false;
        }
        *sources = merged;
        true
    }

    /// Set the auxiliary URLs from a comma separated list and fetch every
    /// source right away.
    pub async fn initialize(self: &Arc<Self>, url_list: &str) -> EpgOutcome {
        self.set_auxiliary_sources(&split_url_list(url_list)).await;
        let sources = self.sources().await;
        info!("Initializing EPG from {} source(s)", sources.len());
        self.refresh(true).await
    }

    pub async fn refresh(self: &Arc<Self>, force: bool) -> EpgOutcome {
        if !force && !self.flight.in_flight() {
            let current = self.store.epg_index();
            if !current.is_expired_at(Utc::now()) {
                debug!("EPG index has not expired, skipping refresh");
                return Ok(current);
            }
        }

        let this = Arc::clone(self);
        let (outcome, leader) = self.flight.run(move || this.fetch_and_commit()).await;
        if !leader {
            debug!("Joined in-flight EPG refresh");
        }
        outcome
    }

    async fn fetch_and_commit(self: Arc<Self>) -> EpgOutcome {
        self.state_manager.start_attempt(EPG_RESOURCE, 1, 1).await;

        match self.fetch_and_ingest().await {
            Ok(index) => {
                let committed = self.store.commit_epg(index);
                self.state_manager.commit(EPG_RESOURCE).await;
                Ok(committed)
            }
            Err(e) => {
                self.state_manager
                    .set_error(EPG_RESOURCE, e.to_string())
                    .await;
                error!("EPG refresh failed, keeping previous index: {}", e);
                Err(e)
            }
        }
    }

    async fn fetch_and_ingest(&self) -> SourceResult<EpgIndex> {
        let sources = self.sources().await;
        if sources.is_empty() {
            return Err(SourceError::invalid_config(
                "epg.urls",
                "no EPG sources configured",
            ));
        }

        let fetches = sources.iter().map(|url| async move {
            let result =
                fetch_expanded(self.fetcher.as_ref(), &self.retry, EPG_RESOURCE, url).await;
            (url, result)
        });

        let mut payloads = Vec::new();
        let mut fetch_failures = Vec::new();
        for (url, result) in join_all(fetches).await {
            let display_url = UrlUtils::obfuscate_credentials(url);
            match result {
                Ok(fetched) => payloads.extend(fetched),
                Err(e) => {
                    warn!("EPG source {} failed: {}", display_url, e);
                    fetch_failures.push((url.clone(), e));
                }
            }
        }

        if payloads.is_empty() {
            return Err(SourceError::AllSourcesFailed {
                resource: EPG_RESOURCE.to_string(),
                failures: fetch_failures
                    .iter()
                    .map(|(url, e)| format!("{}: {e}", UrlUtils::obfuscate_credentials(url)))
                    .collect(),
            });
        }

        // XMLTV parsing is CPU bound and runs for seconds on large guides
        let ingestor = self.ingestor.clone();
        let mut index = tokio::task::spawn_blocking(move || ingestor.ingest(&payloads))
            .await
            .map_err(|e| SourceError::parse_error("xmltv", format!("ingest task failed: {e}")))??;
        index
            .sources
            .extend(fetch_failures.into_iter().map(|(url, e)| EpgSourceStatus {
                source_id: url,
                ok: false,
                error: Some(e.to_string()),
                ..Default::default()
            }));
        Ok(index)
    }

    /// Refresh every `cache_expiry`, and whenever a committed playlist
    /// announces a different set of guide URLs.
    pub fn spawn_periodic(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let mut catalog_rx = self.store.subscribe_catalog();
        tokio::spawn(async move {
            let mut ticker = interval(this.cache_expiry);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            info!(
                "EPG refresh scheduled every {}",
                humantime::format_duration(this.cache_expiry)
            );

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                    Ok(()) = catalog_rx.changed() => {
                        let auxiliary = catalog_rx.borrow_and_update().epg_urls.clone();
                        if !this.set_auxiliary_sources(&auxiliary).await {
                            continue;
                        }
                        info!("Playlist announced new guide URLs, refreshing EPG");
                    }
                }

                tokio::select! {
                    _ = token.cancelled() => break,
                    result = this.refresh(true) => {
                        if let Err(e) = result {
                            error!("Scheduled EPG refresh failed: {}", e);
                        }
                    }
                }
            }

            info!("EPG refresh loop stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn urls(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[rstest]
    #[case(&["http://a"], &[], &["http://a"])]
    #[case(&["http://a"], &["http://b", "http://a"], &["http://a", "http://b"])]
    #[case(&[], &[" http://b ", "", "http://b"], &["http://b"])]
    fn test_merge_source_urls(
        #[case] configured: &[&str],
        #[case] auxiliary: &[&str],
        #[case] expected: &[&str],
    ) {
        assert_eq!(
            merge_source_urls(&urls(configured), &urls(auxiliary)),
            urls(expected)
        );
    }
}
