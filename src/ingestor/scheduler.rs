use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{PlaylistTransformer, RefreshStateManager};
use crate::cache::CacheStore;
use crate::config::Config;
use crate::errors::SourceResult;
use crate::models::CatalogSnapshot;
use crate::sources::{fetch_listed, source_list_entries, SourceFetcher};
use crate::utils::{with_retry, RetryPolicy, SingleFlight, UrlUtils};

pub const PLAYLIST_RESOURCE: &str = "playlist";

type CatalogOutcome = SourceResult<Arc<CatalogSnapshot>>;

/// What one attempt at the playlist URL produced
enum PlaylistPayload {
    Catalog(CatalogSnapshot),
    Listed(Vec<String>),
}

/// Keeps the playlist catalog in [`CacheStore`] fresh.
///
/// A refresh runs fetch, transform and commit as one single-flight unit, so
/// concurrent callers share a single upstream request. A failed refresh never
/// touches the committed snapshot.
pub struct CacheScheduler {
    playlist_url: String,
    update_interval: Duration,
    max_age: Duration,
    retry: RetryPolicy,
    transformer: PlaylistTransformer,
    fetcher: Arc<dyn SourceFetcher>,
    store: CacheStore,
    state_manager: RefreshStateManager,
    flight: SingleFlight<CatalogOutcome>,
}

impl CacheScheduler {
    pub fn new(
        config: &Config,
        fetcher: Arc<dyn SourceFetcher>,
        store: CacheStore,
        state_manager: RefreshStateManager,
    ) -> Self {
        Self {
            playlist_url: config.playlist.url.clone(),
            update_interval: config.cache.update_interval,
            max_age: config.cache.max_age,
            retry: RetryPolicy::from_config(&config.cache, &config.http),
            transformer: PlaylistTransformer::new(),
            fetcher,
            store,
            state_manager,
            flight: SingleFlight::new(),
        }
    }

    pub fn get_cached_data(&self) -> Arc<CatalogSnapshot> {
        self.store.get_cached_data()
    }

    /// Refresh the catalog unless the committed one is still fresh.
    ///
    /// `force` skips the freshness check but still joins a refresh that is
    /// already running.
    pub async fn refresh(self: &Arc<Self>, force: bool) -> CatalogOutcome {
        if !force && !self.flight.in_flight() && self.is_fresh() {
            debug!("Playlist snapshot is fresh, skipping refresh");
            return Ok(self.store.get_cached_data());
        }

        let this = Arc::clone(self);
        let (outcome, leader) = self.flight.run(move || this.fetch_and_commit()).await;
        if !leader {
            debug!("Joined in-flight playlist refresh");
        }
        outcome
    }

    fn is_fresh(&self) -> bool {
        match self.store.catalog_age(Utc::now()) {
            // A fetch time in the future counts as fresh
            Some(age) => age.to_std().map_or(true, |age| age < self.max_age),
            None => false,
        }
    }

    async fn fetch_and_commit(self: Arc<Self>) -> CatalogOutcome {
        let display_url = UrlUtils::obfuscate_credentials(&self.playlist_url);
        info!("Refreshing playlist from {}", display_url);

        let result = self.fetch_catalog().await;

        match result {
            Ok(snapshot) => {
                let committed = self.store.commit_catalog(snapshot);
                self.state_manager.commit(PLAYLIST_RESOURCE).await;
                info!(
                    "Playlist refreshed: {} channels in {} genres ({} entries skipped)",
                    committed.channels.len(),
                    committed.genres().len(),
                    committed.diagnostics.skipped_entries
                );
                Ok(committed)
            }
            Err(e) => {
                self.state_manager
                    .set_error(PLAYLIST_RESOURCE, e.to_string())
                    .await;
                error!(
                    "Playlist refresh from {} failed, keeping previous snapshot: {}",
                    display_url, e
                );
                Err(e)
            }
        }
    }

    /// Attempts cover the playlist URL itself. Entries of a link file are
    /// fetched afterwards, each under its own retry budget.
    async fn fetch_catalog(self: &Arc<Self>) -> SourceResult<CatalogSnapshot> {
        let max_attempts = self.retry.attempts();
        let payload = with_retry(
            &self.retry,
            PLAYLIST_RESOURCE,
            &self.playlist_url,
            |attempt| {
                let this = Arc::clone(self);
                async move {
                    this.state_manager
                        .start_attempt(PLAYLIST_RESOURCE, attempt, max_attempts)
                        .await;
                    this.fetch_once().await
                }
            },
        )
        .await?;

        let entries = match payload {
            PlaylistPayload::Catalog(snapshot) => return Ok(snapshot),
            PlaylistPayload::Listed(entries) => entries,
        };

        let payloads = fetch_listed(
            self.fetcher.as_ref(),
            &self.retry,
            PLAYLIST_RESOURCE,
            &self.playlist_url,
            entries,
        )
        .await?;
        let body = payloads
            .into_iter()
            .map(|(_, body)| body)
            .collect::<Vec<_>>()
            .join("\n");
        self.transformer.transform(&body, &self.playlist_url)
    }

    async fn fetch_once(&self) -> SourceResult<PlaylistPayload> {
        let body = self.fetcher.fetch_text(&self.playlist_url).await?;
        match source_list_entries(&body) {
            Some(entries) => Ok(PlaylistPayload::Listed(entries)),
            None => self
                .transformer
                .transform(&body, &self.playlist_url)
                .map(PlaylistPayload::Catalog),
        }
    }

    /// Call `refresh(false)` every `update_interval` until `token` is cancelled.
    /// The first tick is skipped since startup performs its own refresh.
    pub fn spawn_periodic(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(this.update_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            info!(
                "Playlist refresh scheduled every {}",
                humantime::format_duration(this.update_interval)
            );

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        tokio::select! {
                            _ = token.cancelled() => break,
                            result = this.refresh(false) => {
                                if let Err(e) = result {
                                    error!("Scheduled playlist refresh failed: {}", e);
                                }
                            }
                        }
                    }
                }
            }

            info!("Playlist refresh loop stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SourceError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    const PLAYLIST: &str = "#EXTM3U\n#EXTINF:-1 group-title=\"News\",One\nhttp://s/1\n";

    struct CountingFetcher {
        calls: AtomicU32,
    }

    #[async_trait]
    impl SourceFetcher for CountingFetcher {
        async fn fetch_text(&self, _location: &str) -> SourceResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(PLAYLIST.to_string())
        }
    }

    struct FailingFetcher;

    #[async_trait]
    impl SourceFetcher for FailingFetcher {
        async fn fetch_text(&self, location: &str) -> SourceResult<String> {
            Err(SourceError::http(location, 503))
        }
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.playlist.url = "http://example.com/list.m3u".to_string();
        config.cache.retry_attempts = 2;
        config.cache.retry_delay = Duration::from_millis(1);
        config
    }

    #[tokio::test]
    async fn test_refresh_commits_and_respects_max_age() {
        let fetcher = Arc::new(CountingFetcher {
            calls: AtomicU32::new(0),
        });
        let scheduler = Arc::new(CacheScheduler::new(
            &test_config(),
            fetcher.clone(),
            CacheStore::new(),
            RefreshStateManager::new(),
        ));

        let snapshot = scheduler.refresh(false).await.unwrap();
        assert_eq!(snapshot.channels.len(), 1);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        scheduler.refresh(false).await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        scheduler.refresh(true).await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failure_is_recorded_and_snapshot_kept() {
        let store = CacheStore::new();
        let state_manager = RefreshStateManager::new();
        let scheduler = Arc::new(CacheScheduler::new(
            &test_config(),
            Arc::new(FailingFetcher),
            store.clone(),
            state_manager.clone(),
        ));

        let err = scheduler.refresh(true).await.unwrap_err();
        assert!(matches!(err, SourceError::ExhaustedRetry { attempts: 2, .. }));
        assert!(store.get_cached_data().is_empty());

        let progress = state_manager.get_progress(PLAYLIST_RESOURCE).await.unwrap();
        assert_eq!(progress.consecutive_failures, 1);
        assert!(progress.error.is_some());
    }

    #[tokio::test]
    async fn test_periodic_loop_stops_on_cancel() {
        let scheduler = Arc::new(CacheScheduler::new(
            &test_config(),
            Arc::new(CountingFetcher {
                calls: AtomicU32::new(0),
            }),
            CacheStore::new(),
            RefreshStateManager::new(),
        ));
        let token = CancellationToken::new();
        let handle = scheduler.spawn_periodic(token.clone());
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
