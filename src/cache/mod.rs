//! In-memory catalog and guide store
//!
//! Holds the most recently committed [`CatalogSnapshot`] and [`EpgIndex`].
//! Each lives in a `watch` channel as an `Arc`: readers clone the pointer and
//! never wait on a refresh, writers swap the whole value in one step.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use crate::models::{CatalogSnapshot, Channel, EpgIndex, Program};

#[derive(Clone)]
pub struct CacheStore {
    catalog_tx: Arc<watch::Sender<Arc<CatalogSnapshot>>>,
    epg_tx: Arc<watch::Sender<Arc<EpgIndex>>>,
}

impl CacheStore {
    pub fn new() -> Self {
        let (catalog_tx, _) = watch::channel(Arc::new(CatalogSnapshot::empty()));
        let (epg_tx, _) = watch::channel(Arc::new(EpgIndex::empty()));
        Self {
            catalog_tx: Arc::new(catalog_tx),
            epg_tx: Arc::new(epg_tx),
        }
    }

    /// Current catalog, or the empty snapshot before the first commit.
    pub fn get_cached_data(&self) -> Arc<CatalogSnapshot> {
        self.catalog_tx.borrow().clone()
    }

    /// Replace the catalog and notify subscribers.
    pub fn commit_catalog(&self, snapshot: CatalogSnapshot) -> Arc<CatalogSnapshot> {
        let snapshot = Arc::new(snapshot);
        self.catalog_tx.send_replace(snapshot.clone());
        debug!(
            "Committed catalog snapshot with {} channels",
            snapshot.channels.len()
        );
        snapshot
    }

    pub fn catalog_age(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.catalog_tx.borrow().age_at(now)
    }

    pub fn subscribe_catalog(&self) -> watch::Receiver<Arc<CatalogSnapshot>> {
        self.catalog_tx.subscribe()
    }

    /// Current guide index, or an empty one before the first commit.
    pub fn epg_index(&self) -> Arc<EpgIndex> {
        self.epg_tx.borrow().clone()
    }

    pub fn commit_epg(&self, index: EpgIndex) -> Arc<EpgIndex> {
        let index = Arc::new(index);
        self.epg_tx.send_replace(index.clone());
        debug!(
            "Committed EPG index with {} channels",
            index.programs.len()
        );
        index
    }

    /// Programmes for `guide_id` ordered by start; empty when unknown.
    pub fn lookup_programs(&self, guide_id: &str) -> Vec<Program> {
        self.epg_index().lookup_programs(guide_id).to_vec()
    }

    pub fn lookup_for_channel(&self, channel: &Channel) -> Vec<Program> {
        self.epg_index().lookup_for_channel(channel).to_vec()
    }

    /// Channels with no guide data in the current index.
    pub fn check_missing_epg(&self, channels: &[Channel]) -> Vec<Channel> {
        self.epg_index().check_missing_epg(channels)
    }

    pub fn current_program(&self, guide_id: &str, now: DateTime<Utc>) -> Option<Program> {
        self.epg_index().current_program(guide_id, now).cloned()
    }

    pub fn upcoming_programs(&self, guide_id: &str, now: DateTime<Utc>, limit: usize) -> Vec<Program> {
        self.epg_index()
            .upcoming_programs(guide_id, now, limit)
            .into_iter()
            .cloned()
            .collect()
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn snapshot(names: &[&str]) -> CatalogSnapshot {
        CatalogSnapshot {
            channels: names
                .iter()
                .map(|name| Channel {
                    id: format!("tv|{name}"),
                    name: name.to_string(),
                    logo_url: None,
                    genre: "Other".to_string(),
                    stream_url: format!("http://s/{name}"),
                    guide_id: Some(name.to_string()),
                })
                .collect(),
            fetched_at: Some(Utc::now()),
            source_url: "http://example.com/list.m3u".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_before_first_commit() {
        let store = CacheStore::new();
        assert!(store.get_cached_data().is_empty());
        assert!(store.catalog_age(Utc::now()).is_none());
        assert!(store.lookup_programs("anything").is_empty());
    }

    #[test]
    fn test_readers_keep_their_snapshot_across_commits() {
        let store = CacheStore::new();
        store.commit_catalog(snapshot(&["a"]));

        let held = store.get_cached_data();
        store.commit_catalog(snapshot(&["b", "c"]));

        assert_eq!(held.channels.len(), 1);
        assert_eq!(store.get_cached_data().channels.len(), 2);
    }

    #[tokio::test]
    async fn test_subscribers_see_commits() {
        let store = CacheStore::new();
        let mut rx = store.subscribe_catalog();

        store.commit_catalog(snapshot(&["a"]));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().channels[0].name, "a");
    }

    #[test]
    fn test_guide_queries_delegate_to_index() {
        let store = CacheStore::new();
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let mut index = EpgIndex::empty();
        index.programs.insert(
            "a".to_string(),
            vec![Program {
                channel_guide_id: "a".to_string(),
                title: "News".to_string(),
                description: None,
                category: None,
                icon: None,
                start,
                stop: start + chrono::Duration::hours(1),
            }],
        );
        store.commit_epg(index);

        let channels = snapshot(&["a", "b"]).channels;
        let missing = store.check_missing_epg(&channels);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].name, "b");

        let during = start + chrono::Duration::minutes(30);
        assert_eq!(
            store.current_program("a", during).map(|p| p.title),
            Some("News".to_string())
        );
        assert_eq!(store.upcoming_programs("a", start - chrono::Duration::hours(1), 3).len(), 1);
        assert_eq!(store.lookup_for_channel(&channels[0]).len(), 1);
    }
}
