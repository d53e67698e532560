//! Playlist and guide ingestion
//!
//! Parsers turn raw payloads into [`CatalogSnapshot`](crate::models::CatalogSnapshot)
//! and [`EpgIndex`](crate::models::EpgIndex) values; the schedulers fetch,
//! retry and commit them into the [`CacheStore`](crate::cache::CacheStore).

pub mod epg_scheduler;
pub mod ingest_epg;
pub mod m3u_parser;
pub mod scheduler;
pub mod state_manager;

pub use epg_scheduler::{merge_source_urls, EpgScheduler};
pub use ingest_epg::EpgIngestor;
pub use m3u_parser::PlaylistTransformer;
pub use scheduler::CacheScheduler;
pub use state_manager::RefreshStateManager;
