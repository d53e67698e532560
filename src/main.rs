use anyhow::Result;
use clap::Parser;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use m3u_epg_cache::{
    cache::CacheStore,
    config::{self, Config},
    ingestor::{CacheScheduler, EpgScheduler, RefreshStateManager},
    models::{EpgStats, RefreshProgress},
    sources::{HttpFetcher, SourceFetcher},
    utils::UrlUtils,
};

#[derive(Parser)]
#[command(name = "m3u-epg-cache")]
#[command(version)]
#[command(about = "Keeps an M3U channel catalog and its XMLTV guide cached and fresh")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    /// Playlist URL (overrides config file and M3U_URL)
    #[arg(long, value_name = "URL")]
    playlist_url: Option<String>,

    /// Comma separated guide URLs (overrides config file and EPG_URL)
    #[arg(long, value_name = "URLS")]
    epg_url: Option<String>,

    /// Refresh once, print a summary and exit
    #[arg(long)]
    once: bool,
}

/// Summary printed by `--once`
#[derive(Serialize)]
struct RefreshReport {
    channels: usize,
    genres: Vec<String>,
    epg_urls: Vec<String>,
    skipped_entries: usize,
    epg: Option<EpgStats>,
    missing_epg: Option<Vec<String>>,
    refresh: HashMap<String, RefreshProgress>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_filter = format!("m3u_epg_cache={}", cli.log_level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting M3U EPG cache v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load_from_file(&cli.config)?;
    info!("Configuration loaded from: {}", cli.config);

    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    if let Some(url) = cli.playlist_url {
        config.playlist.url = url;
    }
    if let Some(urls) = cli.epg_url {
        config.epg.urls = urls;
    }
    config.validate()?;

    info!(
        "Playlist source: {}",
        UrlUtils::obfuscate_credentials(&config.playlist.url)
    );

    let fetcher: Arc<dyn SourceFetcher> = Arc::new(HttpFetcher::new(&config.http)?);
    let store = CacheStore::new();
    let state_manager = RefreshStateManager::new();

    let cache_scheduler = Arc::new(CacheScheduler::new(
        &config,
        fetcher.clone(),
        store.clone(),
        state_manager.clone(),
    ));

    // A failed first refresh leaves the empty catalog in place until the next tick
    if let Err(e) = cache_scheduler.refresh(true).await {
        error!("Initial playlist refresh failed, serving an empty catalog: {}", e);
    }
    let snapshot = cache_scheduler.get_cached_data();

    let epg_scheduler = if config.epg.enabled {
        let epg_scheduler = Arc::new(EpgScheduler::new(
            &config,
            fetcher.clone(),
            store.clone(),
            state_manager.clone(),
        )?);
        match epg_scheduler.initialize(&snapshot.epg_urls.join(",")).await {
            Ok(index) => {
                let missing = store.check_missing_epg(&snapshot.channels);
                info!(
                    "EPG ready: {} channels with guide data, {} catalog channels without",
                    index.programs.len(),
                    missing.len()
                );
            }
            Err(e) => warn!("Initial EPG refresh failed: {}", e),
        }
        Some(epg_scheduler)
    } else {
        info!("EPG disabled");
        None
    };

    info!("Base URL: {}", config::base_url(&config.web));
    info!("Manifest URL: {}", config::manifest_url(&config.web));

    if cli.once {
        let report = RefreshReport {
            channels: snapshot.channels.len(),
            genres: snapshot.genres(),
            epg_urls: snapshot.epg_urls.clone(),
            skipped_entries: snapshot.diagnostics.skipped_entries,
            epg: epg_scheduler.as_ref().map(|_| store.epg_index().stats()),
            missing_epg: epg_scheduler.as_ref().map(|_| {
                store
                    .check_missing_epg(&snapshot.channels)
                    .into_iter()
                    .map(|c| c.name)
                    .collect()
            }),
            refresh: state_manager.get_all_progress().await,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let token = CancellationToken::new();
    let mut handles = vec![cache_scheduler.spawn_periodic(token.clone())];
    if let Some(epg_scheduler) = &epg_scheduler {
        handles.push(epg_scheduler.spawn_periodic(token.clone()));
    }

    shutdown_signal().await?;
    token.cancel();
    for handle in handles {
        if let Err(e) = handle.await {
            error!("Refresh task ended abnormally: {}", e);
        }
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully"),
            _ = sigint.recv() => info!("Received SIGINT (Ctrl+C), shutting down gracefully"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C, shutting down gracefully");
    }

    Ok(())
}
