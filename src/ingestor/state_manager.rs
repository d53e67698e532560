use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use crate::models::{RefreshProgress, RefreshState};

pub type ProgressSender = broadcast::Sender<RefreshProgress>;
pub type ProgressReceiver = broadcast::Receiver<RefreshProgress>;

/// Tracks `Idle -> Fetching -> Committed | FailedRetry -> Idle` per resource
/// and broadcasts every transition.
#[derive(Clone)]
pub struct RefreshStateManager {
    states: Arc<RwLock<HashMap<String, RefreshProgress>>>,
    progress_tx: ProgressSender,
}

impl RefreshStateManager {
    pub fn new() -> Self {
        let (progress_tx, _) = broadcast::channel(256);
        Self {
            states: Arc::new(RwLock::new(HashMap::new())),
            progress_tx,
        }
    }

    pub fn subscribe(&self) -> ProgressReceiver {
        self.progress_tx.subscribe()
    }

    async fn update<F>(&self, resource: &str, apply: F)
    where
        F: FnOnce(&mut RefreshProgress),
    {
        let progress = {
            let mut states = self.states.write().await;
            let progress = states
                .entry(resource.to_string())
                .or_insert_with(|| RefreshProgress::idle(resource));
            apply(progress);
            progress.updated_at = Utc::now();
            progress.clone()
        };

        // No subscribers is fine
        let _ = self.progress_tx.send(progress);
    }

    pub async fn start_attempt(&self, resource: &str, attempt: u32, max_attempts: u32) {
        self.update(resource, |progress| {
            if attempt <= 1 {
                progress.started_at = Some(Utc::now());
                progress.completed_at = None;
            }
            progress.state = RefreshState::Fetching {
                attempt,
                max_attempts,
            };
        })
        .await;
    }

    pub async fn commit(&self, resource: &str) {
        self.update(resource, |progress| {
            let now = Utc::now();
            progress.state = RefreshState::Committed;
            progress.completed_at = Some(now);
            progress.last_success_at = Some(now);
            progress.consecutive_failures = 0;
            progress.error = None;
        })
        .await;
        self.settle(resource).await;
    }

    pub async fn set_error(&self, resource: &str, error: String) {
        self.update(resource, |progress| {
            progress.state = RefreshState::FailedRetry {
                error: error.clone(),
            };
            progress.completed_at = Some(Utc::now());
            progress.consecutive_failures += 1;
            progress.error = Some(error);
        })
        .await;
        self.settle(resource).await;
    }

    async fn settle(&self, resource: &str) {
        self.update(resource, |progress| progress.state = RefreshState::Idle)
            .await;
    }

    pub async fn get_progress(&self, resource: &str) -> Option<RefreshProgress> {
        let states = self.states.read().await;
        states.get(resource).cloned()
    }

    pub async fn get_all_progress(&self) -> HashMap<String, RefreshProgress> {
        let states = self.states.read().await;
        states.clone()
    }
}

impl Default for RefreshStateManager {
    fn default() -> Self {
        Self::new()
    }
}
