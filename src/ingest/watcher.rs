//! Input watcher.
//!
//! Polls the storage backend on a fixed interval (woken early by the
//! backend's change feed when it has one) and turns stable, unseen sources
//! into queued work items.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::queue::{WorkQueue, WorkQueueError};
use crate::config::OrchestratorSettings;
use crate::domain::{Fingerprint, ItemIdentity, StorageLocation, WorkItem, WorkItemState};
use crate::registry::{EnqueueResult, Registry, RegistryError};
use crate::storage::{ChangeFeed, ListedItem, RetrievalError, StorageBackend};

/// Errors that can occur with the watcher
#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("Listing failed: {0}")]
    Listing(#[from] RetrievalError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Queue error: {0}")]
    Queue(#[from] WorkQueueError),
}

/// Configuration for the watcher
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub poll_interval: Duration,

    /// Failed items with fewer attempts are retried automatically
    pub max_item_attempts: u32,

    /// Minimum age of the last attempt before an automatic retry
    pub retry_delay: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            max_item_attempts: 3,
            retry_delay: Duration::from_secs(300),
        }
    }
}

impl From<&OrchestratorSettings> for WatcherConfig {
    fn from(settings: &OrchestratorSettings) -> Self {
        Self {
            poll_interval: settings.poll_interval,
            max_item_attempts: settings.max_item_attempts,
            retry_delay: settings.retry_delay,
        }
    }
}

/// Result of one poll
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    /// Newly registered and queued
    pub new_items: usize,

    /// Identity already in the registry
    pub already_known: usize,

    /// Same content as an item under another identity
    pub duplicates: usize,

    /// Still changing between polls (or empty)
    pub unstable: usize,

    /// Queued registry items pushed again (recovery, CLI retries)
    pub requeued: usize,

    /// Failed items moved back to Queued automatically
    pub retried: usize,

    pub errors: usize,
}

impl ScanResult {
    pub fn total_scanned(&self) -> usize {
        self.new_items + self.already_known + self.duplicates + self.unstable + self.errors
    }
}

/// Size and mtime seen on the previous poll
#[derive(Debug, Clone, PartialEq, Eq)]
struct Observation {
    size: u64,
    modified: Option<DateTime<Utc>>,
}

impl Observation {
    fn of(item: &ListedItem) -> Self {
        Self {
            size: item.size_bytes,
            modified: item.modified,
        }
    }
}

/// Identity computed for a location, valid while its observation holds
#[derive(Debug, Clone)]
struct KnownIdentity {
    observed: Observation,
    identity: ItemIdentity,
    fingerprint: Fingerprint,

    /// Registry already answered for this observation
    settled: bool,
}

/// Polling watcher with stability checking
pub struct Watcher {
    backend: Arc<dyn StorageBackend>,
    registry: Registry,
    queue: WorkQueue,
    config: WatcherConfig,
    observations: HashMap<StorageLocation, Observation>,
    identities: HashMap<StorageLocation, KnownIdentity>,
}

impl Watcher {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        registry: Registry,
        queue: WorkQueue,
        config: WatcherConfig,
    ) -> Self {
        Self {
            backend,
            registry,
            queue,
            config,
            observations: HashMap::new(),
            identities: HashMap::new(),
        }
    }

    /// List the input once, enqueue stable new items, then reconcile the
    /// registry with the queue.
    pub async fn poll_once(&mut self) -> Result<ScanResult, WatcherError> {
        let mut result = ScanResult::default();
        let listing = self.backend.list_new_items().await?;
        let present: HashSet<StorageLocation> =
            listing.iter().map(|item| item.location.clone()).collect();

        for listed in &listing {
            let observed = Observation::of(listed);
            let previous = self
                .observations
                .insert(listed.location.clone(), observed.clone());

            let stable = observed.size > 0 && previous.as_ref() == Some(&observed);
            if !stable {
                tracing::debug!(
                    name = %listed.name,
                    size = listed.size_bytes,
                    "Waiting for source to settle"
                );
                result.unstable += 1;
                continue;
            }

            self.discover(listed, observed, &present, &mut result).await?;
        }

        // Forget locations that left the input (archived, deleted, renamed)
        self.observations.retain(|loc, _| present.contains(loc));
        self.identities.retain(|loc, _| present.contains(loc));

        self.retry_failures(&mut result).await?;
        self.reconcile(&mut result).await?;

        Ok(result)
    }

    async fn discover(
        &mut self,
        listed: &ListedItem,
        observed: Observation,
        present: &HashSet<StorageLocation>,
        result: &mut ScanResult,
    ) -> Result<(), WatcherError> {
        let cached = self
            .identities
            .get(&listed.location)
            .filter(|known| known.observed == observed)
            .cloned();

        let known = match cached {
            Some(known) if known.settled => {
                result.already_known += 1;
                return Ok(());
            }
            Some(known) => known,
            None => match self.backend.identify(listed).await {
                Ok((identity, fingerprint)) => KnownIdentity {
                    observed,
                    identity,
                    fingerprint,
                    settled: false,
                },
                Err(e) => {
                    tracing::warn!(name = %listed.name, error = %e, "Failed to identify source");
                    result.errors += 1;
                    return Ok(());
                }
            },
        };

        let item = WorkItem::discovered(
            known.identity.clone(),
            known.fingerprint.clone(),
            listed.location.clone(),
            listed.name.clone(),
            listed.size_bytes,
        );

        match self.registry.mark_queued(&item).await? {
            EnqueueResult::Queued => {
                tracing::info!(
                    identity = %item.identity,
                    name = %item.name,
                    size = item.size_bytes,
                    "New meeting queued"
                );
                result.new_items += 1;
                self.queue.push(item).await?;
            }
            EnqueueResult::AlreadyKnown(state) => {
                tracing::debug!(identity = %item.identity, %state, "Source already registered");
                if matches!(state, WorkItemState::Queued | WorkItemState::Failed) {
                    self.follow_rename(&item, present).await?;
                }
                result.already_known += 1;
            }
            EnqueueResult::Duplicate { of } => {
                tracing::info!(
                    name = %item.name,
                    duplicate_of = %of,
                    "Duplicate content, skipping"
                );
                result.duplicates += 1;
            }
        }

        self.identities.insert(
            listed.location.clone(),
            KnownIdentity {
                settled: true,
                ..known
            },
        );
        Ok(())
    }

    /// A pending item whose recorded location left the input was renamed or
    /// moved; point the registry at where its content is now
    async fn follow_rename(
        &self,
        item: &WorkItem,
        present: &HashSet<StorageLocation>,
    ) -> Result<(), WatcherError> {
        let Some(record) = self.registry.get(&item.identity).await? else {
            return Ok(());
        };
        let recorded = &record.item.location;
        if recorded == &item.location || present.contains(recorded) {
            return Ok(());
        }

        if self
            .registry
            .relocate(&item.identity, &item.location, &item.name)
            .await?
        {
            tracing::info!(
                identity = %item.identity,
                from = %recorded,
                to = %item.location,
                "Source moved, registry updated"
            );
        }
        Ok(())
    }

    async fn retry_failures(&self, result: &mut ScanResult) -> Result<(), WatcherError> {
        let delay = chrono::Duration::from_std(self.config.retry_delay)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));
        let eligible = self
            .registry
            .retryable_failures(self.config.max_item_attempts, Utc::now() - delay)
            .await?;

        for item in eligible {
            match self.registry.retry(&item.identity, "automatic retry").await {
                Ok(()) => {
                    tracing::info!(
                        identity = %item.identity,
                        attempts = item.attempt_count,
                        "Retrying failed item"
                    );
                    result.retried += 1;
                }
                // Raced with a manual retry
                Err(RegistryError::InvalidTransition { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn reconcile(&self, result: &mut ScanResult) -> Result<(), WatcherError> {
        let queued = self.registry.list(Some(WorkItemState::Queued)).await?;
        for record in queued {
            if self.queue.is_tracked(&record.item.identity) {
                continue;
            }
            tracing::debug!(identity = %record.item.identity, "Dispatching queued item");
            if self.queue.push(record.item).await? {
                result.requeued += 1;
            }
        }
        Ok(())
    }

    /// Poll until `shutdown` flips to true
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut feed = self.backend.subscribe();
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            source = %self.backend.describe(),
            interval_secs = self.config.poll_interval.as_secs(),
            notifications = feed.is_some(),
            "Watcher started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {}
                _ = ticker.tick() => {}
                alive = next_change(&mut feed) => {
                    if !alive {
                        feed = None;
                    }
                }
            }
            if *shutdown.borrow() || shutdown.has_changed().is_err() {
                break;
            }

            // A full queue blocks inside poll_once; shutdown must still win
            let outcome = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                outcome = self.poll_once() => outcome,
            };

            match outcome {
                Ok(scan) => {
                    if scan != ScanResult::default() {
                        tracing::debug!(
                            new = scan.new_items,
                            known = scan.already_known,
                            duplicates = scan.duplicates,
                            unstable = scan.unstable,
                            requeued = scan.requeued,
                            retried = scan.retried,
                            errors = scan.errors,
                            "Poll complete"
                        );
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Poll failed"),
            }
        }

        tracing::info!("Watcher stopped");
    }
}

async fn next_change(feed: &mut Option<ChangeFeed>) -> bool {
    match feed {
        Some(feed) => feed.changed().await,
        None => std::future::pending().await,
    }
}
