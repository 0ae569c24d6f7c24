//! Follower maintenance jobs
//!
//! Two periodic sweeps keep the followers table honest: an hourly
//! refresh of the oldest snapshots and a daily cleanup of followers
//! with accumulated errors. Both apply the same policy per follower:
//! a successful re-resolution refreshes the snapshot and clears the
//! error counter, a tombstone deletes immediately and cascades into
//! host-side interaction cleanup, and any other failure increments the
//! counter until the deletion threshold is reached.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::FederationConfig;
use crate::data::FollowerRecord;
use crate::error::Result;
use crate::followers::FollowersStore;
use crate::host::HostEvents;
use crate::resolver::{ActorDocument, ActorResolver};

const REFRESH_INTERVAL: Duration = Duration::from_secs(3600);
const CLEANUP_INTERVAL: Duration = Duration::from_secs(86_400);

/// Outcome counts of one maintenance sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepSummary {
    pub refreshed: usize,
    pub deleted: usize,
    pub errored: usize,
}

/// Periodic follower maintenance
pub struct Scheduler {
    config: Arc<FederationConfig>,
    followers: Arc<FollowersStore>,
    resolver: Arc<ActorResolver>,
    events: Arc<dyn HostEvents>,
}

impl Scheduler {
    pub fn new(
        config: Arc<FederationConfig>,
        followers: Arc<FollowersStore>,
        resolver: Arc<ActorResolver>,
        events: Arc<dyn HostEvents>,
    ) -> Self {
        Self {
            config,
            followers,
            resolver,
            events,
        }
    }

    /// Refresh the followers with the oldest snapshots, oldest first.
    ///
    /// Batch size comes from `followers.refresh_batch` (default 5); hosts
    /// with a system-level cron can configure larger batches.
    pub async fn update_followers(&self) -> Result<SweepSummary> {
        let batch = self
            .followers
            .get_outdated_followers(self.config.followers.refresh_batch)
            .await?;
        let summary = self.process_batch(batch).await;

        tracing::info!(
            refreshed = summary.refreshed,
            deleted = summary.deleted,
            errored = summary.errored,
            "Follower refresh sweep complete"
        );
        Ok(summary)
    }

    /// Re-check followers that have accumulated errors.
    pub async fn cleanup_followers(&self) -> Result<SweepSummary> {
        let batch = self
            .followers
            .get_faulty_followers(self.config.followers.cleanup_batch)
            .await?;
        let summary = self.process_batch(batch).await;

        tracing::info!(
            refreshed = summary.refreshed,
            deleted = summary.deleted,
            errored = summary.errored,
            "Follower cleanup sweep complete"
        );
        Ok(summary)
    }

    async fn process_batch(&self, batch: Vec<FollowerRecord>) -> SweepSummary {
        let mut summary = SweepSummary::default();

        for record in batch {
            match self.refresh_one(&record).await {
                RefreshOutcome::Refreshed => summary.refreshed += 1,
                RefreshOutcome::Deleted => summary.deleted += 1,
                RefreshOutcome::Errored => summary.errored += 1,
            }
        }

        summary
    }

    /// Apply the refresh/cleanup policy to a single follower.
    ///
    /// The resolution always bypasses the actor cache; a refresh that
    /// served week-old cached documents would never observe a tombstone.
    async fn refresh_one(&self, record: &FollowerRecord) -> RefreshOutcome {
        let failure = match self.resolver.resolve_force(&record.actor_uri).await {
            Ok(document) => match ActorDocument::parse(&document) {
                Ok(actor) if actor.inbox.is_some() => {
                    match self.followers.refresh_snapshot(record, &actor).await {
                        Ok(_) => return RefreshOutcome::Refreshed,
                        Err(error) => error,
                    }
                }
                Ok(_) => crate::error::FederationError::NoInbox(record.actor_uri.clone()),
                Err(error) => error,
            },
            Err(error) => error,
        };

        if failure.is_tombstone() {
            tracing::info!(
                follower = %record.actor_uri,
                "Follower is gone, deleting"
            );
            self.delete_and_cascade(record).await;
            return RefreshOutcome::Deleted;
        }

        let error_count = match self
            .followers
            .add_error(record, &failure.to_string())
            .await
        {
            Ok(count) => count,
            Err(error) => {
                tracing::warn!(
                    follower = %record.actor_uri,
                    error = %error,
                    "Could not record follower error"
                );
                return RefreshOutcome::Errored;
            }
        };

        if error_count >= self.config.followers.error_threshold {
            tracing::info!(
                follower = %record.actor_uri,
                errors = error_count,
                "Follower exceeded the error threshold, deleting"
            );
            self.delete_and_cascade(record).await;
            return RefreshOutcome::Deleted;
        }

        tracing::debug!(
            follower = %record.actor_uri,
            errors = error_count,
            error = %failure,
            "Follower refresh failed"
        );
        RefreshOutcome::Errored
    }

    async fn delete_and_cascade(&self, record: &FollowerRecord) {
        if let Err(error) = self.followers.delete_record(record).await {
            tracing::warn!(
                follower = %record.actor_uri,
                error = %error,
                "Could not delete follower"
            );
            return;
        }
        self.events
            .schedule_interaction_cleanup(&record.actor_uri)
            .await;
    }

    /// Start the hourly refresh and daily cleanup loops.
    ///
    /// Returns the join handles; dropping them does not stop the loops,
    /// abort them on shutdown.
    pub fn spawn(self: Arc<Self>) -> (JoinHandle<()>, JoinHandle<()>) {
        let refresh = {
            let scheduler = self.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(REFRESH_INTERVAL);
                loop {
                    interval.tick().await;
                    if let Err(error) = scheduler.update_followers().await {
                        tracing::error!(error = %error, "Follower refresh sweep failed");
                    }
                }
            })
        };

        let cleanup = {
            let scheduler = self.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
                loop {
                    interval.tick().await;
                    if let Err(error) = scheduler.cleanup_followers().await {
                        tracing::error!(error = %error, "Follower cleanup sweep failed");
                    }
                }
            })
        };

        (refresh, cleanup)
    }
}

enum RefreshOutcome {
    Refreshed,
    Deleted,
    Errored,
}
