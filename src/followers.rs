//! Followers management
//!
//! The semantic layer over the followers table: adding a follower
//! resolves the remote actor first (no record is created for an actor
//! that cannot be resolved), reads go through the paginated store, and
//! error bookkeeping feeds the cleanup policy in the scheduler.

use std::sync::Arc;

use crate::config::FederationConfig;
use crate::data::{Database, FollowerRecord};
use crate::error::Result;
use crate::resolver::{ActorDocument, ActorResolver};

/// Durable per-local-actor follower set
pub struct FollowersStore {
    config: Arc<FederationConfig>,
    db: Arc<Database>,
    resolver: Arc<ActorResolver>,
}

impl FollowersStore {
    pub fn new(
        config: Arc<FederationConfig>,
        db: Arc<Database>,
        resolver: Arc<ActorResolver>,
    ) -> Self {
        Self {
            config,
            db,
            resolver,
        }
    }

    /// Accept a follow: resolve the remote actor and upsert the record.
    ///
    /// Resolution failures propagate without creating a record. Repeated
    /// adds for the same pair refresh the snapshot fields and leave the
    /// error counter untouched.
    pub async fn add_follower(
        &self,
        local_actor: &str,
        remote_actor_identifier: &str,
    ) -> Result<FollowerRecord> {
        let document = self.resolver.resolve(remote_actor_identifier).await?;
        let actor = ActorDocument::parse(&document)?;
        let actor_uri = actor
            .id
            .clone()
            .unwrap_or_else(|| remote_actor_identifier.to_string());

        let record = self.db.upsert_follower(local_actor, &actor_uri, &actor).await?;
        tracing::info!(
            local_actor = %local_actor,
            follower = %actor_uri,
            "Follower recorded"
        );
        Ok(record)
    }

    /// Remove a follower relationship (Undo Follow). Idempotent.
    pub async fn remove_follower(&self, local_actor: &str, actor_uri: &str) -> Result<()> {
        self.db.remove_follower(local_actor, actor_uri).await
    }

    /// All follower actor URIs for a local actor.
    pub async fn get_followers(&self, local_actor: &str) -> Result<Vec<String>> {
        self.db.get_followers(local_actor).await
    }

    /// Number of followers for a local actor.
    pub async fn count_followers(&self, local_actor: &str) -> Result<i64> {
        self.db.count_followers(local_actor).await
    }

    /// One page of follower records.
    pub async fn list_followers(
        &self,
        local_actor: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<FollowerRecord>> {
        self.db.list_followers(local_actor, limit, offset).await
    }

    /// Deduplicated delivery inboxes for a local actor's followers.
    pub async fn get_inboxes(&self, local_actor: &str) -> Result<Vec<String>> {
        self.db
            .get_inboxes(local_actor, self.config.followers.inbox_page_size)
            .await
    }

    /// Oldest-snapshot followers for the background refresh.
    pub async fn get_outdated_followers(&self, limit: i64) -> Result<Vec<FollowerRecord>> {
        self.db.get_outdated_followers(limit).await
    }

    /// Followers with accumulated errors for the cleanup sweep.
    pub async fn get_faulty_followers(&self, limit: i64) -> Result<Vec<FollowerRecord>> {
        self.db.get_faulty_followers(limit).await
    }

    /// Followers delivered through the given inbox URL.
    pub async fn followers_for_inbox(
        &self,
        local_actor: &str,
        inbox_url: &str,
    ) -> Result<Vec<FollowerRecord>> {
        self.db.followers_for_inbox(local_actor, inbox_url).await
    }

    /// Record an error against a follower; returns the new counter.
    pub async fn add_error(&self, record: &FollowerRecord, message: &str) -> Result<i64> {
        self.db.add_error(&record.id, message).await
    }

    /// Explicitly clear a follower's error counter.
    pub async fn reset_errors(&self, record: &FollowerRecord) -> Result<()> {
        self.db.reset_errors(&record.id).await
    }

    /// Current error counter for a follower.
    pub async fn count_errors(&self, record: &FollowerRecord) -> Result<i64> {
        self.db.count_errors(&record.id).await
    }

    /// Delete a follower row directly (cleanup policy).
    pub async fn delete_record(&self, record: &FollowerRecord) -> Result<()> {
        self.db.remove_follower_by_id(&record.id).await
    }

    /// Refresh a follower's snapshot after a successful re-resolution
    /// and clear its error counter.
    pub async fn refresh_snapshot(
        &self,
        record: &FollowerRecord,
        actor: &ActorDocument,
    ) -> Result<FollowerRecord> {
        let refreshed = self
            .db
            .upsert_follower(&record.local_actor, &record.actor_uri, actor)
            .await?;
        self.db.reset_errors(&refreshed.id).await?;
        Ok(refreshed)
    }
}
