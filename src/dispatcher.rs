//! Activity delivery fan-out
//!
//! Computes the destination inbox set for an activity (followers,
//! mentioned actors, reply-chain authors), then performs one signed
//! POST per inbox. Deliveries are independent: a failure at one inbox
//! never aborts the others, and the origin object is marked federated
//! once the whole fan-out has been attempted.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::activity::{Activity, PUBLIC_AUDIENCE};
use crate::error::{FederationError, Result};
use crate::followers::FollowersStore;
use crate::host::{HookRegistry, HostEvents, IdentityProvider, ObjectChanged};
use crate::keys::KeyStore;
use crate::metrics;
use crate::resolver::{ActorDocument, ActorResolver};
use crate::transport::{CachePolicy, Transport};

/// Concurrent in-flight deliveries per dispatch.
const MAX_CONCURRENT_DELIVERIES: usize = 10;

/// Result of a delivery attempt
#[derive(Debug, Clone)]
pub struct DeliveryResult {
    /// Target inbox URL
    pub inbox_url: String,
    /// Whether delivery succeeded
    pub success: bool,
    /// HTTP status code if a response was received
    pub status: Option<u16>,
    /// Error message if failed
    pub error: Option<String>,
}

/// Deduplicate identical inbox URLs while keeping distinct personal inboxes.
///
/// First occurrence wins; recipients on the same domain with different
/// inbox paths are all kept.
fn unique_inbox_targets(inbox_urls: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut targets = Vec::new();

    for inbox_url in inbox_urls {
        if seen.insert(inbox_url.clone()) {
            targets.push(inbox_url);
        }
    }

    targets
}

fn error_status(error: &FederationError) -> Option<u16> {
    match error {
        FederationError::RemoteHttp { status } | FederationError::Tombstoned { status } => {
            Some(*status)
        }
        _ => None,
    }
}

/// Outbound delivery fan-out
///
/// Stateless per call; shared stores carry all durable state.
pub struct Dispatcher {
    followers: Arc<FollowersStore>,
    resolver: Arc<ActorResolver>,
    transport: Arc<Transport>,
    keys: Arc<KeyStore>,
    hooks: Arc<HookRegistry>,
    events: Arc<dyn HostEvents>,
    identity: Arc<dyn IdentityProvider>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        followers: Arc<FollowersStore>,
        resolver: Arc<ActorResolver>,
        transport: Arc<Transport>,
        keys: Arc<KeyStore>,
        hooks: Arc<HookRegistry>,
        events: Arc<dyn HostEvents>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            followers,
            resolver,
            transport,
            keys,
            hooks,
            events,
            identity,
        }
    }

    /// Compute the deduplicated destination inbox set for an activity.
    ///
    /// Unions follower inboxes, resolved `cc` actors, and the authors of
    /// any objects the activity replies to. Individual resolution
    /// failures are logged and skipped; they never abort the fan-out.
    pub async fn compute_destination_inboxes(
        &self,
        local_actor_id: &str,
        activity: &Activity,
    ) -> Result<Vec<String>> {
        let local = self.identity.local_actor(local_actor_id).await?;
        let mut inboxes = self.followers.get_inboxes(local_actor_id).await?;

        for mention in activity.cc() {
            if mention == PUBLIC_AUDIENCE || *mention == local.followers_url() {
                continue;
            }
            match self.mention_inbox(mention).await {
                Ok(inbox) => inboxes.push(inbox),
                Err(error) => {
                    tracing::warn!(mention = %mention, error = %error, "Skipping unresolvable mention");
                }
            }
        }

        for reply_url in activity.in_reply_to() {
            match self.reply_author_inbox(reply_url).await {
                Ok(inbox) => inboxes.push(inbox),
                Err(error) => {
                    tracing::warn!(
                        object = %reply_url,
                        error = %error,
                        "Skipping unresolvable reply target"
                    );
                }
            }
        }

        Ok(unique_inbox_targets(inboxes))
    }

    /// Delivery inbox of a mentioned actor.
    async fn mention_inbox(&self, identifier: &str) -> Result<String> {
        let document = self.resolver.resolve(identifier).await?;
        let actor = ActorDocument::parse(&document)?;
        actor.require_delivery_inbox(identifier)
    }

    /// Delivery inbox of the author of a replied-to object.
    async fn reply_author_inbox(&self, object_url: &str) -> Result<String> {
        let object = self.transport.get(object_url, CachePolicy::Default).await?;
        let attributed_to = object.get("attributedTo").ok_or_else(|| {
            FederationError::InvalidActorIdentifier(format!("{object_url} has no attributedTo"))
        })?;

        let document = self.resolver.resolve_value(attributed_to).await?;
        let actor = ActorDocument::parse(&document)?;
        actor.require_delivery_inbox(object_url)
    }

    /// Deliver an activity to every destination inbox.
    ///
    /// Short-circuits without network calls when a hook vetoes
    /// federation or the inbox set comes up empty. The JSON body is
    /// serialized exactly once; every destination receives identical
    /// bytes. After all attempts the origin object is marked federated,
    /// regardless of per-inbox outcomes.
    pub async fn dispatch(
        &self,
        activity: &Activity,
        local_actor_id: &str,
        origin: &ObjectChanged,
    ) -> Result<Vec<DeliveryResult>> {
        if !self.hooks.should_federate(activity) {
            tracing::debug!(activity = %activity.id, "Federation vetoed by hook");
            return Ok(Vec::new());
        }

        let inboxes = self
            .compute_destination_inboxes(local_actor_id, activity)
            .await?;
        let inboxes = self.hooks.modify_inboxes(activity, inboxes);
        if inboxes.is_empty() {
            tracing::debug!(activity = %activity.id, "No destination inboxes");
            return Ok(Vec::new());
        }

        let body: Arc<Vec<u8>> = Arc::new(activity.to_bytes()?);
        let signing_identity = Arc::new(self.keys.signing_identity(local_actor_id).await?);

        metrics::ACTIVITIES_SENT_TOTAL
            .with_label_values(&[activity.kind.label()])
            .inc();
        tracing::info!(
            activity = %activity.id,
            kind = activity.kind.label(),
            inboxes = inboxes.len(),
            "Dispatching activity"
        );

        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_DELIVERIES));
        let mut tasks = Vec::new();

        for inbox_url in inboxes {
            let semaphore = semaphore.clone();
            let body = body.clone();
            let signing_identity = signing_identity.clone();
            let transport = self.transport.clone();

            let task = tokio::spawn(async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .expect("delivery semaphore is never closed");

                match transport.post(&inbox_url, &body, &signing_identity).await {
                    Ok(status) => {
                        metrics::DELIVERIES_TOTAL
                            .with_label_values(&["success"])
                            .inc();
                        DeliveryResult {
                            inbox_url,
                            success: true,
                            status: Some(status),
                            error: None,
                        }
                    }
                    Err(error) => {
                        metrics::DELIVERIES_TOTAL
                            .with_label_values(&["failure"])
                            .inc();
                        DeliveryResult {
                            inbox_url,
                            success: false,
                            status: error_status(&error),
                            error: Some(error.to_string()),
                        }
                    }
                }
            });

            tasks.push(task);
        }

        let mut results = Vec::new();
        for task in tasks {
            if let Ok(result) = task.await {
                results.push(result);
            }
        }

        self.record_failures(local_actor_id, &results).await;

        let success_count = results.iter().filter(|result| result.success).count();
        tracing::info!(
            activity = %activity.id,
            succeeded = success_count,
            failed = results.len() - success_count,
            "Dispatch complete"
        );

        self.events.mark_federated(origin).await;

        Ok(results)
    }

    /// The delivery concurrency cap, for host tuning visibility.
    pub fn max_concurrent_deliveries(&self) -> usize {
        MAX_CONCURRENT_DELIVERIES
    }

    /// Attribute failed deliveries to the followers behind each inbox.
    async fn record_failures(&self, local_actor_id: &str, results: &[DeliveryResult]) {
        for result in results.iter().filter(|result| !result.success) {
            let message = result.error.as_deref().unwrap_or("delivery failed");
            let followers = match self
                .followers
                .followers_for_inbox(local_actor_id, &result.inbox_url)
                .await
            {
                Ok(followers) => followers,
                Err(error) => {
                    tracing::warn!(
                        inbox = %result.inbox_url,
                        error = %error,
                        "Could not attribute delivery failure"
                    );
                    continue;
                }
            };

            for follower in followers {
                if let Err(error) = self.followers.add_error(&follower, message).await {
                    tracing::warn!(
                        follower = %follower.actor_uri,
                        error = %error,
                        "Could not record delivery error"
                    );
                }
            }
        }
    }
}
