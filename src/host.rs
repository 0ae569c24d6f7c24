//! Host application seams
//!
//! The embedding application (a blog, a CMS) owns identities, object
//! storage, and scheduling triggers. This module defines the contracts
//! the federation core consumes: an identity provider, lifecycle event
//! callbacks, and the enumerated dispatch extension points. An in-memory
//! implementation is provided for tests and host bring-up.

use std::sync::Arc;

use async_trait::async_trait;

use crate::activity::Activity;
use crate::error::Result;

/// A locally-controlled identity capable of signing
#[derive(Debug, Clone)]
pub struct LocalActorInfo {
    /// Stable host-side id
    pub id: String,
    /// Canonical actor URI
    pub actor_uri: String,
    /// Human display name
    pub display_name: String,
}

impl LocalActorInfo {
    /// Key id advertised in actor documents and Signature headers.
    pub fn key_id(&self) -> String {
        format!("{}#main-key", self.actor_uri)
    }

    /// Followers collection URI for this actor.
    pub fn followers_url(&self) -> String {
        format!("{}/followers", self.actor_uri)
    }
}

/// A PEM-encoded RSA key pair
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub public_pem: String,
    pub private_pem: String,
}

/// Identity records supplied by the host application
///
/// The host persists key material; the core decides when to generate it.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Look up a local actor by id.
    async fn local_actor(&self, actor_id: &str) -> Result<LocalActorInfo>;

    /// Load the persisted key pair for an actor, if one exists.
    async fn load_keypair(&self, actor_id: &str) -> Result<Option<KeyPair>>;

    /// Persist a key pair for an actor, replacing any existing one.
    async fn store_keypair(&self, actor_id: &str, pair: &KeyPair) -> Result<()>;
}

/// Kind of host object that federates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Post,
    Comment,
    Profile,
}

/// Federation lifecycle of a host object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FederationState {
    Unfederated,
    Scheduled,
    Federated,
}

/// A host-side change the core reacts to
///
/// Constructed by the host when an object transitions (post published,
/// comment approved, profile edited); the core never reads host storage.
#[derive(Debug, Clone)]
pub struct ObjectChanged {
    pub kind: ObjectKind,
    pub id: String,
    pub old_state: FederationState,
    pub new_state: FederationState,
}

/// Lifecycle callbacks into the host application
#[async_trait]
pub trait HostEvents: Send + Sync {
    /// Record that dispatch was attempted for an object.
    ///
    /// Fires once per dispatch regardless of per-inbox outcomes.
    async fn mark_federated(&self, object: &ObjectChanged);

    /// A remote actor was confirmed deleted; the host should remove its
    /// derived interactions (cached comments, reactions).
    async fn schedule_interaction_cleanup(&self, actor_uri: &str);
}

/// Dispatch extension point
///
/// The enumerated hooks the dispatcher consults. Implementations are
/// registered in a [`HookRegistry`] constructed at startup and passed
/// into the core; there is no global registry.
pub trait DispatchHook: Send + Sync {
    /// Whether this activity should go to followers at all.
    fn should_federate(&self, _activity: &Activity) -> bool {
        true
    }

    /// Rewrite the computed destination inbox list.
    fn modify_inboxes(&self, _activity: &Activity, inboxes: Vec<String>) -> Vec<String> {
        inboxes
    }
}

/// Ordered list of registered dispatch hooks
#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: Vec<Arc<dyn DispatchHook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: Arc<dyn DispatchHook>) {
        self.hooks.push(hook);
    }

    /// False as soon as any hook vetoes federation.
    pub fn should_federate(&self, activity: &Activity) -> bool {
        self.hooks.iter().all(|hook| hook.should_federate(activity))
    }

    /// Run every hook over the inbox list, in registration order.
    pub fn modify_inboxes(&self, activity: &Activity, inboxes: Vec<String>) -> Vec<String> {
        self.hooks
            .iter()
            .fold(inboxes, |inboxes, hook| hook.modify_inboxes(activity, inboxes))
    }
}

/// In-memory host implementation for tests and bring-up
pub mod memory {
    use std::collections::HashMap;

    use tokio::sync::RwLock;

    use super::*;
    use crate::error::FederationError;

    /// In-process [`IdentityProvider`] + [`HostEvents`]
    #[derive(Default)]
    pub struct MemoryHost {
        actors: RwLock<HashMap<String, LocalActorInfo>>,
        keypairs: RwLock<HashMap<String, KeyPair>>,
        federated: RwLock<Vec<ObjectChanged>>,
        cleanups: RwLock<Vec<String>>,
    }

    impl MemoryHost {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn add_actor(&self, id: &str, actor_uri: &str, display_name: &str) {
            self.actors.write().await.insert(
                id.to_string(),
                LocalActorInfo {
                    id: id.to_string(),
                    actor_uri: actor_uri.to_string(),
                    display_name: display_name.to_string(),
                },
            );
        }

        /// Objects marked federated so far.
        pub async fn federated(&self) -> Vec<ObjectChanged> {
            self.federated.read().await.clone()
        }

        /// Actor URIs scheduled for interaction cleanup so far.
        pub async fn cleanups(&self) -> Vec<String> {
            self.cleanups.read().await.clone()
        }
    }

    #[async_trait]
    impl IdentityProvider for MemoryHost {
        async fn local_actor(&self, actor_id: &str) -> Result<LocalActorInfo> {
            self.actors
                .read()
                .await
                .get(actor_id)
                .cloned()
                .ok_or_else(|| {
                    FederationError::InvalidActorIdentifier(format!(
                        "unknown local actor: {actor_id}"
                    ))
                })
        }

        async fn load_keypair(&self, actor_id: &str) -> Result<Option<KeyPair>> {
            Ok(self.keypairs.read().await.get(actor_id).cloned())
        }

        async fn store_keypair(&self, actor_id: &str, pair: &KeyPair) -> Result<()> {
            self.keypairs
                .write()
                .await
                .insert(actor_id.to_string(), pair.clone());
            Ok(())
        }
    }

    #[async_trait]
    impl HostEvents for MemoryHost {
        async fn mark_federated(&self, object: &ObjectChanged) {
            self.federated.write().await.push(object.clone());
        }

        async fn schedule_interaction_cleanup(&self, actor_uri: &str) {
            self.cleanups.write().await.push(actor_uri.to_string());
        }
    }
}
