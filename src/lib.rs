//! pubwire - an embeddable ActivityPub federation core
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Host application                          │
//! │  - identities + key persistence (IdentityProvider)          │
//! │  - object lifecycle callbacks (HostEvents)                  │
//! │  - inbox/outbox HTTP controllers                            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Federation core                           │
//! │  - Dispatcher: destination fan-out, signed delivery         │
//! │  - Scheduler: follower refresh + cleanup sweeps             │
//! │  - Resolver: actor documents, WebFinger, 7-day cache        │
//! │  - Signature codec: RSA-SHA256 HTTP signatures, digests     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Data layer                                │
//! │  - SQLite followers store (sqlx)                            │
//! │  - actor/response caches (moka)                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `signature`: HTTP-Signature canonicalization, signing, verification
//! - `keys`: local RSA key pairs, remote public key extraction
//! - `resolver`: remote actor resolution and caching
//! - `transport`: signed GET/POST with timeouts and size caps
//! - `followers`: durable follower set with error bookkeeping
//! - `dispatcher`: per-inbox delivery fan-out
//! - `scheduler`: hourly refresh and daily cleanup sweeps
//! - `host`: traits the embedding application implements
//! - `config`: configuration management
//! - `error`: error types

pub mod activity;
pub mod config;
pub mod data;
pub mod dispatcher;
pub mod error;
pub mod followers;
pub mod host;
pub mod keys;
pub mod metrics;
pub mod resolver;
pub mod scheduler;
pub mod signature;
pub mod transport;

use std::sync::Arc;

use crate::config::FederationConfig;
use crate::error::{FederationError, Result};

/// An inbound request whose signature checked out
#[derive(Debug, Clone)]
pub struct VerifiedRequest {
    /// Actor URI the signing key belongs to
    pub actor_uri: String,
    /// The signer's resolved actor document
    pub document: Arc<serde_json::Value>,
}

/// Federation core shared across the host application
///
/// Constructed once at startup and handed to controllers and background
/// jobs. All subsystems are reference-counted; cloning handles is cheap.
pub struct FederationCore {
    /// Federation configuration
    pub config: Arc<FederationConfig>,

    /// SQLite followers store
    pub db: Arc<data::Database>,

    /// Remote actor document cache (volatile)
    pub actor_cache: Arc<data::ActorCache>,

    /// Local key pairs
    pub keys: Arc<keys::KeyStore>,

    /// Signed HTTP transport
    pub transport: Arc<transport::Transport>,

    /// Remote actor resolver
    pub resolver: Arc<resolver::ActorResolver>,

    /// Follower set management
    pub followers: Arc<followers::FollowersStore>,

    /// Dispatch extension points
    pub hooks: Arc<host::HookRegistry>,

    /// Host identity records
    pub identity: Arc<dyn host::IdentityProvider>,

    /// Host lifecycle callbacks
    pub events: Arc<dyn host::HostEvents>,
}

impl FederationCore {
    /// Initialize the federation core
    ///
    /// # Steps
    /// 1. Validate configuration and register metrics
    /// 2. Connect the SQLite followers store
    /// 3. Wire key store, transport, resolver, and caches
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub async fn new(
        config: FederationConfig,
        identity: Arc<dyn host::IdentityProvider>,
        events: Arc<dyn host::HostEvents>,
        hooks: host::HookRegistry,
    ) -> Result<Self> {
        config.validate()?;
        metrics::init_metrics();
        let config = Arc::new(config);

        tracing::info!(
            domain = %config.instance.domain,
            "Initializing federation core"
        );

        let db = Arc::new(data::Database::connect(&config.database.path).await?);
        let keys = Arc::new(keys::KeyStore::new(identity.clone()));
        let transport = Arc::new(transport::Transport::new(config.clone(), keys.clone())?);
        let actor_cache = Arc::new(data::ActorCache::new(config.cache.actor_ttl()));
        let resolver = Arc::new(resolver::ActorResolver::new(
            config.clone(),
            transport.clone(),
            actor_cache.clone(),
        ));
        let followers = Arc::new(followers::FollowersStore::new(
            config.clone(),
            db.clone(),
            resolver.clone(),
        ));

        tracing::info!("Federation core initialized");

        Ok(Self {
            config,
            db,
            actor_cache,
            keys,
            transport,
            resolver,
            followers,
            hooks: Arc::new(hooks),
            identity,
            events,
        })
    }

    /// Build a delivery dispatcher over this core's subsystems.
    pub fn dispatcher(&self) -> dispatcher::Dispatcher {
        dispatcher::Dispatcher::new(
            self.followers.clone(),
            self.resolver.clone(),
            self.transport.clone(),
            self.keys.clone(),
            self.hooks.clone(),
            self.events.clone(),
            self.identity.clone(),
        )
    }

    /// Build the follower maintenance scheduler.
    pub fn scheduler(&self) -> Arc<scheduler::Scheduler> {
        Arc::new(scheduler::Scheduler::new(
            self.config.clone(),
            self.followers.clone(),
            self.resolver.clone(),
            self.events.clone(),
        ))
    }

    /// Verify the signature of an inbound request
    ///
    /// Parses the Signature header, resolves the signer's actor document
    /// through the cache, and checks digest and RSA signature. Any
    /// failure to obtain a usable public key is a verification failure,
    /// never a pass. A signature that fails against a cached key is
    /// retried once against a freshly fetched document, so rotated keys
    /// do not permanently break a peer.
    ///
    /// Controllers should answer a failure with the status from
    /// [`FederationError::http_status`] (401 for verification failures)
    /// and compare `actor_uri` against the activity's `actor` via
    /// [`signature::key_id_matches_actor`] before trusting the payload.
    pub async fn verify_inbound(
        &self,
        method: &str,
        path_and_query: &str,
        headers: &http::HeaderMap,
        body: Option<&[u8]>,
    ) -> Result<VerifiedRequest> {
        let raw = headers
            .get("signature")
            .ok_or_else(|| {
                FederationError::SignatureParse("missing Signature header".to_string())
            })?
            .to_str()
            .map_err(|_| {
                FederationError::SignatureParse("non-ASCII Signature header".to_string())
            })?;
        let parsed = signature::parse_signature_header(raw)?;
        let actor_uri = parsed.actor_uri().to_string();

        let document = self.signer_document(&actor_uri, false).await?;
        let public_key_pem = Self::signer_key(&document, &actor_uri)?;

        match signature::verify_request(method, path_and_query, headers, body, &public_key_pem) {
            Ok(()) => Ok(VerifiedRequest {
                actor_uri,
                document,
            }),
            Err(FederationError::SignatureVerification(_)) => {
                // The cached key may be stale after a rotation.
                let document = self.signer_document(&actor_uri, true).await?;
                let public_key_pem = Self::signer_key(&document, &actor_uri)?;
                signature::verify_request(method, path_and_query, headers, body, &public_key_pem)?;
                Ok(VerifiedRequest {
                    actor_uri,
                    document,
                })
            }
            Err(error) => Err(error),
        }
    }

    async fn signer_document(
        &self,
        actor_uri: &str,
        force: bool,
    ) -> Result<Arc<serde_json::Value>> {
        let outcome = if force {
            self.resolver.resolve_force(actor_uri).await
        } else {
            self.resolver.resolve(actor_uri).await
        };

        outcome.map_err(|error| {
            FederationError::SignatureVerification(format!(
                "could not resolve signer {actor_uri}: {error}"
            ))
        })
    }

    fn signer_key(document: &serde_json::Value, actor_uri: &str) -> Result<String> {
        let actor = resolver::ActorDocument::parse(document).map_err(|error| {
            FederationError::SignatureVerification(format!(
                "signer document for {actor_uri} is malformed: {error}"
            ))
        })?;

        actor.public_key_pem.ok_or_else(|| {
            FederationError::SignatureVerification(format!(
                "{actor_uri} publishes no public key"
            ))
        })
    }
}
