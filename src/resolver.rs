//! Remote actor resolution
//!
//! Resolves an actor identifier (URI, `user@host` handle, or inline
//! object) to its published actor document, via direct fetch or
//! WebFinger-mediated discovery. Successful resolutions are cached for
//! the configured TTL (7 days by default); tombstones and transient
//! failures stay distinguishable for the followers cleanup policy.

use std::net::IpAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::FederationConfig;
use crate::data::ActorCache;
use crate::error::{FederationError, Result};
use crate::metrics;
use crate::transport::{ACTIVITY_JSON, CachePolicy, JRD_JSON, Transport};

/// AS2 LD-JSON profile media type accepted in WebFinger self links.
const LD_JSON_PROFILE: &str =
    "application/ld+json; profile=\"https://www.w3.org/ns/activitystreams\"";

/// Classified actor identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActorIdentifier {
    /// A dereferenceable actor URI
    Uri(String),
    /// A `user@host` handle, resolved via WebFinger
    Handle { user: String, host: String },
}

/// Classify a raw actor identifier string.
///
/// Accepts absolute http(s) URIs, `user@host` handles (with optional
/// leading `@` or `acct:` prefix); anything else is unparseable.
pub fn classify(identifier: &str) -> Result<ActorIdentifier> {
    let identifier = identifier.trim();

    if identifier.starts_with("http://") || identifier.starts_with("https://") {
        return Ok(ActorIdentifier::Uri(identifier.to_string()));
    }

    let handle = identifier.strip_prefix("acct:").unwrap_or(identifier);
    let handle = handle.strip_prefix('@').unwrap_or(handle);

    if let Some((user, host)) = handle.split_once('@') {
        if !user.is_empty() && !host.is_empty() && !host.contains('@') {
            return Ok(ActorIdentifier::Handle {
                user: user.to_string(),
                host: host.to_string(),
            });
        }
    }

    Err(FederationError::InvalidActorIdentifier(
        identifier.to_string(),
    ))
}

/// Extract an actor identifier from an inline JSON value.
///
/// Lists use the first element only; Link-typed objects use `href`,
/// other objects `id` then `url`.
pub fn extract_identifier(value: &Value) -> Result<String> {
    match value {
        Value::String(identifier) => Ok(identifier.clone()),
        Value::Array(items) => {
            let first = items.first().ok_or_else(|| {
                FederationError::InvalidActorIdentifier("empty actor list".to_string())
            })?;
            extract_identifier(first)
        }
        Value::Object(map) => {
            let is_link = map.get("type").and_then(Value::as_str) == Some("Link");
            let field = if is_link {
                map.get("href")
            } else {
                map.get("id").or_else(|| map.get("url")).or_else(|| map.get("href"))
            };
            field
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    FederationError::InvalidActorIdentifier(
                        "object carries no id, url, or href".to_string(),
                    )
                })
        }
        other => Err(FederationError::InvalidActorIdentifier(other.to_string())),
    }
}

/// Typed view over an actor document
///
/// The fields the followers store snapshots and the delivery pipeline
/// routes by. The raw JSON stays available through the resolver cache.
#[derive(Debug, Clone, Default)]
pub struct ActorDocument {
    pub id: Option<String>,
    pub inbox: Option<String>,
    pub shared_inbox: Option<String>,
    pub public_key_pem: Option<String>,
    pub name: Option<String>,
    pub preferred_username: Option<String>,
    pub icon_url: Option<String>,
}

impl ActorDocument {
    /// Parse the fields this crate consumes out of a raw actor document.
    pub fn parse(document: &Value) -> Result<Self> {
        let map = document.as_object().ok_or_else(|| {
            FederationError::InvalidJson("actor document is not an object".to_string())
        })?;

        let string = |value: Option<&Value>| value.and_then(Value::as_str).map(str::to_string);

        let icon_url = match map.get("icon") {
            Some(Value::String(url)) => Some(url.clone()),
            Some(Value::Object(icon)) => string(icon.get("url")),
            _ => None,
        };

        Ok(Self {
            id: string(map.get("id")),
            inbox: string(map.get("inbox")),
            shared_inbox: map
                .get("endpoints")
                .and_then(Value::as_object)
                .and_then(|endpoints| endpoints.get("sharedInbox"))
                .and_then(Value::as_str)
                .map(str::to_string),
            public_key_pem: map
                .get("publicKey")
                .and_then(Value::as_object)
                .and_then(|key| key.get("publicKeyPem"))
                .and_then(Value::as_str)
                .map(str::to_string),
            name: string(map.get("name")),
            preferred_username: string(map.get("preferredUsername")),
            icon_url,
        })
    }

    /// Inbox to deliver to, preferring the shared inbox when present.
    pub fn delivery_inbox(&self) -> Option<&str> {
        self.shared_inbox.as_deref().or(self.inbox.as_deref())
    }

    /// Delivery inbox, or `NoInbox` naming the actor.
    pub fn require_delivery_inbox(&self, actor_uri: &str) -> Result<String> {
        self.delivery_inbox()
            .map(str::to_string)
            .ok_or_else(|| FederationError::NoInbox(actor_uri.to_string()))
    }
}

/// WebFinger JRD response
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebFingerResponse {
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aliases: Option<Vec<String>>,
    #[serde(default)]
    pub links: Vec<WebFingerLink>,
}

/// WebFinger link
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebFingerLink {
    pub rel: String,
    #[serde(rename = "type")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

fn is_activitypub_self_link(link: &WebFingerLink) -> bool {
    link.rel == "self"
        && matches!(
            link.link_type.as_deref(),
            Some(ACTIVITY_JSON) | Some(LD_JSON_PROFILE)
        )
}

/// Remote actor resolver with a time-boxed cache
pub struct ActorResolver {
    config: Arc<FederationConfig>,
    transport: Arc<Transport>,
    cache: Arc<ActorCache>,
}

impl ActorResolver {
    pub fn new(
        config: Arc<FederationConfig>,
        transport: Arc<Transport>,
        cache: Arc<ActorCache>,
    ) -> Self {
        Self {
            config,
            transport,
            cache,
        }
    }

    /// Resolve an actor identifier to its document, via the cache.
    pub async fn resolve(&self, identifier: &str) -> Result<Arc<Value>> {
        self.resolve_with(identifier, false).await
    }

    /// Resolve, bypassing and refreshing the cache.
    pub async fn resolve_force(&self, identifier: &str) -> Result<Arc<Value>> {
        self.resolve_with(identifier, true).await
    }

    /// Resolve an inline actor value (`cc` entry, `attributedTo`).
    pub async fn resolve_value(&self, value: &Value) -> Result<Arc<Value>> {
        let identifier = extract_identifier(value)?;
        self.resolve(&identifier).await
    }

    async fn resolve_with(&self, identifier: &str, force: bool) -> Result<Arc<Value>> {
        let outcome = match classify(identifier)? {
            ActorIdentifier::Uri(uri) => self.fetch_actor(&uri, force).await,
            ActorIdentifier::Handle { user, host } => {
                let uri = self.webfinger_actor_uri(&user, &host).await?;
                self.fetch_actor(&uri, force).await
            }
        };

        let label = match &outcome {
            Ok(_) => "success",
            Err(error) if error.is_tombstone() => "tombstone",
            Err(_) => "error",
        };
        metrics::ACTOR_RESOLUTIONS_TOTAL
            .with_label_values(&[label])
            .inc();

        outcome
    }

    async fn fetch_actor(&self, actor_uri: &str, force: bool) -> Result<Arc<Value>> {
        self.validate_actor_url(actor_uri)?;

        if !force {
            if let Some(document) = self.cache.get(actor_uri).await {
                return Ok(document);
            }
        }

        if !self.config.http.allow_private_destinations {
            self.reject_private_destination(actor_uri).await?;
        }

        let document = self
            .transport
            .get_as(actor_uri, ACTIVITY_JSON, None, CachePolicy::Bypass)
            .await?;

        if !document.is_object() {
            return Err(FederationError::InvalidJson(format!(
                "actor document at {actor_uri} is not an object"
            )));
        }

        self.cache.insert(actor_uri, document.clone()).await;
        tracing::debug!(actor = %actor_uri, "Resolved remote actor");

        Ok(document)
    }

    /// Discover an actor URI for `user@host` via WebFinger.
    async fn webfinger_actor_uri(&self, user: &str, host: &str) -> Result<String> {
        let resource = format!("acct:{user}@{host}");
        // Plain HTTP only for loopback development peers.
        let scheme = if self.config.http.allow_private_destinations && is_local_host(host) {
            "http"
        } else {
            "https"
        };
        let url = format!(
            "{scheme}://{host}/.well-known/webfinger?resource={}",
            urlencoding::encode(&resource)
        );

        let body = self
            .transport
            .get_as(&url, JRD_JSON, None, CachePolicy::Bypass)
            .await?;
        let jrd: WebFingerResponse = serde_json::from_value((*body).clone())
            .map_err(|e| FederationError::InvalidJson(format!("{url}: {e}")))?;

        jrd.links
            .iter()
            .find(|link| is_activitypub_self_link(link))
            .and_then(|link| link.href.clone())
            .ok_or_else(|| {
                FederationError::InvalidActorIdentifier(format!(
                    "no ActivityPub self link for {resource}"
                ))
            })
    }

    /// Basic URL validation plus the static private-host guard.
    fn validate_actor_url(&self, actor_uri: &str) -> Result<()> {
        let parsed = url::Url::parse(actor_uri)
            .map_err(|e| FederationError::InvalidActorUrl(format!("{actor_uri}: {e}")))?;

        match parsed.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(FederationError::InvalidActorUrl(format!(
                    "unsupported scheme {scheme} in {actor_uri}"
                )));
            }
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| {
                FederationError::InvalidActorUrl(format!("missing host in {actor_uri}"))
            })?
            .to_ascii_lowercase();

        if !self.config.http.allow_private_destinations && is_disallowed_host(&host) {
            return Err(FederationError::InvalidActorUrl(format!(
                "refusing non-public host {host}"
            )));
        }

        Ok(())
    }

    /// Resolve DNS and reject hosts that look public but land on
    /// loopback/private addresses.
    async fn reject_private_destination(&self, actor_uri: &str) -> Result<()> {
        let parsed = url::Url::parse(actor_uri)
            .map_err(|e| FederationError::InvalidActorUrl(format!("{actor_uri}: {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| {
                FederationError::InvalidActorUrl(format!("missing host in {actor_uri}"))
            })?
            .trim_end_matches('.')
            .to_ascii_lowercase();
        let port = parsed.port_or_known_default().unwrap_or(443);

        let mut resolved_any = false;
        let lookup = tokio::net::lookup_host((host.as_str(), port))
            .await
            .map_err(|e| {
                FederationError::FetchFailed(format!("failed to resolve {host}: {e}"))
            })?;

        for addr in lookup {
            resolved_any = true;
            if is_disallowed_ip(addr.ip()) {
                return Err(FederationError::InvalidActorUrl(format!(
                    "{host} resolves to a non-public address"
                )));
            }
        }

        if !resolved_any {
            return Err(FederationError::FetchFailed(format!(
                "no DNS records for {host}"
            )));
        }

        Ok(())
    }
}

fn is_disallowed_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_multicast()
                || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unique_local()
                || v6.is_unicast_link_local()
                || v6.is_multicast()
                || v6.is_unspecified()
        }
    }
}

fn is_disallowed_host(host: &str) -> bool {
    let normalized = host.trim_end_matches('.').to_ascii_lowercase();
    if normalized == "localhost" || normalized.ends_with(".localhost") {
        return true;
    }

    normalized
        .parse::<IpAddr>()
        .map(is_disallowed_ip)
        .unwrap_or(false)
}

fn is_local_host(host: &str) -> bool {
    let without_port = host.rsplit_once(':').map_or(host, |(h, _)| h);
    is_disallowed_host(without_port)
}
