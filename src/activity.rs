//! ActivityStreams envelopes
//!
//! A typed Activity struct with an enumerated kind per concrete
//! ActivityPub verb, plus builders for the envelopes this crate sends.
//! The object payload itself is host-constructed JSON; the core only
//! needs the envelope fields and the addressing accessors.

use serde::Serialize;
use serde_json::Value;

/// The AS2 public addressing marker
pub const PUBLIC_AUDIENCE: &str = "https://www.w3.org/ns/activitystreams#Public";

/// The AS2 context emitted on every envelope
pub const ACTIVITYSTREAMS_CONTEXT: &str = "https://www.w3.org/ns/activitystreams";

/// Concrete Activity verbs this crate produces and routes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ActivityKind {
    Create,
    Update,
    Delete,
    Follow,
    Accept,
    Announce,
    Undo,
}

impl ActivityKind {
    /// Lowercase label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ActivityKind::Create => "create",
            ActivityKind::Update => "update",
            ActivityKind::Delete => "delete",
            ActivityKind::Follow => "follow",
            ActivityKind::Accept => "accept",
            ActivityKind::Announce => "announce",
            ActivityKind::Undo => "undo",
        }
    }
}

/// An outbound Activity envelope
///
/// `in_reply_to` is routing metadata extracted from the object at build
/// time; it never serializes on the envelope (the object already carries
/// its own `inReplyTo`).
#[derive(Debug, Clone, Serialize)]
pub struct Activity {
    #[serde(rename = "@context")]
    pub context: Value,
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub id: String,
    pub actor: String,
    pub object: Value,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub to: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<String>,
    #[serde(skip)]
    pub in_reply_to: Vec<String>,
}

impl Activity {
    /// CC addressing, as the dispatcher consumes it.
    pub fn cc(&self) -> &[String] {
        &self.cc
    }

    /// URLs this activity replies to, as the dispatcher consumes them.
    pub fn in_reply_to(&self) -> &[String] {
        &self.in_reply_to
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Serialize the wire body. Called once per dispatch; every
    /// destination receives the identical bytes.
    pub fn to_bytes(&self) -> crate::error::Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| crate::error::FederationError::Internal(anyhow::anyhow!(e)))
    }
}

/// Pull `inReplyTo` URLs out of an object payload.
///
/// Accepts a string, a Link-shaped object, or an array of either.
fn reply_targets(object: &Value) -> Vec<String> {
    fn target(value: &Value) -> Option<String> {
        match value {
            Value::String(url) => Some(url.clone()),
            Value::Object(map) => map
                .get("href")
                .or_else(|| map.get("id"))
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        }
    }

    match object.get("inReplyTo") {
        Some(Value::Array(values)) => values.iter().filter_map(target).collect(),
        Some(value) => target(value).into_iter().collect(),
        None => Vec::new(),
    }
}

/// Build ActivityPub activity envelopes
pub mod builder {
    use super::*;

    fn context() -> Value {
        Value::String(ACTIVITYSTREAMS_CONTEXT.to_string())
    }

    /// Build a Create activity around a host-constructed object.
    pub fn create(id: &str, actor: &str, object: Value, to: Vec<String>, cc: Vec<String>) -> Activity {
        let in_reply_to = reply_targets(&object);
        Activity {
            context: context(),
            kind: ActivityKind::Create,
            id: id.to_string(),
            actor: actor.to_string(),
            object,
            to,
            cc,
            published: Some(chrono::Utc::now().to_rfc3339()),
            in_reply_to,
        }
    }

    /// Build an Update activity (edited object or profile change).
    pub fn update(id: &str, actor: &str, object: Value) -> Activity {
        let in_reply_to = reply_targets(&object);
        Activity {
            context: context(),
            kind: ActivityKind::Update,
            id: id.to_string(),
            actor: actor.to_string(),
            object,
            to: vec![PUBLIC_AUDIENCE.to_string()],
            cc: Vec::new(),
            published: Some(chrono::Utc::now().to_rfc3339()),
            in_reply_to,
        }
    }

    /// Build a Delete activity wrapping a Tombstone.
    pub fn delete(id: &str, actor: &str, object_uri: &str, to: Vec<String>, cc: Vec<String>) -> Activity {
        Activity {
            context: context(),
            kind: ActivityKind::Delete,
            id: id.to_string(),
            actor: actor.to_string(),
            object: serde_json::json!({
                "type": "Tombstone",
                "id": object_uri
            }),
            to,
            cc,
            published: None,
            in_reply_to: Vec::new(),
        }
    }

    /// Build a Follow activity.
    pub fn follow(id: &str, actor: &str, object_uri: &str) -> Activity {
        Activity {
            context: context(),
            kind: ActivityKind::Follow,
            id: id.to_string(),
            actor: actor.to_string(),
            object: Value::String(object_uri.to_string()),
            to: Vec::new(),
            cc: Vec::new(),
            published: None,
            in_reply_to: Vec::new(),
        }
    }

    /// Build an Accept activity wrapping the original Follow.
    pub fn accept(id: &str, actor: &str, object: Value) -> Activity {
        Activity {
            context: context(),
            kind: ActivityKind::Accept,
            id: id.to_string(),
            actor: actor.to_string(),
            object,
            to: Vec::new(),
            cc: Vec::new(),
            published: None,
            in_reply_to: Vec::new(),
        }
    }

    /// Build an Announce activity (boost).
    pub fn announce(id: &str, actor: &str, object_uri: &str, to: Vec<String>, cc: Vec<String>) -> Activity {
        Activity {
            context: context(),
            kind: ActivityKind::Announce,
            id: id.to_string(),
            actor: actor.to_string(),
            object: Value::String(object_uri.to_string()),
            to,
            cc,
            published: Some(chrono::Utc::now().to_rfc3339()),
            in_reply_to: Vec::new(),
        }
    }

    /// Build an Undo activity wrapping the activity being undone.
    pub fn undo(id: &str, actor: &str, object: Value) -> Activity {
        Activity {
            context: context(),
            kind: ActivityKind::Undo,
            id: id.to_string(),
            actor: actor.to_string(),
            object,
            to: Vec::new(),
            cc: Vec::new(),
            published: None,
            in_reply_to: Vec::new(),
        }
    }
}
