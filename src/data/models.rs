//! Data models
//!
//! Rust structs representing follower store rows.
//! All models use ULID for IDs and chrono for timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Entity ID wrapper (ULID format, 26 characters)
///
/// Example: "01ARZ3NDEKTSV4RRFFQ69G5FAV"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Generate a new ULID
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    /// Create from existing string
    pub fn from_string(s: String) -> Self {
        Self(s)
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

/// A remote actor following a local actor
///
/// One row per (local actor, follower actor URI). The display fields are
/// a snapshot of the remote actor document; `error_count` tracks
/// consecutive resolution failures for the cleanup policy.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FollowerRecord {
    pub id: String,
    /// Owning local actor id
    pub local_actor: String,
    /// Follower's canonical actor URI
    pub actor_uri: String,
    /// Personal inbox URL
    pub inbox_url: String,
    /// Server-wide shared inbox URL, when published
    pub shared_inbox_url: Option<String>,
    pub display_name: Option<String>,
    pub preferred_username: Option<String>,
    pub icon_url: Option<String>,
    /// Consecutive resolution errors; reset on successful refresh
    pub error_count: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FollowerRecord {
    /// Inbox deliveries should target, preferring the shared inbox.
    pub fn delivery_inbox(&self) -> &str {
        self.shared_inbox_url.as_deref().unwrap_or(&self.inbox_url)
    }
}
