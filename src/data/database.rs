//! SQLite followers store
//!
//! All durable state of the federation core lives here. Writes are keyed
//! by (local actor, follower actor URI); error-counter increments happen
//! inside a single UPDATE so the deletion threshold stays meaningful
//! under concurrent background jobs.

use std::collections::HashSet;
use std::path::Path;

use chrono::Utc;
use sqlx::SqlitePool;

use crate::data::models::{EntityId, FollowerRecord};
use crate::error::{FederationError, Result};
use crate::resolver::ActorDocument;

/// Followers store on SQLite
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect to the SQLite file and run migrations.
    pub async fn connect(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| FederationError::Database(sqlx::Error::Io(e)))?;
        }

        let connection_string = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&connection_string).await?;

        sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
            tracing::error!("Migration failed: {}", e);
            FederationError::Internal(anyhow::anyhow!("migration failed: {e}"))
        })?;

        tracing::info!("Followers store connected and migrated");
        Ok(Self { pool })
    }

    /// Upsert a follower relationship from a resolved actor document.
    ///
    /// A second upsert for the same (local actor, actor URI) pair
    /// refreshes the cached display fields and inboxes and bumps
    /// `updated_at`; it never touches the error counter.
    pub async fn upsert_follower(
        &self,
        local_actor: &str,
        actor_uri: &str,
        actor: &ActorDocument,
    ) -> Result<FollowerRecord> {
        let inbox_url = actor
            .inbox
            .clone()
            .ok_or_else(|| FederationError::NoInbox(actor_uri.to_string()))?;
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO followers (id, local_actor, actor_uri, inbox_url, shared_inbox_url, \
             display_name, preferred_username, icon_url, error_count, last_error, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, NULL, ?, ?) \
             ON CONFLICT (local_actor, actor_uri) DO UPDATE SET \
             inbox_url = excluded.inbox_url, \
             shared_inbox_url = excluded.shared_inbox_url, \
             display_name = excluded.display_name, \
             preferred_username = excluded.preferred_username, \
             icon_url = excluded.icon_url, \
             updated_at = excluded.updated_at",
        )
        .bind(EntityId::new().0)
        .bind(local_actor)
        .bind(actor_uri)
        .bind(&inbox_url)
        .bind(&actor.shared_inbox)
        .bind(&actor.name)
        .bind(&actor.preferred_username)
        .bind(&actor.icon_url)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_follower(local_actor, actor_uri)
            .await?
            .ok_or_else(|| FederationError::Internal(anyhow::anyhow!("upserted row vanished")))
    }

    /// Delete a follower relationship. Idempotent.
    pub async fn remove_follower(&self, local_actor: &str, actor_uri: &str) -> Result<()> {
        sqlx::query("DELETE FROM followers WHERE local_actor = ? AND actor_uri = ?")
            .bind(local_actor)
            .bind(actor_uri)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete a follower row by id. Idempotent.
    pub async fn remove_follower_by_id(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM followers WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// One follower relationship, if present.
    pub async fn get_follower(
        &self,
        local_actor: &str,
        actor_uri: &str,
    ) -> Result<Option<FollowerRecord>> {
        let record = sqlx::query_as::<_, FollowerRecord>(
            "SELECT * FROM followers WHERE local_actor = ? AND actor_uri = ?",
        )
        .bind(local_actor)
        .bind(actor_uri)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    /// All follower actor URIs for a local actor.
    pub async fn get_followers(&self, local_actor: &str) -> Result<Vec<String>> {
        let uris = sqlx::query_scalar::<_, String>(
            "SELECT actor_uri FROM followers WHERE local_actor = ? ORDER BY created_at DESC",
        )
        .bind(local_actor)
        .fetch_all(&self.pool)
        .await?;
        Ok(uris)
    }

    /// Number of followers of a local actor.
    pub async fn count_followers(&self, local_actor: &str) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM followers WHERE local_actor = ?",
        )
        .bind(local_actor)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// One page of follower records for a local actor.
    pub async fn list_followers(
        &self,
        local_actor: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<FollowerRecord>> {
        let records = sqlx::query_as::<_, FollowerRecord>(
            "SELECT * FROM followers WHERE local_actor = ? ORDER BY created_at DESC LIMIT ? OFFSET ?",
        )
        .bind(local_actor)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    /// Deduplicated delivery inboxes for a local actor's followers.
    ///
    /// Prefers the shared inbox over the personal inbox so one server
    /// receives one POST. Reads in pages of `page_size` so thousands of
    /// followers never materialize at once.
    pub async fn get_inboxes(&self, local_actor: &str, page_size: i64) -> Result<Vec<String>> {
        let page_size = page_size.max(1);
        let mut seen = HashSet::new();
        let mut inboxes = Vec::new();
        let mut offset = 0i64;

        loop {
            let page = sqlx::query_scalar::<_, String>(
                "SELECT COALESCE(shared_inbox_url, inbox_url) FROM followers \
                 WHERE local_actor = ? ORDER BY id LIMIT ? OFFSET ?",
            )
            .bind(local_actor)
            .bind(page_size)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

            let page_len = page.len() as i64;
            for inbox in page {
                if seen.insert(inbox.clone()) {
                    inboxes.push(inbox);
                }
            }

            if page_len < page_size {
                break;
            }
            offset += page_size;
        }

        Ok(inboxes)
    }

    /// Up to `limit` follower records with the oldest snapshots.
    pub async fn get_outdated_followers(&self, limit: i64) -> Result<Vec<FollowerRecord>> {
        let records = sqlx::query_as::<_, FollowerRecord>(
            "SELECT * FROM followers ORDER BY updated_at ASC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    /// Up to `limit` follower records with a non-zero error counter.
    pub async fn get_faulty_followers(&self, limit: i64) -> Result<Vec<FollowerRecord>> {
        let records = sqlx::query_as::<_, FollowerRecord>(
            "SELECT * FROM followers WHERE error_count > 0 ORDER BY error_count DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    /// Follower records whose delivery target is the given inbox URL.
    ///
    /// Used to attribute a failed delivery to the followers behind a
    /// (possibly shared) inbox.
    pub async fn followers_for_inbox(
        &self,
        local_actor: &str,
        inbox_url: &str,
    ) -> Result<Vec<FollowerRecord>> {
        let records = sqlx::query_as::<_, FollowerRecord>(
            "SELECT * FROM followers WHERE local_actor = ? \
             AND COALESCE(shared_inbox_url, inbox_url) = ?",
        )
        .bind(local_actor)
        .bind(inbox_url)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    /// Record a resolution/delivery error and return the new counter.
    ///
    /// The increment happens inside the UPDATE; concurrent callers each
    /// observe a distinct counter value.
    pub async fn add_error(&self, id: &str, message: &str) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "UPDATE followers SET error_count = error_count + 1, last_error = ? \
             WHERE id = ? RETURNING error_count",
        )
        .bind(message)
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Clear the error counter after a successful refresh.
    pub async fn reset_errors(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE followers SET error_count = 0, last_error = NULL WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Current error counter for a follower row.
    pub async fn count_errors(&self, id: &str) -> Result<i64> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT error_count FROM followers WHERE id = ?")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor_doc(inbox: &str, shared: Option<&str>) -> ActorDocument {
        ActorDocument {
            id: None,
            inbox: Some(inbox.to_string()),
            shared_inbox: shared.map(str::to_string),
            public_key_pem: None,
            name: Some("Alice".to_string()),
            preferred_username: Some("alice".to_string()),
            icon_url: None,
        }
    }

    async fn test_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let db = Database::connect(&dir.path().join("followers.db"))
            .await
            .expect("connect");
        (dir, db)
    }

    #[tokio::test]
    async fn upsert_is_idempotent_and_preserves_errors() {
        let (_dir, db) = test_db().await;
        let doc = actor_doc("https://remote.example/users/alice/inbox", None);

        let first = db
            .upsert_follower("1", "https://remote.example/users/alice", &doc)
            .await
            .expect("insert");
        db.add_error(&first.id, "http 500").await.expect("error");

        let renamed = ActorDocument {
            name: Some("Alice II".to_string()),
            ..doc.clone()
        };
        let second = db
            .upsert_follower("1", "https://remote.example/users/alice", &renamed)
            .await
            .expect("upsert");

        assert_eq!(first.id, second.id);
        assert_eq!(second.display_name.as_deref(), Some("Alice II"));
        // A refreshed snapshot does not forgive accumulated errors.
        assert_eq!(second.error_count, 1);
        assert_eq!(db.count_followers("1").await.expect("count"), 1);
    }

    #[tokio::test]
    async fn get_inboxes_deduplicates_shared_inboxes() {
        let (_dir, db) = test_db().await;
        let shared = Some("https://remote.example/inbox");

        db.upsert_follower(
            "1",
            "https://remote.example/users/alice",
            &actor_doc("https://remote.example/users/alice/inbox", shared),
        )
        .await
        .expect("alice");
        db.upsert_follower(
            "1",
            "https://remote.example/users/bob",
            &actor_doc("https://remote.example/users/bob/inbox", shared),
        )
        .await
        .expect("bob");
        db.upsert_follower(
            "1",
            "https://other.example/users/carol",
            &actor_doc("https://other.example/users/carol/inbox", None),
        )
        .await
        .expect("carol");

        // Page size of 1 exercises the batched read path.
        let inboxes = db.get_inboxes("1", 1).await.expect("inboxes");
        assert_eq!(inboxes.len(), 2);
        assert!(inboxes.contains(&"https://remote.example/inbox".to_string()));
        assert!(inboxes.contains(&"https://other.example/users/carol/inbox".to_string()));
    }

    #[tokio::test]
    async fn error_accounting_is_atomic_and_resettable() {
        let (_dir, db) = test_db().await;
        let record = db
            .upsert_follower(
                "1",
                "https://remote.example/users/alice",
                &actor_doc("https://remote.example/users/alice/inbox", None),
            )
            .await
            .expect("insert");

        assert_eq!(db.add_error(&record.id, "timeout").await.expect("1st"), 1);
        assert_eq!(db.add_error(&record.id, "http 500").await.expect("2nd"), 2);
        assert_eq!(db.count_errors(&record.id).await.expect("count"), 2);

        let faulty = db.get_faulty_followers(10).await.expect("faulty");
        assert_eq!(faulty.len(), 1);
        assert_eq!(faulty[0].last_error.as_deref(), Some("http 500"));

        db.reset_errors(&record.id).await.expect("reset");
        assert_eq!(db.count_errors(&record.id).await.expect("count"), 0);
        assert!(db.get_faulty_followers(10).await.expect("faulty").is_empty());
    }

    #[tokio::test]
    async fn outdated_followers_come_oldest_first() {
        let (_dir, db) = test_db().await;
        let older = db
            .upsert_follower(
                "1",
                "https://remote.example/users/alice",
                &actor_doc("https://remote.example/users/alice/inbox", None),
            )
            .await
            .expect("alice");
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        db.upsert_follower(
            "1",
            "https://remote.example/users/bob",
            &actor_doc("https://remote.example/users/bob/inbox", None),
        )
        .await
        .expect("bob");

        let outdated = db.get_outdated_followers(1).await.expect("outdated");
        assert_eq!(outdated.len(), 1);
        assert_eq!(outdated[0].id, older.id);
    }

    #[tokio::test]
    async fn remove_follower_is_idempotent() {
        let (_dir, db) = test_db().await;
        db.upsert_follower(
            "1",
            "https://remote.example/users/alice",
            &actor_doc("https://remote.example/users/alice/inbox", None),
        )
        .await
        .expect("insert");

        db.remove_follower("1", "https://remote.example/users/alice")
            .await
            .expect("remove");
        db.remove_follower("1", "https://remote.example/users/alice")
            .await
            .expect("second remove is not an error");
        assert_eq!(db.count_followers("1").await.expect("count"), 0);
    }

    #[tokio::test]
    async fn followers_for_inbox_matches_shared_and_personal() {
        let (_dir, db) = test_db().await;
        let shared = Some("https://remote.example/inbox");
        db.upsert_follower(
            "1",
            "https://remote.example/users/alice",
            &actor_doc("https://remote.example/users/alice/inbox", shared),
        )
        .await
        .expect("alice");
        db.upsert_follower(
            "1",
            "https://remote.example/users/bob",
            &actor_doc("https://remote.example/users/bob/inbox", shared),
        )
        .await
        .expect("bob");

        let behind_shared = db
            .followers_for_inbox("1", "https://remote.example/inbox")
            .await
            .expect("matches");
        assert_eq!(behind_shared.len(), 2);

        let behind_personal = db
            .followers_for_inbox("1", "https://remote.example/users/alice/inbox")
            .await
            .expect("no match: shared inbox wins");
        assert!(behind_personal.is_empty());
    }
}
