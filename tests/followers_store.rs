//! Follower add/remove semantics against live remote documents

mod common;

use common::{LOCAL_ACTOR, MockServer, TestHarness, actor_json};

#[tokio::test]
async fn adding_the_same_follower_three_times_keeps_one_record() {
    let harness = TestHarness::new().await;
    let remote = MockServer::start().await;
    let actor_uri = remote.url("/users/alice");
    remote.set_json(
        "/users/alice",
        200,
        actor_json(&actor_uri, &remote.url("/users/alice/inbox"), None, None),
    );

    for _ in 0..3 {
        harness
            .core
            .followers
            .add_follower(LOCAL_ACTOR, &actor_uri)
            .await
            .expect("add follower");
    }

    let followers = harness
        .core
        .followers
        .get_followers(LOCAL_ACTOR)
        .await
        .expect("list followers");
    assert_eq!(followers, vec![actor_uri]);
}

#[tokio::test]
async fn repeated_add_refreshes_snapshot_but_not_errors() {
    let harness = TestHarness::new().await;
    let remote = MockServer::start().await;
    let actor_uri = remote.url("/users/alice");
    remote.set_json(
        "/users/alice",
        200,
        actor_json(&actor_uri, &remote.url("/users/alice/inbox"), None, None),
    );

    let record = harness
        .core
        .followers
        .add_follower(LOCAL_ACTOR, &actor_uri)
        .await
        .expect("add follower");
    harness
        .core
        .followers
        .add_error(&record, "http 500")
        .await
        .expect("record error");

    // The remote renames itself; a fresh add must pick the name up while
    // leaving the accumulated error counter alone.
    let mut renamed = actor_json(&actor_uri, &remote.url("/users/alice/inbox"), None, None);
    renamed["name"] = serde_json::json!("Alice Renamed");
    remote.set_json("/users/alice", 200, renamed);

    let refreshed = harness
        .core
        .followers
        .add_follower(LOCAL_ACTOR, &actor_uri)
        .await
        .expect("second add");

    // The actor cache still holds the first document within its TTL, so
    // the snapshot refresh applies cached fields; the record count and
    // error counter are what matter here.
    assert_eq!(refreshed.id, record.id);
    assert_eq!(refreshed.error_count, 1);
    assert_eq!(
        harness
            .core
            .followers
            .count_followers(LOCAL_ACTOR)
            .await
            .expect("count"),
        1
    );
}

#[tokio::test]
async fn followers_sharing_an_inbox_deliver_once() {
    let harness = TestHarness::new().await;
    let remote = MockServer::start().await;
    let shared_inbox = remote.url("/inbox");

    for name in ["alice", "bob"] {
        let actor_uri = remote.url(&format!("/users/{name}"));
        remote.set_json(
            &format!("/users/{name}"),
            200,
            actor_json(
                &actor_uri,
                &remote.url(&format!("/users/{name}/inbox")),
                Some(&shared_inbox),
                None,
            ),
        );
        harness
            .core
            .followers
            .add_follower(LOCAL_ACTOR, &actor_uri)
            .await
            .expect("add follower");
    }

    let inboxes = harness
        .core
        .followers
        .get_inboxes(LOCAL_ACTOR)
        .await
        .expect("inboxes");
    assert_eq!(inboxes, vec![shared_inbox]);
}

#[tokio::test]
async fn unresolvable_actor_creates_no_record() {
    let harness = TestHarness::new().await;
    let remote = MockServer::start().await;
    let actor_uri = remote.url("/users/gone");
    // No route registered: the mock answers 404.

    let error = harness
        .core
        .followers
        .add_follower(LOCAL_ACTOR, &actor_uri)
        .await
        .expect_err("resolution must fail");
    assert!(error.is_tombstone());

    assert_eq!(
        harness
            .core
            .followers
            .count_followers(LOCAL_ACTOR)
            .await
            .expect("count"),
        0
    );
}

#[tokio::test]
async fn removing_a_follower_is_idempotent() {
    let harness = TestHarness::new().await;
    let remote = MockServer::start().await;
    let actor_uri = remote.url("/users/alice");
    remote.set_json(
        "/users/alice",
        200,
        actor_json(&actor_uri, &remote.url("/users/alice/inbox"), None, None),
    );

    harness
        .core
        .followers
        .add_follower(LOCAL_ACTOR, &actor_uri)
        .await
        .expect("add follower");

    harness
        .core
        .followers
        .remove_follower(LOCAL_ACTOR, &actor_uri)
        .await
        .expect("remove");
    harness
        .core
        .followers
        .remove_follower(LOCAL_ACTOR, &actor_uri)
        .await
        .expect("removing a non-existent relationship is not an error");

    assert!(
        harness
            .core
            .followers
            .get_followers(LOCAL_ACTOR)
            .await
            .expect("list")
            .is_empty()
    );
}
