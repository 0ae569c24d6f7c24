//! Inbound signature verification against resolved remote keys

mod common;

use common::{MockServer, TestHarness, actor_json};
use http::{HeaderMap, HeaderValue};
use pubwire::error::FederationError;
use pubwire::signature;
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};

fn generate_keypair() -> (String, String) {
    let mut rng = rand::thread_rng();
    let private_key = RsaPrivateKey::new(&mut rng, 1024).expect("keygen");
    let public_key = RsaPublicKey::from(&private_key);
    (
        private_key
            .to_pkcs8_pem(LineEnding::LF)
            .expect("private pem")
            .to_string(),
        public_key
            .to_public_key_pem(LineEnding::LF)
            .expect("public pem"),
    )
}

/// Sign a POST to the local inbox the way a remote peer would.
fn signed_headers(private_pem: &str, key_id: &str, body: &[u8]) -> HeaderMap {
    let signed = signature::sign_request(
        "POST",
        "http://blog.test.localhost/inbox",
        Some(body),
        private_pem,
        key_id,
    )
    .expect("sign request");

    let mut headers = HeaderMap::new();
    headers.insert("host", HeaderValue::from_static("blog.test.localhost"));
    headers.insert("date", HeaderValue::from_str(&signed.date).expect("date"));
    headers.insert(
        "digest",
        HeaderValue::from_str(&signed.digest.expect("digest for body")).expect("digest"),
    );
    headers.insert(
        "signature",
        HeaderValue::from_str(&signed.signature).expect("signature"),
    );
    headers
}

#[tokio::test]
async fn a_correctly_signed_request_verifies_against_the_published_key() {
    let harness = TestHarness::new().await;
    let remote = MockServer::start().await;
    let (private_pem, public_pem) = generate_keypair();

    let actor_uri = remote.url("/users/alice");
    remote.set_json(
        "/users/alice",
        200,
        actor_json(
            &actor_uri,
            &remote.url("/users/alice/inbox"),
            None,
            Some(&public_pem),
        ),
    );

    let body = br#"{"type":"Follow","actor":"alice"}"#;
    let headers = signed_headers(&private_pem, &format!("{actor_uri}#main-key"), body);

    let verified = harness
        .core
        .verify_inbound("POST", "/inbox", &headers, Some(body))
        .await
        .expect("verification succeeds");

    assert_eq!(verified.actor_uri, actor_uri);
    assert!(signature::key_id_matches_actor(
        &format!("{actor_uri}#main-key"),
        &verified.actor_uri
    ));
}

#[tokio::test]
async fn a_signature_from_the_wrong_key_is_rejected_with_401() {
    let harness = TestHarness::new().await;
    let remote = MockServer::start().await;
    let (signer_private, _) = generate_keypair();
    let (_, published_public) = generate_keypair();

    let actor_uri = remote.url("/users/mallory");
    remote.set_json(
        "/users/mallory",
        200,
        actor_json(
            &actor_uri,
            &remote.url("/users/mallory/inbox"),
            None,
            Some(&published_public),
        ),
    );

    let body = br#"{"type":"Create"}"#;
    let headers = signed_headers(&signer_private, &format!("{actor_uri}#main-key"), body);

    let error = harness
        .core
        .verify_inbound("POST", "/inbox", &headers, Some(body))
        .await
        .expect_err("mismatched key must fail");
    assert!(matches!(error, FederationError::SignatureVerification(_)));
    assert_eq!(error.http_status(), 401);

    // The stale-key retry refetched the document once.
    assert_eq!(remote.get_count("/users/mallory"), 2);
}

#[tokio::test]
async fn a_tampered_body_fails_on_the_digest_before_any_rsa() {
    let harness = TestHarness::new().await;
    let remote = MockServer::start().await;
    let (private_pem, public_pem) = generate_keypair();

    let actor_uri = remote.url("/users/alice");
    remote.set_json(
        "/users/alice",
        200,
        actor_json(
            &actor_uri,
            &remote.url("/users/alice/inbox"),
            None,
            Some(&public_pem),
        ),
    );

    let body = br#"{"type":"Create","content":"original"}"#;
    let headers = signed_headers(&private_pem, &format!("{actor_uri}#main-key"), body);

    let tampered = br#"{"type":"Create","content":"tampered"}"#;
    let error = harness
        .core
        .verify_inbound("POST", "/inbox", &headers, Some(tampered))
        .await
        .expect_err("tampered body must fail");
    assert!(matches!(error, FederationError::DigestMismatch));
    assert_eq!(error.http_status(), 401);
}

#[tokio::test]
async fn a_signer_without_a_published_key_never_passes() {
    let harness = TestHarness::new().await;
    let remote = MockServer::start().await;
    let (private_pem, _) = generate_keypair();

    let actor_uri = remote.url("/users/keyless");
    remote.set_json(
        "/users/keyless",
        200,
        actor_json(&actor_uri, &remote.url("/users/keyless/inbox"), None, None),
    );

    let body = br#"{"type":"Create"}"#;
    let headers = signed_headers(&private_pem, &format!("{actor_uri}#main-key"), body);

    let error = harness
        .core
        .verify_inbound("POST", "/inbox", &headers, Some(body))
        .await
        .expect_err("missing key is a verification failure, not a pass");
    assert!(matches!(error, FederationError::SignatureVerification(_)));
    assert_eq!(error.http_status(), 401);
}

#[tokio::test]
async fn a_missing_signature_header_is_rejected_like_a_malformed_one() {
    let harness = TestHarness::new().await;

    let body = br#"{"type":"Create"}"#;
    let mut headers = HeaderMap::new();
    headers.insert("host", HeaderValue::from_static("blog.test.localhost"));

    let missing = harness
        .core
        .verify_inbound("POST", "/inbox", &headers, Some(body))
        .await
        .expect_err("missing header must fail");
    assert!(matches!(missing, FederationError::SignatureParse(_)));
    assert_eq!(missing.http_status(), 401);

    headers.insert(
        "signature",
        HeaderValue::from_static("not a signature header at all"),
    );
    let malformed = harness
        .core
        .verify_inbound("POST", "/inbox", &headers, Some(body))
        .await
        .expect_err("malformed header must fail");
    assert!(matches!(malformed, FederationError::SignatureParse(_)));
    assert_eq!(malformed.http_status(), 401);
}
