//! Common test utilities for federation integration tests
//!
//! Spins up a federation core against a temporary SQLite file plus
//! throwaway HTTP servers that play the part of remote ActivityPub
//! instances (actor documents, WebFinger, inboxes).

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::response::Response;
use tempfile::TempDir;
use tokio::net::TcpListener;

use pubwire::FederationCore;
use pubwire::config::{
    CacheConfig, DatabaseConfig, FederationConfig, FollowersConfig, HttpConfig, InstanceConfig,
};
use pubwire::host::HookRegistry;
use pubwire::host::memory::MemoryHost;

/// A request the mock remote server received
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub body: Vec<u8>,
}

#[derive(Default)]
struct MockState {
    /// GET path -> (status, body)
    routes: Mutex<HashMap<String, (u16, String)>>,
    /// POST path -> status (default 202)
    post_status: Mutex<HashMap<String, u16>>,
    requests: Mutex<Vec<Recorded>>,
}

/// Throwaway remote ActivityPub instance
pub struct MockServer {
    pub addr: SocketAddr,
    state: Arc<MockState>,
}

impl MockServer {
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        let app = Router::new()
            .fallback(handle_request)
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("mock server");
        });

        Self { addr, state }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Host (with port) as it appears in handles and Host headers.
    pub fn host(&self) -> String {
        self.addr.to_string()
    }

    /// Serve a JSON document at a GET path.
    pub fn set_json(&self, path: &str, status: u16, body: serde_json::Value) {
        self.state
            .routes
            .lock()
            .unwrap()
            .insert(path.to_string(), (status, body.to_string()));
    }

    /// Serve a raw body at a GET path (malformed JSON scenarios).
    pub fn set_raw(&self, path: &str, status: u16, body: &str) {
        self.state
            .routes
            .lock()
            .unwrap()
            .insert(path.to_string(), (status, body.to_string()));
    }

    /// Status answered to POSTs at a path (default 202).
    pub fn set_post_status(&self, path: &str, status: u16) {
        self.state
            .post_status
            .lock()
            .unwrap()
            .insert(path.to_string(), status);
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().unwrap().clone()
    }

    /// Number of GETs a path has received.
    pub fn get_count(&self, path: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.method == "GET" && r.path == path)
            .count()
    }

    /// Bodies POSTed to a path.
    pub fn posts_to(&self, path: &str) -> Vec<Vec<u8>> {
        self.requests()
            .iter()
            .filter(|r| r.method == "POST" && r.path == path)
            .map(|r| r.body.clone())
            .collect()
    }
}

async fn handle_request(State(state): State<Arc<MockState>>, request: Request) -> Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let body = to_bytes(request.into_body(), 2 * 1024 * 1024)
        .await
        .map(|bytes| bytes.to_vec())
        .unwrap_or_default();

    state.requests.lock().unwrap().push(Recorded {
        method: method.clone(),
        path: path.clone(),
        body,
    });

    if method == "POST" {
        let status = state
            .post_status
            .lock()
            .unwrap()
            .get(&path)
            .copied()
            .unwrap_or(202);
        return Response::builder()
            .status(status)
            .body(Body::empty())
            .expect("response");
    }

    let route = state.routes.lock().unwrap().get(&path).cloned();
    match route {
        Some((status, body)) => Response::builder()
            .status(status)
            .header("content-type", "application/activity+json")
            .body(Body::from(body))
            .expect("response"),
        None => Response::builder()
            .status(404)
            .body(Body::empty())
            .expect("response"),
    }
}

/// Actor document JSON the way remote servers publish it.
pub fn actor_json(
    actor_uri: &str,
    inbox: &str,
    shared_inbox: Option<&str>,
    public_key_pem: Option<&str>,
) -> serde_json::Value {
    let mut actor = serde_json::json!({
        "@context": "https://www.w3.org/ns/activitystreams",
        "type": "Person",
        "id": actor_uri,
        "inbox": inbox,
        "preferredUsername": "alice",
        "name": "Alice",
    });

    if let Some(shared_inbox) = shared_inbox {
        actor["endpoints"] = serde_json::json!({ "sharedInbox": shared_inbox });
    }
    if let Some(pem) = public_key_pem {
        actor["publicKey"] = serde_json::json!({
            "id": format!("{actor_uri}#main-key"),
            "owner": actor_uri,
            "publicKeyPem": pem,
        });
    }

    actor
}

/// Federation core wired against a temp database and an in-memory host
pub struct TestHarness {
    pub core: FederationCore,
    pub host: Arc<MemoryHost>,
    pub _temp_dir: TempDir,
}

pub const LOCAL_ACTOR: &str = "1";
pub const LOCAL_ACTOR_URI: &str = "http://blog.test.localhost/users/jon";

impl TestHarness {
    pub async fn new() -> Self {
        Self::with_actor_ttl(604_800).await
    }

    /// Build a harness with an explicit actor cache TTL in seconds.
    pub async fn with_actor_ttl(actor_ttl_seconds: u64) -> Self {
        let temp_dir = TempDir::new().expect("tempdir");

        let config = FederationConfig {
            instance: InstanceConfig {
                domain: "blog.test.localhost".to_string(),
                base_url: "http://blog.test.localhost".to_string(),
                software_name: "pubwire".to_string(),
                software_version: "0.1.0".to_string(),
                home_url: "http://blog.test.localhost".to_string(),
                service_actor: "application".to_string(),
            },
            http: HttpConfig {
                timeout_seconds: 15,
                max_response_bytes: 1_048_576,
                max_redirects: 3,
                // Remote peers in these tests live on 127.0.0.1.
                allow_private_destinations: true,
            },
            cache: CacheConfig {
                actor_ttl_seconds,
                response_ttl_seconds: 3600,
            },
            followers: FollowersConfig {
                error_threshold: 5,
                refresh_batch: 5,
                cleanup_batch: 50,
                inbox_page_size: 500,
            },
            database: DatabaseConfig {
                path: temp_dir.path().join("federation.db"),
            },
        };

        let host = Arc::new(MemoryHost::new());
        host.add_actor(LOCAL_ACTOR, LOCAL_ACTOR_URI, "Jon").await;
        host.add_actor(
            "application",
            "http://blog.test.localhost/actor",
            "Service Actor",
        )
        .await;

        let core = FederationCore::new(config, host.clone(), host.clone(), HookRegistry::new())
            .await
            .expect("federation core");

        Self {
            core,
            host,
            _temp_dir: temp_dir,
        }
    }
}
