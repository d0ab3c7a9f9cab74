//! Integration tests: the store server on a real socket, reached through
//! raw HTTP, the HTTP remote adapter and the sync facade.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::cache::LocalCache;
use crate::config::{Config, SyncConfig};
use crate::errors::SyncError;
use crate::models::{Day, FixedClock, PersonRecord};
use crate::remote::{HttpRemoteStore, RemoteEvent, RemoteStore, CONNECTED_PATH};
use crate::server::{create_router, AppState};
use crate::sync::{Persons, SyncEvent, SyncMode, SyncService};

const PSK: &str = "test-api-key";
const WAIT: Duration = Duration::from_secs(5);

/// Test fixture for integration tests.
struct TestFixture {
    client: Client,
    base_url: String,
    _temp_dir: TempDir,
}

impl TestFixture {
    async fn new() -> Self {
        Self::with_psk(Some(PSK.to_string())).await
    }

    async fn with_psk(psk: Option<String>) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        let config = Config {
            api_psk: psk.clone(),
            db_path: temp_dir.path().join("store.sqlite"),
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: "warn".to_string(),
        };
        let state = AppState::open(config).await.expect("Failed to open store");
        let app = create_router(state);

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get addr");
        let base_url = format!("http://{}", addr);

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let mut client_builder = Client::builder();
        if let Some(key) = psk {
            let mut headers = reqwest::header::HeaderMap::new();
            headers.insert("x-api-key", key.parse().unwrap());
            client_builder = client_builder.default_headers(headers);
        }

        TestFixture {
            client: client_builder.build().unwrap(),
            base_url,
            _temp_dir: temp_dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            remote_url: self.base_url.clone(),
            api_psk: Some(PSK.to_string()),
            mode_check_interval: Duration::from_millis(20),
            probe_interval: Duration::from_millis(50),
            retry_delay: Duration::from_millis(50),
            request_timeout: Duration::from_secs(2),
            ..Default::default()
        }
    }

    fn remote(&self) -> HttpRemoteStore {
        HttpRemoteStore::new(&self.sync_config()).unwrap()
    }

    async fn get_json(&self, path: &str) -> Value {
        self.client
            .get(self.url(path))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }
}

async fn next_event(subscription: &mut crate::remote::RemoteSubscription) -> RemoteEvent {
    tokio::time::timeout(WAIT, subscription.next())
        .await
        .expect("no event in time")
        .expect("subscription closed")
}

/// Next value event, skipping transient errors.
async fn next_value(subscription: &mut crate::remote::RemoteSubscription) -> Option<Value> {
    loop {
        if let RemoteEvent::Value(value) = next_event(subscription).await {
            return value;
        }
    }
}

// ==================== SERVER ====================

#[tokio::test]
async fn test_health_check() {
    let fixture = TestFixture::new().await;

    let resp = Client::new().get(fixture.url("/health")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_auth_missing_psk() {
    let fixture = TestFixture::new().await;

    let resp = Client::new().get(fixture.url("/api/tree")).send().await.unwrap();

    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_auth_invalid_psk() {
    let fixture = TestFixture::new().await;

    let resp = Client::new()
        .get(fixture.url("/api/tree"))
        .header("x-api-key", "wrong-key")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = Client::new()
        .get(fixture.url("/api/tree"))
        .bearer_auth(PSK)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_open_server_without_psk() {
    let fixture = TestFixture::with_psk(None).await;

    let resp = fixture.client.get(fixture.url("/api/revision")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_tree_crud_bumps_revision() {
    let fixture = TestFixture::new().await;
    let start = fixture.get_json("/api/revision").await["data"]["revisionId"]
        .as_i64()
        .unwrap();

    let put: Value = fixture
        .client
        .put(fixture.url("/api/tree/board/rosterDatesByDay/monday"))
        .json(&json!("03/03/2025"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(put["success"], true);
    let after_put = put["revisionId"].as_i64().unwrap();
    assert!(after_put > start);

    let body = fixture.get_json("/api/tree/board").await;
    assert_eq!(body["data"], json!({ "rosterDatesByDay": { "monday": "03/03/2025" } }));

    let delete: Value = fixture
        .client
        .delete(fixture.url("/api/tree/board/rosterDatesByDay/monday"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(delete["revisionId"].as_i64().unwrap() > after_put);

    let body = fixture.get_json("/api/tree").await;
    assert_eq!(body["data"], Value::Null);
}

#[tokio::test]
async fn test_reserved_path_write_rejected() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .put(fixture.url("/api/tree/.info/connected"))
        .json(&json!(false))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

// ==================== HTTP ADAPTER ====================

#[tokio::test]
async fn test_remote_set_then_get() {
    let fixture = TestFixture::new().await;
    let remote = fixture.remote();

    assert_eq!(remote.get("board/settings").await.unwrap(), None);

    remote
        .set("board/settings", json!({ "theme": "light" }))
        .await
        .unwrap();
    assert_eq!(
        remote.get("board/settings/theme").await.unwrap(),
        Some(json!("light"))
    );

    remote.set("board/settings", Value::Null).await.unwrap();
    assert_eq!(remote.get("board/settings").await.unwrap(), None);
}

#[tokio::test]
async fn test_remote_errors_carry_the_path() {
    let fixture = TestFixture::new().await;
    let remote = HttpRemoteStore::new(&SyncConfig {
        api_psk: Some("wrong-key".to_string()),
        ..fixture.sync_config()
    })
    .unwrap();

    match remote.get("board/personsByDay/monday").await {
        Err(SyncError::RemoteRead { path, .. }) => assert_eq!(path, "board/personsByDay/monday"),
        other => panic!("expected a read error, got {:?}", other),
    }
    assert!(matches!(
        remote.set("board/personsByDay/monday", json!({})).await,
        Err(SyncError::RemoteWrite { .. })
    ));
}

#[tokio::test]
async fn test_remote_subscription_delivers_current_then_changes() {
    let fixture = TestFixture::new().await;
    let remote = fixture.remote();
    remote
        .set("board/rosterDatesByDay/tuesday", json!("04/03/2025"))
        .await
        .unwrap();

    let mut subscription = remote.subscribe("board/rosterDatesByDay/tuesday");
    assert_eq!(next_value(&mut subscription).await, Some(json!("04/03/2025")));

    remote
        .set("board/rosterDatesByDay/tuesday", json!("11/03/2025"))
        .await
        .unwrap();
    assert_eq!(next_value(&mut subscription).await, Some(json!("11/03/2025")));

    remote.set("board/rosterDatesByDay", Value::Null).await.unwrap();
    assert_eq!(next_value(&mut subscription).await, None);

    subscription.cancel();
    assert!(subscription.is_cancelled());
}

#[tokio::test]
async fn test_connected_path_reflects_reachability() {
    let fixture = TestFixture::new().await;
    let remote = fixture.remote();

    assert_eq!(remote.get(CONNECTED_PATH).await.unwrap(), Some(json!(true)));
    let mut subscription = remote.subscribe(CONNECTED_PATH);
    assert_eq!(next_value(&mut subscription).await, Some(json!(true)));

    // Nothing listens on a port that was just released.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let dead_url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);
    let dead = HttpRemoteStore::new(&SyncConfig {
        remote_url: dead_url,
        ..fixture.sync_config()
    })
    .unwrap();
    assert_eq!(dead.get(CONNECTED_PATH).await.unwrap(), Some(json!(false)));
}

// ==================== SYNC FACADE ====================

async fn service_for(fixture: &TestFixture, today: Day) -> Arc<SyncService> {
    let service = SyncService::init(
        fixture.sync_config(),
        LocalCache::in_memory().await.unwrap(),
        Some(Arc::new(fixture.remote())),
        Arc::new(FixedClock::new(today)),
    )
    .await;

    let mut events = service.events();
    tokio::time::timeout(WAIT, async {
        while !matches!(events.recv().await, Ok(SyncEvent::Refreshed)) {}
    })
    .await
    .expect("service never went online");
    assert_eq!(service.mode(), SyncMode::Remote);
    service
}

#[tokio::test]
async fn test_facade_writes_reach_the_server() {
    let fixture = TestFixture::new().await;
    let service = service_for(&fixture, Day::Monday).await;

    let staff = vec![PersonRecord::new("Ann", "16:00"), PersonRecord::new("Bob", "18:00")];
    service
        .set_for_day::<Persons>(Day::Monday, &staff)
        .await
        .unwrap();

    let body = fixture.get_json("/api/tree/board/personsByDay/monday").await;
    assert_eq!(body["data"]["Ann"]["endTime"], "16:00");
    assert_eq!(body["data"]["Bob"]["position"], 1);

    assert_eq!(service.get_for_day::<Persons>(Day::Monday).await.unwrap(), staff);
    service.dispose();
}

#[tokio::test]
async fn test_facade_sees_writes_from_another_client() {
    let fixture = TestFixture::new().await;
    let first = service_for(&fixture, Day::Monday).await;
    let second = service_for(&fixture, Day::Monday).await;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let _handle = first.subscribe_for_day::<Persons, _>(Day::Wednesday, move |staff| {
        let _ = tx.send(staff);
    });

    let staff = vec![PersonRecord::new("Cara", "20:00")];
    second
        .set_for_day::<Persons>(Day::Wednesday, &staff)
        .await
        .unwrap();

    let delivered = tokio::time::timeout(WAIT, async {
        loop {
            let next = rx.recv().await.expect("subscription dropped");
            if !next.is_empty() {
                return next;
            }
        }
    })
    .await
    .expect("change never delivered");
    assert_eq!(delivered, staff);

    first.dispose();
    second.dispose();
}
