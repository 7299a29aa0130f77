//! Integration tests for HubNote
//!
//! These tests drive the storage manager and access control over every
//! backend, using in-process axum servers in place of the remote key-value
//! service, object store and issue tracker.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use hubnote::access::{AccessControl, GitHubTracker, Identity, LoginError, RepoPermission, TokenIssuer};
use hubnote::config::{AppConfig, StorageConfig};
use hubnote::storage::{
    BackendKind, BlobBackend, FileBackend, KvBackend, RepoMutation, RepositoryRecord,
    RetryConfig, StorageBackend, StorageManager, Whitelist,
};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Serve `app` on an ephemeral local port
async fn spawn_server(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Documents every backend should round-trip through the manager
async fn exercise_round_trip(storage: &StorageManager) {
    assert_eq!(storage.get_repos(false).await.repositories.len(), 0);
    assert_eq!(storage.get_user_whitelist().await, Whitelist::default());

    let outcome = storage
        .add_repository(RepositoryRecord::new("octo/cat"), Some("alice"))
        .await;
    assert_eq!(outcome, RepoMutation::Added);
    let repos = storage.get_repos(true).await;
    assert_eq!(repos.full_names(), vec!["octo/cat"]);
    assert_eq!(repos.repositories[0].added_by.as_deref(), Some("alice"));
    assert!(repos.repositories[0].added_at.is_some());

    let whitelist = Whitelist {
        allowed_users: vec!["alice".into()],
        admin_users: vec!["alice".into()],
        ..Default::default()
    };
    assert!(storage.save_user_whitelist(&whitelist).await);
    assert_eq!(storage.get_user_whitelist().await, whitelist);

    assert!(storage.record_user_login("alice").await);
    assert_eq!(storage.get_user_stats().await.total_logins, 1);
}

mod memory_tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_round_trip() {
        exercise_round_trip(&StorageManager::in_memory()).await;
    }

    #[tokio::test]
    async fn test_preferences_and_cache_are_not_kept() {
        let storage = StorageManager::in_memory();
        let mut prefs = Map::new();
        prefs.insert("theme".into(), json!("dark"));

        assert!(!storage.save_user_preferences("alice", &prefs).await);
        assert!(storage.get_user_preferences("alice").await.is_empty());
        assert!(!storage.set_cache("issues", json!([1, 2]), Duration::from_secs(60)).await);
        assert_eq!(storage.get_cache("issues").await, None);
        assert!(!storage.clear_expired_cache().await);
    }

    #[tokio::test]
    async fn test_concurrent_updates_last_write_wins() {
        let storage = StorageManager::in_memory();
        let first = storage.clone();
        let second = storage.clone();

        // Both writers read before either saves
        let mut a = first.get_user_whitelist().await;
        let mut b = second.get_user_whitelist().await;
        a.add("alice", false);
        b.add("bob", false);
        assert!(first.save_user_whitelist(&a).await);
        assert!(second.save_user_whitelist(&b).await);

        let stored = storage.get_user_whitelist().await;
        assert_eq!(stored.allowed_users, vec!["bob"]);
    }
}

mod file_tests {
    use super::*;

    #[tokio::test]
    async fn test_file_round_trip() {
        let temp = TempDir::new().unwrap();
        let storage = StorageManager::new(Arc::new(FileBackend::new(temp.path().join("data"))));
        exercise_round_trip(&storage).await;

        assert!(temp.path().join("data/repos.json").exists());
        assert!(temp.path().join("data/user_whitelist.json").exists());
    }

    #[tokio::test]
    async fn test_file_documents_survive_restart() {
        let temp = TempDir::new().unwrap();
        let config = StorageConfig {
            backend: BackendKind::File,
            data_dir: temp.path().to_path_buf(),
            ..Default::default()
        };

        {
            let storage = StorageManager::from_config(&config);
            assert_eq!(storage.kind(), BackendKind::File);
            storage
                .add_repository(RepositoryRecord::new("octo/cat"), Some("alice"))
                .await;
        }

        let storage = StorageManager::from_config(&config);
        assert!(storage.get_repos(false).await.contains("octo/cat"));
    }

    #[tokio::test]
    async fn test_development_mode_selects_file_backend() {
        let temp = TempDir::new().unwrap();
        let mut config = AppConfig::new();
        let data_dir = temp.path().display().to_string();
        config.apply_env(|name| match name {
            "STORAGE_TYPE" => Some("vercel_kv".to_string()),
            "FLASK_ENV" => Some("development".to_string()),
            "DATA_DIR" => Some(data_dir.clone()),
            _ => None,
        });

        let storage = StorageManager::from_config(&config.storage);
        assert_eq!(storage.kind(), BackendKind::File);
    }

    #[tokio::test]
    async fn test_corrupt_file_falls_back_to_default() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("user_whitelist.json"), "{not json").unwrap();
        let storage = StorageManager::new(Arc::new(FileBackend::new(temp.path())));

        assert!(storage.try_get_user_whitelist().await.is_err());
        assert_eq!(storage.get_user_whitelist().await, Whitelist::default());

        let access = AccessControl::new(storage, TokenIssuer::new("secret"));
        assert!(access.is_user_allowed("anyone").await);
        assert!(!access.is_user_admin("anyone").await);
    }
}

mod kv_tests {
    use super::*;

    #[derive(Clone, Default)]
    struct KvState {
        values: Arc<Mutex<HashMap<String, String>>>,
        failing: Arc<AtomicBool>,
    }

    async fn kv_get(State(state): State<KvState>, Path(key): Path<String>) -> impl IntoResponse {
        if state.failing.load(Ordering::SeqCst) {
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "down"})));
        }
        let value = state.values.lock().unwrap().get(&key).cloned();
        (StatusCode::OK, Json(json!({ "result": value })))
    }

    async fn kv_set(
        State(state): State<KvState>,
        Path(key): Path<String>,
        Json(body): Json<Value>,
    ) -> impl IntoResponse {
        if state.failing.load(Ordering::SeqCst) {
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "down"})));
        }
        let value = body["value"].as_str().unwrap_or_default().to_string();
        state.values.lock().unwrap().insert(key, value);
        (StatusCode::OK, Json(json!({ "result": "OK" })))
    }

    async fn start_kv() -> (StorageManager, KvState) {
        let state = KvState::default();
        let app = Router::new()
            .route("/get/{key}", get(kv_get))
            .route("/set/{key}", post(kv_set))
            .with_state(state.clone());
        let addr = spawn_server(app).await;
        let backend = KvBackend::new(format!("http://{}", addr), "kv-token");
        (StorageManager::new(Arc::new(backend)), state)
    }

    #[tokio::test]
    async fn test_kv_round_trip() {
        let (storage, state) = start_kv().await;
        exercise_round_trip(&storage).await;

        // Values are stored as JSON strings
        let raw = state.values.lock().unwrap().get("repos").cloned().unwrap();
        let decoded: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(decoded["repositories"][0]["full_name"], "octo/cat");
    }

    #[tokio::test]
    async fn test_kv_preferences_and_cache() {
        let (storage, _state) = start_kv().await;
        let mut prefs = Map::new();
        prefs.insert("theme".into(), json!("dark"));

        assert!(storage.save_user_preferences("alice", &prefs).await);
        assert_eq!(storage.get_user_preferences("alice").await, prefs);
        assert!(storage.get_user_preferences("bob").await.is_empty());

        assert!(storage.set_cache("issues", json!([1, 2]), Duration::from_secs(60)).await);
        assert_eq!(storage.get_cache("issues").await, Some(json!([1, 2])));
        assert!(storage.set_cache("stale", json!(true), Duration::ZERO).await);
        assert_eq!(storage.get_cache("stale").await, None);
        assert!(storage.clear_expired_cache().await);
    }

    #[tokio::test]
    async fn test_kv_server_error_yields_defaults() {
        let (storage, state) = start_kv().await;
        storage
            .add_repository(RepositoryRecord::new("octo/cat"), Some("alice"))
            .await;
        state.failing.store(true, Ordering::SeqCst);

        assert!(storage.try_get_repos(false).await.is_err());
        assert!(storage.get_repos(false).await.repositories.is_empty());
        assert!(!storage.save_user_whitelist(&Whitelist::default()).await);

        // A failed read must not overwrite the catalogue
        let outcome = storage
            .add_repository(RepositoryRecord::new("octo/dog"), Some("alice"))
            .await;
        assert_eq!(outcome, RepoMutation::Unavailable);

        state.failing.store(false, Ordering::SeqCst);
        assert_eq!(storage.get_repos(false).await.full_names(), vec!["octo/cat"]);
    }
}

mod blob_tests {
    use super::*;

    #[derive(Clone, Default)]
    struct BlobState {
        addr: Arc<Mutex<Option<SocketAddr>>>,
        objects: Arc<Mutex<HashMap<String, Value>>>,
        list_calls: Arc<AtomicUsize>,
        /// Listings that still omit existing objects
        hidden_listings: Arc<AtomicUsize>,
    }

    async fn list(State(state): State<BlobState>) -> Json<Value> {
        state.list_calls.fetch_add(1, Ordering::SeqCst);
        let hidden = state
            .hidden_listings
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if hidden {
            return Json(json!({ "blobs": [] }));
        }

        let addr = state.addr.lock().unwrap().unwrap();
        let blobs: Vec<Value> = state
            .objects
            .lock()
            .unwrap()
            .keys()
            .map(|name| {
                json!({
                    "pathname": name,
                    "url": format!("http://{}/objects/{}", addr, name),
                })
            })
            .collect();
        Json(json!({ "blobs": blobs }))
    }

    async fn download(
        State(state): State<BlobState>,
        Path(name): Path<String>,
    ) -> impl IntoResponse {
        match state.objects.lock().unwrap().get(&name).cloned() {
            Some(doc) => (StatusCode::OK, Json(doc)),
            None => (StatusCode::NOT_FOUND, Json(json!({}))),
        }
    }

    async fn upload(
        State(state): State<BlobState>,
        Path(name): Path<String>,
        body: Bytes,
    ) -> StatusCode {
        match serde_json::from_slice::<Value>(&body) {
            Ok(doc) => {
                state.objects.lock().unwrap().insert(name, doc);
                StatusCode::OK
            }
            Err(_) => StatusCode::BAD_REQUEST,
        }
    }

    async fn start_blob() -> (String, BlobState) {
        let state = BlobState::default();
        let app = Router::new()
            .route("/", get(list))
            .route("/objects/{name}", get(download))
            .route("/{name}", axum::routing::put(upload))
            .with_state(state.clone());
        let addr = spawn_server(app).await;
        *state.addr.lock().unwrap() = Some(addr);
        (format!("http://{}", addr), state)
    }

    fn blob_storage(base_url: &str, attempts: u32) -> StorageManager {
        StorageManager::new(Arc::new(BlobBackend::with_retry_config(
            base_url,
            "blob-token",
            RetryConfig::quick(attempts),
        )))
    }

    #[tokio::test]
    async fn test_missing_object_exhausts_retries_then_defaults() {
        let (base_url, state) = start_blob().await;
        let storage = blob_storage(&base_url, 10);

        let repos = storage.get_repos(false).await;
        assert!(repos.repositories.is_empty());
        assert_eq!(state.list_calls.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_read_after_write_is_served_locally() {
        let (base_url, state) = start_blob().await;
        let storage = blob_storage(&base_url, 10);
        let whitelist = Whitelist {
            allowed_users: vec!["alice".into()],
            ..Default::default()
        };

        assert!(storage.save_user_whitelist(&whitelist).await);
        assert_eq!(storage.get_user_whitelist().await, whitelist);
        assert_eq!(state.list_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_lagging_listing_is_retried() {
        let (base_url, state) = start_blob().await;
        let writer = blob_storage(&base_url, 10);
        writer
            .add_repository(RepositoryRecord::new("octo/cat"), Some("alice"))
            .await;
        let after_write = state.list_calls.load(Ordering::SeqCst);

        // A fresh process has no local copy and sees the store lag three times
        state.hidden_listings.store(3, Ordering::SeqCst);
        let reader = blob_storage(&base_url, 10);
        let repos = reader.get_repos(false).await;

        assert!(repos.contains("octo/cat"));
        assert_eq!(state.list_calls.load(Ordering::SeqCst) - after_write, 4);
    }

    #[tokio::test]
    async fn test_forced_refresh_goes_back_to_store() {
        let (base_url, state) = start_blob().await;
        let storage = blob_storage(&base_url, 3);
        storage
            .add_repository(RepositoryRecord::new("octo/cat"), Some("alice"))
            .await;
        let before = state.list_calls.load(Ordering::SeqCst);

        storage.get_repos(false).await;
        assert_eq!(state.list_calls.load(Ordering::SeqCst), before);

        let repos = storage.get_user_repos("alice", false).await;
        assert_eq!(repos.full_names(), vec!["octo/cat"]);
        assert_eq!(state.list_calls.load(Ordering::SeqCst), before + 1);
    }

    fn blob_access(base_url: &str, local_ttl: Duration) -> AccessControl {
        let backend = BlobBackend::with_retry_config(base_url, "blob-token", RetryConfig::quick(3))
            .with_local_ttl(local_ttl);
        AccessControl::new(
            StorageManager::new(Arc::new(backend)),
            TokenIssuer::new("blob-secret"),
        )
    }

    #[tokio::test]
    async fn test_revocation_reaches_other_instances() {
        let (base_url, _state) = start_blob().await;
        let first = blob_access(&base_url, Duration::from_millis(50));
        let second = blob_access(&base_url, Duration::from_millis(50));

        assert!(first.add_user_to_whitelist("alice", false).await);
        assert!(first.add_user_to_whitelist("mallory", true).await);
        assert!(second.is_user_admin("mallory").await);

        assert!(first.remove_user_from_whitelist("mallory").await);
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(!second.is_user_allowed("mallory").await);
        assert!(!second.is_user_admin("mallory").await);
        assert!(second.is_user_allowed("alice").await);
    }

    #[tokio::test]
    async fn test_absent_whitelist_is_not_refetched() {
        let (base_url, state) = start_blob().await;
        let backend = Arc::new(BlobBackend::with_retry_config(
            &base_url,
            "blob-token",
            RetryConfig::quick(10),
        ));
        let access = AccessControl::new(
            StorageManager::new(backend.clone()),
            TokenIssuer::new("blob-secret"),
        );

        assert!(access.is_user_allowed("alice").await);
        assert!(!access.is_user_admin("alice").await);
        assert!(access.is_user_allowed("bob").await);
        assert_eq!(state.list_calls.load(Ordering::SeqCst), 10);

        // An expired absence is checked again with a single attempt
        backend.invalidate("user_whitelist").await;
        assert!(access.is_user_allowed("alice").await);
        assert_eq!(state.list_calls.load(Ordering::SeqCst), 11);
    }
}

mod visibility_tests {
    use super::*;

    async fn seeded() -> StorageManager {
        let storage = StorageManager::in_memory();
        storage
            .add_repository(RepositoryRecord::new("alice/tools"), Some("alice"))
            .await;
        storage
            .add_repository(RepositoryRecord::new("bob/legacy"), None)
            .await;
        storage
            .add_repository(RepositoryRecord::new("bob/fork"), Some("alice"))
            .await;
        storage
    }

    #[tokio::test]
    async fn test_hybrid_visibility() {
        let storage = seeded().await;

        let alice = storage.get_user_repos("alice", false).await;
        assert_eq!(alice.full_names(), vec!["alice/tools", "bob/fork"]);
        assert_eq!(alice.total_count, Some(2));

        // Legacy records match the owner case-insensitively; tagged ones never do
        let bob = storage.get_user_repos("BOB", false).await;
        assert_eq!(bob.full_names(), vec!["bob/legacy"]);

        assert!(storage.get_user_repos("carol", false).await.repositories.is_empty());
    }

    #[tokio::test]
    async fn test_admin_sees_everything() {
        let storage = seeded().await;
        let all = storage.get_user_repos("carol", true).await;
        assert_eq!(all.repositories.len(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_and_missing_mutations() {
        let storage = seeded().await;
        assert_eq!(
            storage
                .add_repository(RepositoryRecord::new("alice/tools"), Some("bob"))
                .await,
            RepoMutation::AlreadyExists
        );
        assert_eq!(storage.remove_repository("nobody/none").await, RepoMutation::NotFound);
        assert_eq!(storage.remove_repository("bob/legacy").await, RepoMutation::Removed);
        assert_eq!(storage.get_repos(false).await.repositories.len(), 2);
    }
}

mod access_tests {
    use super::*;

    #[derive(Clone)]
    struct TrackerState {
        login: &'static str,
        push: bool,
    }

    async fn start_tracker(login: &'static str, push: bool) -> String {
        let state = TrackerState { login, push };
        let app = Router::new()
            .route(
                "/user",
                get(|State(s): State<TrackerState>| async move {
                    Json(json!({ "login": s.login, "avatar_url": "https://avatars/x" }))
                }),
            )
            .route(
                "/repos/{owner}/{name}",
                get(
                    |State(s): State<TrackerState>, Path((owner, name)): Path<(String, String)>| async move {
                        Json(json!({
                            "full_name": format!("{}/{}", owner, name),
                            "name": name,
                            "owner": { "login": owner },
                            "permissions": { "pull": true, "push": s.push, "admin": false }
                        }))
                    },
                ),
            )
            .with_state(state);
        format!("http://{}", spawn_server(app).await)
    }

    fn access() -> AccessControl {
        AccessControl::new(StorageManager::in_memory(), TokenIssuer::new("integration-secret"))
    }

    #[tokio::test]
    async fn test_login_through_tracker() {
        let api = start_tracker("octocat", false).await;
        let tracker = GitHubTracker::new(api, "gh-token");
        let access = access();

        let outcome = access.login(&tracker).await.unwrap();
        assert_eq!(outcome.identity.username, "octocat");
        assert_eq!(
            access.verify_token(&outcome.token).map(|i| i.username),
            Some("octocat".to_string())
        );

        access.add_user_to_whitelist("someone-else", true).await;
        let err = access.login(&tracker).await.unwrap_err();
        assert!(matches!(err, LoginError::NotWhitelisted(_)));
    }

    #[tokio::test]
    async fn test_repo_permissions_through_tracker() {
        let api = start_tracker("octocat", false).await;
        let tracker = GitHubTracker::new(api, "gh-token");
        let access = access();
        let user = Identity::new("octocat");

        assert!(
            access
                .check_repo_permission(&tracker, &user, "octo/cat", RepoPermission::Pull)
                .await
        );
        assert!(
            !access
                .check_repo_permission(&tracker, &user, "octo/cat", RepoPermission::Push)
                .await
        );
    }

    #[tokio::test]
    async fn test_unreachable_tracker_denies() {
        // Nothing listens on port 9 locally
        let tracker = GitHubTracker::new("http://127.0.0.1:9", "gh-token");
        let access = access();

        assert!(
            !access
                .check_repo_permission(
                    &tracker,
                    &Identity::new("octocat"),
                    "octo/cat",
                    RepoPermission::Pull
                )
                .await
        );
        assert!(matches!(
            access.login(&tracker).await,
            Err(LoginError::Tracker(_))
        ));
    }

    #[tokio::test]
    async fn test_first_admin_bootstrap() {
        let access = access();
        assert!(access.is_user_allowed("anyone").await);

        assert!(access.add_user_to_whitelist("founder", true).await);
        assert!(access.is_user_admin("FOUNDER").await);
        assert!(!access.is_user_allowed("anyone").await);
    }
}
