//! Drive Backend Integration Tests
//!
//! Runs the cloud backend against an in-process fake of the Drive v3 API.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use meetvault::config::CloudSettings;
use meetvault::core::{RetryPolicy, SafetyLimits};
use meetvault::domain::{
    Artifact, ArtifactKind, BackendKind, Destination, Fingerprint, ItemIdentity, StorageLocation,
};
use meetvault::ingest::{WorkQueue, Watcher, WatcherConfig};
use meetvault::registry::Registry;
use meetvault::storage::{
    AuthError, CloudBackend, ListedItem, RetrievalError, StaticToken, StorageBackend,
    TokenProvider, VaultTarget,
};
use serde_json::json;
use tempfile::TempDir;

const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

/// Scripted Drive state
#[derive(Default)]
struct FakeDrive {
    /// Requests seen, as "METHOD path"
    calls: Mutex<Vec<String>>,
    /// Number of list requests to answer with 429
    throttle_lists: AtomicU32,
    /// Number of downloads to answer with 500
    broken_downloads: AtomicU32,
    uploads: Mutex<Vec<String>>,
    moves: Mutex<Vec<HashMap<String, String>>>,
    /// Listings reject any other bearer token when set
    required_token: Mutex<Option<String>>,
    /// Appended to the last listing page
    extra_files: Mutex<Vec<serde_json::Value>>,
}

impl FakeDrive {
    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn count(&self, call: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == call).count()
    }
}

async fn list_files(
    State(drive): State<Arc<FakeDrive>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    drive.record("GET /files".to_string());
    let required = drive.required_token.lock().unwrap().clone();
    if let Some(token) = required {
        let presented = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if presented != format!("Bearer {}", token) {
            return (StatusCode::UNAUTHORIZED, "invalid credentials").into_response();
        }
    }
    if drive
        .throttle_lists
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
    {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, "0")],
            "rate limited",
        )
            .into_response();
    }

    let query = params.get("q").cloned().unwrap_or_default();
    if !query.starts_with("'input' in parents") || query.contains("name =") {
        return Json(json!({ "files": [] })).into_response();
    }

    // Two pages to exercise pagination
    match params.get("pageToken").map(String::as_str) {
        None => Json(json!({
            "nextPageToken": "page-2",
            "files": [
                {
                    "id": "f1",
                    "name": "standup.mp4",
                    "size": "2048",
                    "mimeType": "video/mp4",
                    "md5Checksum": "5d41402abc4b2a76",
                    "modifiedTime": "2026-01-05T10:00:00Z"
                },
                { "id": "d1", "name": "old", "mimeType": FOLDER_MIME },
                { "id": "f2", "name": "agenda.txt", "size": "10", "mimeType": "text/plain" }
            ]
        }))
        .into_response(),
        Some(_) => {
            let mut files =
                vec![json!({ "id": "f0", "name": "allhands.mp4", "size": "4096", "mimeType": "video/mp4" })];
            files.extend(drive.extra_files.lock().unwrap().iter().cloned());
            Json(json!({ "files": files })).into_response()
        }
    }
}

async fn get_file(
    State(drive): State<Arc<FakeDrive>>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let media = params.get("alt").map(String::as_str) == Some("media");
    drive.record(format!(
        "GET /files/{}{}",
        id,
        if media { "?media" } else { "" }
    ));

    match id.as_str() {
        "gone" => return (StatusCode::NOT_FOUND, "File not found").into_response(),
        "forbidden" => return (StatusCode::FORBIDDEN, "insufficient permissions").into_response(),
        _ => {}
    }

    if media {
        if drive
            .broken_downloads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return (StatusCode::INTERNAL_SERVER_ERROR, "backend error").into_response();
        }
        return b"fake recording bytes".to_vec().into_response();
    }
    Json(json!({ "id": id, "name": "standup.mp4", "size": "20", "mimeType": "video/mp4" }))
        .into_response()
}

async fn patch_file(
    State(drive): State<Arc<FakeDrive>>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    drive.record(format!("PATCH /files/{}", id));
    drive.moves.lock().unwrap().push(params);
    Json(json!({ "id": id, "parents": ["processed"] })).into_response()
}

async fn upload_file(State(drive): State<Arc<FakeDrive>>, body: String) -> Response {
    drive.record("POST /upload".to_string());
    drive.uploads.lock().unwrap().push(body);
    Json(json!({ "id": "uploaded-1", "name": "ignored" })).into_response()
}

async fn serve(drive: Arc<FakeDrive>) -> SocketAddr {
    let app = Router::new()
        .route("/drive/v3/files", get(list_files))
        .route("/drive/v3/files/:id", get(get_file).patch(patch_file))
        .route("/upload/drive/v3/files", post(upload_file))
        .with_state(drive);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn backend(drive: Arc<FakeDrive>, vault: &TempDir) -> CloudBackend {
    backend_with_tokens(drive, vault, Arc::new(StaticToken("test-token".to_string()))).await
}

async fn backend_with_tokens(
    drive: Arc<FakeDrive>,
    vault: &TempDir,
    tokens: Arc<dyn TokenProvider>,
) -> CloudBackend {
    let addr = serve(drive).await;
    let settings = CloudSettings {
        credentials_path: PathBuf::from("unused-credentials.json"),
        token_path: PathBuf::from("unused-token.json"),
        input_folder_id: "input".to_string(),
        output_folder_id: "output".to_string(),
        processed_folder_id: "processed".to_string(),
        api_base: format!("http://{}/drive/v3", addr),
        upload_base: format!("http://{}/upload/drive/v3", addr),
        token_endpoint: format!("http://{}/token", addr),
    };
    CloudBackend::new(
        settings,
        VaultTarget::Local(vault.path().to_path_buf()),
        tokens,
        SafetyLimits::default(),
    )
    .unwrap()
    .with_retry_policy(RetryPolicy::immediate(3))
}

#[tokio::test]
async fn test_listing_pages_filters_and_survives_throttling() {
    let drive = Arc::new(FakeDrive::default());
    drive.throttle_lists.store(2, Ordering::SeqCst);
    let vault = TempDir::new().unwrap();
    let backend = backend(Arc::clone(&drive), &vault).await;

    let items = backend.list_new_items().await.unwrap();

    // Folders and non-recordings are skipped; results are sorted by name
    let names: Vec<&str> = items.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, vec!["allhands.mp4", "standup.mp4"]);
    assert_eq!(items[1].size_bytes, 2048);
    assert!(items[1].modified.is_some());
    assert_eq!(items[1].location, StorageLocation::new(BackendKind::Cloud, "f1"));

    // Two throttled attempts, then both pages
    assert_eq!(drive.count("GET /files"), 4);
}

#[tokio::test]
async fn test_identity_follows_file_id_across_renames() {
    let drive = Arc::new(FakeDrive::default());
    let vault = TempDir::new().unwrap();
    let backend = backend(drive, &vault).await;
    let items = backend.list_new_items().await.unwrap();

    let (identity, fingerprint) = backend.identify(&items[1]).await.unwrap();
    assert_eq!(identity, ItemIdentity::from_native_id(BackendKind::Cloud, "f1"));
    assert_eq!(fingerprint, Fingerprint::md5("5d41402abc4b2a76"));

    // No checksum: metadata fingerprint
    let (_, fallback) = backend.identify(&items[0]).await.unwrap();
    assert_eq!(
        fallback,
        Fingerprint::from_metadata("drive", "allhands.mp4", 4096)
    );

    let renamed = ListedItem {
        name: "standup-renamed.mp4".to_string(),
        ..items[1].clone()
    };
    let (again, _) = backend.identify(&renamed).await.unwrap();
    assert_eq!(again, identity);
}

#[tokio::test]
async fn test_fetch_retries_server_errors() {
    let drive = Arc::new(FakeDrive::default());
    drive.broken_downloads.store(1, Ordering::SeqCst);
    let vault = TempDir::new().unwrap();
    let workdir = TempDir::new().unwrap();
    let backend = backend(Arc::clone(&drive), &vault).await;

    let path = backend
        .fetch(&StorageLocation::new(BackendKind::Cloud, "f1"), workdir.path())
        .await
        .unwrap();

    assert_eq!(path, workdir.path().join("standup.mp4"));
    assert_eq!(std::fs::read(&path).unwrap(), b"fake recording bytes");
    assert_eq!(drive.count("GET /files/f1?media"), 2);
}

#[tokio::test]
async fn test_fetch_maps_missing_and_forbidden() {
    let drive = Arc::new(FakeDrive::default());
    let vault = TempDir::new().unwrap();
    let workdir = TempDir::new().unwrap();
    let backend = backend(Arc::clone(&drive), &vault).await;

    let gone = backend
        .fetch(&StorageLocation::new(BackendKind::Cloud, "gone"), workdir.path())
        .await;
    assert!(matches!(gone, Err(RetrievalError::NotFound(_))));

    // Permission errors are not retried
    let forbidden = backend
        .fetch(&StorageLocation::new(BackendKind::Cloud, "forbidden"), workdir.path())
        .await;
    assert!(matches!(forbidden, Err(RetrievalError::Remote(_))));
    assert_eq!(drive.count("GET /files/forbidden"), 1);

    // A local path is never sent to Drive
    let foreign = backend
        .fetch(&StorageLocation::new(BackendKind::Local, "/tmp/x.mp4"), workdir.path())
        .await;
    assert!(matches!(foreign, Err(RetrievalError::ForeignLocation(_))));
}

#[tokio::test]
async fn test_archive_moves_between_folders() {
    let drive = Arc::new(FakeDrive::default());
    let vault = TempDir::new().unwrap();
    let backend = backend(Arc::clone(&drive), &vault).await;

    let archived = backend
        .archive(&StorageLocation::new(BackendKind::Cloud, "f1"))
        .await
        .unwrap();
    assert_eq!(archived.locator(), "f1");

    let moves = drive.moves.lock().unwrap();
    assert_eq!(moves.len(), 1);
    assert_eq!(moves[0]["addParents"], "processed");
    assert_eq!(moves[0]["removeParents"], "input");
}

#[tokio::test]
async fn test_output_upload_and_local_vault_write() {
    let drive = Arc::new(FakeDrive::default());
    let vault = TempDir::new().unwrap();
    let backend = backend(Arc::clone(&drive), &vault).await;

    let transcript = Artifact::new(
        "standup_transcript.txt",
        ArtifactKind::Transcript,
        "Ada Lovelace walked through the plan.".to_string(),
    );
    let uploaded = backend
        .publish(&transcript, Destination::Output)
        .await
        .unwrap();
    assert_eq!(uploaded, StorageLocation::new(BackendKind::Cloud, "uploaded-1"));

    let uploads = drive.uploads.lock().unwrap().clone();
    assert_eq!(uploads.len(), 1);
    assert!(uploads[0].contains("\"parents\":[\"output\"]"));
    assert!(uploads[0].contains("standup_transcript.txt"));
    assert!(uploads[0].contains("Ada Lovelace walked through the plan."));

    // Vault documents stay on disk when the vault is local
    let note = Artifact::new(
        "Meetings/2026-01-05 Standup.md",
        ArtifactKind::MeetingNote,
        "# Standup\n".to_string(),
    );
    let written = backend.publish(&note, Destination::Vault).await.unwrap();
    assert_eq!(written.backend(), BackendKind::Local);
    assert_eq!(
        std::fs::read_to_string(vault.path().join("Meetings/2026-01-05 Standup.md")).unwrap(),
        "# Standup\n"
    );
    assert_eq!(drive.count("POST /upload"), 1);
}

/// Hands out "expired" until told to refresh
#[derive(Default)]
struct ExpiringToken {
    refreshes: AtomicU32,
}

#[async_trait]
impl TokenProvider for ExpiringToken {
    async fn access_token(&self) -> Result<String, AuthError> {
        Ok(match self.refreshes.load(Ordering::SeqCst) {
            0 => "expired".to_string(),
            _ => "fresh".to_string(),
        })
    }

    async fn invalidate(&self) {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_rejected_token_is_refreshed_and_resent() {
    let drive = Arc::new(FakeDrive::default());
    *drive.required_token.lock().unwrap() = Some("fresh".to_string());
    let vault = TempDir::new().unwrap();
    let tokens = Arc::new(ExpiringToken::default());
    let backend = backend_with_tokens(Arc::clone(&drive), &vault, tokens.clone()).await;

    let items = backend.list_new_items().await.unwrap();

    assert_eq!(items.len(), 2);
    assert_eq!(tokens.refreshes.load(Ordering::SeqCst), 1);
    // Rejected first page, resent first page, second page
    assert_eq!(drive.count("GET /files"), 3);
}

#[tokio::test]
async fn test_watcher_skips_known_and_duplicate_drive_files() {
    let drive = Arc::new(FakeDrive::default());
    let vault = TempDir::new().unwrap();
    let backend: Arc<dyn StorageBackend> = Arc::new(backend(Arc::clone(&drive), &vault).await);
    let registry = Registry::open_in_memory().unwrap();

    let queue = WorkQueue::new(8);
    let mut watcher = Watcher::new(
        Arc::clone(&backend),
        registry.clone(),
        queue.clone(),
        WatcherConfig::default(),
    );
    assert_eq!(watcher.poll_once().await.unwrap().unstable, 2);
    assert_eq!(watcher.poll_once().await.unwrap().new_items, 2);
    assert_eq!(queue.pending(), 2);

    let again = watcher.poll_once().await.unwrap();
    assert_eq!(again.new_items, 0);
    assert_eq!(again.already_known, 2);
    assert_eq!(queue.pending(), 2);

    // A restarted watcher finds both through the registry
    let mut restarted = Watcher::new(
        Arc::clone(&backend),
        registry.clone(),
        WorkQueue::new(8),
        WatcherConfig::default(),
    );
    restarted.poll_once().await.unwrap();
    let scan = restarted.poll_once().await.unwrap();
    assert_eq!(scan.new_items, 0);
    assert_eq!(scan.already_known, 2);

    // Same bytes uploaded again under a new file id
    drive.extra_files.lock().unwrap().push(json!({
        "id": "f9",
        "name": "standup-copy.mp4",
        "size": "2048",
        "mimeType": "video/mp4",
        "md5Checksum": "5d41402abc4b2a76",
        "modifiedTime": "2026-01-05T10:05:00Z"
    }));
    watcher.poll_once().await.unwrap();
    let scan = watcher.poll_once().await.unwrap();
    assert_eq!(scan.duplicates, 1);
    assert_eq!(scan.new_items, 0);
    assert_eq!(queue.pending(), 2);
    assert!(!registry
        .is_known(&ItemIdentity::from_native_id(BackendKind::Cloud, "f9"))
        .await
        .unwrap());
}
