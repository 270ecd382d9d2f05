// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end session behaviour against an in-process REST backend.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use shipdesk_session::storage::{ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
use shipdesk_session::test_support::token_expiring_at;
use shipdesk_session::{
    AuthError, ErrorKind, FileStorage, LogoutReason, ManualClock, MemoryStorage, Session,
    SessionConfig, SessionEvent, SessionState, TokenStorage,
};

const START: i64 = 1_700_000_000;

#[derive(Default)]
struct Backend {
    login_access: Mutex<String>,
    refresh_access: Mutex<String>,
    /// Non-zero forces this status on the refresh endpoint.
    refresh_status: AtomicU16,
    /// Non-zero forces this status on the profile endpoint.
    profile_status: AtomicU16,
    reject_all: AtomicBool,
    accepted: Mutex<HashSet<String>>,
    refresh_calls: AtomicU32,
    profile_calls: AtomicU32,
    logout_calls: AtomicU32,
    resource_calls: AtomicU32,
}

impl Backend {
    fn calls(counter: &AtomicU32) -> u32 {
        counter.load(Ordering::SeqCst)
    }
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_owned)
}

fn forced(status: &AtomicU16) -> Option<StatusCode> {
    match status.load(Ordering::SeqCst) {
        0 => None,
        code => Some(StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)),
    }
}

async fn login(State(b): State<Arc<Backend>>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    if body["password"] != "pw" {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "message": "Invalid email or password" })));
    }
    let access = b.login_access.lock().clone();
    b.accepted.lock().insert(access.clone());
    (
        StatusCode::OK,
        Json(json!({ "accessToken": access, "refreshToken": "r1", "user": { "isActive": true } })),
    )
}

async fn register(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    if body["email"] == "taken@shipdesk.test" {
        return (StatusCode::CONFLICT, Json(json!({ "message": "Email already in use" })));
    }
    (StatusCode::OK, Json(json!({ "success": true, "message": "Account created" })))
}

async fn refresh(State(b): State<Arc<Backend>>) -> (StatusCode, Json<Value>) {
    b.refresh_calls.fetch_add(1, Ordering::SeqCst);
    // Long enough for concurrent callers to pile up behind this exchange.
    tokio::time::sleep(Duration::from_millis(50)).await;
    if let Some(status) = forced(&b.refresh_status) {
        return (status, Json(json!({ "message": "refresh token revoked" })));
    }
    let access = b.refresh_access.lock().clone();
    b.accepted.lock().insert(access.clone());
    (StatusCode::OK, Json(json!({ "accessToken": access })))
}

async fn profile(State(b): State<Arc<Backend>>, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    b.profile_calls.fetch_add(1, Ordering::SeqCst);
    if let Some(status) = forced(&b.profile_status) {
        return (status, Json(json!({ "message": "profile unavailable" })));
    }
    if !bearer(&headers).is_some_and(|t| b.accepted.lock().contains(&t)) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "message": "jwt expired" })));
    }
    (StatusCode::OK, Json(json!({ "name": "Dispatcher Dan", "phone": "555-0100" })))
}

async fn logout(State(b): State<Arc<Backend>>) -> StatusCode {
    b.logout_calls.fetch_add(1, Ordering::SeqCst);
    StatusCode::NO_CONTENT
}

async fn shipments(State(b): State<Arc<Backend>>, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    b.resource_calls.fetch_add(1, Ordering::SeqCst);
    let ok = !b.reject_all.load(Ordering::SeqCst)
        && bearer(&headers).is_some_and(|t| b.accepted.lock().contains(&t));
    if ok {
        (StatusCode::OK, Json(json!({ "items": [1, 2] })))
    } else {
        (StatusCode::UNAUTHORIZED, Json(json!({ "message": "jwt expired" })))
    }
}

async fn uploads(
    State(b): State<Arc<Backend>>,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, Json<Value>) {
    b.resource_calls.fetch_add(1, Ordering::SeqCst);
    if !bearer(&headers).is_some_and(|t| b.accepted.lock().contains(&t)) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "message": "jwt expired" })));
    }
    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    (
        StatusCode::CREATED,
        Json(json!({
            "multipart": content_type.starts_with("multipart/form-data"),
            "hasManifest": body.contains("manifest.csv") && body.contains("sku,qty"),
        })),
    )
}

async fn public(headers: HeaderMap) -> Json<Value> {
    Json(json!({ "authorized": bearer(&headers).is_some() }))
}

async fn spawn_backend() -> (SocketAddr, Arc<Backend>) {
    let backend = Arc::new(Backend::default());
    *backend.login_access.lock() = token_expiring_at("u-1", START + 3600);
    *backend.refresh_access.lock() = token_expiring_at("u-1", START + 7200);

    let app = Router::new()
        .route("/auth/login", post(login))
        .route("/auth/register", post(register))
        .route("/auth/refresh-token", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/user/profile", get(profile))
        .route("/shipments", get(shipments))
        .route("/uploads", post(uploads))
        .route("/public", get(public))
        .with_state(Arc::clone(&backend));

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    (addr, backend)
}

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(START * 1000))
}

fn session(addr: SocketAddr, clock: &Arc<ManualClock>, storage: Arc<dyn TokenStorage>) -> Session {
    Session::builder(SessionConfig::for_api(format!("http://{addr}")))
        .clock(clock.clone())
        .storage(storage)
        .build()
        .expect("session")
}

async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

async fn next_matching(
    events: &mut tokio::sync::broadcast::Receiver<SessionEvent>,
    pred: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("event stream open");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event arrived")
}

// -- login / register --

#[tokio::test]
async fn login_seeds_principal_and_merges_profile() {
    let (addr, backend) = spawn_backend().await;
    let session = session(addr, &clock(), Arc::new(MemoryStorage::new()));

    let principal = session.login("u-1@shipdesk.test", "pw").await.expect("login");

    assert_eq!(principal.id.as_deref(), Some("u-1"));
    assert_eq!(principal.name.as_deref(), Some("Dispatcher Dan"));
    assert_eq!(principal.profile.get("phone"), Some(&json!("555-0100")));
    assert!(session.is_authenticated());
    assert!(session.has_permission("shipments:read"));
    assert!(!session.has_permission("prices:write"));
    assert!(session.has_role("staff"));
    assert_eq!(session.state(), SessionState::Authenticated);
    assert_eq!(session.remaining_secs(), 3600);
    assert_eq!(session.claims().and_then(|c| c.email).as_deref(), Some("u-1@shipdesk.test"));
    assert_eq!(Backend::calls(&backend.profile_calls), 1);
}

#[tokio::test]
async fn profile_failure_keeps_session() {
    let (addr, backend) = spawn_backend().await;
    backend.profile_status.store(500, Ordering::SeqCst);
    let session = session(addr, &clock(), Arc::new(MemoryStorage::new()));

    let principal = session.login("u-1@shipdesk.test", "pw").await.expect("login");

    assert_eq!(principal.name.as_deref(), Some("u-1"));
    assert!(session.is_authenticated());
    assert!(session.profile().is_empty());
}

#[tokio::test]
async fn bad_credentials_surface_validation() {
    let (addr, _backend) = spawn_backend().await;
    let session = session(addr, &clock(), Arc::new(MemoryStorage::new()));

    let err = session.login("u-1@shipdesk.test", "wrong").await.expect_err("rejected");
    assert_eq!(err, AuthError::Validation("Invalid email or password".into()));
    assert!(!session.is_authenticated());
    assert_eq!(session.state(), SessionState::Unauthenticated);
}

#[tokio::test]
async fn register_reports_server_message() {
    let (addr, _backend) = spawn_backend().await;
    let session = session(addr, &clock(), Arc::new(MemoryStorage::new()));

    let message = session.register("new@shipdesk.test", "pw", "newbie").await.expect("register");
    assert_eq!(message.as_deref(), Some("Account created"));

    let err = session.register("taken@shipdesk.test", "pw", "dup").await.expect_err("conflict");
    assert_eq!(err, AuthError::Validation("Email already in use".into()));
    assert!(!session.is_authenticated());
}

/// Storage that refuses every write.
struct ReadOnlyStorage;

impl TokenStorage for ReadOnlyStorage {
    fn get(&self, _key: &str) -> Option<String> {
        None
    }

    fn set(&self, _key: &str, _value: &str) -> anyhow::Result<()> {
        anyhow::bail!("read-only file system")
    }

    fn remove(&self, _key: &str) -> anyhow::Result<()> {
        anyhow::bail!("read-only file system")
    }
}

#[tokio::test]
async fn login_fails_when_tokens_cannot_be_stored() {
    let (addr, backend) = spawn_backend().await;
    let session = session(addr, &clock(), Arc::new(ReadOnlyStorage));

    let err = session.login("u-1@shipdesk.test", "pw").await.expect_err("storage failure");

    assert_eq!(err.kind(), ErrorKind::Storage);
    assert!(!session.is_authenticated());
    assert_eq!(Backend::calls(&backend.profile_calls), 0);
}

// -- pipeline --

#[tokio::test]
async fn anonymous_requests_carry_no_bearer() {
    let (addr, _backend) = spawn_backend().await;
    let session = session(addr, &clock(), Arc::new(MemoryStorage::new()));

    let body: Value = session.client().get("/public").await.expect("public");
    assert_eq!(body, json!({ "authorized": false }));

    session.login("u-1@shipdesk.test", "pw").await.expect("login");
    let body: Value = session.client().get("/public").await.expect("public");
    assert_eq!(body, json!({ "authorized": true }));
}

#[tokio::test]
async fn expired_token_calls_share_one_refresh() {
    let (addr, backend) = spawn_backend().await;
    let clock = clock();
    let session = session(addr, &clock, Arc::new(MemoryStorage::new()));
    session.login("u-1@shipdesk.test", "pw").await.expect("login");

    clock.advance(Duration::from_secs(3601));
    let client = session.client();
    let (a, b) = tokio::join!(client.get::<Value>("/shipments"), client.get::<Value>("/shipments"));

    assert_eq!(a.expect("first"), json!({ "items": [1, 2] }));
    assert_eq!(b.expect("second"), json!({ "items": [1, 2] }));
    assert_eq!(Backend::calls(&backend.refresh_calls), 1);
    assert_eq!(Backend::calls(&backend.resource_calls), 2);
}

#[tokio::test]
async fn rejected_request_is_retried_once() {
    let (addr, backend) = spawn_backend().await;
    let session = session(addr, &clock(), Arc::new(MemoryStorage::new()));
    session.login("u-1@shipdesk.test", "pw").await.expect("login");

    // Server revokes the live token before it expires locally.
    backend.accepted.lock().clear();
    let body: Value = session.client().get("/shipments").await.expect("replayed");

    assert_eq!(body, json!({ "items": [1, 2] }));
    assert_eq!(Backend::calls(&backend.resource_calls), 2);
    assert_eq!(Backend::calls(&backend.refresh_calls), 1);
    assert!(session.is_authenticated());
}

#[tokio::test]
async fn multipart_upload_is_rebuilt_for_replay() {
    use reqwest::multipart::{Form, Part};

    let (addr, backend) = spawn_backend().await;
    let session = session(addr, &clock(), Arc::new(MemoryStorage::new()));
    session.login("u-1@shipdesk.test", "pw").await.expect("login");
    backend.accepted.lock().clear();

    let form = || {
        Form::new()
            .text("carrier", "north")
            .part("file", Part::text("sku,qty\nA1,3\n").file_name("manifest.csv"))
    };
    let body: Value = session.client().post_form("/uploads", form).await.expect("uploaded");

    assert_eq!(body, json!({ "multipart": true, "hasManifest": true }));
    assert_eq!(Backend::calls(&backend.resource_calls), 2);
    assert_eq!(Backend::calls(&backend.refresh_calls), 1);
}

#[tokio::test]
async fn second_rejection_ends_session() {
    let (addr, backend) = spawn_backend().await;
    let storage = Arc::new(MemoryStorage::new());
    let session = session(addr, &clock(), storage.clone());
    session.login("u-1@shipdesk.test", "pw").await.expect("login");
    let mut events = session.subscribe();

    backend.reject_all.store(true, Ordering::SeqCst);
    let err = session.client().get::<Value>("/shipments").await.expect_err("rejected twice");

    assert_eq!(err.kind(), ErrorKind::Unauthorized);
    assert_eq!(Backend::calls(&backend.resource_calls), 2);
    assert_eq!(Backend::calls(&backend.refresh_calls), 1);
    assert!(!session.is_authenticated());
    assert_eq!(storage.get(ACCESS_TOKEN_KEY), None);
    let event = next_matching(&mut events, |e| matches!(e, SessionEvent::LoggedOut { .. })).await;
    assert_eq!(event, SessionEvent::LoggedOut { reason: LogoutReason::Rejected });
}

#[tokio::test]
async fn refresh_failure_ends_session() {
    let (addr, backend) = spawn_backend().await;
    let clock = clock();
    let storage = Arc::new(MemoryStorage::new());
    let session = session(addr, &clock, storage.clone());
    session.login("u-1@shipdesk.test", "pw").await.expect("login");
    let mut events = session.subscribe();

    backend.refresh_status.store(401, Ordering::SeqCst);
    clock.advance(Duration::from_secs(3601));
    let err = session.client().get::<Value>("/shipments").await.expect_err("refresh failed");

    assert_eq!(err.kind(), ErrorKind::Unauthorized);
    assert_eq!(Backend::calls(&backend.resource_calls), 0);
    assert!(!session.is_authenticated());
    assert_eq!(storage.get(REFRESH_TOKEN_KEY), None);
    next_matching(&mut events, |e| matches!(e, SessionEvent::RefreshFailed { .. })).await;
    let event = next_matching(&mut events, |e| matches!(e, SessionEvent::LoggedOut { .. })).await;
    assert_eq!(event, SessionEvent::LoggedOut { reason: LogoutReason::RefreshFailed });
}

// -- logout --

#[tokio::test]
async fn logout_clears_tokens_and_timer() {
    let (addr, backend) = spawn_backend().await;
    let storage = Arc::new(MemoryStorage::new());
    let session = session(addr, &clock(), storage.clone());
    session.login("u-1@shipdesk.test", "pw").await.expect("login");
    wait_until("refresh timer", || session.is_refresh_scheduled()).await;

    session.logout().await.expect("logout");

    assert!(!session.is_refresh_scheduled());
    assert!(!session.is_authenticated());
    assert_eq!(storage.get(ACCESS_TOKEN_KEY), None);
    assert_eq!(storage.get(REFRESH_TOKEN_KEY), None);
    assert_eq!(Backend::calls(&backend.logout_calls), 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(Backend::calls(&backend.refresh_calls), 0);
    assert!(!session.is_refresh_scheduled());
}

#[tokio::test]
async fn logout_survives_unreachable_backend() {
    let (addr, _backend) = spawn_backend().await;
    let storage = Arc::new(MemoryStorage::new());
    let session = session(addr, &clock(), storage.clone());
    session.login("u-1@shipdesk.test", "pw").await.expect("login");

    let offline = Session::builder(SessionConfig::for_api("http://127.0.0.1:9"))
        .clock(clock())
        .storage(storage.clone())
        .build()
        .expect("session");
    assert!(offline.is_authenticated());
    offline.logout().await.expect("logout");

    assert!(!offline.is_authenticated());
    assert_eq!(storage.get(ACCESS_TOKEN_KEY), None);
}

// -- timer scenario --

#[tokio::test]
async fn hour_token_arms_timer_then_refreshes_inside_buffer() {
    let (addr, backend) = spawn_backend().await;
    let clock = clock();
    let session = session(addr, &clock, Arc::new(MemoryStorage::new()));
    let mut events = session.subscribe();

    session.login("u-1@shipdesk.test", "pw").await.expect("login");
    let scheduled =
        next_matching(&mut events, |e| matches!(e, SessionEvent::RefreshScheduled { .. })).await;
    assert_eq!(scheduled, SessionEvent::RefreshScheduled { delay: Duration::from_secs(3300) });

    clock.set_ms((START + 3600 - 5) * 1000);
    let body: Value = session.client().get("/shipments").await.expect("shipments");

    assert_eq!(body, json!({ "items": [1, 2] }));
    assert_eq!(Backend::calls(&backend.refresh_calls), 1);
    next_matching(&mut events, |e| matches!(e, SessionEvent::TokenRefreshed { rotated: false }))
        .await;
}

// -- restore --

#[tokio::test]
async fn restores_live_session_from_storage() {
    let (addr, backend) = spawn_backend().await;
    let storage = Arc::new(MemoryStorage::new());
    let access = token_expiring_at("u-7", START + 3600);
    backend.accepted.lock().insert(access.clone());
    storage.set(ACCESS_TOKEN_KEY, &access).expect("seed");
    storage.set(REFRESH_TOKEN_KEY, "r1").expect("seed");

    let session = session(addr, &clock(), storage);

    assert!(session.is_authenticated());
    assert_eq!(session.principal().and_then(|p| p.id).as_deref(), Some("u-7"));
    wait_until("profile merge", || session.profile().contains_key("phone")).await;
    wait_until("refresh timer", || session.is_refresh_scheduled()).await;
    assert_eq!(Backend::calls(&backend.refresh_calls), 0);
}

#[tokio::test]
async fn restored_expired_token_is_refreshed() {
    let (addr, backend) = spawn_backend().await;
    let storage = Arc::new(MemoryStorage::new());
    storage.set(ACCESS_TOKEN_KEY, &token_expiring_at("u-1", START - 60)).expect("seed");
    storage.set(REFRESH_TOKEN_KEY, "r1").expect("seed");
    let fresh = backend.refresh_access.lock().clone();

    let session = session(addr, &clock(), storage.clone());

    let refreshed = || storage.get(ACCESS_TOKEN_KEY).as_deref() == Some(fresh.as_str());
    wait_until("refreshed token", refreshed).await;
    assert_eq!(Backend::calls(&backend.refresh_calls), 1);
    assert!(session.is_authenticated());

    // The profile is fetched with the refreshed token, not the expired one.
    wait_until("profile merge", || session.profile().contains_key("phone")).await;
    assert_eq!(Backend::calls(&backend.profile_calls), 1);
}

#[tokio::test]
async fn restored_expired_token_without_refresh_logs_out() {
    let (addr, _backend) = spawn_backend().await;
    let storage = Arc::new(MemoryStorage::new());
    storage.set(ACCESS_TOKEN_KEY, &token_expiring_at("u-1", START - 60)).expect("seed");

    let session = session(addr, &clock(), storage.clone());

    wait_until("logout", || storage.get(ACCESS_TOKEN_KEY).is_none()).await;
    assert!(!session.is_authenticated());
}

#[tokio::test]
async fn restored_garbage_token_logs_out() {
    let (addr, backend) = spawn_backend().await;
    let storage = Arc::new(MemoryStorage::new());
    storage.set(ACCESS_TOKEN_KEY, "not-a-token").expect("seed");
    storage.set(REFRESH_TOKEN_KEY, "r1").expect("seed");

    let session = session(addr, &clock(), storage.clone());

    assert!(!session.is_authenticated());
    wait_until("logout", || storage.get(REFRESH_TOKEN_KEY).is_none()).await;
    assert_eq!(Backend::calls(&backend.refresh_calls), 0);
}

#[tokio::test]
async fn file_storage_carries_session_across_restarts() {
    let (addr, _backend) = spawn_backend().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("tokens.json");
    let clock = clock();

    {
        let storage = Arc::new(FileStorage::open(&path).expect("open"));
        let session = session(addr, &clock, storage);
        session.login("u-1@shipdesk.test", "pw").await.expect("login");
    }

    let storage = Arc::new(FileStorage::open(&path).expect("reopen"));
    let session = session(addr, &clock, storage);
    assert!(session.is_authenticated());
    assert!(session.has_role("staff"));
}
