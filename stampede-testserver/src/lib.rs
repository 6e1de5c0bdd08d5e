use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::{Duration, sleep};

pub const PATH_HELLO: &str = "/hello";
pub const PATH_ECHO: &str = "/echo";
pub const PATH_SLOW: &str = "/slow";
pub const PATH_STATUS: &str = "/status/{code}";
pub const PATH_LOGIN: &str = "/api/auth/login";
pub const PATH_LOGOUT: &str = "/api/auth/logout";
pub const PATH_SEARCH: &str = "/api/search";

pub const TEST_USER_EMAIL: &str = "test@example.com";
pub const TEST_USER_PASSWORD: &str = "Password123!";
pub const TEST_TOKEN: &str = "test-token";

const SEARCH_CATALOG: &[&str] = &[
    "laptop",
    "laptop stand",
    "phone",
    "phone case",
    "tablet",
    "headphones",
    "charger",
];

#[derive(Debug, Clone, Default)]
pub struct TestServerStats {
    requests_total: Arc<AtomicU64>,
    logins_ok: Arc<AtomicU64>,
    logins_rejected: Arc<AtomicU64>,
    searches: Arc<AtomicU64>,
    saw_auth_header: Arc<AtomicU64>,
}

impl TestServerStats {
    fn inc_requests_total(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn logins_ok(&self) -> u64 {
        self.logins_ok.load(Ordering::Relaxed)
    }

    pub fn logins_rejected(&self) -> u64 {
        self.logins_rejected.load(Ordering::Relaxed)
    }

    pub fn searches(&self) -> u64 {
        self.searches.load(Ordering::Relaxed)
    }

    pub fn saw_auth_header(&self) -> u64 {
        self.saw_auth_header.load(Ordering::Relaxed)
    }
}

async fn handle_hello(State(stats): State<TestServerStats>) -> &'static str {
    stats.inc_requests_total();
    "Hello World!"
}

async fn handle_echo(State(stats): State<TestServerStats>, body: Bytes) -> (StatusCode, Bytes) {
    stats.inc_requests_total();
    (StatusCode::OK, body)
}

#[derive(Debug, Deserialize)]
struct SlowQuery {
    ms: Option<u64>,
}

async fn handle_slow(
    State(stats): State<TestServerStats>,
    Query(query): Query<SlowQuery>,
) -> &'static str {
    stats.inc_requests_total();
    sleep(Duration::from_millis(query.ms.unwrap_or(50))).await;
    "slow"
}

async fn handle_status(State(stats): State<TestServerStats>, Path(code): Path<u16>) -> StatusCode {
    stats.inc_requests_total();
    StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST)
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    token: &'static str,
}

async fn handle_login(
    State(stats): State<TestServerStats>,
    body: Bytes,
) -> Result<Json<LoginResponse>, StatusCode> {
    stats.inc_requests_total();

    let req: LoginRequest = serde_json::from_slice(&body).map_err(|_| StatusCode::BAD_REQUEST)?;
    if req.email == TEST_USER_EMAIL && req.password == TEST_USER_PASSWORD {
        stats.logins_ok.fetch_add(1, Ordering::Relaxed);
        Ok(Json(LoginResponse { token: TEST_TOKEN }))
    } else {
        stats.logins_rejected.fetch_add(1, Ordering::Relaxed);
        Err(StatusCode::UNAUTHORIZED)
    }
}

fn bearer_ok(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        == Some(TEST_TOKEN)
}

async fn handle_logout(State(stats): State<TestServerStats>, headers: HeaderMap) -> StatusCode {
    stats.inc_requests_total();
    if bearer_ok(&headers) {
        stats.saw_auth_header.fetch_add(1, Ordering::Relaxed);
        StatusCode::NO_CONTENT
    } else {
        StatusCode::UNAUTHORIZED
    }
}

#[derive(Debug, Serialize)]
struct SearchResponse {
    query: String,
    results: Vec<&'static str>,
}

async fn handle_search(
    State(stats): State<TestServerStats>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<SearchResponse>, StatusCode> {
    stats.inc_requests_total();
    stats.searches.fetch_add(1, Ordering::Relaxed);
    if bearer_ok(&headers) {
        stats.saw_auth_header.fetch_add(1, Ordering::Relaxed);
    }

    let Some(q) = query.get("q").filter(|q| !q.is_empty()) else {
        return Err(StatusCode::BAD_REQUEST);
    };
    let limit = query
        .get("limit")
        .and_then(|l| l.parse::<usize>().ok())
        .unwrap_or(10);

    let results = SEARCH_CATALOG
        .iter()
        .copied()
        .filter(|item| item.contains(q.as_str()))
        .take(limit)
        .collect();

    Ok(Json(SearchResponse {
        query: q.clone(),
        results,
    }))
}

pub fn router(stats: TestServerStats) -> Router {
    Router::new()
        .route(PATH_HELLO, get(handle_hello))
        .route(PATH_ECHO, post(handle_echo))
        .route(PATH_SLOW, get(handle_slow))
        .route(PATH_STATUS, get(handle_status))
        .route(PATH_LOGIN, post(handle_login))
        .route(PATH_LOGOUT, post(handle_logout))
        .route(PATH_SEARCH, get(handle_search))
        .with_state(stats)
}

/// In-process target for integration tests. Binds an ephemeral port on loopback.
pub struct TestServer {
    addr: SocketAddr,
    base_url: String,
    stats: TestServerStats,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let stats = TestServerStats::default();
        let app = router(stats.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = serve.await;
        });

        Ok(Self {
            addr,
            base_url: format!("http://{addr}"),
            stats,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub fn stats(&self) -> &TestServerStats {
        &self.stats
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some()
            && let Some(task) = self.task.take()
        {
            task.abort();
        }
    }
}
