//! Shared fixtures for integration tests: an axum server with canned
//! responses, and indexers that fail or count on demand.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{bail, Result};
use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use ragbox::ragbox_core::index::memory::MemoryIndexer;
use ragbox::ragbox_core::models::Metadata;
use ragbox::ragbox_core::Indexer;

#[derive(Debug, Clone)]
pub struct Route {
    pub status: u16,
    pub content_type: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Route {
    pub fn new(status: u16, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            content_type: content_type.to_string(),
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn html(body: &str) -> Self {
        Self::new(200, "text/html; charset=utf-8", body)
    }

    pub fn text(body: &str) -> Self {
        Self::new(200, "text/plain", body)
    }

    pub fn xml(body: &str) -> Self {
        Self::new(200, "application/xml", body)
    }

    /// `302 Found` pointing at `location`, absolute or relative.
    pub fn redirect(location: &str) -> Self {
        Self::new(302, "text/plain", "").with_header("location", location)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    /// Request target including any query string.
    pub target: String,
    /// Lowercased header names.
    pub headers: HashMap<String, String>,
    pub body: String,
    pub at: Instant,
}

impl Recorded {
    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or("")
    }
}

#[derive(Clone, Default)]
struct ServerState {
    routes: Arc<Mutex<HashMap<String, Route>>>,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

/// Serves routes keyed by path (query ignored); unknown paths get 404.
pub struct TestServer {
    addr: SocketAddr,
    state: ServerState,
    task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start(routes: Vec<(&str, Route)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = ServerState::default();
        state
            .routes
            .lock()
            .unwrap()
            .extend(routes.into_iter().map(|(p, r)| (p.to_string(), r)));

        let app = Router::new().fallback(respond).with_state(state.clone());
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { addr, state, task }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn set_route(&self, path: &str, route: Route) {
        self.state
            .routes
            .lock()
            .unwrap()
            .insert(path.to_string(), route);
    }

    pub fn remove_route(&self, path: &str) {
        self.state.routes.lock().unwrap().remove(path);
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn requested_paths(&self) -> Vec<String> {
        self.requests().iter().map(|r| r.path().to_string()).collect()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn respond(
    State(state): State<ServerState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let recorded = Recorded {
        method: method.to_string(),
        target: uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| uri.path().to_string()),
        headers: headers
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    v.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect(),
        body: String::from_utf8_lossy(&body).to_string(),
        at: Instant::now(),
    };
    let route = state.routes.lock().unwrap().get(recorded.path()).cloned();
    state.requests.lock().unwrap().push(recorded);

    let Some(route) = route else {
        return (StatusCode::NOT_FOUND, "not found").into_response();
    };
    let mut response = Response::builder()
        .status(route.status)
        .header(header::CONTENT_TYPE, route.content_type);
    for (name, value) in &route.headers {
        response = response.header(name.as_str(), value.as_str());
    }
    response.body(Body::from(route.body)).unwrap()
}

/// Wraps a [`MemoryIndexer`]; ingest fails for ids listed in `fail_ids`
/// and every collaborator call is counted.
pub struct FlakyIndexer {
    pub inner: MemoryIndexer,
    fail_ids: Mutex<Vec<String>>,
    pub ingests: AtomicUsize,
    pub deletes: AtomicUsize,
}

impl FlakyIndexer {
    pub fn new() -> Self {
        Self {
            inner: MemoryIndexer::new(),
            fail_ids: Mutex::new(Vec::new()),
            ingests: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        }
    }

    pub fn fail_on(&self, ids: &[&str]) {
        *self.fail_ids.lock().unwrap() = ids.iter().map(|s| s.to_string()).collect();
    }

    pub fn calls(&self) -> usize {
        self.ingests.load(Ordering::SeqCst) + self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Indexer for FlakyIndexer {
    async fn ingest_text(
        &self,
        content: &str,
        document_id: &str,
        metadata: &Metadata,
    ) -> Result<usize> {
        self.ingests.fetch_add(1, Ordering::SeqCst);
        if self.fail_ids.lock().unwrap().iter().any(|id| id == document_id) {
            bail!("collaborator rejected '{}'", document_id);
        }
        self.inner.ingest_text(content, document_id, metadata).await
    }

    async fn delete_document(&self, document_id: &str) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_document(document_id).await
    }
}
