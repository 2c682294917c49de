//! Common test utilities for integration tests.
//!
//! The router runs over in-memory stores, a scripted chart source and a
//! manual clock, so these tests need no database.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Method, Request},
    Router,
};
use domain::models::{ChartKind, FilterState};
use domain::services::{
    ChartSource, FetchError, InMemoryExportStore, InMemoryPreferenceStore, ManualClock,
};
use revenue_dashboard_api::app::{create_app, AppState, Backends};
use revenue_dashboard_api::config::Config;
use revenue_dashboard_api::extractors::USER_ID_HEADER;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use uuid::Uuid;

/// Chart source answering from fixed data. Each fetch is numbered so tests
/// can tell fresh results from cached ones.
pub struct ScriptedSource {
    calls: AtomicUsize,
    failing: AtomicBool,
    held: AtomicBool,
    release: Semaphore,
}

impl Default for ScriptedSource {
    fn default() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            held: AtomicBool::new(false),
            release: Semaphore::new(0),
        }
    }
}

impl ScriptedSource {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Makes later fetches wait until [`ScriptedSource::release`].
    pub fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    /// Lets every held fetch, current and future, complete.
    pub fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
        self.release.close();
    }

    pub async fn wait_for_calls(&self, expected: usize) {
        for _ in 0..1_000 {
            if self.calls() >= expected {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("expected {} chart fetches, saw {}", expected, self.calls());
    }
}

#[async_trait::async_trait]
impl ChartSource for ScriptedSource {
    async fn fetch(&self, kind: ChartKind, filters: &FilterState) -> Result<Value, FetchError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.held.load(Ordering::SeqCst) {
            // Closed on release; no permits are ever added.
            let _ = self.release.acquire().await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(FetchError::Source("warehouse unreachable".to_string()));
        }
        Ok(json!({
            "kind": kind.as_str(),
            "call": call,
            "active_filters": filters.active_filter_count(),
        }))
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub clock: Arc<ManualClock>,
    pub source: Arc<ScriptedSource>,
    pub exports: Arc<InMemoryExportStore>,
    pub preferences: Arc<InMemoryPreferenceStore>,
    pub export_root: PathBuf,
}

impl Drop for TestApp {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.export_root);
    }
}

pub fn test_config(export_root: &std::path::Path, overrides: &[(&str, &str)]) -> Config {
    let root = export_root.display().to_string();
    let mut all = vec![("downloads.export_dir", root.as_str())];
    all.extend_from_slice(overrides);
    Config::load_for_test(&all).expect("test config")
}

pub fn create_test_app() -> TestApp {
    create_test_app_with(&[])
}

pub fn create_test_app_with(overrides: &[(&str, &str)]) -> TestApp {
    let export_root = std::env::temp_dir().join(format!("rd-it-{}", Uuid::new_v4()));
    let config = test_config(&export_root, overrides);

    let clock = Arc::new(ManualClock::default());
    let source = Arc::new(ScriptedSource::default());
    let exports = Arc::new(InMemoryExportStore::new());
    let preferences = Arc::new(InMemoryPreferenceStore::new());

    let state = AppState::new(
        config,
        Backends {
            exports: exports.clone(),
            preferences: preferences.clone(),
            source: source.clone(),
            clock: clock.clone(),
            pool: None,
        },
    );

    TestApp {
        router: create_app(state.clone()),
        state,
        clock,
        source,
        exports,
        preferences,
        export_root,
    }
}

/// Build a request acting as `user`.
pub fn user_request(method: Method, uri: &str, user: Uuid, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(USER_ID_HEADER, user.to_string());
    match body {
        Some(body) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub fn anonymous_request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub async fn parse_response_body(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap_or(Value::Null)
}

pub async fn response_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}
