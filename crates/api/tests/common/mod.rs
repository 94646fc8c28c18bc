#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::Response;
use axum::Router;
use geoengine_api::config::ServerConfig;
use geoengine_api::router::build_app_router;
use geoengine_api::server::build_state;
use geoengine_core::runtime::ProcessRuntime;
use geoengine_core::settings::SettingsStore;
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

pub const WORKER_NAME: &str = "echo-worker";

/// Build a test `ServerConfig` with safe defaults.
///
/// Uses `http://localhost:5173` as CORS origin and two job slots.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        max_workers: 2,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
    }
}

const WORKER_SCRIPT: &str = r#"#!/bin/sh
while [ $# -gt 0 ]; do
  case "$1" in
    --message) message="$2"; shift 2 ;;
    --delay) delay="$2"; shift 2 ;;
    --exit) code="$2"; shift 2 ;;
    *) shift ;;
  esac
done
echo "message=$message"
echo "working" >&2
sleep "${delay:-0}"
if [ -d "$GEOENGINE_OUTPUT_DIR" ]; then
  printf '%s' "$message" > "$GEOENGINE_OUTPUT_DIR/result.txt"
fi
exit "${code:-0}"
"#;

/// A GeoEngine home with one registered worker and a router over it.
pub struct TestEnv {
    pub home: TempDir,
    pub worker_dir: PathBuf,
    pub app: Router,
}

impl TestEnv {
    pub fn output_dir(&self) -> PathBuf {
        self.home.path().join("out")
    }
}

/// Write the test worker into `dir`.
pub fn write_worker(dir: &Path) {
    std::fs::create_dir_all(dir).unwrap();
    let script = dir.join("run.sh");
    std::fs::write(&script, WORKER_SCRIPT).unwrap();
    std::fs::write(dir.join("Dockerfile"), "FROM alpine:3\n").unwrap();
    let manifest = format!(
        r#"name: {WORKER_NAME}
version: "1.2.0"
description: "Echoes its message"
command:
  program: sh
  script: {script}
  inputs:
    - name: message
      type: string
      required: true
    - name: delay
      type: number
      default: 0
    - name: exit
      type: number
      default: 0
    - name: mode
      type: enum
      enum_values: [fast, slow]
      default: fast
plugins:
  qgis: true
"#,
        script = script.display()
    );
    std::fs::write(dir.join("geoengine.yaml"), manifest).unwrap();
}

/// Build the full application router over a fresh home directory.
///
/// Containers run as host processes through [`ProcessRuntime`].
///
/// Must be called inside a Tokio runtime; the job queue spawns its
/// dispatcher on creation.
pub fn build_test_app() -> TestEnv {
    let home = tempfile::tempdir().unwrap();
    let worker_dir = home.path().join("workers").join(WORKER_NAME);
    write_worker(&worker_dir);

    let settings = SettingsStore::at_home(home.path());
    let registered = worker_dir.clone();
    settings
        .update(|s| {
            s.register_worker(WORKER_NAME, registered);
            Ok(())
        })
        .unwrap();

    let config = test_config();
    let state = build_state(config.clone(), settings, Arc::new(ProcessRuntime::new()));
    let app = build_app_router(state, &config);
    TestEnv {
        home,
        worker_dir,
        app,
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn get(app: Router, uri: &str) -> Response {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_empty(app: Router, uri: &str) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn delete(app: Router, uri: &str) -> Response {
    let request = Request::builder()
        .method(Method::DELETE)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Poll `GET /api/jobs/{id}` until `status` is reached.
pub async fn wait_for_status(app: &Router, id: &str, status: &str) -> serde_json::Value {
    for _ in 0..200 {
        let json = body_json(get(app.clone(), &format!("/api/jobs/{id}")).await).await;
        if json["status"] == status {
            return json;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("job {id} never reached status {status}");
}
