// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Router tests driven through `tower::ServiceExt::oneshot`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tally_discovery::filesystem::FilesystemSource;
use tally_discovery::{DiscoveryEngine, DiscoverySource};
use tally_gateway::{GatewayState, router};
use tally_lifecycle::{
    ConfiguredSandbox, DefaultFetcher, FileHealthMonitor, LifecycleManager, LifecycleOptions,
    Registry,
};
use tally_plugin::ManifestValidator;
use tally_storage::InstallationStore;
use tally_verify::TrustPolicy;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

const SCRIPT: &[u8] = b"#!/bin/sh\nexit 0\n";

fn write_manifest(dir: &Path, name: &str, version: &str, deps: Value) {
    write_manifest_with_trust(dir, name, version, deps, "verified");
}

fn write_manifest_with_trust(dir: &Path, name: &str, version: &str, deps: Value, trust: &str) {
    let artifact = dir.join("artifacts").join(format!("{name}-{version}"));
    std::fs::create_dir_all(artifact.parent().unwrap()).unwrap();
    std::fs::write(&artifact, SCRIPT).unwrap();

    let doc = json!({
        "schema_version": "1.0.0",
        "name": name,
        "version": version,
        "author": "FinOps Team",
        "spec": { "providers": ["aws"] },
        "security": { "trust_level": trust },
        "installation": {
            "method": "binary",
            "download_url": artifact.to_string_lossy(),
            "checksum": format!("sha256:{}", hex::encode(Sha256::digest(SCRIPT)))
        },
        "requirements": { "dependencies": deps }
    });
    let entry = dir.join("catalog").join(format!("{name}-{version}"));
    std::fs::create_dir_all(&entry).unwrap();
    std::fs::write(entry.join("plugin.json"), doc.to_string()).unwrap();
}

async fn app(token: Option<&str>) -> (TempDir, Router) {
    let dir = tempfile::tempdir().unwrap();
    write_manifest(dir.path(), "auth-helper", "1.0.0", json!([]));
    write_manifest(
        dir.path(),
        "billing-sync",
        "3.0.0",
        json!([{ "name": "auth-helper", "version": "^1.0.0" }]),
    );

    let discovery = DiscoveryEngine::new(
        ManifestValidator::new(),
        Duration::from_secs(5),
        Duration::from_secs(60),
    )
    .with_source(
        DiscoverySource::Filesystem(FilesystemSource::new(
            "local",
            dir.path().join("catalog"),
            true,
            "plugin.json",
        )),
        0,
        None,
    );
    let store = InstallationStore::open(dir.path().join("tally.db")).await.unwrap();
    let manager = LifecycleManager::new(
        store,
        TrustPolicy::default(),
        LifecycleOptions {
            install_root: dir.path().join("plugins"),
            transition_timeout: Duration::from_secs(30),
            step_timeout: Duration::from_secs(5),
        },
        Arc::new(DefaultFetcher::new(Duration::from_secs(5)).unwrap()),
        Arc::new(FileHealthMonitor),
        Arc::new(ConfiguredSandbox::new("none", false)),
    );
    manager.load().await.unwrap();

    let registry = Arc::new(Registry::new(discovery, Arc::new(manager)));
    let state = GatewayState::new(registry, CancellationToken::new());
    (dir, router(state, token.map(str::to_string)))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn public_health_needs_no_token() {
    let (_dir, app) = app(Some("s3cret")).await;
    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn api_requires_bearer_token_when_configured() {
    let (_dir, app) = app(Some("s3cret")).await;
    let (status, _) = send(&app, "GET", "/v1/installed", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .uri("/v1/installed")
        .header("authorization", "Bearer s3cret")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn discover_and_search() {
    let (_dir, app) = app(None).await;
    let (status, body) = send(&app, "POST", "/v1/plugins/discover?refresh=true", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["plugins"], 2);
    assert_eq!(body["from_cache"], false);

    let (status, body) = send(&app, "GET", "/v1/plugins?q=billing", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["name"], "billing-sync");

    let (status, body) = send(&app, "GET", "/v1/plugins/auth-helper", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], "1.0.0");

    let (status, body) = send(&app, "GET", "/v1/plugins/ghost", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn validate_reports_findings() {
    let (_dir, app) = app(None).await;
    let (status, body) = send(
        &app,
        "POST",
        "/v1/plugins/validate",
        Some(json!({ "schema_version": "1.0.0", "name": "Not Valid" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["passed"], false);
    assert!(!body["findings"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn install_then_blocked_remove_then_cascade() {
    let (_dir, app) = app(None).await;

    let (status, body) = send(
        &app,
        "POST",
        "/v1/plugins/install",
        Some(json!({ "name": "billing-sync", "confirm_warnings": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["installed"].as_array().unwrap().len(), 2);

    let (status, body) = send(&app, "GET", "/v1/installed", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (status, body) = send(&app, "GET", "/v1/installed/auth-helper/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = send(&app, "DELETE", "/v1/plugins/auth-helper", None).await;
    assert_eq!(status, StatusCode::PRECONDITION_FAILED);
    assert_eq!(body["code"], "FAILED_PRECONDITION");
    assert_eq!(body["dependents"], json!(["billing-sync"]));

    let (status, body) = send(&app, "DELETE", "/v1/plugins/auth-helper?cascade=true", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], json!(["billing-sync", "auth-helper"]));
}

#[tokio::test]
async fn unconfirmed_install_lists_warnings() {
    let (_dir, app) = app(None).await;
    let (status, body) = send(
        &app,
        "POST",
        "/v1/plugins/install",
        Some(json!({ "name": "auth-helper" })),
    )
    .await;
    assert_eq!(status, StatusCode::PRECONDITION_FAILED);
    assert!(!body["findings"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn update_of_missing_plugin_is_not_found() {
    let (_dir, app) = app(None).await;
    let (status, _) = send(&app, "POST", "/v1/plugins/ghost/update", Some(json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn gateway_install_ignores_trust_override() {
    let (dir, app) = app(None).await;
    write_manifest_with_trust(dir.path(), "sketchy-cost", "0.1.0", json!([]), "untrusted");
    let (status, _) = send(&app, "POST", "/v1/plugins/discover?refresh=true", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &app,
        "POST",
        "/v1/plugins/install",
        Some(json!({
            "name": "sketchy-cost",
            "confirm_warnings": true,
            "mode": "interactive",
            "trust_override": "untrusted"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN, "{body}");
    assert_eq!(body["code"], "PERMISSION_DENIED");

    let (_, installed) = send(&app, "GET", "/v1/installed", None).await;
    assert_eq!(installed, json!([]));
}
