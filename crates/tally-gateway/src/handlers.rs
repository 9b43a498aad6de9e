// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP request handlers for the registry API.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tally_core::{HealthReport, InstallMode, InstallationRecord};
use tally_discovery::{DiscoveryOutcome, FailureKind};
use tally_lifecycle::{InstallOptions, InstallReport, RemoveOutcome, UpdateOptions, UpdateOutcome};
use tally_plugin::{PluginManifest, ValidationResult};

use crate::error::ApiError;
use crate::server::GatewayState;

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Response body for GET /health.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub installed: usize,
}

/// GET /health
pub async fn get_public_health(State(state): State<GatewayState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        installed: state.registry.list_installed_plugins().await.len(),
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct DiscoverQuery {
    #[serde(default)]
    pub refresh: bool,
}

/// Discovery summary without the full index.
#[derive(Debug, Serialize)]
pub struct DiscoverResponse {
    pub plugins: usize,
    pub from_cache: bool,
    pub discovered_at: String,
    pub failures: Vec<SourceFailureBody>,
    pub rejected: usize,
    pub warnings: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SourceFailureBody {
    pub source: String,
    pub kind: FailureKind,
    pub message: String,
}

impl From<DiscoveryOutcome> for DiscoverResponse {
    fn from(outcome: DiscoveryOutcome) -> Self {
        Self {
            plugins: outcome.index.len(),
            from_cache: outcome.from_cache,
            discovered_at: outcome.discovered_at.to_rfc3339(),
            failures: outcome
                .failures
                .into_iter()
                .map(|f| SourceFailureBody {
                    source: f.source,
                    kind: f.kind,
                    message: f.message,
                })
                .collect(),
            rejected: outcome.rejected.len(),
            warnings: outcome.warnings,
        }
    }
}

/// POST /v1/plugins/discover?refresh=
pub async fn post_discover(
    State(state): State<GatewayState>,
    Query(query): Query<DiscoverQuery>,
) -> ApiResult<DiscoverResponse> {
    let cancel = state.shutdown.child_token();
    let outcome = state.registry.discover_plugins(&cancel, query.refresh).await?;
    Ok(Json(outcome.into()))
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    #[serde(default)]
    pub provider: Option<String>,
}

/// One row of a plugin listing.
#[derive(Debug, Serialize)]
pub struct PluginSummary {
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub providers: Vec<String>,
    pub trust_level: String,
}

impl From<PluginManifest> for PluginSummary {
    fn from(m: PluginManifest) -> Self {
        Self {
            name: m.name,
            version: m.version,
            description: m.description,
            providers: m.spec.providers,
            trust_level: m.security.trust_level,
        }
    }
}

/// GET /v1/plugins?q=&provider=
pub async fn get_plugins(
    State(state): State<GatewayState>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Vec<PluginSummary>> {
    let found = state
        .registry
        .search_plugins(&query.q, query.provider.as_deref())
        .await?;
    Ok(Json(found.into_iter().map(PluginSummary::from).collect()))
}

#[derive(Debug, Default, Deserialize)]
pub struct VersionQuery {
    #[serde(default)]
    pub version: Option<String>,
}

/// GET /v1/plugins/{name}?version=
pub async fn get_plugin(
    State(state): State<GatewayState>,
    Path(name): Path<String>,
    Query(query): Query<VersionQuery>,
) -> ApiResult<PluginManifest> {
    let manifest = state
        .registry
        .get_plugin_manifest(&name, query.version.as_deref())
        .await?;
    Ok(Json(manifest))
}

/// POST /v1/plugins/validate
///
/// The body is the manifest document itself.
pub async fn post_validate(
    State(state): State<GatewayState>,
    Json(document): Json<Value>,
) -> Json<ValidationResult> {
    Json(state.registry.validate_plugin(&document))
}

/// Request body for POST /v1/plugins/install.
#[derive(Debug, Deserialize)]
pub struct InstallRequest {
    pub name: String,
    /// Version constraint; the latest version when absent.
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub confirm_warnings: bool,
}

/// Gateway installs are always automated: no trust overrides over HTTP.
fn automated(confirm_warnings: bool) -> InstallOptions {
    InstallOptions {
        confirm_warnings,
        mode: InstallMode::Automated,
        trust_override: None,
    }
}

/// POST /v1/plugins/install
pub async fn post_install(
    State(state): State<GatewayState>,
    Json(body): Json<InstallRequest>,
) -> ApiResult<InstallReport> {
    let report = state
        .registry
        .install_plugin(&body.name, body.version.as_deref(), automated(body.confirm_warnings))
        .await?;
    Ok(Json(report))
}

/// Request body for POST /v1/plugins/{name}/update.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateRequest {
    /// Exact target version; the newest discovered version when absent.
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub acknowledge: bool,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub confirm_warnings: bool,
}

/// POST /v1/plugins/{name}/update
pub async fn post_update(
    State(state): State<GatewayState>,
    Path(name): Path<String>,
    Json(body): Json<UpdateRequest>,
) -> ApiResult<UpdateOutcome> {
    let options = UpdateOptions {
        acknowledge: body.acknowledge,
        force: body.force,
        install: automated(body.confirm_warnings),
    };
    let outcome = state
        .registry
        .update_plugin(&name, body.version.as_deref(), options)
        .await?;
    Ok(Json(outcome))
}

#[derive(Debug, Default, Deserialize)]
pub struct RemoveQuery {
    #[serde(default)]
    pub cascade: bool,
}

/// DELETE /v1/plugins/{name}?cascade=
pub async fn delete_plugin(
    State(state): State<GatewayState>,
    Path(name): Path<String>,
    Query(query): Query<RemoveQuery>,
) -> ApiResult<RemoveOutcome> {
    Ok(Json(state.registry.remove_plugin(&name, query.cascade).await?))
}

/// GET /v1/installed
pub async fn get_installed(State(state): State<GatewayState>) -> Json<Vec<InstallationRecord>> {
    Json(state.registry.list_installed_plugins().await)
}

/// GET /v1/installed/{name}/health
pub async fn get_installed_health(
    State(state): State<GatewayState>,
    Path(name): Path<String>,
) -> ApiResult<HealthReport> {
    Ok(Json(state.registry.check_plugin_health(&name).await?))
}
