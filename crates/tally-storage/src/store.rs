// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite-backed persistence for installed plugins.
//!
//! [`InstallationStore`] manages the `installed_plugins` table created by the
//! V1 migration. One row per plugin name; file lists and dependency
//! declarations are stored as JSON columns.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};
use tally_core::{
    HealthReport, HealthStatus, InstallMethod, InstallationRecord, InstalledDependency,
    LifecycleState, TallyError, TrustLevel,
};
use tracing::debug;

use crate::database::{Database, map_tr_err};

const COLUMNS: &str = "name, version, installed_at, updated_at, method, install_dir, files_json, \
     entry_point, state, trust_level, dependencies_json, health_status, health_checked_at, \
     health_message, needs_attention, manifest_json";

/// Row exactly as stored; converted to a typed record outside the DB thread.
struct RawRecord {
    name: String,
    version: String,
    installed_at: String,
    updated_at: String,
    method: String,
    install_dir: String,
    files_json: String,
    entry_point: Option<String>,
    state: String,
    trust_level: String,
    dependencies_json: String,
    health_status: String,
    health_checked_at: Option<String>,
    health_message: Option<String>,
    needs_attention: bool,
    manifest_json: String,
}

impl RawRecord {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            name: row.get(0)?,
            version: row.get(1)?,
            installed_at: row.get(2)?,
            updated_at: row.get(3)?,
            method: row.get(4)?,
            install_dir: row.get(5)?,
            files_json: row.get(6)?,
            entry_point: row.get(7)?,
            state: row.get(8)?,
            trust_level: row.get(9)?,
            dependencies_json: row.get(10)?,
            health_status: row.get(11)?,
            health_checked_at: row.get(12)?,
            health_message: row.get(13)?,
            needs_attention: row.get(14)?,
            manifest_json: row.get(15)?,
        })
    }

    fn into_record(self) -> Result<InstallationRecord, TallyError> {
        let name = self.name;
        let corrupt = |field: &str, e: &dyn std::fmt::Display| {
            TallyError::Internal(format!("stored record `{name}` has invalid {field}: {e}"))
        };

        let files: Vec<String> =
            serde_json::from_str(&self.files_json).map_err(|e| corrupt("files_json", &e))?;
        let dependencies: Vec<InstalledDependency> = serde_json::from_str(&self.dependencies_json)
            .map_err(|e| corrupt("dependencies_json", &e))?;
        let checked_at = match self.health_checked_at {
            Some(ts) => Some(parse_timestamp(&ts).map_err(|e| corrupt("health_checked_at", &e))?),
            None => None,
        };

        Ok(InstallationRecord {
            version: semver::Version::parse(&self.version).map_err(|e| corrupt("version", &e))?,
            installed_at: parse_timestamp(&self.installed_at)
                .map_err(|e| corrupt("installed_at", &e))?,
            updated_at: parse_timestamp(&self.updated_at).map_err(|e| corrupt("updated_at", &e))?,
            method: InstallMethod::from_str(&self.method).map_err(|e| corrupt("method", &e))?,
            install_dir: PathBuf::from(self.install_dir),
            files: files.into_iter().map(PathBuf::from).collect(),
            entry_point: self.entry_point.map(PathBuf::from),
            state: LifecycleState::from_str(&self.state).map_err(|e| corrupt("state", &e))?,
            trust_level: TrustLevel::from_str(&self.trust_level)
                .map_err(|e| corrupt("trust_level", &e))?,
            dependencies,
            health: HealthReport {
                status: HealthStatus::from_str(&self.health_status)
                    .map_err(|e| corrupt("health_status", &e))?,
                checked_at,
                message: self.health_message,
            },
            needs_attention: self.needs_attention,
            manifest_json: self.manifest_json,
            name,
        })
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(value).map(|dt| dt.with_timezone(&Utc))
}

fn json_err(e: serde_json::Error) -> TallyError {
    TallyError::Internal(format!("failed to encode record: {e}"))
}

/// Persistent table of installed plugins.
///
/// Holds an `Arc<Database>` and delegates SQL operations via `call()`.
#[derive(Clone)]
pub struct InstallationStore {
    db: Arc<Database>,
}

impl InstallationStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Open the database at `path` and wrap it in a store.
    pub async fn open(path: impl AsRef<std::path::Path>) -> Result<Self, TallyError> {
        Ok(Self::new(Arc::new(Database::open(path).await?)))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Insert or replace the record for `record.name`.
    pub async fn upsert(&self, record: &InstallationRecord) -> Result<(), TallyError> {
        let name = record.name.clone();
        let version = record.version.to_string();
        let installed_at = record.installed_at.to_rfc3339();
        let updated_at = record.updated_at.to_rfc3339();
        let method = record.method.to_string();
        let install_dir = record.install_dir.to_string_lossy().into_owned();
        let files: Vec<String> = record
            .files
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        let files_json = serde_json::to_string(&files).map_err(json_err)?;
        let entry_point = record
            .entry_point
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned());
        let state = record.state.to_string();
        let trust_level = record.trust_level.to_string();
        let dependencies_json = serde_json::to_string(&record.dependencies).map_err(json_err)?;
        let health_status = record.health.status.to_string();
        let health_checked_at = record.health.checked_at.map(|t| t.to_rfc3339());
        let health_message = record.health.message.clone();
        let needs_attention = record.needs_attention;
        let manifest_json = record.manifest_json.clone();

        self.db
            .connection()
            .call(move |conn| -> Result<(), rusqlite::Error> {
                conn.execute(
                    &format!(
                        "INSERT OR REPLACE INTO installed_plugins ({COLUMNS}) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, \
                         ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
                    ),
                    params![
                        name,
                        version,
                        installed_at,
                        updated_at,
                        method,
                        install_dir,
                        files_json,
                        entry_point,
                        state,
                        trust_level,
                        dependencies_json,
                        health_status,
                        health_checked_at,
                        health_message,
                        needs_attention,
                        manifest_json,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        debug!(plugin = %record.name, version = %record.version, "record saved");
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Result<Option<InstallationRecord>, TallyError> {
        let name = name.to_string();
        let raw = self
            .db
            .connection()
            .call(move |conn| -> Result<Option<RawRecord>, rusqlite::Error> {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {COLUMNS} FROM installed_plugins WHERE name = ?1"
                ))?;
                stmt.query_row(params![name], RawRecord::from_row).optional()
            })
            .await
            .map_err(map_tr_err)?;
        raw.map(RawRecord::into_record).transpose()
    }

    /// Every record, ordered by name.
    pub async fn list(&self) -> Result<Vec<InstallationRecord>, TallyError> {
        let rows = self
            .db
            .connection()
            .call(|conn| -> Result<Vec<RawRecord>, rusqlite::Error> {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {COLUMNS} FROM installed_plugins ORDER BY name"
                ))?;
                let rows = stmt.query_map([], RawRecord::from_row)?;
                rows.collect()
            })
            .await
            .map_err(map_tr_err)?;
        rows.into_iter().map(RawRecord::into_record).collect()
    }

    /// Delete the record. Returns whether a row existed.
    pub async fn remove(&self, name: &str) -> Result<bool, TallyError> {
        let name = name.to_string();
        let deleted = self
            .db
            .connection()
            .call(move |conn| -> Result<usize, rusqlite::Error> {
                conn.execute("DELETE FROM installed_plugins WHERE name = ?1", params![name])
            })
            .await
            .map_err(map_tr_err)?;
        Ok(deleted > 0)
    }

    /// Move a record to `state`. Errors with `NotFound` when no row exists.
    pub async fn set_state(&self, name: &str, state: LifecycleState) -> Result<(), TallyError> {
        let owned = name.to_string();
        let state = state.to_string();
        let now = Utc::now().to_rfc3339();
        let updated = self
            .db
            .connection()
            .call(move |conn| -> Result<usize, rusqlite::Error> {
                conn.execute(
                    "UPDATE installed_plugins SET state = ?2, updated_at = ?3 WHERE name = ?1",
                    params![owned, state, now],
                )
            })
            .await
            .map_err(map_tr_err)?;
        if updated == 0 {
            return Err(TallyError::plugin_not_found(name));
        }
        Ok(())
    }

    /// Store the latest health report and attention flag.
    pub async fn update_health(
        &self,
        name: &str,
        report: &HealthReport,
        needs_attention: bool,
    ) -> Result<(), TallyError> {
        let owned = name.to_string();
        let status = report.status.to_string();
        let checked_at = report.checked_at.map(|t| t.to_rfc3339());
        let message = report.message.clone();
        let updated = self
            .db
            .connection()
            .call(move |conn| -> Result<usize, rusqlite::Error> {
                conn.execute(
                    "UPDATE installed_plugins \
                     SET health_status = ?2, health_checked_at = ?3, health_message = ?4, \
                         needs_attention = ?5 \
                     WHERE name = ?1",
                    params![owned, status, checked_at, message, needs_attention],
                )
            })
            .await
            .map_err(map_tr_err)?;
        if updated == 0 {
            return Err(TallyError::plugin_not_found(name));
        }
        Ok(())
    }

    /// Records whose state is not `Installed`. Used for crash recovery.
    pub async fn list_unsettled(&self) -> Result<Vec<InstallationRecord>, TallyError> {
        let installed = LifecycleState::Installed.to_string();
        let rows = self
            .db
            .connection()
            .call(move |conn| -> Result<Vec<RawRecord>, rusqlite::Error> {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {COLUMNS} FROM installed_plugins WHERE state != ?1 ORDER BY name"
                ))?;
                let rows = stmt.query_map(params![installed], RawRecord::from_row)?;
                rows.collect()
            })
            .await
            .map_err(map_tr_err)?;
        rows.into_iter().map(RawRecord::into_record).collect()
    }
}
