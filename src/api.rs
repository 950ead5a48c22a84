//! Appliance API client
//!
//! The engine consumes JSON-shaped records from an authenticated DSM-style
//! HTTP API. [`ApplianceClient`] is the seam: domain agents only depend on
//! the trait, so any backend that produces the documented record shapes
//! works. Two implementations live here:
//! - [`DsmClient`]: a reqwest-based session client for real appliances
//! - [`MockClient`]: canned records with per-endpoint failure injection, used
//!   by tests and the offline CLI path
//!
//! All record structs are sparse-tolerant: unknown keys are ignored and
//! missing keys default to empty/zero, so a partial appliance response never
//! aborts a check.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Errors surfaced by appliance API calls.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// Connection-level failure (DNS, TLS, refused, broken transfer).
    #[error("transport error: {0}")]
    Transport(String),

    /// The per-request timeout elapsed.
    #[error("request timed out")]
    Timeout,

    /// Login failed or no session is established.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The appliance answered with an API error code.
    #[error("appliance error {code}: {message}")]
    Api { code: i64, message: String },

    /// The response did not match the documented record shape.
    #[error("malformed response: {0}")]
    Malformed(String),
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

// ========== Record shapes ==========

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeSize {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub used: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub size: VolumeSize,
}

impl VolumeRecord {
    /// Display name when set, otherwise the raw id.
    pub fn label(&self) -> &str {
        match self.display_name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => &self.id,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub rebuild_progress: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageInfo {
    #[serde(default)]
    pub volumes: Vec<VolumeRecord>,
    /// Pools appear under `storagePools` on newer firmware, `raids` on older.
    #[serde(default, rename = "storagePools")]
    pub storage_pools: Vec<PoolRecord>,
    #[serde(default)]
    pub raids: Vec<PoolRecord>,
}

impl StorageInfo {
    /// RAID pools regardless of which key the firmware used.
    pub fn pools(&self) -> &[PoolRecord] {
        if !self.storage_pools.is_empty() {
            &self.storage_pools
        } else {
            &self.raids
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub smart_status: String,
    #[serde(default)]
    pub temp: i64,
    #[serde(default)]
    pub bad_sector_count: u64,
    #[serde(default)]
    pub power_on_hours: u64,
}

impl DiskRecord {
    pub fn label(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => &self.id,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskInfo {
    #[serde(default)]
    pub disks: Vec<DiskRecord>,
    /// The disk endpoint carries the pool list in the same payload.
    #[serde(default, rename = "storagePools")]
    pub storage_pools: Vec<PoolRecord>,
    #[serde(default)]
    pub raids: Vec<PoolRecord>,
}

impl DiskInfo {
    pub fn pools(&self) -> &[PoolRecord] {
        if !self.storage_pools.is_empty() {
            &self.storage_pools
        } else {
            &self.raids
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupTaskRecord {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    /// Unix seconds; absent when the task has never run.
    #[serde(default)]
    pub last_backup_time: Option<i64>,
    #[serde(default)]
    pub transferred_bytes: u64,
    #[serde(default)]
    pub duration_seconds: u64,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupInfo {
    #[serde(default)]
    pub tasks: Vec<BackupTaskRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityScanItem {
    #[serde(default)]
    pub category: String,
    /// One of `safe`, `warning`, `danger`.
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityScan {
    #[serde(default)]
    pub items: Vec<SecurityScanItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub source: Option<String>,
    /// Unix seconds; zero when the appliance omitted it.
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogBatch {
    #[serde(default)]
    pub logs: Vec<LogEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DsmInfo {
    #[serde(default)]
    pub version_string: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub serial: String,
    #[serde(default)]
    pub temperature: i64,
    #[serde(default)]
    pub uptime: u64,
    #[serde(default)]
    pub ram: u64,
    /// Unix seconds of the last system update; zero when unknown.
    #[serde(default)]
    pub last_update_time: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateInfo {
    #[serde(default)]
    pub available: bool,
    #[serde(default)]
    pub version: String,
    #[serde(default, rename = "type")]
    pub update_type: String,
    #[serde(default)]
    pub release_notes: String,
    #[serde(default)]
    pub reboot_needed: bool,
}

/// Read-only view of one monitored appliance.
#[async_trait]
pub trait ApplianceClient: Send + Sync {
    async fn storage_info(&self) -> ApiResult<StorageInfo>;
    async fn disk_info(&self) -> ApiResult<DiskInfo>;
    async fn backup_info(&self) -> ApiResult<BackupInfo>;
    async fn security_scan(&self) -> ApiResult<SecurityScan>;
    async fn connection_logs(&self, limit: u32) -> ApiResult<LogBatch>;
    async fn system_logs(&self, limit: u32) -> ApiResult<LogBatch>;
    async fn dsm_info(&self) -> ApiResult<DsmInfo>;
    async fn check_updates(&self) -> ApiResult<UpdateInfo>;
}

// ========== HTTP client ==========

/// Session-authenticated client for the DSM web API.
pub struct DsmClient {
    base_url: String,
    username: String,
    password: String,
    client: reqwest::Client,
    sid: Mutex<Option<String>>,
}

impl DsmClient {
    /// Build a client. Self-signed certificates are accepted because most
    /// home appliances ship without a trusted chain.
    pub fn new(
        host: &str,
        port: u16,
        https: bool,
        username: &str,
        password: &str,
        timeout: Duration,
    ) -> ApiResult<Self> {
        let protocol = if https { "https" } else { "http" };
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        Ok(Self {
            base_url: format!("{}://{}:{}", protocol, host, port),
            username: username.to_string(),
            password: password.to_string(),
            client,
            sid: Mutex::new(None),
        })
    }

    /// Authenticate and store the session id used by subsequent requests.
    pub async fn connect(&self) -> ApiResult<()> {
        let data = self
            .request(
                "SYNO.API.Auth",
                "login",
                3,
                &[
                    ("account", self.username.clone()),
                    ("passwd", self.password.clone()),
                    ("session", "NasSentinel".to_string()),
                    ("format", "sid".to_string()),
                ],
                false,
            )
            .await?;

        match data.get("sid").and_then(|v| v.as_str()) {
            Some(sid) => {
                *self.sid.lock().unwrap() = Some(sid.to_string());
                debug!("appliance session established");
                Ok(())
            }
            None => Err(ApiError::Auth("no session id in login response".to_string())),
        }
    }

    /// Log out and drop the session. Logout failures are ignored; the session
    /// expires server-side anyway.
    pub async fn disconnect(&self) {
        let sid = self.sid.lock().unwrap().take();
        if sid.is_some() {
            let _ = self
                .request(
                    "SYNO.API.Auth",
                    "logout",
                    1,
                    &[("session", "NasSentinel".to_string())],
                    false,
                )
                .await;
        }
    }

    async fn request(
        &self,
        api: &str,
        method: &str,
        version: u32,
        params: &[(&str, String)],
        require_auth: bool,
    ) -> ApiResult<serde_json::Value> {
        let mut query: Vec<(&str, String)> = vec![
            ("api", api.to_string()),
            ("method", method.to_string()),
            ("version", version.to_string()),
        ];
        query.extend(params.iter().cloned());

        if require_auth {
            match self.sid.lock().unwrap().clone() {
                Some(sid) => query.push(("_sid", sid)),
                None => return Err(ApiError::Auth("not logged in".to_string())),
            }
        }

        let response = self
            .client
            .get(format!("{}/webapi/entry.cgi", self.base_url))
            .query(&query)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let envelope: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ApiError::Malformed(e.to_string()))?;

        decode_envelope(envelope)
    }

    async fn fetch<T: serde::de::DeserializeOwned>(
        &self,
        api: &str,
        method: &str,
        version: u32,
        params: &[(&str, String)],
    ) -> ApiResult<T> {
        let data = self.request(api, method, version, params, true).await?;
        serde_json::from_value(data).map_err(|e| ApiError::Malformed(e.to_string()))
    }
}

fn classify_reqwest_error(error: reqwest::Error) -> ApiError {
    if error.is_timeout() {
        ApiError::Timeout
    } else {
        ApiError::Transport(error.to_string())
    }
}

/// Unwrap the `{success, data, error}` envelope every endpoint uses.
fn decode_envelope(envelope: serde_json::Value) -> ApiResult<serde_json::Value> {
    let success = envelope
        .get("success")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    if !success {
        let code = envelope
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|c| c.as_i64())
            .unwrap_or(100);
        return Err(ApiError::Api {
            code,
            message: error_message(code).to_string(),
        });
    }
    Ok(envelope
        .get("data")
        .cloned()
        .unwrap_or_else(|| serde_json::json!({})))
}

/// Known appliance error codes.
fn error_message(code: i64) -> &'static str {
    match code {
        100 => "Unknown error",
        101 => "No parameter of API, method or version",
        102 => "Requested API does not exist",
        103 => "Requested method does not exist",
        104 => "Requested version does not support this functionality",
        105 => "Session not logged in",
        106 => "Session timeout",
        107 => "Session interrupted by duplicate login",
        400 => "Invalid username or password",
        401 => "Account disabled",
        402 => "Permission denied",
        403 => "2FA required",
        404 => "2FA failed",
        _ => "Unrecognized error code",
    }
}

#[async_trait]
impl ApplianceClient for DsmClient {
    async fn storage_info(&self) -> ApiResult<StorageInfo> {
        self.fetch("SYNO.Storage.CGI.Storage", "load_info", 1, &[]).await
    }

    async fn disk_info(&self) -> ApiResult<DiskInfo> {
        self.fetch("SYNO.Storage.CGI.Storage", "load_info", 1, &[]).await
    }

    async fn backup_info(&self) -> ApiResult<BackupInfo> {
        self.fetch("SYNO.Backup.Task", "list", 1, &[]).await
    }

    async fn security_scan(&self) -> ApiResult<SecurityScan> {
        self.fetch("SYNO.Core.SecurityScan.Status", "system_get", 1, &[]).await
    }

    async fn connection_logs(&self, limit: u32) -> ApiResult<LogBatch> {
        self.fetch(
            "SYNO.Core.CurrentConnection",
            "list",
            1,
            &[("limit", limit.to_string())],
        )
        .await
    }

    async fn system_logs(&self, limit: u32) -> ApiResult<LogBatch> {
        self.fetch(
            "SYNO.Core.SyslogClient.Log",
            "list",
            1,
            &[("limit", limit.to_string())],
        )
        .await
    }

    async fn dsm_info(&self) -> ApiResult<DsmInfo> {
        self.fetch("SYNO.DSM.Info", "getinfo", 2, &[]).await
    }

    async fn check_updates(&self) -> ApiResult<UpdateInfo> {
        self.fetch("SYNO.Core.Upgrade.Server", "check", 1, &[]).await
    }
}

// ========== Mock client ==========

/// Canned-record backend for tests and offline runs.
///
/// Each endpoint serves a stored `ApiResult`; set a field to `Err(...)` to
/// exercise an agent's failure path.
#[derive(Debug, Clone)]
pub struct MockClient {
    pub storage: ApiResult<StorageInfo>,
    pub disks: ApiResult<DiskInfo>,
    pub backups: ApiResult<BackupInfo>,
    pub security: ApiResult<SecurityScan>,
    pub connections: ApiResult<LogBatch>,
    pub syslog: ApiResult<LogBatch>,
    pub dsm: ApiResult<DsmInfo>,
    pub updates: ApiResult<UpdateInfo>,
}

impl Default for MockClient {
    fn default() -> Self {
        Self {
            storage: Ok(StorageInfo::default()),
            disks: Ok(DiskInfo::default()),
            backups: Ok(BackupInfo::default()),
            security: Ok(SecurityScan::default()),
            connections: Ok(LogBatch::default()),
            syslog: Ok(LogBatch::default()),
            dsm: Ok(DsmInfo::default()),
            updates: Ok(UpdateInfo::default()),
        }
    }
}

#[async_trait]
impl ApplianceClient for MockClient {
    async fn storage_info(&self) -> ApiResult<StorageInfo> {
        self.storage.clone()
    }

    async fn disk_info(&self) -> ApiResult<DiskInfo> {
        self.disks.clone()
    }

    async fn backup_info(&self) -> ApiResult<BackupInfo> {
        self.backups.clone()
    }

    async fn security_scan(&self) -> ApiResult<SecurityScan> {
        self.security.clone()
    }

    async fn connection_logs(&self, _limit: u32) -> ApiResult<LogBatch> {
        self.connections.clone()
    }

    async fn system_logs(&self, _limit: u32) -> ApiResult<LogBatch> {
        self.syslog.clone()
    }

    async fn dsm_info(&self) -> ApiResult<DsmInfo> {
        self.dsm.clone()
    }

    async fn check_updates(&self) -> ApiResult<UpdateInfo> {
        self.updates.clone()
    }
}
