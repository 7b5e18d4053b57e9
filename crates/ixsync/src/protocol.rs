//! 🛰️ Progress protocol: how a dashboard watches and steers a sync it does not run.
//!
//! 🧠 Knowledge graph:
//! - Wire types live here: `SyncProjection` (GET), `SyncAction` + `ActionRequest` (POST),
//!   `ActionResponse`, and the framework-agnostic `ProgressRequest`/`ProgressResponse`.
//! - `endpoint`: server side. Request in, response out, token checks, background worker.
//! - `client`: `ProgressClient` (403 → refresh → retry once), `ClientSyncState` reducer,
//!   `SyncPoller`.
//! - `http`: the reqwest transport for talking to an endpoint over the network.
//! - `server`: axum in front of the endpoint, for `ixsync serve`.
//!
//! JSON on the wire is camelCase, because the other end is a browser and browsers have
//! opinions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::checkpoint::{LastSyncReport, Method, SyncCheckpoint, SyncCounts, SyncLogEntry, SyncOptions, SyncOutcome, Trigger};
use crate::orchestrator::RunOutcome;

pub mod client;
pub mod endpoint;
pub mod http;
pub mod server;

pub use client::{ClientSyncState, InProcessTransport, ProgressClient, ProgressTransport, SyncPoller, TransportBackend};
pub use endpoint::{EndpointMode, ProgressEndpoint, TokenIssuer};
pub use http::HttpTransport;
pub use server::serve_with_shutdown;

/// 🔑 Header carrying the short-lived authorization token.
pub const TOKEN_HEADER: &str = "X-Sync-Token";
pub const SYNC_PATH: &str = "/sync";
pub const TOKEN_PATH: &str = "/token";

/// 🪦 The last run, as the dashboard sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastSyncSummary {
    pub sync_id: Uuid,
    pub outcome: SyncOutcome,
    pub method: Method,
    pub start_date_time: DateTime<Utc>,
    pub end_date_time: DateTime<Utc>,
    pub totals: SyncCounts,
    #[serde(default)]
    pub failed_reason: Option<String>,
    #[serde(default)]
    pub log: Vec<SyncLogEntry>,
}

impl From<&LastSyncReport> for LastSyncSummary {
    fn from(report: &LastSyncReport) -> Self {
        Self {
            sync_id: report.sync_id,
            outcome: report.outcome,
            method: report.method,
            start_date_time: report.start_date_time,
            end_date_time: report.end_date_time,
            totals: report.totals,
            failed_reason: report.failed_reason.clone(),
            log: report.log.clone(),
        }
    }
}

/// 🔭 `GET /sync`: everything a progress UI needs, derived from the store.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProjection {
    pub is_syncing: bool,
    pub is_paused: bool,
    pub items_processed: u64,
    pub items_total: u64,
    #[serde(default)]
    pub method: Option<Method>,
    #[serde(default)]
    pub sync_id: Option<Uuid>,
    #[serde(default)]
    pub current_indexable: Option<String>,
    #[serde(default)]
    pub totals: SyncCounts,
    #[serde(default)]
    pub log: Vec<SyncLogEntry>,
    #[serde(default)]
    pub last_sync: Option<LastSyncSummary>,
}

impl SyncProjection {
    pub fn from_parts(checkpoint: Option<&SyncCheckpoint>, last_sync: Option<&LastSyncReport>) -> Self {
        let last_sync = last_sync.map(LastSyncSummary::from);
        let Some(checkpoint) = checkpoint else {
            return Self {
                last_sync,
                ..Self::default()
            };
        };
        Self {
            is_syncing: true,
            is_paused: checkpoint.is_paused(),
            items_processed: checkpoint.items_processed(),
            items_total: checkpoint.items_total(),
            method: Some(checkpoint.method),
            sync_id: Some(checkpoint.sync_id),
            current_indexable: checkpoint.current_sync_item.as_ref().map(|c| c.slug.clone()),
            totals: checkpoint.totals,
            log: checkpoint.log.clone(),
            last_sync,
        }
    }
}

/// 🎛️ What a `POST /sync` can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Start,
    Pause,
    Resume,
    Stop,
    Delete,
    /// 🔁 Run one budgeted slice inside this request.
    Continue,
}

/// 📨 `POST /sync` body. Start parameters only matter for `start` and `delete`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequest {
    pub action: SyncAction,
    #[serde(default)]
    pub put_mapping: bool,
    #[serde(default)]
    pub indexables: Vec<String>,
    #[serde(default)]
    pub restart: bool,
    #[serde(default)]
    pub trigger: Trigger,
}

impl ActionRequest {
    pub fn new(action: SyncAction) -> Self {
        Self {
            action,
            put_mapping: false,
            indexables: Vec::new(),
            restart: false,
            trigger: Trigger::Manual,
        }
    }

    /// 🎛️ Dashboard-driven run options from the request.
    pub fn to_options(&self) -> SyncOptions {
        let mut options = SyncOptions::dashboard();
        options.put_mapping = self.put_mapping;
        options.indexables = self.indexables.clone();
        options.restart = self.restart;
        options.trigger = self.trigger;
        options
    }
}

/// 📬 `POST /sync` reply: the slice outcome (for `continue`) plus the fresh projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResponse {
    pub action: SyncAction,
    #[serde(default)]
    pub outcome: Option<Value>,
    pub sync: SyncProjection,
}

impl ActionResponse {
    pub fn new(action: SyncAction, outcome: Option<&RunOutcome>, sync: SyncProjection) -> Self {
        Self {
            action,
            // -- 🧾 RunOutcome is serialize-only; clients read it as plain JSON
            outcome: outcome.and_then(|o| serde_json::to_value(o).ok()),
            sync,
        }
    }

    /// 🏷️ `"completed"`, `"yielded"`... when the action ran a slice.
    pub fn outcome_name(&self) -> Option<&str> {
        self.outcome.as_ref()?.get("outcome")?.as_str()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// 📨 A request, stripped of whichever web framework carried it.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressRequest {
    pub method: HttpMethod,
    pub path: String,
    pub token: Option<String>,
    pub body: Option<Value>,
}

impl ProgressRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            path: path.into(),
            token: None,
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            method: HttpMethod::Post,
            path: path.into(),
            token: None,
            body,
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }
}

/// 📬 A response, status + JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressResponse {
    pub status: u16,
    pub body: Value,
}

impl ProgressResponse {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    /// 🧾 Error bodies always look like `{code, message}`.
    pub fn error(status: u16, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: serde_json::json!({ "code": code, "message": message.into() }),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn code(&self) -> Option<&str> {
        self.body.get("code")?.as_str()
    }
}
