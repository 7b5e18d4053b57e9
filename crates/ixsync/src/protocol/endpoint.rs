//! 🛰️ The server half of the progress protocol.
//!
//! `ProgressEndpoint::handle` takes a `ProgressRequest` and returns a `ProgressResponse`.
//! No web framework in here: whatever serves HTTP translates to and from these types.
//!
//! 🧠 Knowledge graph:
//! - `POST /token` issues a short-lived token. Everything else needs `X-Sync-Token`;
//!   unknown or expired tokens get 403 `{code: "expired_token"}`.
//! - `GET /sync` returns the projection.
//! - `POST /sync` dispatches an action. In `Background` mode, start/resume/delete spawn a
//!   `SyncWorker`. In `Stateless` mode nothing runs between requests; the client sends
//!   `continue` to push the sync forward one slice at a time.
//! - Pause/stop with no live worker are honored on the spot (a zero-batch slice), since
//!   otherwise nobody would be around to read the flag.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::SyncError;
use crate::orchestrator::{ExecutionBudget, RunOutcome, SyncOrchestrator};
use crate::protocol::{
    ActionRequest, ActionResponse, HttpMethod, ProgressRequest, ProgressResponse, SYNC_PATH, SyncAction, TOKEN_PATH,
};
use crate::workers::{SyncWorker, Worker};

/// 🔑 Hands out opaque tokens and remembers when each one dies.
#[derive(Debug, Clone)]
pub struct TokenIssuer {
    ttl: Duration,
    issued: Arc<Mutex<HashMap<String, Instant>>>,
}

impl TokenIssuer {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            issued: Arc::default(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn issue(&self) -> String {
        let token = Uuid::new_v4().simple().to_string();
        let now = Instant::now();
        let mut issued = self.issued.lock().await;
        // -- 🧹 sweep the dead while we hold the lock anyway
        issued.retain(|_, expires_at| *expires_at > now);
        issued.insert(token.clone(), now + self.ttl);
        token
    }

    pub async fn is_valid(&self, token: &str) -> bool {
        self.issued
            .lock()
            .await
            .get(token)
            .is_some_and(|expires_at| *expires_at > Instant::now())
    }

    /// 💀 Invalidate every token handed out so far. Clients will have to ask again.
    pub async fn expire_all(&self) {
        self.issued.lock().await.clear();
    }
}

/// 🧵 Who moves the sync forward between requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointMode {
    /// Nothing runs between requests; `continue` runs one slice per call.
    Stateless { budget: ExecutionBudget },
    /// A `SyncWorker` task runs slices of this budget until the sync ends.
    Background { budget: ExecutionBudget },
}

impl EndpointMode {
    fn budget(&self) -> ExecutionBudget {
        match self {
            EndpointMode::Stateless { budget } | EndpointMode::Background { budget } => *budget,
        }
    }
}

type WorkerHandle = JoinHandle<anyhow::Result<RunOutcome>>;

/// 🛰️ The progress endpoint for one scope.
#[derive(Debug)]
pub struct ProgressEndpoint {
    orchestrator: SyncOrchestrator,
    tokens: TokenIssuer,
    mode: EndpointMode,
    worker: Mutex<Option<WorkerHandle>>,
    // -- 🔒 one in-request slice at a time, so a pause honored here cannot be overwritten by
    // -- a `continue` that loaded the checkpoint before it
    slice_lock: Mutex<()>,
}

impl ProgressEndpoint {
    pub fn new(orchestrator: SyncOrchestrator, tokens: TokenIssuer, mode: EndpointMode) -> Self {
        Self {
            orchestrator,
            tokens,
            mode,
            worker: Mutex::new(None),
            slice_lock: Mutex::new(()),
        }
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    pub fn orchestrator(&self) -> &SyncOrchestrator {
        &self.orchestrator
    }

    pub fn mode(&self) -> EndpointMode {
        self.mode
    }

    /// 📨 One request in, one response out. Never panics, never returns `Err`.
    pub async fn handle(&self, request: ProgressRequest) -> ProgressResponse {
        if request.method == HttpMethod::Post && request.path == TOKEN_PATH {
            let token = self.tokens.issue().await;
            return ProgressResponse::ok(json!({
                "token": token,
                "expiresIn": self.tokens.ttl().as_secs(),
            }));
        }

        let authorized = match request.token.as_deref() {
            Some(token) => self.tokens.is_valid(token).await,
            None => false,
        };
        if !authorized {
            debug!(path = %request.path, "🔑 rejected request with a missing or expired token");
            return ProgressResponse::error(
                403,
                "expired_token",
                "🔑 the sync token is missing or expired; request a new one from /token",
            );
        }

        match (request.method, request.path.as_str()) {
            (HttpMethod::Get, SYNC_PATH) => self.respond_with_projection().await,
            (HttpMethod::Post, SYNC_PATH) => {
                let body = request.body.unwrap_or(Value::Null);
                match serde_json::from_value::<ActionRequest>(body) {
                    Ok(action) => self.dispatch(action).await,
                    Err(e) => ProgressResponse::error(400, "bad_request", format!("💀 unreadable action body: {e}")),
                }
            }
            (_, path) => ProgressResponse::error(404, "not_found", format!("🤷 nothing lives at '{path}'")),
        }
    }

    async fn respond_with_projection(&self) -> ProgressResponse {
        match self.orchestrator.projection().await {
            Ok(projection) => match serde_json::to_value(projection) {
                Ok(body) => ProgressResponse::ok(body),
                Err(e) => ProgressResponse::error(500, "sync_error", e.to_string()),
            },
            Err(e) => error_response(&e),
        }
    }

    async fn dispatch(&self, request: ActionRequest) -> ProgressResponse {
        info!(action = ?request.action, "🎛️ progress action");
        let outcome = match self.apply(&request).await {
            Ok(outcome) => outcome,
            Err(e) => return error_response(&e),
        };
        let projection = match self.orchestrator.projection().await {
            Ok(projection) => projection,
            Err(e) => return error_response(&e),
        };
        match serde_json::to_value(ActionResponse::new(request.action, outcome.as_ref(), projection)) {
            Ok(body) => ProgressResponse::ok(body),
            Err(e) => ProgressResponse::error(500, "sync_error", e.to_string()),
        }
    }

    async fn apply(&self, request: &ActionRequest) -> Result<Option<RunOutcome>, SyncError> {
        match request.action {
            SyncAction::Start => {
                self.orchestrator.start_sync(request.to_options()).await?;
                self.ensure_worker(false).await;
                Ok(None)
            }
            SyncAction::Pause => {
                self.orchestrator.request_pause().await?;
                self.honor_now_if_unattended().await
            }
            SyncAction::Resume => {
                self.orchestrator.request_resume().await?;
                self.ensure_worker(false).await;
                Ok(None)
            }
            SyncAction::Stop => {
                self.orchestrator.request_stop().await?;
                self.honor_now_if_unattended().await
            }
            SyncAction::Delete => {
                self.orchestrator.delete_and_resync(request.to_options()).await?;
                // -- 🧟 an old worker finds out on its next save and bows out
                self.ensure_worker(true).await;
                Ok(None)
            }
            SyncAction::Continue => {
                let _slice = self.slice_lock.lock().await;
                Ok(Some(self.orchestrator.run_slice(self.mode.budget()).await?))
            }
        }
    }

    /// ⏱️ Zero-batch slice: reads the flag, honors it, indexes nothing.
    async fn honor_now_if_unattended(&self) -> Result<Option<RunOutcome>, SyncError> {
        if self.worker_alive().await {
            return Ok(None);
        }
        let _slice = self.slice_lock.lock().await;
        Ok(Some(self.orchestrator.run_slice(ExecutionBudget::batches(0)).await?))
    }

    async fn worker_alive(&self) -> bool {
        self.worker
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    async fn ensure_worker(&self, replace: bool) {
        let EndpointMode::Background { budget } = self.mode else {
            return;
        };
        let mut worker = self.worker.lock().await;
        if !replace && worker.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        info!(scope = %self.orchestrator.scope(), "🧵 spawning background sync worker");
        *worker = Some(SyncWorker::new(self.orchestrator.clone(), budget).start());
    }

    /// ⏳ Wait for the background worker, if any. Tests and graceful shutdown use this.
    pub async fn join_worker(&self) -> Option<anyhow::Result<RunOutcome>> {
        let handle = self.worker.lock().await.take()?;
        match handle.await {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(error = %e, "💀 background worker panicked or was cancelled");
                Some(Err(e.into()))
            }
        }
    }
}

fn error_response(err: &SyncError) -> ProgressResponse {
    match err {
        SyncError::AlreadyRunning { .. } => ProgressResponse::error(409, "already_running", err.to_string()),
        SyncError::NotRunning(_) => ProgressResponse::error(409, "not_running", err.to_string()),
        SyncError::UnknownIndexable(_) => ProgressResponse::error(400, "unknown_indexable", err.to_string()),
        _ => ProgressResponse::error(500, "sync_error", err.to_string()),
    }
}
