//! 🖥️ The client half: what a dashboard (or a CLI watching from afar) runs.
//!
//! 🧠 Knowledge graph:
//! - `ProgressTransport` moves a `ProgressRequest` to an endpoint and back. Two flavors:
//!   `InProcessTransport` (same process, calls `handle` directly) and `HttpTransport`.
//! - `ProgressClient` owns the token. A 403 triggers exactly one refresh + retry; a second
//!   403 is `ProtocolError::TokenExpired`. No loops. Loops are how you DDoS yourself.
//! - `ClientSyncState::reduce` folds projections into UI state. The log is append-only:
//!   entries are added by `seq`, never rewritten.
//! - `SyncPoller::watch` polls until the run ends or the caller cancels. A paused run has
//!   not ended: somebody else may resume or stop it, and the poller should see that.
//!   Cancelling the poller does not touch the server's sync. Closing the tab is not stop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{Mutex, watch};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::checkpoint::{SyncLogEntry, SyncOutcome};
use crate::error::ProtocolError;
use crate::protocol::endpoint::ProgressEndpoint;
use crate::protocol::http::HttpTransport;
use crate::protocol::{
    ActionRequest, ActionResponse, ProgressRequest, ProgressResponse, SYNC_PATH, SyncAction, SyncProjection, TOKEN_PATH,
};

/// 🚚 Something that can deliver a request to an endpoint.
#[async_trait]
pub trait ProgressTransport: std::fmt::Debug + Send + Sync {
    async fn send(&self, request: ProgressRequest) -> Result<ProgressResponse, ProtocolError>;
}

/// 🏠 Same-process transport. No sockets, same rules.
#[derive(Debug, Clone)]
pub struct InProcessTransport {
    endpoint: Arc<ProgressEndpoint>,
}

impl InProcessTransport {
    pub fn new(endpoint: Arc<ProgressEndpoint>) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl ProgressTransport for InProcessTransport {
    async fn send(&self, request: ProgressRequest) -> Result<ProgressResponse, ProtocolError> {
        Ok(self.endpoint.handle(request).await)
    }
}

/// 🎭 The many faces of a transport.
#[derive(Debug, Clone)]
pub enum TransportBackend {
    InProcess(InProcessTransport),
    Http(HttpTransport),
}

#[async_trait]
impl ProgressTransport for TransportBackend {
    async fn send(&self, request: ProgressRequest) -> Result<ProgressResponse, ProtocolError> {
        match self {
            TransportBackend::InProcess(transport) => transport.send(request).await,
            TransportBackend::Http(transport) => transport.send(request).await,
        }
    }
}

/// 📡 Talks the progress protocol, token dance included.
#[derive(Debug)]
pub struct ProgressClient {
    transport: TransportBackend,
    token: Mutex<Option<String>>,
}

impl ProgressClient {
    pub fn new(transport: TransportBackend) -> Self {
        Self {
            transport,
            token: Mutex::new(None),
        }
    }

    /// 🔑 Start with a token the page was rendered with.
    pub fn with_token(transport: TransportBackend, token: impl Into<String>) -> Self {
        Self {
            transport,
            token: Mutex::new(Some(token.into())),
        }
    }

    async fn refresh_token(&self) -> Result<String, ProtocolError> {
        let response = self.transport.send(ProgressRequest::post(TOKEN_PATH, None)).await?;
        if !response.is_success() {
            return Err(ProtocolError::Status {
                status: response.status,
                body: response.body.to_string(),
            });
        }
        let token = response
            .body
            .get("token")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ProtocolError::Decode("token response has no 'token' field".to_string()))?;
        debug!("🔑 sync token refreshed");
        *self.token.lock().await = Some(token.clone());
        Ok(token)
    }

    async fn current_token(&self) -> Result<String, ProtocolError> {
        if let Some(token) = self.token.lock().await.clone() {
            return Ok(token);
        }
        self.refresh_token().await
    }

    /// 📨 Send with the current token; on 403, refresh once and try again.
    async fn call(&self, request: ProgressRequest) -> Result<Value, ProtocolError> {
        let token = self.current_token().await?;
        let mut response = self
            .transport
            .send(request.clone().with_token(Some(token)))
            .await?;

        if response.status == 403 {
            trace!("🔑 403 from the endpoint, refreshing the token and trying once more");
            let token = self.refresh_token().await?;
            response = self.transport.send(request.with_token(Some(token))).await?;
            if response.status == 403 {
                return Err(ProtocolError::TokenExpired);
            }
        }

        if !response.is_success() {
            return Err(ProtocolError::Status {
                status: response.status,
                body: response.body.to_string(),
            });
        }
        Ok(response.body)
    }

    fn decode<T: DeserializeOwned>(body: Value) -> Result<T, ProtocolError> {
        serde_json::from_value(body).map_err(|e| ProtocolError::Decode(e.to_string()))
    }

    /// 🔭 `GET /sync`
    pub async fn status(&self) -> Result<SyncProjection, ProtocolError> {
        Self::decode(self.call(ProgressRequest::get(SYNC_PATH)).await?)
    }

    /// 🎛️ `POST /sync`
    pub async fn send_action(&self, action: &ActionRequest) -> Result<ActionResponse, ProtocolError> {
        let body = serde_json::to_value(action).map_err(|e| ProtocolError::Decode(e.to_string()))?;
        Self::decode(self.call(ProgressRequest::post(SYNC_PATH, Some(body))).await?)
    }

    pub async fn start(&self, request: ActionRequest) -> Result<ActionResponse, ProtocolError> {
        self.send_action(&ActionRequest {
            action: SyncAction::Start,
            ..request
        })
        .await
    }

    pub async fn pause(&self) -> Result<ActionResponse, ProtocolError> {
        self.send_action(&ActionRequest::new(SyncAction::Pause)).await
    }

    pub async fn resume(&self) -> Result<ActionResponse, ProtocolError> {
        self.send_action(&ActionRequest::new(SyncAction::Resume)).await
    }

    pub async fn stop(&self) -> Result<ActionResponse, ProtocolError> {
        self.send_action(&ActionRequest::new(SyncAction::Stop)).await
    }

    pub async fn delete_and_resync(&self, request: ActionRequest) -> Result<ActionResponse, ProtocolError> {
        self.send_action(&ActionRequest {
            action: SyncAction::Delete,
            ..request
        })
        .await
    }

    pub async fn continue_sync(&self) -> Result<ActionResponse, ProtocolError> {
        self.send_action(&ActionRequest::new(SyncAction::Continue)).await
    }
}

/// 🖼️ Everything the progress UI renders, rebuilt from projections.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientSyncState {
    pub is_syncing: bool,
    pub is_paused: bool,
    pub is_complete: bool,
    pub is_failed: bool,
    pub items_processed: u64,
    pub items_total: u64,
    pub log: Vec<SyncLogEntry>,
    pub failed_reason: Option<String>,
    watched_sync: Option<Uuid>,
    last_seq: u64,
}

impl ClientSyncState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 🔄 Fold one projection in.
    pub fn reduce(&mut self, projection: &SyncProjection) {
        self.is_syncing = projection.is_syncing;
        self.is_paused = projection.is_syncing && projection.is_paused;

        if projection.is_syncing {
            self.track(projection.sync_id);
            self.is_complete = false;
            self.is_failed = false;
            self.failed_reason = None;
            self.items_processed = projection.items_processed;
            self.items_total = projection.items_total;
            self.append_log(&projection.log);
            return;
        }

        // -- 🪦 not syncing: the last report speaks, if it is about the run we were watching
        let Some(ref last) = projection.last_sync else {
            return;
        };
        if self.watched_sync.is_some_and(|watched| watched != last.sync_id) {
            return;
        }
        self.track(Some(last.sync_id));
        self.is_complete = last.outcome == SyncOutcome::Completed;
        self.is_failed = last.outcome == SyncOutcome::Failed;
        self.failed_reason = last.failed_reason.clone();
        self.items_processed = last.totals.processed();
        self.items_total = self.items_total.max(self.items_processed);
        self.append_log(&last.log);
    }

    /// 👀 Switching to a different run restarts the seq watermark.
    fn track(&mut self, sync_id: Option<Uuid>) {
        if sync_id.is_some() && sync_id != self.watched_sync {
            self.watched_sync = sync_id;
            self.last_seq = 0;
        }
    }

    fn append_log(&mut self, entries: &[SyncLogEntry]) {
        for entry in entries {
            if entry.seq > self.last_seq {
                self.last_seq = entry.seq;
                self.log.push(entry.clone());
            }
        }
    }

    /// 🏁 The run is over: completed, failed, stopped, or never started.
    pub fn is_settled(&self) -> bool {
        !self.is_syncing
    }
}

/// ⏲️ Polls the endpoint and keeps a `ClientSyncState` current.
#[derive(Debug)]
pub struct SyncPoller {
    client: Arc<ProgressClient>,
    state: ClientSyncState,
    drive: bool,
}

impl SyncPoller {
    pub fn new(client: Arc<ProgressClient>) -> Self {
        Self {
            client,
            state: ClientSyncState::new(),
            drive: false,
        }
    }

    /// 🚗 Send `continue` on every tick instead of a plain `GET`. For stateless hosts.
    pub fn driving(mut self) -> Self {
        self.drive = true;
        self
    }

    pub fn state(&self) -> &ClientSyncState {
        &self.state
    }

    async fn tick(&mut self) -> Result<(), ProtocolError> {
        let projection = if self.drive && self.state.is_syncing && !self.state.is_paused {
            self.client.continue_sync().await?.sync
        } else {
            self.client.status().await?
        };
        self.state.reduce(&projection);
        Ok(())
    }

    /// 👀 Poll every `interval` until the run settles or `cancel` flips to `true`.
    ///
    /// `on_update` sees the state after every poll.
    pub async fn watch<F>(
        &mut self,
        interval: Duration,
        mut cancel: watch::Receiver<bool>,
        mut on_update: F,
    ) -> Result<ClientSyncState, ProtocolError>
    where
        F: FnMut(&ClientSyncState),
    {
        loop {
            if *cancel.borrow() {
                debug!("👋 poller cancelled; the sync itself keeps going");
                break;
            }
            self.tick().await?;
            on_update(&self.state);
            if self.state.is_settled() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = cancel.changed() => {
                    // -- 📪 sender dropped means nobody can cancel us anymore; keep polling
                    if changed.is_ok() && *cancel.borrow() {
                        debug!("👋 poller cancelled; the sync itself keeps going");
                        break;
                    }
                }
            }
        }
        Ok(self.state.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{LogLevel, SyncCounts};
    use crate::orchestrator::ExecutionBudget;
    use crate::orchestrator::tests::fixture;
    use crate::protocol::endpoint::{EndpointMode, TokenIssuer};
    use crate::protocol::LastSyncSummary;
    use chrono::Utc;

    fn entry(seq: u64, message: &str) -> SyncLogEntry {
        SyncLogEntry {
            seq,
            at: Utc::now(),
            level: LogLevel::Info,
            message: message.to_string(),
        }
    }

    fn syncing(sync_id: Uuid, processed: u64, log: Vec<SyncLogEntry>) -> SyncProjection {
        SyncProjection {
            is_syncing: true,
            items_processed: processed,
            items_total: 100,
            sync_id: Some(sync_id),
            log,
            ..SyncProjection::default()
        }
    }

    fn in_process(mode: EndpointMode, objects: u64) -> (Arc<ProgressEndpoint>, TransportBackend, crate::orchestrator::tests::Fixture) {
        let f = fixture(objects, 10, false);
        let endpoint = Arc::new(ProgressEndpoint::new(
            f.orchestrator.clone(),
            TokenIssuer::new(Duration::from_secs(60)),
            mode,
        ));
        let transport = TransportBackend::InProcess(InProcessTransport::new(endpoint.clone()));
        (endpoint, transport, f)
    }

    #[test]
    fn the_one_where_the_log_only_grows() {
        let id = Uuid::new_v4();
        let mut state = ClientSyncState::new();
        state.reduce(&syncing(id, 10, vec![entry(1, "started"), entry(2, "batch")]));
        // -- 🔁 overlapping window, and somebody "edited" entry 2 on the server
        state.reduce(&syncing(id, 20, vec![entry(2, "batch (rewritten)"), entry(3, "batch again")]));

        let messages: Vec<&str> = state.log.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["started", "batch", "batch again"]);
        assert_eq!(state.items_processed, 20);
        assert!(state.is_syncing);
    }

    #[test]
    fn the_one_where_the_finale_comes_from_the_last_report() {
        let id = Uuid::new_v4();
        let mut state = ClientSyncState::new();
        state.reduce(&syncing(id, 90, vec![entry(1, "started")]));
        state.reduce(&SyncProjection {
            last_sync: Some(LastSyncSummary {
                sync_id: id,
                outcome: SyncOutcome::Failed,
                method: crate::checkpoint::Method::Dashboard,
                start_date_time: Utc::now(),
                end_date_time: Utc::now(),
                totals: SyncCounts {
                    synced: 90,
                    skipped: 0,
                    failed: 0,
                },
                failed_reason: Some("mapping rejected".into()),
                log: vec![entry(1, "started"), entry(2, "mapping rejected")],
            }),
            ..SyncProjection::default()
        });
        assert!(state.is_failed);
        assert!(!state.is_complete);
        assert_eq!(state.failed_reason.as_deref(), Some("mapping rejected"));
        assert_eq!(state.log.len(), 2);
        assert!(state.is_settled());
    }

    #[test]
    fn the_one_where_someone_elses_history_is_ignored() {
        let mut state = ClientSyncState::new();
        state.reduce(&syncing(Uuid::new_v4(), 5, vec![]));
        let mut idle = SyncProjection::default();
        idle.last_sync = Some(LastSyncSummary {
            sync_id: Uuid::new_v4(),
            outcome: SyncOutcome::Completed,
            method: crate::checkpoint::Method::Cli,
            start_date_time: Utc::now(),
            end_date_time: Utc::now(),
            totals: SyncCounts::default(),
            failed_reason: None,
            log: vec![],
        });
        state.reduce(&idle);
        assert!(!state.is_syncing);
        assert!(!state.is_complete, "a different run's report says nothing about ours");
    }

    #[tokio::test]
    async fn the_one_where_an_expired_token_is_refreshed_exactly_once() -> Result<(), ProtocolError> {
        let stateless = EndpointMode::Stateless {
            budget: ExecutionBudget::batches(1),
        };
        let (endpoint, transport, _f) = in_process(stateless, 10);
        let client = ProgressClient::with_token(transport, "stale-from-page-load");

        let projection = client.status().await?;
        assert!(!projection.is_syncing);

        // -- 🔑 server rotates; the client's token dies; one refresh fixes it
        endpoint.tokens().expire_all().await;
        assert!(client.status().await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_second_403_is_not_retried_forever() {
        let stateless = EndpointMode::Stateless {
            budget: ExecutionBudget::batches(1),
        };
        let f = fixture(10, 10, false);
        // -- ⏱️ zero TTL: every token is dead on arrival
        let endpoint = Arc::new(ProgressEndpoint::new(
            f.orchestrator.clone(),
            TokenIssuer::new(Duration::ZERO),
            stateless,
        ));
        let client = ProgressClient::new(TransportBackend::InProcess(InProcessTransport::new(endpoint)));
        let err = client.status().await.expect_err("💀 every token is expired");
        assert!(matches!(err, ProtocolError::TokenExpired));
    }

    #[tokio::test]
    async fn the_one_where_the_poller_drives_a_stateless_sync_home() -> Result<(), ProtocolError> {
        let stateless = EndpointMode::Stateless {
            budget: ExecutionBudget::batches(2),
        };
        let (_endpoint, transport, f) = in_process(stateless, 55);
        let client = Arc::new(ProgressClient::new(transport));
        client.start(ActionRequest::new(SyncAction::Start)).await?;

        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let mut updates = 0;
        let mut poller = SyncPoller::new(client.clone()).driving();
        let state = poller
            .watch(Duration::from_millis(1), cancel_rx, |_| updates += 1)
            .await?;

        assert!(state.is_complete);
        assert_eq!(state.items_processed, 55);
        assert!(updates >= 3);
        assert_eq!(f.engine.document_count("wp-post-1").await, 55);
        assert!(state.log.windows(2).all(|w| w[0].seq < w[1].seq));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_poller_waits_out_a_pause() -> Result<(), ProtocolError> {
        let stateless = EndpointMode::Stateless {
            budget: ExecutionBudget::batches(1),
        };
        let (_endpoint, transport, f) = in_process(stateless, 30);
        let client = Arc::new(ProgressClient::new(transport));
        client.start(ActionRequest::new(SyncAction::Start)).await?;
        client.continue_sync().await?;
        client.pause().await?;

        // -- ▶️ another tab resumes once this poller has seen the pause
        let (saw_pause_tx, saw_pause_rx) = tokio::sync::oneshot::channel::<()>();
        let other_tab = tokio::spawn({
            let client = client.clone();
            async move {
                if saw_pause_rx.await.is_ok() {
                    client.resume().await?;
                }
                Ok::<(), ProtocolError>(())
            }
        });

        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let mut saw_pause_tx = Some(saw_pause_tx);
        let mut polls_while_paused = 0;
        let mut poller = SyncPoller::new(client.clone()).driving();
        let state = poller
            .watch(Duration::from_millis(5), cancel_rx, |state| {
                if state.is_paused {
                    polls_while_paused += 1;
                    if let Some(tx) = saw_pause_tx.take() {
                        let _ = tx.send(());
                    }
                }
            })
            .await?;
        other_tab.await.expect("💀 the other tab panicked")?;

        assert!(polls_while_paused >= 1, "the pause was seen and the poller kept going");
        assert!(state.is_complete);
        assert!(!state.is_paused);
        assert_eq!(state.items_processed, 30);
        assert_eq!(f.engine.document_count("wp-post-1").await, 30);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_cancelling_the_poller_leaves_the_sync_alone() -> Result<(), ProtocolError> {
        let stateless = EndpointMode::Stateless {
            budget: ExecutionBudget::batches(1),
        };
        let (_endpoint, transport, f) = in_process(stateless, 100);
        let client = Arc::new(ProgressClient::new(transport));
        client.start(ActionRequest::new(SyncAction::Start)).await?;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut poller = SyncPoller::new(client.clone());
        let state = poller
            .watch(Duration::from_millis(1), cancel_rx, |state| {
                if state.is_syncing {
                    let _ = cancel_tx.send(true);
                }
            })
            .await?;

        assert!(state.is_syncing);
        assert!(f.orchestrator.checkpoint().await.ok().flatten().is_some(), "cancel is not stop");
        Ok(())
    }
}
