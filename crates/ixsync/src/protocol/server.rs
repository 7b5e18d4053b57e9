//! 🛰️ HTTP front door for `ProgressEndpoint`.
//!
//! One fallback route hands every request to `ProgressEndpoint::handle`, which already
//! knows `/sync`, `/token`, the `X-Sync-Token` header and every error body. This file only
//! translates between axum and the endpoint's own request/response types.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::protocol::endpoint::ProgressEndpoint;
use crate::protocol::{HttpMethod, ProgressRequest, ProgressResponse, TOKEN_HEADER};

/// 🗺️ Every path goes to the endpoint; it decides what lives where.
pub fn router(endpoint: Arc<ProgressEndpoint>) -> Router {
    Router::new().fallback(relay).with_state(endpoint)
}

async fn relay(
    State(endpoint): State<Arc<ProgressEndpoint>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let method = if method == Method::GET {
        HttpMethod::Get
    } else if method == Method::POST {
        HttpMethod::Post
    } else {
        return reply(ProgressResponse::error(
            405,
            "method_not_allowed",
            format!("🚫 {method} is not part of the progress protocol; use GET or POST"),
        ));
    };
    let body = if body.is_empty() {
        None
    } else {
        match serde_json::from_slice::<Value>(&body) {
            Ok(body) => Some(body),
            Err(e) => {
                return reply(ProgressResponse::error(400, "bad_request", format!("💀 request body is not JSON: {e}")));
            }
        }
    };
    let token = headers
        .get(TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    debug!(path = uri.path(), "📨 progress request");
    let request = ProgressRequest {
        method,
        path: uri.path().to_string(),
        token,
        body,
    };
    reply(endpoint.handle(request).await)
}

fn reply(response: ProgressResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(response.body)).into_response()
}

/// 🚀 Serve the endpoint on `listener` until `shutdown` resolves.
///
/// A background worker still running at shutdown is left alone: its checkpoint is already
/// persisted, and a `resume` against the next server picks it up.
pub async fn serve_with_shutdown<F>(listener: TcpListener, endpoint: Arc<ProgressEndpoint>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener
        .local_addr()
        .context("💀 The listener has no local address. That is a new one.")?;
    info!(%addr, scope = %endpoint.orchestrator().scope(), "🛰️ progress endpoint listening");

    axum::serve(listener, router(endpoint))
        .with_graceful_shutdown(shutdown)
        .await
        .with_context(|| format!("💀 The progress endpoint on {addr} stopped serving."))?;

    info!(%addr, "🛰️ progress endpoint shut down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::time::Duration;

    use tokio::sync::{oneshot, watch};

    use crate::orchestrator::ExecutionBudget;
    use crate::orchestrator::tests::{Fixture, fixture};
    use crate::protocol::client::{ProgressClient, SyncPoller, TransportBackend};
    use crate::protocol::endpoint::{EndpointMode, TokenIssuer};
    use crate::protocol::http::HttpTransport;
    use crate::protocol::{ActionRequest, SYNC_PATH, SyncAction};

    struct Running {
        addr: SocketAddr,
        shutdown: oneshot::Sender<()>,
        server: tokio::task::JoinHandle<Result<()>>,
        fixture: Fixture,
    }

    async fn spawn_server(objects: u64, mode: EndpointMode) -> Result<Running> {
        let fixture = fixture(objects, 10, false);
        let endpoint = Arc::new(ProgressEndpoint::new(
            fixture.orchestrator.clone(),
            TokenIssuer::new(Duration::from_secs(60)),
            mode,
        ));
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown, stop) = oneshot::channel::<()>();
        let server = tokio::spawn(serve_with_shutdown(listener, endpoint, async move {
            let _ = stop.await;
        }));
        Ok(Running {
            addr,
            shutdown,
            server,
            fixture,
        })
    }

    #[tokio::test]
    async fn the_one_where_a_dashboard_drives_a_sync_over_real_sockets() -> Result<()> {
        let stateless = EndpointMode::Stateless {
            budget: ExecutionBudget::batches(2),
        };
        let running = spawn_server(35, stateless).await?;
        let transport = TransportBackend::Http(HttpTransport::new(format!("http://{}", running.addr))?);
        let client = Arc::new(ProgressClient::new(transport));

        client.start(ActionRequest::new(SyncAction::Start)).await?;
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let state = SyncPoller::new(client.clone())
            .driving()
            .watch(Duration::from_millis(1), cancel_rx, |_| {})
            .await?;

        assert!(state.is_complete);
        assert_eq!(state.items_processed, 35);
        assert_eq!(running.fixture.engine.document_count("wp-post-1").await, 35);

        let _ = running.shutdown.send(());
        running.server.await??;
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_front_door_checks_papers() -> Result<()> {
        let stateless = EndpointMode::Stateless {
            budget: ExecutionBudget::batches(1),
        };
        let running = spawn_server(5, stateless).await?;
        let base = format!("http://{}", running.addr);
        let http = reqwest::Client::new();

        let no_token = http.get(format!("{base}{SYNC_PATH}")).send().await?;
        assert_eq!(no_token.status().as_u16(), 403);
        let body: Value = serde_json::from_str(&no_token.text().await?)?;
        assert_eq!(body["code"], "expired_token");

        let wrong_verb = http.put(format!("{base}{SYNC_PATH}")).send().await?;
        assert_eq!(wrong_verb.status().as_u16(), 405);

        let issued: Value = serde_json::from_str(&http.post(format!("{base}/token")).send().await?.text().await?)?;
        let token = issued["token"].as_str().unwrap_or_default().to_string();
        let garbled = http
            .post(format!("{base}{SYNC_PATH}"))
            .header(TOKEN_HEADER, &token)
            .body("{not json")
            .send()
            .await?;
        assert_eq!(garbled.status().as_u16(), 400);

        let status = http
            .get(format!("{base}{SYNC_PATH}"))
            .header(TOKEN_HEADER, &token)
            .send()
            .await?;
        assert_eq!(status.status().as_u16(), 200);
        let body: Value = serde_json::from_str(&status.text().await?)?;
        assert_eq!(body["isSyncing"], false);

        let _ = running.shutdown.send(());
        running.server.await??;
        Ok(())
    }
}
