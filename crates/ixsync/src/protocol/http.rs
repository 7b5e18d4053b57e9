use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::trace;

use crate::error::ProtocolError;
use crate::protocol::client::ProgressTransport;
use crate::protocol::{HttpMethod, ProgressRequest, ProgressResponse, TOKEN_HEADER};

/// 📡 The progress protocol over plain HTTP. Same requests, now with sockets.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()
            .context("💀 The HTTP client for the progress endpoint refused to be born.")?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }
}

#[async_trait]
impl ProgressTransport for HttpTransport {
    async fn send(&self, request: ProgressRequest) -> Result<ProgressResponse, ProtocolError> {
        let url = self.url(&request.path);
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&url),
            HttpMethod::Post => self.client.post(&url),
        };
        if let Some(ref token) = request.token {
            builder = builder.header(TOKEN_HEADER, token);
        }
        if let Some(ref body) = request.body {
            let body = serde_json::to_string(body).map_err(|e| ProtocolError::Decode(e.to_string()))?;
            builder = builder.header("Content-Type", "application/json").body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ProtocolError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| ProtocolError::Transport(e.to_string()))?;
        trace!(status, bytes = text.len(), "📬 progress endpoint answered {url}");

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            match serde_json::from_str(&text) {
                Ok(body) => body,
                // -- 🧾 proxies love HTML error pages; keep the text so the status error can show it
                Err(_) if !(200..300).contains(&status) => Value::String(text),
                Err(e) => return Err(ProtocolError::Decode(e.to_string())),
            }
        };
        Ok(ProgressResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::client::{ProgressClient, TransportBackend};
    use crate::protocol::{SYNC_PATH, TOKEN_PATH};
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn idle_projection() -> Value {
        json!({"isSyncing": false, "isPaused": false, "itemsProcessed": 0, "itemsTotal": 0})
    }

    #[tokio::test]
    async fn the_one_where_a_stale_token_gets_one_refresh_over_the_wire() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(SYNC_PATH))
            .and(header(TOKEN_HEADER, "fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(idle_projection()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(SYNC_PATH))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({"code": "expired_token"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "fresh", "expiresIn": 600})))
            .expect(1)
            .mount(&server)
            .await;

        let client = ProgressClient::with_token(TransportBackend::Http(HttpTransport::new(server.uri())?), "stale");
        let projection = client.status().await?;
        assert!(!projection.is_syncing);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_server_keeps_saying_no() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(SYNC_PATH))
            .respond_with(ResponseTemplate::new(403))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "also-doomed"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = ProgressClient::with_token(TransportBackend::Http(HttpTransport::new(server.uri())?), "stale");
        let err = client.status().await.expect_err("💀 two 403s should surface");
        assert!(matches!(err, ProtocolError::TokenExpired));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_actions_travel_as_json() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(SYNC_PATH))
            .and(header(TOKEN_HEADER, "t0k3n"))
            .and(header("Content-Type", "application/json"))
            .and(body_string_contains(r#""action":"pause""#))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "action": "pause",
                "outcome": {"outcome": "paused"},
                "sync": {"isSyncing": true, "isPaused": true, "itemsProcessed": 10, "itemsTotal": 40}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = ProgressClient::with_token(TransportBackend::Http(HttpTransport::new(server.uri())?), "t0k3n");
        let response = client.pause().await?;
        assert_eq!(response.outcome_name(), Some("paused"));
        assert!(response.sync.is_paused);
        assert_eq!(response.sync.items_total, 40);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_409_is_reported_with_its_body() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(SYNC_PATH))
            .respond_with(ResponseTemplate::new(409).set_body_string("<html>already running</html>"))
            .mount(&server)
            .await;

        let client = ProgressClient::with_token(TransportBackend::Http(HttpTransport::new(server.uri())?), "t");
        let err = client.stop().await.expect_err("💀 409 is not a success");
        assert!(matches!(err, ProtocolError::Status { status: 409, ref body } if body.contains("already running")));
        Ok(())
    }
}
