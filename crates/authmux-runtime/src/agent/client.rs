//! HTTP client for a coordinator's API.

use std::time::Duration;

use authmux_core::{AuthRequest, PaneId};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::api::{ErrorResponse, SubmitRequest};
use crate::coordinator::CoordinatorStatus;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned {status}: {message}")]
    Status {
        url: String,
        status: StatusCode,
        message: String,
    },
}

impl ClientError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Http { .. } => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorClient {
    base: String,
    http: reqwest::Client,
}

impl CoordinatorClient {
    pub fn new(base: &str, timeout: Duration) -> Result<Self, ClientError> {
        let base = base.trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| ClientError::Http {
                url: base.clone(),
                source,
            })?;
        Ok(Self { base, http })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub async fn pending(&self) -> Result<Vec<AuthRequest>, ClientError> {
        self.get("/auth/pending").await
    }

    pub async fn status(&self) -> Result<CoordinatorStatus, ClientError> {
        self.get("/status").await
    }

    pub async fn submit(&self, pane_id: PaneId, code: &str, account: &str) -> Result<(), ClientError> {
        let url = format!("{}/auth/submit", self.base);
        let body = SubmitRequest {
            pane_id,
            code: code.to_string(),
            account: Some(account.to_string()),
        };
        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|source| ClientError::Http {
                url: url.clone(),
                source,
            })?;
        check(url, resp).await?;
        Ok(())
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let url = format!("{}{path}", self.base);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|source| ClientError::Http {
                url: url.clone(),
                source,
            })?;
        let resp = check(url.clone(), resp).await?;
        resp.json()
            .await
            .map_err(|source| ClientError::Http { url, source })
    }
}

async fn check(url: String, resp: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&text)
        .map(|e| e.error)
        .unwrap_or(text);
    Err(ClientError::Status {
        url,
        status,
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api;
    use crate::coordinator::fake::{coordinator, open_request, test_config};
    use std::sync::Arc;

    async fn serve(coord: Arc<crate::coordinator::Coordinator>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, api::router(coord)).await.expect("serve");
        });
        format!("http://{addr}/")
    }

    #[tokio::test]
    async fn pending_then_submit() {
        let (coord, backend) = coordinator(test_config());
        open_request(&coord, &backend).await;
        let client = CoordinatorClient::new(&serve(Arc::clone(&coord)).await, Duration::from_secs(5))
            .expect("client");

        let pending = client.pending().await.expect("pending");
        assert_eq!(pending.len(), 1);

        client.submit(1, "abc#s1", "a@example.com").await.expect("submit");
        assert!(client.pending().await.expect("pending").is_empty());

        let err = client.submit(1, "abc#s1", "a@example.com").await.expect_err("consumed");
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
        assert!(err.to_string().contains("no pending auth request"));
    }

    #[tokio::test]
    async fn status_round_trip() {
        let (coord, _backend) = coordinator(test_config());
        let client = CoordinatorClient::new(&serve(coord).await, Duration::from_secs(5)).expect("client");
        let status = client.status().await.expect("status");
        assert_eq!(status.backend, "fake");
    }

    #[tokio::test]
    async fn unreachable_coordinator_is_http_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        let client = CoordinatorClient::new(&format!("http://{addr}"), Duration::from_secs(2)).expect("client");
        let err = client.pending().await.expect_err("refused");
        assert!(matches!(err, ClientError::Http { .. }));
        assert_eq!(err.status(), None);
    }
}
