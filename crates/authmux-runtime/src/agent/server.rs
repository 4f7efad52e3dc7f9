//! Agent-local status API.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use super::{Agent, AgentStatus};
use crate::api::HealthResponse;

pub fn router(agent: Arc<Agent>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .with_state(agent)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn status(State(agent): State<Arc<Agent>>) -> Json<AgentStatus> {
    Json(agent.status().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::tests::{FakeDriver, agent};
    use authmux_core::Strategy;

    #[tokio::test]
    async fn status_lists_accounts() {
        let agent = agent(
            "http://127.0.0.1:9",
            &["a@example.com", "b@example.com"],
            Arc::new(FakeDriver::ok("abc#s1")),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, router(agent)).await.expect("serve");
        });

        let health: HealthResponse = reqwest::get(format!("http://{addr}/health"))
            .await
            .expect("get")
            .json()
            .await
            .expect("json");
        assert_eq!(health.status, "ok");

        let status: AgentStatus = reqwest::get(format!("http://{addr}/status"))
            .await
            .expect("get")
            .json()
            .await
            .expect("json");
        assert_eq!(status.strategy, Strategy::Lru);
        assert_eq!(status.accounts.len(), 2);
        assert_eq!(status.coordinators, ["http://127.0.0.1:9"]);
        assert_eq!(status.in_flight, 0);
    }
}
