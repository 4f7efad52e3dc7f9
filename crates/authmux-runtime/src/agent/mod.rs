//! Agent: polls coordinators for pending auth requests and completes each
//! one in a browser with a rotated account.
//!
//! Every request is attempted once. A failed attempt is reported and left
//! alone; the coordinator's TTL retires it.

pub mod browser;
pub mod client;
pub mod server;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use authmux_core::{AccountPool, AccountStatus, AuthRequest, FailureKind, PaneId, Strategy};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::events::{EventBus, RecoveryEvent};
use crate::redact;
use browser::{BrowserError, OAuthDriver};
use client::CoordinatorClient;

/// One request as seen from one coordinator.
type AttemptKey = (usize, PaneId, String);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatus {
    pub version: String,
    pub strategy: Strategy,
    pub coordinators: Vec<String>,
    pub accounts: Vec<AccountStatus>,
    pub in_flight: usize,
    pub attempted: usize,
}

pub struct Agent {
    clients: Vec<CoordinatorClient>,
    pool: Mutex<AccountPool>,
    driver: Arc<dyn OAuthDriver>,
    poll_interval: Duration,
    attempted: Mutex<HashSet<AttemptKey>>,
    in_flight: AtomicUsize,
    tasks: TaskTracker,
    events: EventBus,
    stop: CancellationToken,
}

impl Agent {
    pub fn new(
        clients: Vec<CoordinatorClient>,
        pool: AccountPool,
        driver: Arc<dyn OAuthDriver>,
        poll_interval: Duration,
        events: EventBus,
    ) -> Self {
        Self {
            clients,
            pool: Mutex::new(pool),
            driver,
            poll_interval,
            attempted: Mutex::new(HashSet::new()),
            in_flight: AtomicUsize::new(0),
            tasks: TaskTracker::new(),
            events,
            stop: CancellationToken::new(),
        }
    }

    /// Idempotent. Running attempts are cancelled.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub async fn run(self: &Arc<Self>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let accounts = self.pool.lock().await.len();
        tracing::info!(coordinators = self.clients.len(), accounts, "agent started");
        loop {
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.poll_once().await;
        }
        self.tasks.close();
        self.tasks.wait().await;
        tracing::info!("agent stopped");
    }

    pub async fn poll_once(self: &Arc<Self>) {
        for (idx, client) in self.clients.iter().enumerate() {
            match client.pending().await {
                Ok(list) => self.handle_pending(idx, list).await,
                Err(e) => tracing::warn!(coordinator = client.base(), "poll failed: {e}"),
            }
        }
    }

    async fn handle_pending(self: &Arc<Self>, idx: usize, list: Vec<AuthRequest>) {
        let mut attempted = self.attempted.lock().await;
        let live: HashSet<AttemptKey> = list
            .iter()
            .map(|r| (idx, r.pane_id, r.url.clone()))
            .collect();
        // Forget requests the coordinator no longer lists.
        attempted.retain(|key| key.0 != idx || live.contains(key));

        for request in list {
            let key = (idx, request.pane_id, request.url.clone());
            if attempted.contains(&key) {
                continue;
            }
            let account = {
                let mut pool = self.pool.lock().await;
                pool.select(Utc::now(), &mut rand::thread_rng())
            };
            let Some(account) = account else {
                tracing::debug!("all accounts busy; deferring pane {}", request.pane_id);
                break;
            };
            attempted.insert(key);
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            let agent = Arc::clone(self);
            self.tasks.spawn(async move {
                agent.attempt(idx, request, account).await;
                agent.in_flight.fetch_sub(1, Ordering::SeqCst);
            });
        }
    }

    async fn attempt(&self, idx: usize, request: AuthRequest, account: String) {
        let Some(client) = self.clients.get(idx) else {
            return;
        };
        let pane_id = request.pane_id;
        tracing::info!(
            pane_id,
            coordinator = client.base(),
            account = %redact::account(&account),
            url = %redact::url(&request.url),
            "starting OAuth flow"
        );

        let outcome = tokio::select! {
            r = self.driver.complete(&request.url, &account) => r,
            _ = self.stop.cancelled() => Err(BrowserError::Cancelled),
        };

        match outcome {
            Ok(code) => {
                tracing::debug!(pane_id, code = %redact::secret(&code.code), "code obtained");
                match client.submit(pane_id, &code.code, &account).await {
                    Ok(()) => {
                        tracing::info!(pane_id, "code accepted");
                        self.events.publish(RecoveryEvent::AuthCompleted {
                            pane_id,
                            account: Some(account.clone()),
                        });
                    }
                    Err(e) => {
                        if e.status() == Some(reqwest::StatusCode::NOT_FOUND) {
                            tracing::warn!(pane_id, "request expired or was resolved elsewhere");
                        }
                        tracing::warn!(pane_id, "submission failed: {e}");
                        self.events.publish(RecoveryEvent::AuthFailed {
                            pane_id,
                            kind: FailureKind::Submission,
                            detail: e.to_string(),
                        });
                    }
                }
            }
            Err(e) => {
                tracing::warn!(pane_id, "OAuth flow failed: {e}");
                self.events.publish(RecoveryEvent::AuthFailed {
                    pane_id,
                    kind: FailureKind::BrowserAutomation,
                    detail: e.to_string(),
                });
            }
        }

        self.pool.lock().await.release(&account);
    }

    pub async fn status(&self) -> AgentStatus {
        // Same lock order as handle_pending: attempted, then pool.
        let attempted = self.attempted.lock().await.len();
        let pool = self.pool.lock().await;
        AgentStatus {
            version: env!("CARGO_PKG_VERSION").to_string(),
            strategy: pool.strategy(),
            coordinators: self.clients.iter().map(|c| c.base().to_string()).collect(),
            accounts: pool.snapshot(),
            in_flight: self.in_flight(),
            attempted,
        }
    }
}
