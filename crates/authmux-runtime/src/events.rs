//! Recovery notifications.
//!
//! Producers publish on a broadcast channel and never wait: a subscriber
//! that falls behind loses events instead of stalling the poll loop. Each
//! transition is published once.

use authmux_core::{FailureKind, MatchTag, PaneId, Tool};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::redact;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RecoveryEvent {
    RateLimitDetected {
        pane_id: PaneId,
        tool: Tool,
        tag: MatchTag,
        dry_run: bool,
    },
    AuthRequested {
        pane_id: PaneId,
        tool: Tool,
        url: String,
    },
    AuthCompleted {
        pane_id: PaneId,
        account: Option<String>,
    },
    AuthFailed {
        pane_id: PaneId,
        kind: FailureKind,
        detail: String,
    },
}

impl RecoveryEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RateLimitDetected { .. } => "rate_limit_detected",
            Self::AuthRequested { .. } => "auth_requested",
            Self::AuthCompleted { .. } => "auth_completed",
            Self::AuthFailed { .. } => "auth_failed",
        }
    }

    pub fn pane_id(&self) -> PaneId {
        match self {
            Self::RateLimitDetected { pane_id, .. }
            | Self::AuthRequested { pane_id, .. }
            | Self::AuthCompleted { pane_id, .. }
            | Self::AuthFailed { pane_id, .. } => *pane_id,
        }
    }

    /// Redacted detail for hooks and event lines.
    pub fn detail(&self) -> String {
        match self {
            Self::RateLimitDetected { tool, tag, .. } => format!("{tool} {tag}"),
            Self::AuthRequested { url, .. } => redact::url(url),
            Self::AuthCompleted { account, .. } => account
                .as_deref()
                .map(redact::account)
                .unwrap_or_default(),
            Self::AuthFailed { kind, detail, .. } => {
                format!("{kind}: {}", redact::truncate(detail, 120))
            }
        }
    }

    /// The one user-visible line for this event.
    pub fn line(&self) -> String {
        let pane = self.pane_id();
        match self {
            Self::RateLimitDetected { dry_run: true, .. } => {
                format!("[pane {pane}] rate limit detected (dry run, {})", self.detail())
            }
            Self::RateLimitDetected { .. } => {
                format!("[pane {pane}] rate limit detected ({})", self.detail())
            }
            Self::AuthRequested { .. } => format!("[pane {pane}] auth needed: {}", self.detail()),
            Self::AuthCompleted { account: Some(_), .. } => {
                format!("[pane {pane}] auth complete ({})", self.detail())
            }
            Self::AuthCompleted { .. } => format!("[pane {pane}] auth complete"),
            Self::AuthFailed { .. } => format!("[pane {pane}] auth failed: {}", self.detail()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RecoveryEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: RecoveryEvent) {
        tracing::debug!(event = event.name(), pane_id = event.pane_id(), "publish");
        // No subscribers is not an error.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecoveryEvent> {
        self.tx.subscribe()
    }
}

/// Drain `rx` into `handle` until cancelled or the bus closes.
fn spawn_subscriber<F, Fut>(
    mut rx: broadcast::Receiver<RecoveryEvent>,
    cancel: CancellationToken,
    mut handle: F,
) -> JoinHandle<()>
where
    F: FnMut(RecoveryEvent) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                msg = rx.recv() => match msg {
                    Ok(event) => handle(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("event subscriber lagged, skipped {skipped} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    })
}

/// Print one line per event on stdout.
pub fn spawn_printer(bus: &EventBus, cancel: CancellationToken) -> JoinHandle<()> {
    spawn_subscriber(bus.subscribe(), cancel, |event| async move {
        println!("{}", event.line());
    })
}

/// Run `sh -c <cmd>` per event with `AUTHMUX_EVENT`, `AUTHMUX_PANE_ID` and
/// `AUTHMUX_DETAIL` set. Hook failures are logged and otherwise ignored.
pub fn spawn_notify_hook(bus: &EventBus, cmd: String, cancel: CancellationToken) -> JoinHandle<()> {
    spawn_subscriber(bus.subscribe(), cancel, move |event| {
        let cmd = cmd.clone();
        async move {
            if let Err(e) = run_hook(&cmd, &event).await {
                tracing::warn!(event = event.name(), "notify hook failed: {e}");
            }
        }
    })
}

async fn run_hook(cmd: &str, event: &RecoveryEvent) -> std::io::Result<()> {
    let status = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(cmd)
        .env("AUTHMUX_EVENT", event.name())
        .env("AUTHMUX_PANE_ID", event.pane_id().to_string())
        .env("AUTHMUX_DETAIL", event.detail())
        .stdin(std::process::Stdio::null())
        .status()
        .await?;
    if !status.success() {
        tracing::debug!(event = event.name(), "notify hook exited with {status}");
    }
    Ok(())
}
