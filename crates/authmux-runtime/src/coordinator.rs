//! Coordinator: per-pane recovery state, pending auth requests, poll loop.
//!
//! All state lives behind one `tokio::sync::Mutex<CoordinatorState>`; the
//! poll loop and the HTTP API both go through the methods here. Multiplexer
//! calls run on the blocking pool and are never made while the lock is held.
//! Every pane read and write is bounded by `pane_timeout`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use authmux_core::{
    AuthRequest, AuthRequestStatus, Decision, FailureKind, PaneId, PaneRecovery, RecoveryPhase,
    RecoveryPolicy, TextMatcher, Tool, extract_oauth_urls, normalize,
};
use authmux_mux::{MuxError, Pane, PaneBackend};
use chrono::{DateTime, TimeDelta, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::events::{EventBus, RecoveryEvent};
use crate::redact;

/// Consecutive failed pane listings before the poll loop gives up.
pub const MAX_LIST_FAILURES: u32 = 10;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub poll_interval: Duration,
    /// Injected after the code, to un-stick the interrupted session.
    pub resume_prompt: String,
    /// Tool assumed for panes whose tool cannot be inferred.
    pub default_tool: Tool,
    /// Keys sent after `/login` (login-method selection).
    pub login_select: Option<String>,
    pub auth_ttl: TimeDelta,
    /// Delay between a keystroke batch and the next one into the same pane.
    pub settle: Duration,
    pub capture_lines: u32,
    pub pane_timeout: Duration,
    pub policy: RecoveryPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            resume_prompt: "continue".to_string(),
            default_tool: Tool::Claude,
            login_select: Some("\n".to_string()),
            auth_ttl: TimeDelta::seconds(600),
            settle: Duration::from_millis(1500),
            capture_lines: 80,
            pane_timeout: Duration::from_secs(5),
            policy: RecoveryPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("code must be non-empty and free of whitespace and control characters")]
    InvalidCode,
    #[error("no pending auth request for pane {0}")]
    NotFound(PaneId),
    #[error("a submission for pane {0} is already in flight")]
    InFlight(PaneId),
    #[error("injection into pane {pane_id} failed: {source}")]
    Injection {
        pane_id: PaneId,
        #[source]
        source: MuxError,
    },
}

struct PaneEntry {
    title: String,
    tool: Tool,
    recovery: PaneRecovery,
}

#[derive(Default)]
struct CoordinatorState {
    panes: HashMap<PaneId, PaneEntry>,
    pending: BTreeMap<PaneId, AuthRequest>,
    /// Panes whose submitted code is being injected. Their request has
    /// already left `pending`.
    in_flight: HashSet<PaneId>,
    /// Reads that outlived `pane_timeout`. The pane is not read again until
    /// its read returns.
    stalled_reads: HashMap<PaneId, JoinHandle<Result<String, MuxError>>>,
}

enum Capture {
    Text(String),
    Unreadable,
    Stalled(JoinHandle<Result<String, MuxError>>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaneStatus {
    pub pane_id: PaneId,
    pub title: String,
    pub tool: Tool,
    pub phase: RecoveryPhase,
    pub cycle: u64,
    pub last_transition: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorStatus {
    pub version: String,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub backend: String,
    pub dry_run: bool,
    pub pane_count: usize,
    pub pending_count: usize,
    pub in_flight_count: usize,
    pub panes: Vec<PaneStatus>,
}

pub struct Coordinator {
    backend: Arc<dyn PaneBackend>,
    matcher: TextMatcher,
    config: CoordinatorConfig,
    state: Mutex<CoordinatorState>,
    events: EventBus,
    stop: CancellationToken,
    started_at: DateTime<Utc>,
}

/// A code is a single opaque token (`code#state` for Claude).
fn valid_code(code: &str) -> bool {
    !code.is_empty() && !code.chars().any(|c| c.is_whitespace() || c.is_control())
}

fn needs_read(phase: RecoveryPhase) -> bool {
    phase.is_watching() || phase == RecoveryPhase::AwaitingOAuthUrl
}

/// Trace rendering of a decision. Never the derived `Debug`: `UrlFound`
/// carries the full authorize URL.
fn decision_label(decision: &Decision) -> String {
    match decision {
        Decision::Debounced => "debounced".to_string(),
        Decision::NoAction => "no_action".to_string(),
        Decision::Detected { classification } => format!("detected({})", classification.tag),
        Decision::StartCycle { classification } => format!("start_cycle({})", classification.tag),
        Decision::UrlFound { url } => format!("url_found({})", redact::url(url)),
        Decision::UrlTimeout => "url_timeout".to_string(),
    }
}

impl Coordinator {
    pub fn new(
        backend: Arc<dyn PaneBackend>,
        matcher: TextMatcher,
        config: CoordinatorConfig,
        events: EventBus,
    ) -> Self {
        Self {
            backend,
            matcher,
            config,
            state: Mutex::new(CoordinatorState::default()),
            events,
            stop: CancellationToken::new(),
            started_at: Utc::now(),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Ask the poll loop to exit at the next tick boundary. Idempotent.
    pub fn stop(&self) {
        if !self.is_stopped() {
            tracing::info!("stopping poll loop");
        }
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Poll until [`Self::stop`] is called. A tick in progress always runs to
    /// completion. Fails after [`MAX_LIST_FAILURES`] consecutive listing
    /// failures.
    pub async fn run(&self) -> Result<(), MuxError> {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures = 0u32;

        tracing::info!(
            backend = self.backend.name(),
            poll_ms = self.config.poll_interval.as_millis() as u64,
            dry_run = self.config.policy.dry_run,
            "poll loop started"
        );

        loop {
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match self.tick().await {
                Ok(()) => failures = 0,
                Err(e) => {
                    failures += 1;
                    tracing::warn!("poll tick failed ({failures}/{MAX_LIST_FAILURES}): {e}");
                    if failures >= MAX_LIST_FAILURES {
                        tracing::error!(
                            kind = FailureKind::BackendUnavailable.as_str(),
                            "giving up after {failures} failed ticks"
                        );
                        return Err(e);
                    }
                }
            }
        }
        tracing::info!("poll loop stopped");
        Ok(())
    }

    pub async fn tick(&self) -> Result<(), MuxError> {
        self.tick_at(Utc::now()).await
    }

    async fn tick_at(&self, now: DateTime<Utc>) -> Result<(), MuxError> {
        let panes = self.blocking(|b| b.list_panes()).await?;
        let to_read = self.sync_panes(&panes).await;

        let captures = join_all(to_read.into_iter().map(|id| self.capture(id))).await;

        let mut logins = Vec::new();
        {
            let mut st = self.state.lock().await;
            for (pane_id, capture) in captures {
                match capture {
                    Capture::Text(raw) => {
                        if self.observe_pane(&mut st, pane_id, &raw, now) {
                            logins.push(pane_id);
                        }
                    }
                    Capture::Stalled(read) => {
                        st.stalled_reads.insert(pane_id, read);
                    }
                    Capture::Unreadable => {}
                }
            }
        }

        if !logins.is_empty() {
            let results = join_all(logins.iter().map(|&id| self.inject_login(id))).await;
            let done = Utc::now();
            let mut st = self.state.lock().await;
            for (pane_id, result) in logins.into_iter().zip(results) {
                let Some(entry) = st.panes.get_mut(&pane_id) else {
                    continue;
                };
                if let Err(e) = entry.recovery.login_injected(result.is_ok(), done) {
                    tracing::warn!(pane_id, "{e}");
                }
                match result {
                    Ok(()) => tracing::info!(pane_id, "injected /login"),
                    Err(e) => {
                        tracing::warn!(pane_id, "login injection failed: {e}");
                        self.events.publish(RecoveryEvent::AuthFailed {
                            pane_id,
                            kind: FailureKind::Injection,
                            detail: e.to_string(),
                        });
                    }
                }
            }
        }

        self.expire_pending(now).await;
        Ok(())
    }

    /// Refresh the pane set. Returns the panes whose text must be read.
    async fn sync_panes(&self, panes: &[Pane]) -> Vec<PaneId> {
        let now = Utc::now();
        let live: HashSet<PaneId> = panes.iter().map(|p| p.id).collect();
        let mut st = self.state.lock().await;

        let gone: Vec<PaneId> = st
            .panes
            .keys()
            .filter(|id| !live.contains(id))
            .copied()
            .collect();
        for pane_id in gone {
            st.panes.remove(&pane_id);
            tracing::debug!(pane_id, "pane gone");
            if st.pending.remove(&pane_id).is_some() {
                tracing::warn!(pane_id, "pane closed with a pending auth request");
                self.events.publish(RecoveryEvent::AuthFailed {
                    pane_id,
                    kind: FailureKind::PaneClosed,
                    detail: "pane closed".to_string(),
                });
            }
        }

        for pane in panes {
            st.panes
                .entry(pane.id)
                .and_modify(|e| e.title.clone_from(&pane.title))
                .or_insert_with(|| PaneEntry {
                    title: pane.title.clone(),
                    tool: self.config.default_tool,
                    recovery: PaneRecovery::new(now),
                });
        }

        st.stalled_reads
            .retain(|id, read| live.contains(id) && !read.is_finished());

        st.panes
            .iter()
            .filter(|(id, e)| needs_read(e.recovery.phase()) && !st.stalled_reads.contains_key(*id))
            .map(|(&id, _)| id)
            .collect()
    }

    async fn capture(&self, pane_id: PaneId) -> (PaneId, Capture) {
        let lines = self.config.capture_lines;
        let backend = Arc::clone(&self.backend);
        let mut read = tokio::task::spawn_blocking(move || backend.get_text(pane_id, lines));
        let kind = FailureKind::PaneRead.as_str();
        let capture = match tokio::time::timeout(self.config.pane_timeout, &mut read).await {
            Ok(Ok(Ok(text))) => Capture::Text(text),
            Ok(Ok(Err(e))) => {
                tracing::debug!(pane_id, kind, "pane read failed: {e}");
                Capture::Unreadable
            }
            Ok(Err(e)) => {
                tracing::debug!(pane_id, kind, "pane read task failed: {e}");
                Capture::Unreadable
            }
            Err(_) => {
                tracing::debug!(pane_id, kind, "pane read timed out");
                Capture::Stalled(read)
            }
        };
        (pane_id, capture)
    }

    /// Feed one capture into the pane's state machine. Returns true when a
    /// new cycle started and `/login` must be injected.
    fn observe_pane(&self, st: &mut CoordinatorState, pane_id: PaneId, raw: &str, now: DateTime<Utc>) -> bool {
        let Some(entry) = st.panes.get_mut(&pane_id) else {
            return false;
        };
        let cleaned = normalize(raw);
        if let Some(tool) = self.matcher.detect_tool(&entry.title, &cleaned) {
            entry.tool = tool;
        }
        let tool = entry.tool;
        let matcher = &self.matcher;
        let decision = entry
            .recovery
            .observe(&cleaned, now, &self.config.policy, |text| matcher.classify(text, tool));

        if tracing::enabled!(tracing::Level::DEBUG) && decision != Decision::Debounced {
            let urls: Vec<String> = extract_oauth_urls(&cleaned).iter().map(|u| redact::url(u)).collect();
            tracing::debug!(
                pane_id,
                tool = %tool,
                phase = %entry.recovery.phase(),
                ?urls,
                decision = %decision_label(&decision),
                "pane scanned"
            );
        }

        match decision {
            Decision::Debounced | Decision::NoAction => false,
            Decision::Detected { classification } => {
                tracing::info!(pane_id, tag = %classification.tag, "rate limit detected (dry run)");
                self.events.publish(RecoveryEvent::RateLimitDetected {
                    pane_id,
                    tool,
                    tag: classification.tag,
                    dry_run: true,
                });
                false
            }
            Decision::StartCycle { classification } => {
                tracing::info!(
                    pane_id,
                    tag = %classification.tag,
                    cycle = entry.recovery.cycle(),
                    "rate limit detected"
                );
                self.events.publish(RecoveryEvent::RateLimitDetected {
                    pane_id,
                    tool,
                    tag: classification.tag,
                    dry_run: false,
                });
                true
            }
            Decision::UrlFound { url } => {
                tracing::info!(pane_id, url = %redact::url(&url), "auth request opened");
                st.pending
                    .insert(pane_id, AuthRequest::new(pane_id, tool, url.clone(), now));
                self.events.publish(RecoveryEvent::AuthRequested { pane_id, tool, url });
                false
            }
            Decision::UrlTimeout => {
                let ticks = self.config.policy.url_timeout_ticks;
                tracing::warn!(pane_id, "no OAuth URL after {ticks} ticks");
                self.events.publish(RecoveryEvent::AuthFailed {
                    pane_id,
                    kind: FailureKind::OAuthUrlTimeout,
                    detail: format!("no OAuth URL after {ticks} ticks"),
                });
                false
            }
        }
    }

    async fn inject_login(&self, pane_id: PaneId) -> Result<(), MuxError> {
        self.send(pane_id, "/login\n".to_string()).await?;
        if let Some(keys) = self.config.login_select.clone() {
            tokio::time::sleep(self.config.settle).await;
            self.send(pane_id, keys).await?;
        }
        Ok(())
    }

    /// Fail every pending request older than the TTL. Each expired request is
    /// removed, so it is reported exactly once.
    pub async fn expire_pending(&self, now: DateTime<Utc>) -> usize {
        let ttl = self.config.auth_ttl;
        let mut st = self.state.lock().await;
        let expired: Vec<PaneId> = st
            .pending
            .values()
            .filter(|r| r.is_expired(now, ttl))
            .map(|r| r.pane_id)
            .collect();

        for &pane_id in &expired {
            st.pending.remove(&pane_id);
            if let Some(entry) = st.panes.get_mut(&pane_id) {
                entry.recovery.fail(now);
            }
            tracing::warn!(pane_id, "auth request expired");
            self.events.publish(RecoveryEvent::AuthFailed {
                pane_id,
                kind: FailureKind::CodeSubmissionExpired,
                detail: format!("no code within {}s", ttl.num_seconds()),
            });
        }
        expired.len()
    }

    /// Pending requests as served to agents. Serving an open request moves it
    /// (and its pane) to `AwaitingCode`.
    pub async fn pending_for_client(&self) -> Vec<AuthRequest> {
        let now = Utc::now();
        let mut guard = self.state.lock().await;
        let st = &mut *guard;
        for request in st.pending.values_mut() {
            if request.status != AuthRequestStatus::Open {
                continue;
            }
            request.status = AuthRequestStatus::AwaitingCode;
            if let Some(entry) = st.panes.get_mut(&request.pane_id) {
                if let Err(e) = entry.recovery.advance(RecoveryPhase::AwaitingCode, now) {
                    tracing::debug!(pane_id = request.pane_id, "{e}");
                }
            }
        }
        st.pending.values().cloned().collect()
    }

    /// Pending requests without side effects.
    #[cfg(test)]
    pub async fn pending(&self) -> Vec<AuthRequest> {
        self.state.lock().await.pending.values().cloned().collect()
    }

    /// Resolve a pending request with an OAuth code.
    ///
    /// The request leaves `pending` before anything is written, so a code is
    /// injected at most once. An injection failure fails the cycle; it is not
    /// retried.
    pub async fn submit_code(
        &self,
        pane_id: PaneId,
        code: &str,
        account: Option<&str>,
    ) -> Result<(), SubmitError> {
        {
            let mut st = self.state.lock().await;
            if st.in_flight.contains(&pane_id) {
                return Err(SubmitError::InFlight(pane_id));
            }
            let request = st
                .pending
                .get_mut(&pane_id)
                .ok_or(SubmitError::NotFound(pane_id))?;
            request.attempts += 1;
            if !valid_code(code) {
                return Err(SubmitError::InvalidCode);
            }
            st.pending.remove(&pane_id);
            st.in_flight.insert(pane_id);
        }

        tracing::info!(
            pane_id,
            code = %redact::secret(code),
            account = %account.map(redact::account).unwrap_or_default(),
            "code submitted"
        );

        let result = self.inject_code(pane_id, code).await;
        let now = Utc::now();
        let mut st = self.state.lock().await;
        st.in_flight.remove(&pane_id);

        match result {
            Ok(()) => {
                if let Some(entry) = st.panes.get_mut(&pane_id) {
                    if let Err(e) = entry.recovery.advance(RecoveryPhase::Resumed, now) {
                        tracing::debug!(pane_id, "{e}");
                    }
                }
                drop(st);
                tracing::info!(pane_id, "session resumed");
                self.events.publish(RecoveryEvent::AuthCompleted {
                    pane_id,
                    account: account.map(str::to_string),
                });
                Ok(())
            }
            Err(source) => {
                if let Some(entry) = st.panes.get_mut(&pane_id) {
                    entry.recovery.fail(now);
                }
                drop(st);
                tracing::warn!(pane_id, "code injection failed: {source}");
                self.events.publish(RecoveryEvent::AuthFailed {
                    pane_id,
                    kind: FailureKind::Injection,
                    detail: source.to_string(),
                });
                Err(SubmitError::Injection { pane_id, source })
            }
        }
    }

    async fn inject_code(&self, pane_id: PaneId, code: &str) -> Result<(), MuxError> {
        self.send(pane_id, format!("{code}\n")).await?;
        {
            let mut st = self.state.lock().await;
            if let Some(entry) = st.panes.get_mut(&pane_id) {
                if let Err(e) = entry.recovery.advance(RecoveryPhase::CodeInjected, Utc::now()) {
                    tracing::debug!(pane_id, "{e}");
                }
            }
        }
        if self.config.resume_prompt.is_empty() {
            return Ok(());
        }
        tokio::time::sleep(self.config.settle).await;
        self.send(pane_id, format!("{}\n", self.config.resume_prompt)).await
    }

    pub async fn status(&self) -> CoordinatorStatus {
        let now = Utc::now();
        let st = self.state.lock().await;
        let mut panes: Vec<PaneStatus> = st
            .panes
            .iter()
            .map(|(&pane_id, e)| PaneStatus {
                pane_id,
                title: e.title.clone(),
                tool: e.tool,
                phase: e.recovery.phase(),
                cycle: e.recovery.cycle(),
                last_transition: e.recovery.last_transition(),
            })
            .collect();
        panes.sort_by_key(|p| p.pane_id);
        CoordinatorStatus {
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: self.started_at,
            uptime_secs: (now - self.started_at).num_seconds(),
            backend: self.backend.name().to_string(),
            dry_run: self.config.policy.dry_run,
            pane_count: panes.len(),
            pending_count: st.pending.len(),
            in_flight_count: st.in_flight.len(),
            panes,
        }
    }

    /// Write keystrokes, bounded by `pane_timeout`. A write that times out
    /// keeps its blocking thread but no longer holds up the caller.
    async fn send(&self, pane_id: PaneId, payload: String) -> Result<(), MuxError> {
        let write = self.blocking(move |b| b.send_text(pane_id, &payload));
        tokio::time::timeout(self.config.pane_timeout, write)
            .await
            .map_err(|_| MuxError::CommandFailed {
                backend: self.backend.name(),
                detail: format!(
                    "write to pane {pane_id} timed out after {}ms",
                    self.config.pane_timeout.as_millis()
                ),
            })?
    }

    /// Run a backend call on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T, MuxError>
    where
        F: FnOnce(&dyn PaneBackend) -> Result<T, MuxError> + Send + 'static,
        T: Send + 'static,
    {
        let backend = Arc::clone(&self.backend);
        let name = backend.name();
        tokio::task::spawn_blocking(move || f(backend.as_ref()))
            .await
            .map_err(|e| MuxError::Unavailable {
                backend: name,
                detail: format!("backend task failed: {e}"),
            })?
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use authmux_core::{PaneId, RecoveryPolicy, TextMatcher};
    use authmux_mux::{MuxError, Pane, PaneBackend};
    use chrono::TimeDelta;

    use super::{Coordinator, CoordinatorConfig};
    use crate::events::EventBus;

    /// In-memory multiplexer: panes with fixed text, recorded reads and
    /// writes, optional per-pane hangs.
    #[derive(Default)]
    pub(crate) struct FakeBackend {
        panes: Mutex<Vec<(Pane, String)>>,
        writes: Mutex<Vec<(PaneId, String)>>,
        reads: Mutex<Vec<PaneId>>,
        read_delay: Mutex<HashMap<PaneId, Duration>>,
        write_delay: Mutex<HashMap<PaneId, Duration>>,
        pub(crate) fail_writes: AtomicBool,
        pub(crate) fail_list: AtomicBool,
    }

    impl FakeBackend {
        pub(crate) fn set_pane(&self, id: PaneId, title: &str, text: &str) {
            let mut panes = self.panes.lock().expect("lock");
            panes.retain(|(p, _)| p.id != id);
            panes.push((
                Pane {
                    id,
                    title: title.to_string(),
                },
                text.to_string(),
            ));
        }

        pub(crate) fn remove_pane(&self, id: PaneId) {
            self.panes.lock().expect("lock").retain(|(p, _)| p.id != id);
        }

        pub(crate) fn writes(&self) -> Vec<(PaneId, String)> {
            self.writes.lock().expect("lock").clone()
        }

        pub(crate) fn writes_for(&self, id: PaneId) -> Vec<String> {
            self.writes()
                .into_iter()
                .filter(|(p, _)| *p == id)
                .map(|(_, w)| w)
                .collect()
        }

        pub(crate) fn set_fail_writes(&self, fail: bool) {
            self.fail_writes.store(fail, Ordering::SeqCst);
        }

        pub(crate) fn hang_reads(&self, id: PaneId, delay: Duration) {
            self.read_delay.lock().expect("lock").insert(id, delay);
        }

        pub(crate) fn hang_writes(&self, id: PaneId, delay: Duration) {
            self.write_delay.lock().expect("lock").insert(id, delay);
        }

        pub(crate) fn reads_of(&self, id: PaneId) -> usize {
            self.reads.lock().expect("lock").iter().filter(|&&p| p == id).count()
        }

        fn delay(map: &Mutex<HashMap<PaneId, Duration>>, id: PaneId) {
            let delay = map.lock().expect("lock").get(&id).copied();
            if let Some(delay) = delay {
                std::thread::sleep(delay);
            }
        }
    }

    pub(crate) const LIMITED: &str =
        "\u{1b}[1m✻ Claude Code\u{1b}[0m\n> refactor the parser\n\nYou've hit your limit · resets 2pm\n";
    pub(crate) const IDLE: &str = "$ cargo build\n   Compiling authmux v0.1.0\n";
    pub(crate) const URL: &str = "https://claude.ai/oauth/authorize?code=true&client_id=abc&state=s1";

    pub(crate) fn test_config() -> CoordinatorConfig {
        CoordinatorConfig {
            poll_interval: Duration::from_millis(5),
            settle: Duration::ZERO,
            policy: RecoveryPolicy {
                url_timeout_ticks: 3,
                debounce: TimeDelta::zero(),
                ..RecoveryPolicy::default()
            },
            ..CoordinatorConfig::default()
        }
    }

    pub(crate) fn coordinator(config: CoordinatorConfig) -> (Arc<Coordinator>, Arc<FakeBackend>) {
        let backend = Arc::new(FakeBackend::default());
        let coord = Coordinator::new(
            backend.clone(),
            TextMatcher::default(),
            config,
            EventBus::new(),
        );
        (Arc::new(coord), backend)
    }

    /// Drive pane 1 to an open auth request.
    pub(crate) async fn open_request(coord: &Coordinator, backend: &FakeBackend) {
        backend.set_pane(1, "claude", LIMITED);
        coord.tick().await.expect("tick");
        let with_url = format!(
            "{LIMITED}\nBrowser didn't open? Use the url below:\n\n{URL}\n\nPaste code here if prompted >"
        );
        backend.set_pane(1, "claude", &with_url);
        coord.tick().await.expect("tick");
    }

    impl PaneBackend for FakeBackend {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn list_panes(&self) -> Result<Vec<Pane>, MuxError> {
            if self.fail_list.load(Ordering::SeqCst) {
                return Err(MuxError::Unavailable {
                    backend: "fake",
                    detail: "down".to_string(),
                });
            }
            Ok(self
                .panes
                .lock()
                .expect("lock")
                .iter()
                .map(|(p, _)| p.clone())
                .collect())
        }

        fn get_text(&self, pane_id: PaneId, _lines: u32) -> Result<String, MuxError> {
            self.reads.lock().expect("lock").push(pane_id);
            Self::delay(&self.read_delay, pane_id);
            self.panes
                .lock()
                .expect("lock")
                .iter()
                .find(|(p, _)| p.id == pane_id)
                .map(|(_, t)| t.clone())
                .ok_or_else(|| MuxError::CommandFailed {
                    backend: "fake",
                    detail: format!("no pane {pane_id}"),
                })
        }

        fn send_text(&self, pane_id: PaneId, payload: &str) -> Result<(), MuxError> {
            Self::delay(&self.write_delay, pane_id);
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(MuxError::CommandFailed {
                    backend: "fake",
                    detail: "pane is dead".to_string(),
                });
            }
            self.writes
                .lock()
                .expect("lock")
                .push((pane_id, payload.to_string()));
            Ok(())
        }
    }
}
