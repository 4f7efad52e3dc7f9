//! Long-running modes: coordinator and agent.

use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use authmux_core::{AccountPool, RecoveryPolicy, TextMatcher};
use authmux_mux::{MuxError, open_backend};
use chrono::TimeDelta;
use regex::Regex;
use tokio::net::TcpListener;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use crate::agent::browser::{ChromeConfig, ChromeDriver};
use crate::agent::client::CoordinatorClient;
use crate::agent::{self, Agent};
use crate::api;
use crate::cli::{AgentOpts, CoordinatorOpts, MatchArgs};
use crate::coordinator::{Coordinator, CoordinatorConfig};
use crate::events::{self, EventBus};

const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);
const CONSENT_POLL: Duration = Duration::from_millis(500);

/// Resolves on ctrl-c or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("ctrl-c handler unavailable: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("SIGTERM handler unavailable: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
        () = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}

pub fn build_matcher(args: &MatchArgs) -> anyhow::Result<TextMatcher> {
    let matcher = TextMatcher::default();
    match args.match_pattern {
        Some(ref pattern) => {
            let re = Regex::new(pattern).with_context(|| format!("invalid --match pattern {pattern:?}"))?;
            Ok(matcher.with_override(re))
        }
        None => Ok(matcher),
    }
}

/// `enter` sends Enter, `none` (or empty) sends nothing, anything else is
/// sent verbatim.
pub fn login_keys(raw: &str) -> Option<String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "none" => None,
        "enter" => Some("\n".to_string()),
        _ => Some(raw.to_string()),
    }
}

fn delta(d: Duration) -> TimeDelta {
    TimeDelta::from_std(d).unwrap_or(TimeDelta::MAX)
}

pub fn coordinator_config(opts: &CoordinatorOpts) -> CoordinatorConfig {
    let poll_ms = opts.poll_interval_ms.max(1);
    // Debounce must stay below the poll interval or changed text is never re-read.
    let debounce_ms = opts.debounce_ms.min(poll_ms - 1);
    if debounce_ms != opts.debounce_ms {
        tracing::debug!(
            requested = opts.debounce_ms,
            effective = debounce_ms,
            "debounce clamped below poll interval"
        );
    }
    CoordinatorConfig {
        poll_interval: Duration::from_millis(poll_ms),
        resume_prompt: opts.resume_prompt.clone(),
        default_tool: opts.matching.tool,
        login_select: login_keys(&opts.login_select),
        auth_ttl: delta(Duration::from_secs(opts.auth_ttl_secs)),
        settle: Duration::from_millis(opts.settle_ms),
        capture_lines: opts.matching.capture_lines,
        pane_timeout: Duration::from_millis(opts.pane_timeout_ms),
        policy: RecoveryPolicy {
            url_timeout_ticks: opts.url_timeout_ticks.max(1),
            rearm_after: delta(Duration::from_secs(opts.rearm_secs)),
            debounce: delta(Duration::from_millis(debounce_ms)),
            dry_run: opts.dry_run,
        },
    }
}

fn spawn_subscribers(bus: &EventBus, notify_cmd: Option<String>, cancel: &CancellationToken) {
    events::spawn_printer(bus, cancel.clone());
    if let Some(cmd) = notify_cmd {
        events::spawn_notify_hook(bus, cmd, cancel.clone());
    }
}

pub async fn run_coordinator(opts: CoordinatorOpts) -> anyhow::Result<()> {
    let backend = open_backend(opts.backend.backend, &opts.backend.options())?;
    let matcher = build_matcher(&opts.matching)?;
    let config = coordinator_config(&opts);

    let dry_run = config.policy.dry_run;
    let coordinator = Arc::new(Coordinator::new(backend, matcher, config, EventBus::new()));
    let subscribers = CancellationToken::new();
    spawn_subscribers(coordinator.events(), opts.notify_cmd.clone(), &subscribers);

    let addr = SocketAddr::new(opts.bind, opts.port);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    if !addr.ip().is_loopback() {
        tracing::warn!(%addr, "API bound to a non-loopback address; it is unauthenticated");
    }
    tracing::info!(%addr, dry_run, "coordinator listening");

    let drain = Duration::from_secs(opts.drain_timeout_secs);
    let result = serve_coordinator(coordinator, listener, drain, shutdown_signal()).await;
    subscribers.cancel();
    result
}

fn joined(r: Result<Result<(), MuxError>, JoinError>) -> anyhow::Result<()> {
    r.context("poll loop panicked")??;
    Ok(())
}

/// Run the poll loop and the API until `shutdown` resolves or the loop
/// gives up. Shutdown drains the API (bounded by `drain`), then stops the
/// poll loop.
pub async fn serve_coordinator(
    coordinator: Arc<Coordinator>,
    listener: TcpListener,
    drain: Duration,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    let api_stop = CancellationToken::new();
    let app = api::router(Arc::clone(&coordinator));
    let mut api = tokio::spawn({
        let stop = api_stop.clone();
        async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { stop.cancelled().await })
                .await
        }
    });
    let mut poll = tokio::spawn({
        let coordinator = Arc::clone(&coordinator);
        async move { coordinator.run().await }
    });

    let mut api_done = false;
    let mut poll_done = None;
    tokio::select! {
        () = shutdown => {}
        r = &mut poll => {
            tracing::error!("poll loop exited");
            poll_done = Some(joined(r));
        }
        r = &mut api => {
            api_done = true;
            tracing::error!("API server exited unexpectedly: {r:?}");
        }
    }

    api_stop.cancel();
    if !api_done {
        match tokio::time::timeout(drain, &mut api).await {
            Ok(Ok(Ok(()))) => tracing::debug!("API drained"),
            Ok(Ok(Err(e))) => tracing::warn!("API server error during drain: {e}"),
            Ok(Err(e)) => tracing::warn!("API server task failed: {e}"),
            Err(_) => {
                tracing::warn!("API drain exceeded {drain:?}; aborting open requests");
                api.abort();
            }
        }
    }

    coordinator.stop();
    let result = match poll_done {
        Some(r) => r,
        None => joined(poll.await),
    };
    tracing::info!("coordinator stopped");
    result
}

/// Browser profiles live one directory per account under this root.
fn prepare_profile_root(root: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(root).with_context(|| format!("failed to create {}", root.display()))
}

fn account_pool(opts: &AgentOpts) -> anyhow::Result<AccountPool> {
    let pool = AccountPool::new(&opts.accounts, opts.strategy);
    if pool.is_empty() {
        anyhow::bail!("--accounts must name at least one account");
    }
    Ok(pool)
}

pub async fn run_agent(opts: AgentOpts) -> anyhow::Result<()> {
    let pool = account_pool(&opts)?;

    let clients = opts
        .coordinator
        .iter()
        .map(|base| CoordinatorClient::new(base, CLIENT_TIMEOUT))
        .collect::<Result<Vec<_>, _>>()?;

    let profile_root = opts.profile_root();
    prepare_profile_root(&profile_root)?;
    let driver = Arc::new(ChromeDriver::new(ChromeConfig {
        browser_bin: opts.browser_bin.clone(),
        profile_root,
        headless: opts.headless,
        timeout: Duration::from_secs(opts.oauth_timeout_secs),
        poll: CONSENT_POLL,
    }));

    let events = EventBus::new();
    let subscribers = CancellationToken::new();
    spawn_subscribers(&events, opts.notify_cmd.clone(), &subscribers);

    let agent = Arc::new(Agent::new(
        clients,
        pool,
        driver,
        Duration::from_millis(opts.poll_interval_ms.max(1)),
        events,
    ));

    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, opts.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, strategy = opts.strategy.as_str(), "agent listening");

    let api_stop = CancellationToken::new();
    let api = tokio::spawn({
        let app = agent::server::router(Arc::clone(&agent));
        let stop = api_stop.clone();
        async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { stop.cancelled().await })
                .await
        }
    });
    let runner = tokio::spawn({
        let agent = Arc::clone(&agent);
        async move { agent.run().await }
    });

    shutdown_signal().await;
    agent.stop();
    api_stop.cancel();
    if let Err(e) = runner.await {
        tracing::warn!("agent task failed: {e}");
    }
    match api.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!("agent API error: {e}"),
        Err(e) => tracing::warn!("agent API task failed: {e}"),
    }
    subscribers.cancel();
    Ok(())
}
