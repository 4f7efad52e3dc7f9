//! Per-pane OAuth recovery state machine.
//!
//! ```text
//! Idle → RateLimitDetected → LoginInjected → AwaitingOAuthUrl
//!      → AuthRequestOpen → AwaitingCode → CodeInjected → Resumed
//!                 (any non-terminal) → Failed
//! ```
//!
//! Phases only move forward within one detection cycle. `Resumed` and
//! `Failed` are terminal for the cycle; a fresh rate-limit detection (after
//! the re-arm delay) resets the pane to `Idle` and starts the next cycle.
//!
//! Pure, no IO: the coordinator feeds observations in and performs the
//! injections the returned [`Decision`] asks for.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TransitionError;
use crate::text::{Classification, extract_oauth_urls};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPhase {
    #[default]
    Idle,
    RateLimitDetected,
    LoginInjected,
    #[serde(rename = "awaiting_oauth_url")]
    AwaitingOAuthUrl,
    AuthRequestOpen,
    AwaitingCode,
    CodeInjected,
    Resumed,
    Failed,
}

impl RecoveryPhase {
    fn rank(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::RateLimitDetected => 1,
            Self::LoginInjected => 2,
            Self::AwaitingOAuthUrl => 3,
            Self::AuthRequestOpen => 4,
            Self::AwaitingCode => 5,
            Self::CodeInjected => 6,
            Self::Resumed => 7,
            Self::Failed => 8,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Resumed | Self::Failed)
    }

    /// Idle or terminal: the pane is watched for a new detection.
    pub fn is_watching(self) -> bool {
        self == Self::Idle || self.is_terminal()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::RateLimitDetected => "rate_limit_detected",
            Self::LoginInjected => "login_injected",
            Self::AwaitingOAuthUrl => "awaiting_oauth_url",
            Self::AuthRequestOpen => "auth_request_open",
            Self::AwaitingCode => "awaiting_code",
            Self::CodeInjected => "code_injected",
            Self::Resumed => "resumed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RecoveryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tunables for [`PaneRecovery::observe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryPolicy {
    /// Ticks spent in `AwaitingOAuthUrl` before giving up.
    pub url_timeout_ticks: u32,
    /// Minimum time in a terminal phase before a new cycle may start.
    pub rearm_after: TimeDelta,
    /// Changed text is not re-classified more often than this.
    pub debounce: TimeDelta,
    /// Report detections without starting a cycle.
    pub dry_run: bool,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            url_timeout_ticks: 40,
            rearm_after: TimeDelta::seconds(30),
            debounce: TimeDelta::milliseconds(200),
            dry_run: false,
        }
    }
}

/// What the coordinator must do after an observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Text unchanged (or inside the debounce window); nothing evaluated.
    Debounced,
    NoAction,
    /// Dry run: a detection happened, the phase did not move.
    Detected { classification: Classification },
    /// A new cycle started (`RateLimitDetected`); inject `/login`.
    StartCycle { classification: Classification },
    /// First OAuth URL of this cycle (`AuthRequestOpen`); publish a request.
    UrlFound { url: String },
    /// No URL within the tick budget (`Failed`).
    UrlTimeout,
}

/// Recovery bookkeeping for one pane.
#[derive(Debug, Clone)]
pub struct PaneRecovery {
    phase: RecoveryPhase,
    fingerprint: Option<u64>,
    classified_at: Option<DateTime<Utc>>,
    last_transition: DateTime<Utc>,
    cycle: u64,
    url_wait_ticks: u32,
    stale_urls: Vec<String>,
}

impl PaneRecovery {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            phase: RecoveryPhase::Idle,
            fingerprint: None,
            classified_at: None,
            last_transition: now,
            cycle: 0,
            url_wait_ticks: 0,
            stale_urls: Vec::new(),
        }
    }

    pub fn phase(&self) -> RecoveryPhase {
        self.phase
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn last_transition(&self) -> DateTime<Utc> {
        self.last_transition
    }

    /// Move forward within the current cycle. `Failed` is reachable from any
    /// non-terminal phase; nothing leaves a terminal phase except [`Self::restart`].
    pub fn advance(&mut self, to: RecoveryPhase, now: DateTime<Utc>) -> Result<(), TransitionError> {
        let from = self.phase;
        let legal = if from.is_terminal() {
            false
        } else if to == RecoveryPhase::Failed {
            true
        } else {
            to.rank() > from.rank()
        };
        if !legal {
            return Err(TransitionError { from, to });
        }
        self.phase = to;
        self.last_transition = now;
        Ok(())
    }

    /// Mark the cycle failed. Returns `false` if already terminal.
    pub fn fail(&mut self, now: DateTime<Utc>) -> bool {
        self.advance(RecoveryPhase::Failed, now).is_ok()
    }

    fn restart(&mut self, now: DateTime<Utc>) {
        self.phase = RecoveryPhase::Idle;
        self.last_transition = now;
        self.cycle += 1;
        self.url_wait_ticks = 0;
        self.stale_urls.clear();
    }

    fn can_start_cycle(&self, now: DateTime<Utc>, policy: &RecoveryPolicy) -> bool {
        match self.phase {
            RecoveryPhase::Idle => true,
            p if p.is_terminal() => now - self.last_transition >= policy.rearm_after,
            _ => false,
        }
    }

    /// Feed one tick's normalized pane text.
    ///
    /// `classify` is only invoked when the pane is watching for a detection
    /// and the text changed since the last evaluation.
    pub fn observe(
        &mut self,
        cleaned: &str,
        now: DateTime<Utc>,
        policy: &RecoveryPolicy,
        classify: impl FnOnce(&str) -> Classification,
    ) -> Decision {
        // The URL budget counts ticks, changed text or not.
        if self.phase == RecoveryPhase::AwaitingOAuthUrl {
            self.url_wait_ticks += 1;
        }

        let fingerprint = fingerprint(cleaned);
        let unchanged = self.fingerprint == Some(fingerprint);
        let too_soon = self
            .classified_at
            .is_some_and(|at| now - at < policy.debounce);

        if unchanged || too_soon {
            return self.check_url_timeout(now, policy).unwrap_or(Decision::Debounced);
        }
        self.fingerprint = Some(fingerprint);
        self.classified_at = Some(now);

        match self.phase {
            p if p.is_watching() => {
                let classification = classify(cleaned);
                if !classification.is_actionable() || !self.can_start_cycle(now, policy) {
                    return Decision::NoAction;
                }
                if policy.dry_run {
                    return Decision::Detected { classification };
                }
                if self.phase != RecoveryPhase::Idle {
                    self.restart(now);
                }
                self.stale_urls = extract_oauth_urls(cleaned);
                self.phase = RecoveryPhase::RateLimitDetected;
                self.last_transition = now;
                Decision::StartCycle { classification }
            }
            RecoveryPhase::AwaitingOAuthUrl => {
                let fresh = extract_oauth_urls(cleaned)
                    .into_iter()
                    .find(|u| !self.stale_urls.contains(u));
                match fresh {
                    Some(url) => {
                        self.phase = RecoveryPhase::AuthRequestOpen;
                        self.last_transition = now;
                        Decision::UrlFound { url }
                    }
                    None => self.check_url_timeout(now, policy).unwrap_or(Decision::NoAction),
                }
            }
            _ => Decision::NoAction,
        }
    }

    fn check_url_timeout(&mut self, now: DateTime<Utc>, policy: &RecoveryPolicy) -> Option<Decision> {
        if self.phase == RecoveryPhase::AwaitingOAuthUrl && self.url_wait_ticks >= policy.url_timeout_ticks {
            self.fail(now);
            return Some(Decision::UrlTimeout);
        }
        None
    }

    /// Record the outcome of the `/login` injection.
    ///
    /// Success moves optimistically through `LoginInjected` to
    /// `AwaitingOAuthUrl`; failure ends the cycle.
    pub fn login_injected(&mut self, ok: bool, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if !ok {
            self.advance(RecoveryPhase::Failed, now)?;
            return Ok(());
        }
        self.advance(RecoveryPhase::LoginInjected, now)?;
        self.advance(RecoveryPhase::AwaitingOAuthUrl, now)?;
        self.url_wait_ticks = 0;
        // Re-extract on the next tick even if the text has not moved yet.
        self.fingerprint = None;
        self.classified_at = None;
        Ok(())
    }
}

/// Content fingerprint used for the unchanged-text debounce.
pub fn fingerprint(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}
