use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ParseError;

/// Multiplexer-assigned pane identifier. tmux `%N` ids are carried as `N`.
pub type PaneId = u64;

// ─── Tool ─────────────────────────────────────────────────────────

/// The coding-agent CLI a pane is running.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    #[default]
    Claude,
    Codex,
}

impl Tool {
    pub const ALL: [Self; 2] = [Self::Claude, Self::Codex];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tool {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claude" => Ok(Self::Claude),
            "codex" => Ok(Self::Codex),
            _ => Err(ParseError::UnknownTool(s.to_string())),
        }
    }
}

// ─── Auth requests ────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthRequestStatus {
    /// Published, no client has fetched it yet.
    #[default]
    Open,
    /// Handed out through the pending list; waiting for a code.
    AwaitingCode,
}

/// A discovered OAuth authorization need tied to one pane.
///
/// Owned by the coordinator. At most one exists per pane at any time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequest {
    pub pane_id: PaneId,
    pub tool: Tool,
    pub url: String,
    pub detected_at: DateTime<Utc>,
    /// Number of code submissions received for this request.
    pub attempts: u32,
    pub status: AuthRequestStatus,
}

impl AuthRequest {
    pub fn new(pane_id: PaneId, tool: Tool, url: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            pane_id,
            tool,
            url: url.into(),
            detected_at: now,
            attempts: 0,
            status: AuthRequestStatus::Open,
        }
    }

    /// True once `ttl` has elapsed since detection.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: chrono::TimeDelta) -> bool {
        now - self.detected_at >= ttl
    }
}

// ─── Failures ─────────────────────────────────────────────────────

/// Why a recovery cycle ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    BackendUnavailable,
    PaneRead,
    Injection,
    #[serde(rename = "oauth_url_timeout")]
    OAuthUrlTimeout,
    CodeSubmissionExpired,
    BrowserAutomation,
    /// The pane disappeared while a request was pending.
    PaneClosed,
    /// The agent could not deliver a code to the coordinator.
    Submission,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BackendUnavailable => "backend_unavailable",
            Self::PaneRead => "pane_read",
            Self::Injection => "injection",
            Self::OAuthUrlTimeout => "oauth_url_timeout",
            Self::CodeSubmissionExpired => "code_submission_expired",
            Self::BrowserAutomation => "browser_automation",
            Self::PaneClosed => "pane_closed",
            Self::Submission => "submission",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .expect("valid")
            .with_timezone(&Utc)
    }

    #[test]
    fn tool_round_trips_through_str() {
        for tool in Tool::ALL {
            assert_eq!(tool.as_str().parse::<Tool>().expect("parse"), tool);
        }
        assert_eq!(" Claude ".parse::<Tool>().expect("parse"), Tool::Claude);
        assert!("gemini".parse::<Tool>().is_err());
    }

    #[test]
    fn auth_request_serializes_snake_case() {
        let req = AuthRequest::new(3, Tool::Claude, "https://x", ts("2026-10-19T12:00:00Z"));
        let json = serde_json::to_value(&req).expect("serialize");
        assert_eq!(json["pane_id"], 3);
        assert_eq!(json["tool"], "claude");
        assert_eq!(json["status"], "open");
        assert_eq!(json["attempts"], 0);
        assert_eq!(json["detected_at"], "2026-10-19T12:00:00Z");
    }

    #[test]
    fn auth_request_expiry_boundary() {
        let t0 = ts("2026-10-19T12:00:00Z");
        let req = AuthRequest::new(1, Tool::Claude, "u", t0);
        let ttl = TimeDelta::seconds(600);
        assert!(!req.is_expired(t0 + TimeDelta::seconds(599), ttl));
        assert!(req.is_expired(t0 + TimeDelta::seconds(600), ttl));
    }

    #[test]
    fn failure_kind_display() {
        assert_eq!(FailureKind::OAuthUrlTimeout.to_string(), "oauth_url_timeout");
        let json = serde_json::to_value(FailureKind::CodeSubmissionExpired).expect("ser");
        assert_eq!(json, "code_submission_expired");
    }
}
