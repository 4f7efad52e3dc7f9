//! PaneBackend capability set and the backend factory.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use authmux_core::PaneId;
use serde::{Deserialize, Serialize};

use crate::error::MuxError;
use crate::tmux::TmuxBackend;
use crate::wezterm::WeztermBackend;

/// One terminal session inside the multiplexer. Refreshed every poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pane {
    pub id: PaneId,
    pub title: String,
}

/// Uniform list/read/write over a terminal multiplexer.
///
/// Calls run the multiplexer CLI synchronously; async callers wrap them in
/// `spawn_blocking`.
pub trait PaneBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fails with [`MuxError::Unavailable`] if the CLI is missing or exits
    /// non-zero.
    fn list_panes(&self) -> Result<Vec<Pane>, MuxError>;

    /// Recent scrollback: up to `lines` lines from the bottom of the pane.
    fn get_text(&self, pane_id: PaneId, lines: u32) -> Result<String, MuxError>;

    /// Deliver literal keystrokes without paste bracketing; `\n` acts as Enter.
    fn send_text(&self, pane_id: PaneId, payload: &str) -> Result<(), MuxError>;
}

impl<T: PaneBackend + ?Sized> PaneBackend for Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn list_panes(&self) -> Result<Vec<Pane>, MuxError> {
        (**self).list_panes()
    }

    fn get_text(&self, pane_id: PaneId, lines: u32) -> Result<String, MuxError> {
        (**self).get_text(pane_id, lines)
    }

    fn send_text(&self, pane_id: PaneId, payload: &str) -> Result<(), MuxError> {
        (**self).send_text(pane_id, payload)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendChoice {
    Wezterm,
    Tmux,
    #[default]
    Auto,
}

impl BackendChoice {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Wezterm => "wezterm",
            Self::Tmux => "tmux",
            Self::Auto => "auto",
        }
    }
}

impl fmt::Display for BackendChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wezterm" => Ok(Self::Wezterm),
            "tmux" => Ok(Self::Tmux),
            "auto" => Ok(Self::Auto),
            other => Err(format!("unknown backend: {other}")),
        }
    }
}

/// Pick a backend. Explicit choices are returned as-is; `Auto` probes the
/// mux-aware `preferred` backend first and falls back only if it is
/// unavailable.
pub fn select_backend(
    choice: BackendChoice,
    preferred: Arc<dyn PaneBackend>,
    fallback: Arc<dyn PaneBackend>,
) -> Result<Arc<dyn PaneBackend>, MuxError> {
    match choice {
        BackendChoice::Wezterm => Ok(preferred),
        BackendChoice::Tmux => Ok(fallback),
        BackendChoice::Auto => match preferred.list_panes() {
            Ok(_) => Ok(preferred),
            Err(first) => {
                tracing::debug!("{} probe failed: {first}", preferred.name());
                match fallback.list_panes() {
                    Ok(_) => Ok(fallback),
                    Err(second) => Err(MuxError::Unavailable {
                        backend: "auto",
                        detail: format!("{first}; {second}"),
                    }),
                }
            }
        },
    }
}

/// Options for building the real CLI-backed backends.
#[derive(Debug, Clone, Default)]
pub struct BackendOptions {
    pub tmux_socket_path: Option<String>,
    pub tmux_socket_name: Option<String>,
}

/// Build the real backends and select one.
pub fn open_backend(
    choice: BackendChoice,
    opts: &BackendOptions,
) -> Result<Arc<dyn PaneBackend>, MuxError> {
    let mut tmux = TmuxBackend::from_path();
    if let Some(ref path) = opts.tmux_socket_path {
        tmux = TmuxBackend::with_socket_path(path.clone());
    } else if let Some(ref name) = opts.tmux_socket_name {
        tmux = TmuxBackend::with_socket_name(name.clone());
    }
    select_backend(choice, Arc::new(WeztermBackend::from_path()), Arc::new(tmux))
}
