//! authmux-mux: terminal multiplexer IO boundary.
//! Lists panes, reads scrollback and injects keystrokes through the tmux or
//! WezTerm CLI. No business logic.

pub mod backend;
pub mod error;
pub mod executor;
pub mod tmux;
pub mod wezterm;

pub use backend::{BackendChoice, BackendOptions, Pane, PaneBackend, open_backend, select_backend};
pub use error::MuxError;
pub use executor::{CommandRunner, ProcessRunner};
pub use tmux::TmuxBackend;
pub use wezterm::WeztermBackend;
