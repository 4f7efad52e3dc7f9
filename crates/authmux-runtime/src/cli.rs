//! CLI definition using clap derive.

use std::net::IpAddr;
use std::path::PathBuf;

use authmux_core::{Strategy, Tool};
use authmux_mux::{BackendChoice, BackendOptions};
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "authmux",
    version,
    about = "Recover AI coding-agent CLIs from rate-limit logouts inside tmux/WezTerm"
)]
pub struct Cli {
    /// Debug-level logs (pane-scan traces, secrets redacted)
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Watch panes and drive OAuth recovery (poll loop + HTTP API)
    Coordinator(CoordinatorOpts),
    /// Complete pending OAuth requests in a local browser
    Agent(AgentOpts),
    /// Classify every pane once and print the result; never writes
    Scan(ScanOpts),
    /// Print a coordinator's status
    Status(StatusOpts),
}

#[derive(Args, Clone)]
pub struct BackendArgs {
    /// Multiplexer backend
    #[arg(long, default_value = "auto", env = "AUTHMUX_BACKEND")]
    pub backend: BackendChoice,

    /// tmux server socket path (-S)
    #[arg(long, env = "AUTHMUX_TMUX_SOCKET")]
    pub tmux_socket: Option<String>,

    /// tmux server socket name (-L)
    #[arg(long, env = "AUTHMUX_TMUX_SOCKET_NAME")]
    pub tmux_socket_name: Option<String>,
}

impl BackendArgs {
    pub fn options(&self) -> BackendOptions {
        BackendOptions {
            tmux_socket_path: self.tmux_socket.clone(),
            tmux_socket_name: self.tmux_socket_name.clone(),
        }
    }
}

#[derive(Args, Clone)]
pub struct MatchArgs {
    /// Tool assumed for panes whose tool cannot be inferred
    #[arg(long, default_value = "claude", env = "AUTHMUX_TOOL")]
    pub tool: Tool,

    /// Override pattern (regex); when set it alone decides a detection
    #[arg(long = "match", env = "AUTHMUX_MATCH")]
    pub match_pattern: Option<String>,

    /// Scrollback lines read per pane
    #[arg(long, default_value = "80")]
    pub capture_lines: u32,
}

#[derive(Args)]
pub struct CoordinatorOpts {
    /// API port
    #[arg(long, default_value = "7890", env = "AUTHMUX_PORT")]
    pub port: u16,

    /// API bind address
    #[arg(long, default_value = "127.0.0.1", env = "AUTHMUX_BIND")]
    pub bind: IpAddr,

    /// Poll interval in milliseconds
    #[arg(long, default_value = "500")]
    pub poll_interval_ms: u64,

    #[command(flatten)]
    pub backend: BackendArgs,

    #[command(flatten)]
    pub matching: MatchArgs,

    /// Prompt injected after the code to resume the session
    #[arg(long, default_value = "continue", env = "AUTHMUX_RESUME_PROMPT")]
    pub resume_prompt: String,

    /// Keys sent after /login ("enter", "none", or literal text)
    #[arg(long, default_value = "enter")]
    pub login_select: String,

    /// Seconds a pending auth request stays valid
    #[arg(long, default_value = "600")]
    pub auth_ttl_secs: u64,

    /// Delay between code injection and resume prompt (ms)
    #[arg(long, default_value = "1500")]
    pub settle_ms: u64,

    /// Ticks to wait for the OAuth URL after /login
    #[arg(long, default_value = "40")]
    pub url_timeout_ticks: u32,

    /// Seconds after a finished cycle before a new detection counts
    #[arg(long, default_value = "30")]
    pub rearm_secs: u64,

    /// Minimum gap between classifications of one pane (ms)
    #[arg(long, default_value = "200")]
    pub debounce_ms: u64,

    /// Per-pane read timeout (ms)
    #[arg(long, default_value = "5000")]
    pub pane_timeout_ms: u64,

    /// Seconds to drain in-flight API requests on shutdown
    #[arg(long, default_value = "10")]
    pub drain_timeout_secs: u64,

    /// Detect and report only; never write to a pane
    #[arg(long)]
    pub dry_run: bool,

    /// Shell command run per event (AUTHMUX_EVENT, AUTHMUX_PANE_ID, AUTHMUX_DETAIL)
    #[arg(long, env = "AUTHMUX_NOTIFY_CMD")]
    pub notify_cmd: Option<String>,
}

#[derive(Args)]
pub struct AgentOpts {
    /// Local status API port
    #[arg(long, default_value = "7891", env = "AUTHMUX_AGENT_PORT")]
    pub port: u16,

    /// Coordinator base URL(s), comma-separated
    #[arg(
        long,
        default_value = "http://localhost:7890",
        value_delimiter = ',',
        env = "AUTHMUX_COORDINATOR"
    )]
    pub coordinator: Vec<String>,

    /// Browser-authenticated accounts, comma-separated
    #[arg(long, required = true, value_delimiter = ',', env = "AUTHMUX_ACCOUNTS")]
    pub accounts: Vec<String>,

    /// Account rotation strategy: lru, round_robin, random
    #[arg(long, default_value = "lru", env = "AUTHMUX_STRATEGY")]
    pub strategy: Strategy,

    /// Browser profiles root; one sub-directory per account
    #[arg(long, env = "AUTHMUX_PROFILE_DIR")]
    pub profile_dir: Option<PathBuf>,

    /// Chromium-family browser binary
    #[arg(long, default_value = "chromium", env = "AUTHMUX_BROWSER")]
    pub browser_bin: String,

    /// Run the browser headless
    #[arg(long)]
    pub headless: bool,

    /// Poll interval in milliseconds
    #[arg(long, default_value = "2000")]
    pub poll_interval_ms: u64,

    /// Seconds allowed for one OAuth flow
    #[arg(long, default_value = "90")]
    pub oauth_timeout_secs: u64,

    /// Shell command run per event
    #[arg(long, env = "AUTHMUX_NOTIFY_CMD")]
    pub notify_cmd: Option<String>,
}

impl AgentOpts {
    pub fn profile_root(&self) -> PathBuf {
        if let Some(ref dir) = self.profile_dir {
            return dir.clone();
        }
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
            .unwrap_or_else(std::env::temp_dir);
        base.join("authmux").join("profiles")
    }
}

#[derive(Args)]
pub struct ScanOpts {
    #[command(flatten)]
    pub backend: BackendArgs,

    #[command(flatten)]
    pub matching: MatchArgs,
}

#[derive(Args)]
pub struct StatusOpts {
    /// Coordinator base URL
    #[arg(long, default_value = "http://localhost:7890", env = "AUTHMUX_COORDINATOR")]
    pub coordinator: String,

    /// Print raw JSON
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn coordinator_defaults() {
        let cli = Cli::try_parse_from(["authmux", "coordinator"]).expect("parse");
        let Command::Coordinator(opts) = cli.command else {
            panic!("expected coordinator");
        };
        assert_eq!(opts.port, 7890);
        assert_eq!(opts.poll_interval_ms, 500);
        assert_eq!(opts.backend.backend, BackendChoice::Auto);
        assert_eq!(opts.resume_prompt, "continue");
        assert_eq!(opts.matching.tool, Tool::Claude);
        assert!(!opts.dry_run);
    }

    #[test]
    fn agent_requires_accounts() {
        assert!(Cli::try_parse_from(["authmux", "agent"]).is_err());
        let cli = Cli::try_parse_from([
            "authmux",
            "agent",
            "--accounts",
            "a@example.com,b@example.com",
            "--strategy",
            "round-robin",
        ])
        .expect("parse");
        let Command::Agent(opts) = cli.command else {
            panic!("expected agent");
        };
        assert_eq!(opts.accounts, ["a@example.com", "b@example.com"]);
        assert_eq!(opts.strategy, Strategy::RoundRobin);
        assert_eq!(opts.port, 7891);
        assert_eq!(opts.coordinator, ["http://localhost:7890"]);
    }

    #[test]
    fn backend_choice_parses() {
        let cli = Cli::try_parse_from(["authmux", "scan", "--backend", "tmux"]).expect("parse");
        let Command::Scan(opts) = cli.command else {
            panic!("expected scan");
        };
        assert_eq!(opts.backend.backend, BackendChoice::Tmux);
        assert!(Cli::try_parse_from(["authmux", "scan", "--backend", "screen"]).is_err());
    }
}
