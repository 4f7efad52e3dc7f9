//! WezTerm backend over `wezterm cli` (mux-aware: talks to the running mux
//! server, so panes in every window and domain are visible).

use authmux_core::PaneId;
use serde::Deserialize;

use crate::backend::{Pane, PaneBackend};
use crate::error::MuxError;
use crate::executor::{CommandRunner, ProcessRunner};

const BACKEND: &str = "wezterm";

/// One entry of `wezterm cli list --format json`. Fields beyond the id are
/// optional: the JSON shape varies between WezTerm releases.
#[derive(Debug, Deserialize)]
struct ListEntry {
    pane_id: PaneId,
    #[serde(default)]
    title: String,
}

pub struct WeztermBackend<R = ProcessRunner> {
    runner: R,
}

impl WeztermBackend<ProcessRunner> {
    pub fn from_path() -> Self {
        Self::with_runner(ProcessRunner::new(BACKEND, "wezterm").with_prefix(["cli"]))
    }
}

impl<R: CommandRunner> WeztermBackend<R> {
    pub fn with_runner(runner: R) -> Self {
        Self { runner }
    }
}

pub fn parse_list_output(output: &str) -> Result<Vec<Pane>, MuxError> {
    let entries: Vec<ListEntry> =
        serde_json::from_str(output).map_err(|e| MuxError::ParseError {
            backend: BACKEND,
            line_num: e.line(),
            detail: e.to_string(),
        })?;
    Ok(entries
        .into_iter()
        .map(|e| Pane {
            id: e.pane_id,
            title: e.title,
        })
        .collect())
}

/// Older `wezterm cli get-text` builds have no `--start-line`.
fn rejects_start_line(err: &MuxError) -> bool {
    match err {
        MuxError::CommandFailed { detail, .. } => {
            detail.contains("--start-line")
                || detail.contains("unexpected argument")
                || detail.contains("wasn't expected")
        }
        _ => false,
    }
}

fn last_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

impl<R: CommandRunner> PaneBackend for WeztermBackend<R> {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn list_panes(&self) -> Result<Vec<Pane>, MuxError> {
        let output = self
            .runner
            .run(&["list", "--format", "json"])
            .map_err(MuxError::into_unavailable)?;
        parse_list_output(&output)
    }

    fn get_text(&self, pane_id: PaneId, lines: u32) -> Result<String, MuxError> {
        let id = pane_id.to_string();
        let start_line = format!("-{lines}");
        match self
            .runner
            .run(&["get-text", "--pane-id", &id, "--start-line", &start_line])
        {
            Ok(text) => Ok(text),
            Err(e) if rejects_start_line(&e) => {
                tracing::debug!("wezterm get-text without --start-line (pane {pane_id})");
                let full = self.runner.run(&["get-text", "--pane-id", &id])?;
                Ok(last_lines(&full, lines as usize))
            }
            Err(e) => Err(e),
        }
    }

    fn send_text(&self, pane_id: PaneId, payload: &str) -> Result<(), MuxError> {
        let id = pane_id.to_string();
        // Raw-mode TUIs read CR as Enter.
        let keys = payload.replace('\n', "\r");
        self.runner
            .run(&["send-text", "--pane-id", &id, "--no-paste", "--", &keys])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Scripted {
        calls: Mutex<Vec<Vec<String>>>,
        respond: Box<dyn Fn(&[&str]) -> Result<String, MuxError> + Send + Sync>,
    }

    impl Scripted {
        fn new(respond: impl Fn(&[&str]) -> Result<String, MuxError> + Send + Sync + 'static) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                respond: Box::new(respond),
            }
        }
    }

    impl CommandRunner for Scripted {
        fn run(&self, args: &[&str]) -> Result<String, MuxError> {
            self.calls
                .lock()
                .expect("lock")
                .push(args.iter().map(|s| s.to_string()).collect());
            (self.respond)(args)
        }
    }

    #[test]
    fn parse_list_json() {
        let json = r#"[
            {"window_id":0,"tab_id":0,"pane_id":0,"workspace":"default","title":"zsh","cwd":"file:///home/u"},
            {"window_id":0,"tab_id":1,"pane_id":7,"title":"✳ Claude Code","size":{"rows":50,"cols":200}}
        ]"#;
        let panes = parse_list_output(json).expect("parse");
        assert_eq!(panes.len(), 2);
        assert_eq!(panes[1].id, 7);
        assert_eq!(panes[1].title, "✳ Claude Code");
    }

    #[test]
    fn parse_list_missing_title_defaults() {
        let panes = parse_list_output(r#"[{"pane_id":3}]"#).expect("parse");
        assert_eq!(panes[0].title, "");
    }

    #[test]
    fn parse_list_garbage_is_error() {
        assert!(parse_list_output("not json").is_err());
    }

    #[test]
    fn list_failure_is_unavailable() {
        let backend = WeztermBackend::with_runner(Scripted::new(|_| {
            Err(MuxError::CommandFailed {
                backend: BACKEND,
                detail: "exit code 1: failed to connect to mux".to_string(),
            })
        }));
        assert!(matches!(
            backend.list_panes(),
            Err(MuxError::Unavailable { backend: "wezterm", .. })
        ));
    }

    #[test]
    fn get_text_uses_start_line() {
        let backend = WeztermBackend::with_runner(Scripted::new(|_| Ok("tail\n".to_string())));
        assert_eq!(backend.get_text(9, 40).expect("text"), "tail\n");
        let calls = backend.runner.calls.lock().expect("lock");
        assert_eq!(calls[0], ["get-text", "--pane-id", "9", "--start-line", "-40"]);
    }

    #[test]
    fn get_text_falls_back_to_full_buffer() {
        let backend = WeztermBackend::with_runner(Scripted::new(|args| {
            if args.contains(&"--start-line") {
                Err(MuxError::CommandFailed {
                    backend: BACKEND,
                    detail: "exit code 2: error: unexpected argument '--start-line' found".to_string(),
                })
            } else {
                Ok("1\n2\n3\n4\n5\n".to_string())
            }
        }));
        assert_eq!(backend.get_text(1, 2).expect("text"), "4\n5");
        assert_eq!(backend.runner.calls.lock().expect("lock").len(), 2);
    }

    #[test]
    fn get_text_other_errors_propagate() {
        let backend = WeztermBackend::with_runner(Scripted::new(|_| {
            Err(MuxError::CommandFailed {
                backend: BACKEND,
                detail: "exit code 1: pane 4 not found".to_string(),
            })
        }));
        assert!(backend.get_text(4, 10).is_err());
        assert_eq!(backend.runner.calls.lock().expect("lock").len(), 1);
    }

    #[test]
    fn send_text_no_paste_with_carriage_returns() {
        let backend = WeztermBackend::with_runner(Scripted::new(|_| Ok(String::new())));
        backend.send_text(5, "/login\n").expect("send");
        let calls = backend.runner.calls.lock().expect("lock");
        assert_eq!(
            calls[0],
            ["send-text", "--pane-id", "5", "--no-paste", "--", "/login\r"]
        );
    }
}
