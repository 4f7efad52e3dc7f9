//! tmux backend: `list-panes`, `capture-pane`, `send-keys`.

use authmux_core::PaneId;

use crate::backend::{Pane, PaneBackend};
use crate::error::MuxError;
use crate::executor::{CommandRunner, ProcessRunner};

const BACKEND: &str = "tmux";

/// Tab-delimited format string for `tmux list-panes -a -F`.
pub const LIST_PANES_FORMAT: &str = "#{pane_id}\t#{pane_title}";

pub struct TmuxBackend<R = ProcessRunner> {
    runner: R,
}

impl TmuxBackend<ProcessRunner> {
    pub fn from_path() -> Self {
        Self::with_runner(ProcessRunner::new(BACKEND, "tmux"))
    }

    /// Target a specific server socket (`-S`). Takes precedence over a name.
    pub fn with_socket_path(path: impl Into<String>) -> Self {
        Self::with_runner(ProcessRunner::new(BACKEND, "tmux").with_prefix(["-S".to_string(), path.into()]))
    }

    /// Target a named server socket (`-L`).
    pub fn with_socket_name(name: impl Into<String>) -> Self {
        Self::with_runner(ProcessRunner::new(BACKEND, "tmux").with_prefix(["-L".to_string(), name.into()]))
    }
}

impl<R: CommandRunner> TmuxBackend<R> {
    pub fn with_runner(runner: R) -> Self {
        Self { runner }
    }
}

/// `%12` → `12`.
pub fn parse_pane_id(raw: &str) -> Option<PaneId> {
    raw.trim().strip_prefix('%')?.parse().ok()
}

pub fn pane_target(pane_id: PaneId) -> String {
    format!("%{pane_id}")
}

/// Parse the raw output of `tmux list-panes -a -F <FORMAT>`.
pub fn parse_list_panes_output(output: &str) -> Result<Vec<Pane>, MuxError> {
    let mut panes = Vec::new();
    for (idx, line) in output.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let (id, title) = line.split_once('\t').unwrap_or((line, ""));
        let id = parse_pane_id(id).ok_or_else(|| MuxError::ParseError {
            backend: BACKEND,
            line_num: idx + 1,
            detail: format!("invalid pane id {id:?}"),
        })?;
        panes.push(Pane {
            id,
            title: title.to_string(),
        });
    }
    Ok(panes)
}

impl<R: CommandRunner> PaneBackend for TmuxBackend<R> {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn list_panes(&self) -> Result<Vec<Pane>, MuxError> {
        let output = self
            .runner
            .run(&["list-panes", "-a", "-F", LIST_PANES_FORMAT])
            .map_err(MuxError::into_unavailable)?;
        parse_list_panes_output(&output)
    }

    fn get_text(&self, pane_id: PaneId, lines: u32) -> Result<String, MuxError> {
        let start_line = format!("-{lines}");
        let target = pane_target(pane_id);
        // -J joins soft-wrapped lines; hard wraps still show as newlines.
        self.runner
            .run(&["capture-pane", "-p", "-J", "-S", &start_line, "-t", &target])
    }

    fn send_text(&self, pane_id: PaneId, payload: &str) -> Result<(), MuxError> {
        let target = pane_target(pane_id);
        let segments: Vec<&str> = payload.split('\n').collect();
        let last = segments.len() - 1;
        for (i, segment) in segments.iter().enumerate() {
            if !segment.is_empty() {
                self.runner
                    .run(&["send-keys", "-t", &target, "-l", "--", segment])?;
            }
            if i < last {
                self.runner.run(&["send-keys", "-t", &target, "Enter"])?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<Vec<String>>>,
        reply: String,
        fail: bool,
    }

    impl CommandRunner for Recorder {
        fn run(&self, args: &[&str]) -> Result<String, MuxError> {
            self.calls
                .lock()
                .expect("lock")
                .push(args.iter().map(|s| s.to_string()).collect());
            if self.fail {
                return Err(MuxError::CommandFailed {
                    backend: BACKEND,
                    detail: "exit code 1: no server running".to_string(),
                });
            }
            Ok(self.reply.clone())
        }
    }

    fn recorder(reply: &str) -> Recorder {
        Recorder {
            reply: reply.to_string(),
            ..Recorder::default()
        }
    }

    #[test]
    fn parse_pane_ids() {
        assert_eq!(parse_pane_id("%0"), Some(0));
        assert_eq!(parse_pane_id(" %42 "), Some(42));
        assert_eq!(parse_pane_id("42"), None);
        assert_eq!(parse_pane_id("%x"), None);
        assert_eq!(pane_target(7), "%7");
    }

    #[test]
    fn parse_list_output() {
        let panes = parse_list_panes_output("%0\tzsh\n%3\tClaude Code — repo\n\n").expect("parse");
        assert_eq!(panes.len(), 2);
        assert_eq!(panes[1].id, 3);
        assert_eq!(panes[1].title, "Claude Code — repo");
    }

    #[test]
    fn parse_list_output_without_title() {
        let panes = parse_list_panes_output("%5").expect("parse");
        assert_eq!(panes[0].id, 5);
        assert!(panes[0].title.is_empty());
    }

    #[test]
    fn parse_list_output_rejects_bad_id() {
        let err = parse_list_panes_output("%0\tok\nbogus\ttitle").expect_err("bad id");
        assert!(matches!(err, MuxError::ParseError { line_num: 2, .. }));
    }

    #[test]
    fn list_failure_is_unavailable() {
        let backend = TmuxBackend::with_runner(Recorder {
            fail: true,
            ..Recorder::default()
        });
        let err = backend.list_panes().expect_err("must fail");
        assert!(matches!(err, MuxError::Unavailable { backend: "tmux", .. }));
    }

    #[test]
    fn get_text_limits_lines() {
        let backend = TmuxBackend::with_runner(recorder("line 1\nline 2\n"));
        let text = backend.get_text(4, 80).expect("capture");
        assert_eq!(text, "line 1\nline 2\n");
        let calls = backend.runner.calls.lock().expect("lock");
        assert_eq!(
            calls[0],
            ["capture-pane", "-p", "-J", "-S", "-80", "-t", "%4"]
        );
    }

    #[test]
    fn send_text_turns_newlines_into_enter() {
        let backend = TmuxBackend::with_runner(recorder(""));
        backend.send_text(2, "/login\n").expect("send");
        let calls = backend.runner.calls.lock().expect("lock");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], ["send-keys", "-t", "%2", "-l", "--", "/login"]);
        assert_eq!(calls[1], ["send-keys", "-t", "%2", "Enter"]);
    }

    #[test]
    fn send_text_without_newline_sends_literal_only() {
        let backend = TmuxBackend::with_runner(recorder(""));
        backend.send_text(2, "-dash first").expect("send");
        let calls = backend.runner.calls.lock().expect("lock");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0][5], "-dash first");
    }

    #[test]
    fn send_text_multiple_lines() {
        let backend = TmuxBackend::with_runner(recorder(""));
        backend.send_text(1, "a\n\nb").expect("send");
        let calls = backend.runner.calls.lock().expect("lock");
        let keys: Vec<&str> = calls.iter().map(|c| c.last().map(String::as_str).unwrap_or("")).collect();
        assert_eq!(keys, ["a", "Enter", "Enter", "b"]);
    }
}
