//! `authmux scan`: classify every pane once. Read-only.

use authmux_core::{MatchTag, PaneId, TextMatcher, Tool, extract_oauth_urls, normalize};
use authmux_mux::{MuxError, PaneBackend, open_backend};

use crate::cli::ScanOpts;
use crate::daemon::build_matcher;
use crate::redact;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRow {
    pub pane_id: PaneId,
    pub title: String,
    pub tool: Tool,
    pub tag: MatchTag,
    pub actionable: bool,
    pub urls: Vec<String>,
    /// Set when the pane could not be read; the other fields are then defaults.
    pub error: Option<String>,
}

pub fn scan(
    backend: &dyn PaneBackend,
    matcher: &TextMatcher,
    default_tool: Tool,
    lines: u32,
) -> Result<Vec<ScanRow>, MuxError> {
    let panes = backend.list_panes()?;
    let rows = panes
        .into_iter()
        .map(|pane| match backend.get_text(pane.id, lines) {
            Ok(raw) => {
                let cleaned = normalize(&raw);
                let tool = matcher.detect_tool(&pane.title, &cleaned).unwrap_or(default_tool);
                let c = matcher.classify(&cleaned, tool);
                ScanRow {
                    pane_id: pane.id,
                    title: pane.title,
                    tool,
                    tag: c.tag,
                    actionable: c.is_actionable(),
                    urls: extract_oauth_urls(&cleaned),
                    error: None,
                }
            }
            Err(e) => ScanRow {
                pane_id: pane.id,
                title: pane.title,
                tool: default_tool,
                tag: MatchTag::NoMatch,
                actionable: false,
                urls: Vec::new(),
                error: Some(e.to_string()),
            },
        })
        .collect();
    Ok(rows)
}

pub fn format_rows(rows: &[ScanRow]) -> String {
    if rows.is_empty() {
        return "no panes".to_string();
    }
    let mut out = Vec::with_capacity(rows.len() + 1);
    out.push(format!(
        "{:<6} {:<8} {:<18} {:<4} {}",
        "PANE", "TOOL", "MATCH", "ACT", "TITLE"
    ));
    for row in rows {
        let mut line = format!(
            "{:<6} {:<8} {:<18} {:<4} {}",
            row.pane_id,
            row.tool.as_str(),
            row.tag.as_str(),
            if row.actionable { "yes" } else { "-" },
            redact::truncate(&row.title, 40),
        );
        if let Some(ref e) = row.error {
            line.push_str(&format!("  [read failed: {e}]"));
        }
        for url in &row.urls {
            line.push_str(&format!("\n       url: {}", redact::url(url)));
        }
        out.push(line);
    }
    out.join("\n")
}

pub async fn cmd_scan(opts: ScanOpts) -> anyhow::Result<()> {
    let backend = open_backend(opts.backend.backend, &opts.backend.options())?;
    let matcher = build_matcher(&opts.matching)?;
    let tool = opts.matching.tool;
    let lines = opts.matching.capture_lines;
    let rows = tokio::task::spawn_blocking(move || scan(backend.as_ref(), &matcher, tool, lines)).await??;
    println!("{}", format_rows(&rows));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::fake::{FakeBackend, IDLE, LIMITED, URL};

    #[test]
    fn scan_classifies_without_writing() {
        let backend = FakeBackend::default();
        backend.set_pane(1, "claude", LIMITED);
        backend.set_pane(2, "zsh", IDLE);
        backend.set_pane(3, "claude", &format!("{LIMITED}\n{URL}\n"));

        let rows = scan(&backend, &TextMatcher::default(), Tool::Claude, 80).expect("scan");
        assert_eq!(rows.len(), 3);
        assert!(rows[0].actionable);
        assert_eq!(rows[0].tag, MatchTag::RateLimit);
        assert!(!rows[1].actionable);
        assert_eq!(rows[2].urls, [URL]);
        assert!(backend.writes().is_empty());
    }

    #[test]
    fn listing_failure_propagates() {
        let backend = FakeBackend::default();
        backend
            .fail_list
            .store(true, std::sync::atomic::Ordering::SeqCst);
        assert!(scan(&backend, &TextMatcher::default(), Tool::Claude, 80).is_err());
    }

    #[test]
    fn format_redacts_urls() {
        let backend = FakeBackend::default();
        backend.set_pane(3, "claude", &format!("{LIMITED}\n{URL}\n"));
        let rows = scan(&backend, &TextMatcher::default(), Tool::Claude, 80).expect("scan");
        let out = format_rows(&rows);
        assert!(out.starts_with("PANE"));
        assert!(out.contains("rate_limit"));
        assert!(out.contains("https://claude.ai/oauth/authorize?…"));
        assert!(!out.contains("state=s1"));
        assert_eq!(format_rows(&[]), "no panes");
    }
}
