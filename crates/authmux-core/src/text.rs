//! Terminal text normalization and pane classification.
//!
//! Pane captures are noisy: escape sequences, box-drawing frames and control
//! bytes surround the few phrases that matter. `normalize` removes the noise
//! while keeping every visible character in order; classification then works
//! on a whitespace-collapsed view, and URL extraction on the un-collapsed one
//! so that hard-wrap points stay visible as whitespace.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::Tool;

/// OAuth authorize endpoint whose URLs are lifted out of pane text.
pub const OAUTH_AUTHORIZE_BASE: &str = "https://claude.ai/oauth/authorize";

/// Only the bottom of a capture is classified; messages that have scrolled
/// further up are history, not the pane's current state.
pub const CLASSIFY_TAIL_LINES: usize = 24;

/// Shared rate-limit / logout phrases (lowercase, straight apostrophes).
pub const RATE_LIMIT_PHRASES: &[&str] = &[
    "you've hit your limit",
    "you've hit your usage limit",
    "you've reached your usage limit",
    "usage limit reached",
    "usage limit has been reached",
    "rate limit reached",
    "rate_limit_error",
    "5-hour limit reached",
    "please run /login",
    "oauth token has expired",
    "oauth token revoked",
];

const CLAUDE_MARKERS: &[&str] = &["claude code", "claude.ai", "anthropic"];
const CODEX_MARKERS: &[&str] = &["openai codex", "codex>", "chatgpt.com"];

// ─── Normalization ───────────────────────────────────────────────

const ESC: char = '\u{1b}';
const BEL: char = '\u{07}';
const C1_CSI: char = '\u{9b}';
const C1_OSC: char = '\u{9d}';
const C1_ST: char = '\u{9c}';

/// Strip escape sequences, box-drawing/block glyphs and control bytes.
///
/// OSC sequences go first: their payloads (titles, hyperlinks) may contain
/// bytes that look like a CSI introducer.
pub fn normalize(raw: &str) -> String {
    let text = strip_osc(raw);
    let text = strip_csi(&text);
    let text = strip_other_escapes(&text);
    text.chars().filter(|&c| !is_render_artifact(c)).collect()
}

/// Collapse whitespace runs to a single space. Classification only.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strip_osc(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        let is_osc = c == C1_OSC || (c == ESC && chars.peek() == Some(&']'));
        if !is_osc {
            out.push(c);
            continue;
        }
        if c == ESC {
            chars.next();
        }
        // Consume the payload up to BEL or ST (ESC \ or 8-bit ST).
        while let Some(p) = chars.next() {
            if p == BEL || p == C1_ST {
                break;
            }
            if p == ESC && chars.peek() == Some(&'\\') {
                chars.next();
                break;
            }
        }
    }
    out
}

fn strip_csi(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        let is_csi = c == C1_CSI || (c == ESC && chars.peek() == Some(&'['));
        if !is_csi {
            out.push(c);
            continue;
        }
        if c == ESC {
            chars.next();
        }
        // params 0x30–0x3F, intermediates 0x20–0x2F, final 0x40–0x7E
        while let Some(&p) = chars.peek() {
            match p {
                '\u{30}'..='\u{3f}' | '\u{20}'..='\u{2f}' => {
                    chars.next();
                }
                '\u{40}'..='\u{7e}' => {
                    chars.next();
                    break;
                }
                // Malformed: leave the offending character to the caller.
                _ => break,
            }
        }
    }
    out
}

fn strip_other_escapes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != ESC {
            out.push(c);
            continue;
        }
        match chars.next() {
            // Charset designation: ESC ( B and friends.
            Some('(' | ')' | '*' | '+' | '-' | '.' | '/') => {
                chars.next();
            }
            // DCS / SOS / PM / APC strings run to ST.
            Some('P' | 'X' | '^' | '_') => {
                while let Some(p) = chars.next() {
                    if p == C1_ST || p == BEL {
                        break;
                    }
                    if p == ESC && chars.peek() == Some(&'\\') {
                        chars.next();
                        break;
                    }
                }
            }
            // Two-byte sequences (ESC 7, ESC =, ESC M, ...), or a trailing ESC.
            Some(_) | None => {}
        }
    }
    out
}

fn is_render_artifact(c: char) -> bool {
    // Box drawing U+2500–U+257F and block elements U+2580–U+259F.
    matches!(c, '\u{2500}'..='\u{259f}') || (c.is_control() && c != '\n' && c != '\t')
}

// ─── Classification ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTag {
    Override,
    OverrideNoMatch,
    RateLimit,
    ToolMarker,
    NoMatch,
}

impl MatchTag {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Override => "override",
            Self::OverrideNoMatch => "override_no_match",
            Self::RateLimit => "rate_limit",
            Self::ToolMarker => "tool_marker",
            Self::NoMatch => "no_match",
        }
    }
}

impl std::fmt::Display for MatchTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub matched: bool,
    pub tag: MatchTag,
}

impl Classification {
    fn new(matched: bool, tag: MatchTag) -> Self {
        Self { matched, tag }
    }

    /// Whether this result should start a recovery cycle.
    pub fn is_actionable(&self) -> bool {
        self.matched && matches!(self.tag, MatchTag::Override | MatchTag::RateLimit)
    }
}

/// Phrase tables plus an optional authoritative override pattern.
#[derive(Debug, Clone)]
pub struct TextMatcher {
    rate_limit: Vec<String>,
    claude_markers: Vec<String>,
    codex_markers: Vec<String>,
    override_pattern: Option<Regex>,
}

impl Default for TextMatcher {
    fn default() -> Self {
        Self::new(
            RATE_LIMIT_PHRASES.iter().map(|s| s.to_string()).collect(),
            CLAUDE_MARKERS.iter().map(|s| s.to_string()).collect(),
            CODEX_MARKERS.iter().map(|s| s.to_string()).collect(),
        )
    }
}

impl TextMatcher {
    pub fn new(rate_limit: Vec<String>, claude_markers: Vec<String>, codex_markers: Vec<String>) -> Self {
        let fold = |v: Vec<String>| v.into_iter().map(|s| fold_case(&s)).collect();
        Self {
            rate_limit: fold(rate_limit),
            claude_markers: fold(claude_markers),
            codex_markers: fold(codex_markers),
            override_pattern: None,
        }
    }

    #[must_use]
    pub fn with_override(mut self, pattern: Regex) -> Self {
        self.override_pattern = Some(pattern);
        self
    }

    pub fn has_override(&self) -> bool {
        self.override_pattern.is_some()
    }

    fn markers(&self, tool: Tool) -> &[String] {
        match tool {
            Tool::Claude => &self.claude_markers,
            Tool::Codex => &self.codex_markers,
        }
    }

    /// Classify normalized pane text for a pane tracking `tool`.
    ///
    /// An override pattern is authoritative. Otherwise rate-limit phrases win
    /// over tool markers: they are actionable whatever the pane is running.
    pub fn classify(&self, cleaned: &str, tool: Tool) -> Classification {
        let tail = collapse_whitespace(&tail_lines(cleaned, CLASSIFY_TAIL_LINES));

        if let Some(ref pattern) = self.override_pattern {
            return if pattern.is_match(&tail) {
                Classification::new(true, MatchTag::Override)
            } else {
                Classification::new(false, MatchTag::OverrideNoMatch)
            };
        }

        let folded = fold_case(&tail);
        if contains_any(&folded, &self.rate_limit) {
            Classification::new(true, MatchTag::RateLimit)
        } else if contains_any(&folded, self.markers(tool)) {
            Classification::new(true, MatchTag::ToolMarker)
        } else {
            Classification::new(false, MatchTag::NoMatch)
        }
    }

    /// Infer which tool a pane runs. The title is checked before the text.
    pub fn detect_tool(&self, title: &str, cleaned: &str) -> Option<Tool> {
        let title = fold_case(title);
        if let Some(tool) = Tool::ALL
            .into_iter()
            .find(|&t| contains_any(&title, self.markers(t)) || title.contains(t.as_str()))
        {
            return Some(tool);
        }
        let text = fold_case(&collapse_whitespace(&tail_lines(cleaned, CLASSIFY_TAIL_LINES)));
        Tool::ALL
            .into_iter()
            .find(|&t| contains_any(&text, self.markers(t)))
    }
}

fn contains_any(haystack: &str, needles: &[String]) -> bool {
    needles.iter().any(|n| !n.is_empty() && haystack.contains(n.as_str()))
}

fn fold_case(s: &str) -> String {
    s.to_lowercase().replace(['\u{2019}', '\u{2018}'], "'")
}

/// Last `n` non-empty lines, in order.
pub fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

// ─── URL extraction ──────────────────────────────────────────────

fn is_url_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            '-' | '.' | '_' | '~' | ':' | '/' | '?' | '#' | '[' | ']' | '@' | '!' | '$' | '&'
                | '\'' | '(' | ')' | '*' | '+' | ',' | ';' | '=' | '%'
        )
}

fn is_wrap_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r')
}

/// Extract OAuth authorize URLs from normalized (not collapsed) text.
///
/// The terminal hard-wraps long URLs, so whitespace between legal characters
/// is skipped rather than treated as the end. A whitespace run containing an
/// empty line does end the URL. Results are deduplicated in first-seen order.
///
/// CLIs print a blank line after the URL. Text on the very next line that
/// only holds URL-legal characters and spaces is joined onto the URL.
pub fn extract_oauth_urls(cleaned: &str) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    let mut from = 0;

    while let Some(rel) = cleaned[from..].find(OAUTH_AUTHORIZE_BASE) {
        let body_start = from + rel + OAUTH_AUTHORIZE_BASE.len();
        let mut url = String::from(OAUTH_AUTHORIZE_BASE);
        let mut end = body_start;
        let mut newlines = 0;

        for (idx, c) in cleaned[body_start..].char_indices() {
            if is_url_char(c) {
                url.push(c);
                end = body_start + idx + c.len_utf8();
                newlines = 0;
            } else if is_wrap_space(c) {
                if c == '\n' {
                    newlines += 1;
                    if newlines >= 2 {
                        break;
                    }
                }
            } else {
                break;
            }
        }

        if !urls.contains(&url) {
            urls.push(url);
        }
        from = end;
    }

    urls
}
