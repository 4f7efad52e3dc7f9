//! Scrubbing for anything that leaves the process: logs, event lines, hooks.
//!
//! OAuth URLs carry `state` and PKCE challenge parameters in the query
//! string; codes are one-time bearer secrets. Neither is ever printed whole.

/// An OAuth URL with its query string and fragment replaced by `?…`.
pub fn url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) => {
            let had_query = parsed.query().is_some() || parsed.fragment().is_some();
            parsed.set_query(None);
            parsed.set_fragment(None);
            if had_query {
                format!("{parsed}?…")
            } else {
                parsed.to_string()
            }
        }
        Err(_) => match raw.split_once(['?', '#']) {
            Some((base, _)) => format!("{}?…", truncate(base, 64)),
            None => truncate(raw, 64),
        },
    }
}

/// Length only.
pub fn secret(value: &str) -> String {
    format!("<redacted {} chars>", value.chars().count())
}

/// `alice@example.com` → `al…@example.com`.
pub fn account(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let head: String = local.chars().take(2).collect();
            format!("{head}…@{domain}")
        }
        None => truncate(email, 4),
    }
}

/// At most `max` chars, with `…` marking a cut.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_drops_query() {
        let u = "https://claude.ai/oauth/authorize?code=true&client_id=abc&state=xyz";
        assert_eq!(url(u), "https://claude.ai/oauth/authorize?…");
    }

    #[test]
    fn url_without_query_is_kept() {
        assert_eq!(url("https://example.com/callback"), "https://example.com/callback");
    }

    #[test]
    fn unparsable_url_still_loses_query() {
        let out = url("claude.ai/oauth/authorize?state=secret");
        assert!(!out.contains("secret"));
    }

    #[test]
    fn secret_shows_length_only() {
        assert_eq!(secret("abc#def"), "<redacted 7 chars>");
    }

    #[test]
    fn account_keeps_domain() {
        assert_eq!(account("alice@example.com"), "al…@example.com");
        assert_eq!(account("bob"), "bob");
    }

    #[test]
    fn truncate_marks_cut() {
        assert_eq!(truncate("abcdef", 3), "abc…");
        assert_eq!(truncate("abc", 3), "abc");
    }
}
