//! `authmux status`: query a coordinator and print its state.

use std::time::Duration;

use crate::agent::client::CoordinatorClient;
use crate::cli::StatusOpts;
use crate::coordinator::CoordinatorStatus;
use crate::redact;

fn uptime(secs: i64) -> String {
    let secs = secs.max(0);
    match secs {
        s if s < 60 => format!("{s}s"),
        s if s < 3600 => format!("{}m{}s", s / 60, s % 60),
        s => format!("{}h{}m", s / 3600, (s % 3600) / 60),
    }
}

pub fn render(status: &CoordinatorStatus) -> String {
    let mut out = vec![format!(
        "authmux {} via {}{} | up {} | {} panes, {} pending, {} in flight",
        status.version,
        status.backend,
        if status.dry_run { " (dry run)" } else { "" },
        uptime(status.uptime_secs),
        status.pane_count,
        status.pending_count,
        status.in_flight_count,
    )];
    for p in &status.panes {
        out.push(format!(
            "  {:<6} {:<7} {:<18} cycle {:<3} {}",
            p.pane_id,
            p.tool.as_str(),
            p.phase.as_str(),
            p.cycle,
            redact::truncate(&p.title, 40),
        ));
    }
    out.join("\n")
}

pub async fn cmd_status(opts: StatusOpts) -> anyhow::Result<()> {
    let client = CoordinatorClient::new(&opts.coordinator, Duration::from_secs(5))?;
    let status = client.status().await?;
    if opts.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("{}", render(&status));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::fake::{coordinator, open_request, test_config};

    #[test]
    fn uptime_formats() {
        assert_eq!(uptime(-3), "0s");
        assert_eq!(uptime(42), "42s");
        assert_eq!(uptime(125), "2m5s");
        assert_eq!(uptime(7260), "2h1m");
    }

    #[tokio::test]
    async fn render_lists_panes() {
        let (coord, backend) = coordinator(test_config());
        open_request(&coord, &backend).await;
        let out = render(&coord.status().await);
        let mut lines = out.lines();
        let header = lines.next().expect("header");
        assert!(header.contains("via fake"));
        assert!(header.contains("1 panes, 1 pending, 0 in flight"));
        let row = lines.next().expect("pane row");
        assert!(row.contains("claude"));
        assert!(row.contains("auth_request_open"));
    }
}
