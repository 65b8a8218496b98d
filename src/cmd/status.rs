//! Current analysis state of a subject (`devpulse status`).

use anyhow::{Context, Result};
use console::style;
use devpulse::analysis::ResourceSnapshot;
use devpulse::backend::{AnalysisBackend, HttpBackend};
use devpulse::config::DevpulseConfig;
use devpulse::job::SubjectId;
use std::process::ExitCode;

use super::super::StatusTarget;

pub async fn cmd_status(
    config: &DevpulseConfig,
    target: StatusTarget,
    json: bool,
) -> Result<ExitCode> {
    let backend = HttpBackend::new(&config.api)?;
    let subject = target.subject();
    let snapshot = backend
        .fetch_current_state(&subject)
        .await
        .with_context(|| format!("Failed to read current state of {}", subject))?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&snapshot).context("Failed to serialize snapshot")?
        );
    } else {
        print_snapshot(&subject, &snapshot);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_snapshot(subject: &SubjectId, snapshot: &ResourceSnapshot) {
    println!();
    println!("{}", style(format!("Analysis state of {}", subject)).bold());
    if let Some(revision) = &snapshot.revision {
        println!("{}  {}", style("Revision:").dim(), revision);
    }
    println!();

    let mut shown = false;
    if let Some(summary) = &snapshot.repository_summary {
        println!("{}", style("[repository summary]").cyan());
        println!("{}", summary.summary);
        println!();
        shown = true;
    }
    if let Some(review) = &snapshot.pull_request_review {
        println!("{}", style("[pull request review]").cyan());
        if let Some(decision) = &review.decision {
            println!("{}  {}", style("Decision:").dim(), decision);
        }
        println!("{}", review.summary);
        println!();
        shown = true;
    }
    if let Some(report) = &snapshot.release_risk {
        println!("{}", style("[release risk]").cyan());
        if let Some(score) = report.risk_score {
            println!("{}  {}/100", style("Risk score:").dim(), score);
        }
        if let Some(summary) = &report.summary {
            println!("{}", summary);
        }
        println!();
        shown = true;
    }

    if !shown {
        println!("No analysis yet. Run 'devpulse analyze' to start one.");
        println!();
    }
}
