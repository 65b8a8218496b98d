//! Trigger an analysis and follow it to a terminal outcome (`devpulse analyze`).

use anyhow::{Context, Result};
use devpulse::backend::{AnalysisBackend, HttpBackend};
use devpulse::config::DevpulseConfig;
use devpulse::ui::WatchUI;
use devpulse::watcher::{AsyncJobWatcher, Outcome};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

use super::super::AnalyzeTarget;

pub const EXIT_FAILED: u8 = 1;
pub const EXIT_TIMED_OUT: u8 = 2;
/// Conventional exit status after SIGINT.
pub const EXIT_CANCELLED: u8 = 130;

/// Per-invocation overrides from the command line.
#[derive(Debug, Clone, Copy, Default)]
pub struct WatchOptions {
    pub max_wait: Option<u64>,
    pub poll_interval: Option<u64>,
    pub json: bool,
}

pub fn exit_status(outcome: &Outcome) -> u8 {
    match outcome {
        Outcome::Completed(_) => 0,
        Outcome::Failed(_) => EXIT_FAILED,
        Outcome::TimedOut { .. } => EXIT_TIMED_OUT,
    }
}

pub async fn cmd_analyze(
    config: &DevpulseConfig,
    target: AnalyzeTarget,
    options: WatchOptions,
) -> Result<ExitCode> {
    let backend = Arc::new(HttpBackend::new(&config.api)?);

    let mut watch_config = config.watcher_config();
    if let Some(secs) = options.max_wait {
        watch_config.max_wait = Duration::from_secs(secs);
    }
    if let Some(secs) = options.poll_interval {
        watch_config.poll_interval = Duration::from_secs(secs);
    }
    let watcher = AsyncJobWatcher::new(backend.clone(), watch_config);

    let request = target.into_request();
    let key = request.key();

    // Seed the polling baseline so a stale result is not mistaken for the new one.
    match backend.fetch_current_state(&request.subject).await {
        Ok(snapshot) => watcher.remember(key.clone(), &snapshot),
        Err(e) => warn!(error = %e, "Could not read current state; any polled result will be accepted"),
    }

    let ui = WatchUI::new(&key, options.json);
    let started = Instant::now();
    let handle = watcher
        .start_request(request)
        .await
        .with_context(|| format!("Failed to start {}", key))?;

    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    let wait = handle.wait();
    tokio::pin!(wait);
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    let outcome = loop {
        tokio::select! {
            outcome = &mut wait => break outcome,
            _ = &mut interrupt => {
                watcher.cancel(&handle);
                break None;
            }
            _ = ticker.tick() => {
                ui.update(handle.job().progress.as_deref(), started.elapsed());
            }
        }
    };

    let Some(outcome) = outcome else {
        ui.cancelled();
        return Ok(ExitCode::from(EXIT_CANCELLED));
    };

    if options.json {
        let job = serde_json::to_string_pretty(&handle.job())
            .context("Failed to serialize analysis job")?;
        println!("{}", job);
    } else {
        ui.finish(&outcome);
    }

    Ok(ExitCode::from(exit_status(&outcome)))
}
