//! CLI command implementations.
//!
//! Each submodule owns one `Commands` variant:
//!
//! | Module     | Commands handled |
//! |------------|------------------|
//! | `analyze`  | `Analyze`        |
//! | `status`   | `Status`         |
//! | `config`   | `Config`         |

pub mod analyze;
pub mod config;
pub mod status;

use anyhow::{Context, Result};
use devpulse::config::{DevpulseConfig, LogFormat};
use devpulse::job::{AnalysisKind, AnalysisRequest, SubjectId};

use super::{AnalyzeTarget, Cli, StatusTarget};

pub use analyze::{WatchOptions, cmd_analyze};
pub use config::cmd_config;
pub use status::cmd_status;

/// Resolve configuration: file, then `DEVPULSE_*` environment, then CLI flags.
pub fn load_config(cli: &Cli) -> Result<DevpulseConfig> {
    let mut config = DevpulseConfig::load_or_default(cli.config.as_deref())?;
    config.apply_env()?;
    if let Some(url) = &cli.api_url {
        config.api.base_url = url.clone();
    }
    if let Some(format) = &cli.log_format {
        config.logging.format = format.parse::<LogFormat>()?;
    }
    Ok(config)
}

pub fn init_logging(cli: &Cli, config: &DevpulseConfig) -> Result<()> {
    devpulse::logging::init(config.logging.format, &config.logging.filter, cli.verbose)
        .context("Failed to initialize logging")
}

impl AnalyzeTarget {
    pub fn into_request(self) -> AnalysisRequest {
        match self {
            AnalyzeTarget::Repo { repo_id } => AnalysisRequest::new(
                SubjectId::repository(repo_id),
                AnalysisKind::RepositoryAnalysis,
            ),
            AnalyzeTarget::Pr { repo_id, number } => AnalysisRequest::new(
                SubjectId::pull_request(repo_id, number),
                AnalysisKind::PullRequestAnalysis,
            ),
            AnalyzeTarget::Release { repo_id, pr_ids } => {
                AnalysisRequest::release_risk(repo_id, pr_ids)
            }
        }
    }
}

impl StatusTarget {
    pub fn subject(&self) -> SubjectId {
        match self {
            StatusTarget::Repo { repo_id } => SubjectId::repository(repo_id.clone()),
            StatusTarget::Pr { repo_id, number } => {
                SubjectId::pull_request(repo_id.clone(), *number)
            }
        }
    }
}
