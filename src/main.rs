use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

mod cmd;

#[derive(Parser)]
#[command(name = "devpulse")]
#[command(version, about = "Trigger DevPulse analyses and watch them to completion")]
pub struct Cli {
    /// Path to devpulse.toml. Defaults to ./devpulse.toml, then the user config directory.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// DevPulse API base URL, including the /api prefix. Overrides config and DEVPULSE_API_URL.
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log output format: pretty, json
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Trigger an analysis and wait for its result
    Analyze {
        #[command(subcommand)]
        target: AnalyzeTarget,

        /// Give up waiting after this many seconds
        #[arg(long, global = true)]
        max_wait: Option<u64>,

        /// Seconds between polls when the event stream is unavailable
        #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(1..))]
        poll_interval: Option<u64>,

        /// Print the final job as JSON on stdout
        #[arg(long, global = true)]
        json: bool,
    },
    /// Show the current analysis state of a repository or pull request
    Status {
        #[command(subcommand)]
        target: StatusTarget,

        /// Print the snapshot as JSON on stdout
        #[arg(long, global = true)]
        json: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum AnalyzeTarget {
    /// Summarize a repository
    Repo { repo_id: String },
    /// Review a pull request
    Pr { repo_id: String, number: u64 },
    /// Assess the risk of releasing a set of pull requests
    Release {
        repo_id: String,
        /// Pull request id to include (repeatable)
        #[arg(long = "pr", value_name = "PR_ID", required = true)]
        pr_ids: Vec<String>,
    },
}

#[derive(Subcommand, Clone)]
pub enum StatusTarget {
    /// Current repository summary and release risk
    Repo { repo_id: String },
    /// Current pull request review
    Pr { repo_id: String, number: u64 },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default devpulse.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Analyze {
            target,
            max_wait,
            poll_interval,
            json,
        } => {
            let config = cmd::load_config(&cli)?;
            cmd::init_logging(&cli, &config)?;
            let options = cmd::WatchOptions {
                max_wait: *max_wait,
                poll_interval: *poll_interval,
                json: *json,
            };
            cmd::cmd_analyze(&config, target.clone(), options).await
        }
        Commands::Status { target, json } => {
            let config = cmd::load_config(&cli)?;
            cmd::init_logging(&cli, &config)?;
            cmd::cmd_status(&config, target.clone(), *json).await
        }
        Commands::Config { command } => cmd::cmd_config(&cli, command.clone()),
    }
}
