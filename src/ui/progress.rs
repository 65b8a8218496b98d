use crate::analysis::AnalysisResult;
use crate::job::JobKey;
use crate::ui::icons::{CHECK, CLOCK, CROSS, SEARCH, SPARKLE, STOP, WARNING};
use crate::watcher::Outcome;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Terminal UI for one watched analysis, rendered as a single `indicatif` spinner.
///
/// The spinner shows the job key, the latest progress label reported by the
/// engine and the elapsed time. It is hidden when output is machine-readable.
pub struct WatchUI {
    bar: ProgressBar,
}

impl WatchUI {
    /// Create the spinner and start ticking.
    ///
    /// # Arguments
    /// * `key`: the job being watched, shown as the spinner prefix
    /// * `hidden`: draw nothing (used with `--json`)
    pub fn new(key: &JobKey, hidden: bool) -> Self {
        let bar = if hidden {
            ProgressBar::hidden()
        } else {
            ProgressBar::new_spinner()
        };

        let style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");
        bar.set_style(style);
        bar.set_prefix(format!("{}", key.subject));
        bar.set_message(format!("{}{} requested", SEARCH, key.kind.label()));
        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Outcome lines go to stdout once the spinner (on stderr) is cleared.
    fn print_line(&self, msg: impl AsRef<str>) {
        println!("{}", msg.as_ref());
    }

    /// Refresh the spinner with the latest progress label and elapsed time.
    ///
    /// Formats elapsed time as `Xs` or `Xm Ys` when >= 60 seconds.
    pub fn update(&self, progress: Option<&str>, elapsed: Duration) {
        let secs = elapsed.as_secs();
        let time_str = if secs >= 60 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else {
            format!("{}s", secs)
        };
        self.bar.set_message(format!(
            "{} {}",
            style(progress.unwrap_or("waiting for result")).cyan(),
            style(format!("({})", time_str)).dim()
        ));
    }

    /// Stop the spinner and print the outcome.
    pub fn finish(&self, outcome: &Outcome) {
        self.bar.finish_and_clear();
        match outcome {
            Outcome::Completed(result) => self.print_result(result),
            Outcome::Failed(failure) => {
                self.print_line(format!("{}{}", CROSS, style(failure).red()));
            }
            Outcome::TimedOut { waited } => {
                self.print_line(format!(
                    "{}{}",
                    CLOCK,
                    style(format!("No result after {}s", waited.as_secs())).yellow()
                ));
            }
        }
        if let Some(advice) = outcome.advice() {
            self.print_line(format!("{}{}", WARNING, style(advice).dim()));
        }
    }

    pub fn cancelled(&self) {
        self.bar.finish_and_clear();
        self.print_line(format!("{}{}", STOP, style("Cancelled").dim()));
    }

    fn print_result(&self, result: &AnalysisResult) {
        self.print_line(format!(
            "{}{}",
            CHECK,
            style(format!("{} complete", result.kind().label()))
                .green()
                .bold()
        ));
        match result {
            AnalysisResult::Repository(summary) => {
                self.print_line("");
                self.print_line(&summary.summary);
            }
            AnalysisResult::PullRequest(review) => {
                if let Some(decision) = &review.decision {
                    self.print_line(format!(
                        "{}  {}",
                        style("Decision:").dim(),
                        style(decision).bold()
                    ));
                }
                self.print_line("");
                self.print_line(&review.summary);
            }
            AnalysisResult::ReleaseRisk(report) => {
                if let Some(score) = report.risk_score {
                    self.print_line(format!(
                        "{}  {}",
                        style("Risk score:").dim(),
                        risk_style(score)
                    ));
                }
                if let Some(summary) = &report.summary {
                    self.print_line("");
                    self.print_line(summary);
                }
                if let Some(changelog) = &report.changelog {
                    self.print_line("");
                    self.print_line(format!("{}Changelog", SPARKLE));
                    self.print_line(changelog);
                }
            }
        }
    }
}

/// Colour a 0-100 risk score by band.
fn risk_style(score: i64) -> console::StyledObject<String> {
    let text = format!("{}/100", score);
    match score {
        s if s >= 70 => style(text).red().bold(),
        s if s >= 40 => style(text).yellow().bold(),
        _ => style(text).green().bold(),
    }
}
