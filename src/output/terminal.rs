// Terminal reporting for pipeline runs

use std::time::Duration;

use colored::*;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::engine::result::{ActionStatus, TaskResult};

/// Terminal output manager
pub struct TerminalOutput {
    multi_progress: MultiProgress,
    verbose: bool,
    quiet: bool,
    is_tty: bool,
}

impl TerminalOutput {
    pub fn new(verbose: bool, quiet: bool) -> Self {
        let is_tty = atty::is(atty::Stream::Stdout);

        // Respect NO_COLOR (https://no-color.org/) and non-TTY output
        if std::env::var("NO_COLOR").is_ok() || !is_tty {
            colored::control::set_override(false);
        }

        TerminalOutput {
            multi_progress: MultiProgress::new(),
            verbose,
            quiet,
            is_tty,
        }
    }

    pub fn print_pipeline_header(&self, name: &str, host_count: usize) {
        if self.quiet {
            return;
        }

        println!();
        println!(
            "{} {} ({} hosts)",
            "PIPELINE".green().bold(),
            name.cyan(),
            host_count
        );
        println!("{}", "─".repeat(60).dimmed());
    }

    pub fn print_module_header(&self, name: &str) {
        if self.quiet {
            return;
        }

        println!();
        println!("{} {}", "MODULE".magenta().bold(), name);
    }

    pub fn print_task_header(&self, name: &str) {
        if self.quiet {
            return;
        }

        println!();
        println!("{} {}", "TASK".yellow().bold(), name);
    }

    /// Create a progress spinner for a long-running host phase
    pub fn create_host_progress(&self, host: &str) -> ProgressBar {
        let pb = self.multi_progress.add(ProgressBar::new_spinner());

        let style = if self.is_tty {
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {prefix:.bold} {msg}")
                .unwrap()
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
        } else {
            ProgressStyle::default_spinner()
                .template("{prefix} {msg}")
                .unwrap()
        };

        pb.set_style(style);
        pb.set_prefix(host.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    /// Print one line per host outcome, in completion order
    pub fn print_task_result(&self, result: &TaskResult) {
        if self.quiet && !result.is_failed() {
            return;
        }

        for record in result.action_results() {
            let status = match record.status {
                ActionStatus::Failed => "FAILED".red().bold(),
                ActionStatus::Skipped => "SKIPPED".cyan(),
                ActionStatus::Success => "OK".green(),
            };

            println!(
                "  {} {} {}",
                status,
                "=>".dimmed(),
                record.host_name().white().bold()
            );

            if self.verbose || record.status == ActionStatus::Failed {
                if let Some(ref err) = record.error {
                    for line in err.brief().lines() {
                        println!("      {}", line.red());
                    }
                }
            }
        }
    }

    pub fn print_recap(&self, recap: &RunRecap) {
        if self.quiet && recap.failed == 0 {
            return;
        }

        println!();
        println!("{}", "RUN RECAP".green().bold());
        println!("{}", "─".repeat(60).dimmed());
        println!(
            "  {} tasks  {}  {}  {}  in {:.1}s",
            recap.tasks,
            format!("ok={}", recap.ok).green(),
            format!("failed={}", recap.failed).red(),
            format!("skipped={}", recap.skipped).cyan(),
            recap.total_duration.as_secs_f64()
        );
    }
}

/// Counts accumulated over a pipeline run
#[derive(Debug, Default, Clone)]
pub struct RunRecap {
    pub tasks: usize,
    pub ok: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total_duration: Duration,
}

impl RunRecap {
    pub fn new() -> Self {
        RunRecap::default()
    }

    pub fn record(&mut self, result: &TaskResult) {
        self.tasks += 1;
        self.ok += result.success_count();
        self.failed += result.failed_count();
        self.skipped += result.skipped_count();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::Host;
    use crate::output::errors::ArmadaError;
    use std::sync::Arc;

    #[test]
    fn test_recap_accumulates_counts() {
        let first = TaskResult::new();
        first.append_success(Arc::new(Host::new("a")));
        first.append_skip(Arc::new(Host::new("b")));
        first.normal_result();

        let second = TaskResult::new();
        second.append_err(
            Some(Arc::new(Host::new("c"))),
            ArmadaError::Task {
                task: "t".to_string(),
                message: "boom".to_string(),
            },
        );
        second.err_result();

        let mut recap = RunRecap::new();
        recap.record(&first);
        recap.record(&second);

        assert_eq!(recap.tasks, 2);
        assert_eq!(recap.ok, 1);
        assert_eq!(recap.skipped, 1);
        assert_eq!(recap.failed, 1);
    }
}
