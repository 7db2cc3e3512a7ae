// Human-readable error messages for Armada

use std::fmt;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

use colored::*;

/// Initialize color output based on TTY detection and NO_COLOR environment variable
fn should_use_colors() -> bool {
    // Check NO_COLOR environment variable first (https://no-color.org/)
    if std::env::var("NO_COLOR").is_ok() {
        return false;
    }

    // Errors are written to stderr
    std::io::stderr().is_terminal()
}

/// Render a duration the way operators write them: whole minutes as "Nm", otherwise "Ns".
pub(crate) fn short_dur(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 60 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

/// All error types in Armada
#[derive(Debug)]
pub enum ArmadaError {
    /// SSH connection and authentication errors
    Ssh {
        host: String,
        message: String,
        suggestion: Option<String>,
    },

    /// Local I/O errors
    Io {
        message: String,
        path: Option<PathBuf>,
    },

    /// File transfer errors, including post-copy integrity mismatches
    Transfer {
        host: String,
        path: String,
        message: String,
    },

    /// A host's task sequence outlived the task deadline
    Timeout {
        task: String,
        host: String,
        duration: Duration,
    },

    /// Task-level failures: retry exhaustion, configuration errors, combined
    /// per-host failures
    Task { task: String, message: String },

    /// Inventory errors
    Inventory {
        message: String,
        suggestion: Option<String>,
    },

    /// Rejected composition (a cycle in module references)
    Graph { message: String },
}

impl ArmadaError {
    /// One-line plain-text rendition, used when errors are folded into retry
    /// concatenations and combined per-host summaries.
    pub fn brief(&self) -> String {
        match self {
            ArmadaError::Ssh { host, message, .. } => format!("ssh [{}]: {}", host, message),
            ArmadaError::Io { message, path } => match path {
                Some(p) => format!("io {}: {}", p.display(), message),
                None => format!("io: {}", message),
            },
            ArmadaError::Transfer {
                host,
                path,
                message,
            } => format!("transfer [{}] {}: {}", host, path, message),
            ArmadaError::Timeout {
                task,
                host,
                duration,
            } => format!(
                "task '{}' on [{}] timed out after {}",
                task,
                host,
                short_dur(*duration)
            ),
            ArmadaError::Task { task, message } => format!("task '{}': {}", task, message),
            ArmadaError::Inventory { message, .. } => format!("inventory: {}", message),
            ArmadaError::Graph { message } => format!("graph: {}", message),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ArmadaError::Timeout { .. })
    }
}

impl std::error::Error for ArmadaError {}

impl fmt::Display for ArmadaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Set color mode based on TTY detection and NO_COLOR
        if !should_use_colors() {
            colored::control::set_override(false);
        }

        match self {
            ArmadaError::Ssh {
                host,
                message,
                suggestion,
            } => {
                writeln!(f, "{}: {}", "SSH ERROR".red().bold(), message)?;
                writeln!(f, "  {} {}", "Host:".dimmed(), host)?;

                if let Some(suggestion) = suggestion {
                    writeln!(f)?;
                    writeln!(f, "{}: {}", "Hint".yellow().bold(), suggestion)?;
                }

                Ok(())
            }

            ArmadaError::Io { message, path } => {
                writeln!(f, "{}: {}", "I/O ERROR".red().bold(), message)?;
                if let Some(path) = path {
                    writeln!(f, "  {} {}", "Path:".dimmed(), path.display())?;
                }
                Ok(())
            }

            ArmadaError::Transfer {
                host,
                path,
                message,
            } => {
                writeln!(f, "{}: {}", "TRANSFER ERROR".red().bold(), message)?;
                writeln!(f, "  {} {}", "Host:".dimmed(), host)?;
                writeln!(f, "  {} {}", "Path:".dimmed(), path)?;
                Ok(())
            }

            ArmadaError::Timeout {
                task,
                host,
                duration,
            } => {
                writeln!(
                    f,
                    "{}: task '{}' on [{}] timed out after {}",
                    "TIMEOUT".red().bold(),
                    task,
                    host,
                    short_dur(*duration)
                )?;
                Ok(())
            }

            ArmadaError::Task { task, message } => {
                writeln!(f, "{}: {}", "TASK FAILED".red().bold(), message)?;
                writeln!(f, "  {} {}", "Task:".dimmed(), task)?;
                Ok(())
            }

            ArmadaError::Inventory {
                message,
                suggestion,
            } => {
                writeln!(f, "{}: {}", "INVENTORY ERROR".red().bold(), message)?;

                if let Some(suggestion) = suggestion {
                    writeln!(f)?;
                    writeln!(f, "{}: {}", "Hint".yellow().bold(), suggestion)?;
                }

                Ok(())
            }

            ArmadaError::Graph { message } => {
                writeln!(f, "{}: {}", "COMPOSITION ERROR".red().bold(), message)?;
                Ok(())
            }
        }
    }
}

impl From<std::io::Error> for ArmadaError {
    fn from(e: std::io::Error) -> Self {
        ArmadaError::Io {
            message: e.to_string(),
            path: None,
        }
    }
}
