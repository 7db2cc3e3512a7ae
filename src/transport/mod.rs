// Transport module - per-host command execution and file transfer

use std::io::Read;
use std::path::Path;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use tokio::sync::watch;

use crate::output::errors::ArmadaError;

pub mod local;
pub mod pool;
pub mod runner;
pub mod ssh;

pub use local::LocalConnection;
pub use pool::Connector;
pub use runner::Runner;
pub use ssh::{SshConfig, SshConnection};

/// Interactive privilege-escalation prompt, as printed by sudo or a PAM stack.
/// Matched against the current output line while a command runs.
pub(crate) static ESCALATION_PROMPT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\[sudo\] password for .*|Password.*): $").expect("escalation prompt pattern")
});

/// Wrap a command for privileged execution with the caller's environment kept
pub fn sudo_prefix(cmd: &str) -> String {
    format!("sudo -E /bin/bash -c \"{}\"", cmd)
}

/// Result of executing a command
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Close notification attached to a connection.
///
/// Firing is idempotent; subscribers observe the transition through a watch
/// receiver and can tear down in-flight work when the connection goes away.
pub struct CloseSignal {
    tx: watch::Sender<bool>,
}

impl CloseSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        CloseSignal { tx }
    }

    /// Returns false when the signal had already fired
    pub fn fire(&self) -> bool {
        !self.tx.send_replace(true)
    }

    pub fn is_fired(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for CloseSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Common capability of all connection types (SSH, local).
///
/// One connection serves one host. Command execution and transfers may block
/// for as long as the remote side takes; deadlines belong to the task engine,
/// not the transport.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Run a command and capture merged output and exit code
    async fn exec(&self, cmd: &str) -> Result<CommandResult, ArmadaError>;

    /// Copy a remote file to a local path, creating parent directories
    async fn fetch(&self, local: &Path, remote: &str) -> Result<(), ArmadaError>;

    /// Push a local file or directory to a remote path with content-hash
    /// verification; unchanged files are skipped
    async fn upload(&self, local: &Path, remote: &str) -> Result<(), ArmadaError>;

    /// Create a remote directory chain; empty mode means the default 775
    async fn mkdir_all(&self, path: &str, mode: &str) -> Result<(), ArmadaError>;

    async fn file_exist(&self, path: &str) -> Result<bool, ArmadaError>;

    async fn dir_exist(&self, path: &str) -> Result<bool, ArmadaError>;

    /// SHA-256 of a remote file's content
    async fn file_sha256(&self, path: &str) -> Result<String, ArmadaError>;

    async fn chmod(&self, path: &str, mode: u32) -> Result<(), ArmadaError>;

    /// Idempotent close; double-close is a no-op
    fn close(&self);

    fn is_closed(&self) -> bool;

    fn host_name(&self) -> &str;
}

/// SHA-256 of a local file, streamed in chunks
pub(crate) fn local_file_sha256(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_escalation_prompt_detection() {
        assert!(ESCALATION_PROMPT.is_match("[sudo] password for ops: "));
        assert!(ESCALATION_PROMPT.is_match("Password: "));
        assert!(ESCALATION_PROMPT.is_match("Password for ops@node-1: "));

        assert!(!ESCALATION_PROMPT.is_match("[sudo] password for ops:"));
        assert!(!ESCALATION_PROMPT.is_match("reading password file: "));
        assert!(!ESCALATION_PROMPT.is_match("done"));
    }

    #[test]
    fn test_sudo_prefix() {
        assert_eq!(
            sudo_prefix("mkdir -p /etc/armada"),
            "sudo -E /bin/bash -c \"mkdir -p /etc/armada\""
        );
    }

    #[test]
    fn test_close_signal_idempotent() {
        let signal = CloseSignal::new();
        let mut rx = signal.subscribe();

        assert!(!signal.is_fired());
        assert!(signal.fire());
        assert!(!signal.fire());
        assert!(signal.is_fired());
        assert!(*rx.borrow_and_update());
    }

    #[test]
    fn test_local_file_sha256() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"armada").unwrap();

        let sum = local_file_sha256(file.path()).unwrap();
        // sha256("armada")
        assert_eq!(
            sum,
            "f55121c29d0ca6ef7af7d7b03bc4670d559fd04325ede332f152619b57899c95"
        );
    }
}
