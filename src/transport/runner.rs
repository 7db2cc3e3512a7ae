// Per-host runner: command and transfer facade bound to one host

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use super::{sudo_prefix, Connection};
use crate::inventory::Host;
use crate::output::errors::ArmadaError;

/// Remote staging area for uploads that need privileged placement
const STAGING_DIR: &str = "/tmp/armada";

/// The handle a unit of work uses to act on its bound host.
///
/// A runner is created per host execution and owns nothing: the host is shared
/// read-only and the connection is owned by the connector pool.
#[derive(Clone)]
pub struct Runner {
    pub host: Arc<Host>,
    pub conn: Arc<dyn Connection>,
    pub index: usize,
}

impl Runner {
    pub fn new(host: Arc<Host>, conn: Arc<dyn Connection>, index: usize) -> Self {
        Runner { host, conn, index }
    }

    fn ssh_err(&self, message: String) -> ArmadaError {
        ArmadaError::Ssh {
            host: self.host.name.clone(),
            message,
            suggestion: None,
        }
    }

    /// Run a command, returning raw output and exit code
    pub async fn exec(&self, cmd: &str) -> Result<(String, i32), ArmadaError> {
        let result = self.conn.exec(cmd).await?;
        Ok((result.stdout, result.exit_code))
    }

    /// Run a command, treating a non-zero exit as an error with the output
    /// folded into the message
    pub async fn cmd(&self, cmd: &str) -> Result<String, ArmadaError> {
        let (stdout, code) = self.exec(cmd).await?;
        if code != 0 {
            return Err(self.ssh_err(format!(
                "command failed with exit code {}: {}\n{}",
                code, cmd, stdout
            )));
        }
        Ok(stdout)
    }

    pub async fn sudo_exec(&self, cmd: &str) -> Result<(String, i32), ArmadaError> {
        self.exec(&sudo_prefix(cmd)).await
    }

    pub async fn sudo_cmd(&self, cmd: &str) -> Result<String, ArmadaError> {
        self.cmd(&sudo_prefix(cmd)).await
    }

    /// Download a remote file to a local path
    pub async fn fetch(&self, local: &Path, remote: &str) -> Result<(), ArmadaError> {
        self.conn.fetch(local, remote).await?;
        debug!(host = %self.host.name, remote, local = %local.display(), "fetched");
        Ok(())
    }

    /// Push a local file or directory, skipping content that already matches
    pub async fn upload(&self, local: &Path, remote: &str) -> Result<(), ArmadaError> {
        self.conn.upload(local, remote).await?;
        debug!(host = %self.host.name, remote, local = %local.display(), "uploaded");
        Ok(())
    }

    /// Push through a staging directory and move into place with elevated
    /// privileges, for destinations the login user cannot write
    pub async fn sudo_upload(&self, local: &Path, remote: &str) -> Result<(), ArmadaError> {
        let staged = format!("{}{}", STAGING_DIR, remote);
        self.upload(local, &staged).await?;

        let target_dir = if local.is_dir() {
            remote.to_string()
        } else {
            Path::new(remote)
                .parent()
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_else(|| "/".to_string())
        };
        self.conn.mkdir_all(&target_dir, "").await?;

        self.sudo_cmd(&format!("mv -f {} {}", staged, remote)).await?;
        self.sudo_cmd(&format!("rm -rf {}/*", STAGING_DIR)).await?;
        Ok(())
    }

    pub async fn file_exist(&self, remote: &str) -> Result<bool, ArmadaError> {
        self.conn.file_exist(remote).await
    }

    pub async fn dir_exist(&self, remote: &str) -> Result<bool, ArmadaError> {
        self.conn.dir_exist(remote).await
    }

    pub async fn mkdir(&self, path: &str) -> Result<(), ArmadaError> {
        self.conn.mkdir_all(path, "").await
    }

    pub async fn chmod(&self, path: &str, mode: u32) -> Result<(), ArmadaError> {
        self.conn.chmod(path, mode).await
    }

    pub async fn file_sha256(&self, path: &str) -> Result<String, ArmadaError> {
        self.conn.file_sha256(path).await
    }
}
