// Local command execution without SSH

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::process::Command;

use super::{local_file_sha256, CommandResult, Connection};
use crate::output::errors::ArmadaError;

/// Connection for the synthetic local host.
///
/// Backs local tasks and gives the engine a transport it can exercise without
/// a remote peer. Transfer operations keep the same hash-skip and
/// verify-after-copy contract as the SSH transport.
pub struct LocalConnection {
    host_name: String,
    closed: AtomicBool,
}

impl LocalConnection {
    pub fn new(host_name: impl Into<String>) -> Self {
        LocalConnection {
            host_name: host_name.into(),
            closed: AtomicBool::new(false),
        }
    }

    fn guard(&self) -> Result<(), ArmadaError> {
        if self.is_closed() {
            return Err(ArmadaError::Ssh {
                host: self.host_name.clone(),
                message: "connection closed".to_string(),
                suggestion: None,
            });
        }
        Ok(())
    }

    fn io_err(&self, message: String, path: &Path) -> ArmadaError {
        ArmadaError::Io {
            message,
            path: Some(path.to_path_buf()),
        }
    }
}

#[async_trait]
impl Connection for LocalConnection {
    async fn exec(&self, cmd: &str) -> Result<CommandResult, ArmadaError> {
        self.guard()?;
        let output = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .output()
            .await
            .map_err(|e| ArmadaError::Ssh {
                host: self.host_name.clone(),
                message: format!("failed to execute local command: {}", e),
                suggestion: Some("Check that 'sh' is available on the system".to_string()),
            })?;

        Ok(CommandResult {
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    async fn fetch(&self, local: &Path, remote: &str) -> Result<(), ArmadaError> {
        self.guard()?;
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_err(format!("failed to create directory: {}", e), parent))?;
        }
        tokio::fs::copy(remote, local)
            .await
            .map_err(|e| self.io_err(format!("failed to fetch {}: {}", remote, e), local))?;
        Ok(())
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<(), ArmadaError> {
        self.guard()?;
        let local = local.to_path_buf();
        let remote = remote.to_string();
        let host = self.host_name.clone();

        tokio::task::spawn_blocking(move || upload_blocking(&local, &remote, &host))
            .await
            .map_err(|e| ArmadaError::Io {
                message: format!("transfer worker failed: {}", e),
                path: None,
            })?
    }

    async fn mkdir_all(&self, path: &str, _mode: &str) -> Result<(), ArmadaError> {
        self.guard()?;
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| self.io_err(format!("failed to create directory: {}", e), Path::new(path)))
    }

    async fn file_exist(&self, path: &str) -> Result<bool, ArmadaError> {
        self.guard()?;
        Ok(Path::new(path).is_file())
    }

    async fn dir_exist(&self, path: &str) -> Result<bool, ArmadaError> {
        self.guard()?;
        Ok(Path::new(path).is_dir())
    }

    async fn file_sha256(&self, path: &str) -> Result<String, ArmadaError> {
        self.guard()?;
        let path = path.to_string();
        tokio::task::spawn_blocking(move || {
            local_file_sha256(Path::new(&path)).map_err(|e| ArmadaError::Io {
                message: format!("failed to hash file: {}", e),
                path: Some(path.clone().into()),
            })
        })
        .await
        .map_err(|e| ArmadaError::Io {
            message: format!("hash worker failed: {}", e),
            path: None,
        })?
    }

    async fn chmod(&self, path: &str, mode: u32) -> Result<(), ArmadaError> {
        self.guard()?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
                .await
                .map_err(|e| self.io_err(format!("failed to chmod: {}", e), Path::new(path)))?;
        }
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn host_name(&self) -> &str {
        &self.host_name
    }
}

fn upload_blocking(local: &Path, remote: &str, _host: &str) -> Result<(), ArmadaError> {
    let remote_path = Path::new(remote);
    if let Some(parent) = remote_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ArmadaError::Io {
            message: format!("failed to create directory: {}", e),
            path: Some(parent.to_path_buf()),
        })?;
    }

    let meta = std::fs::metadata(local).map_err(|e| ArmadaError::Io {
        message: format!("failed to stat local path: {}", e),
        path: Some(local.to_path_buf()),
    })?;

    if meta.is_dir() {
        let entries = std::fs::read_dir(local).map_err(|e| ArmadaError::Io {
            message: format!("failed to read directory: {}", e),
            path: Some(local.to_path_buf()),
        })?;
        for entry in entries {
            let entry = entry.map_err(|e| ArmadaError::Io {
                message: format!("failed to read directory entry: {}", e),
                path: Some(local.to_path_buf()),
            })?;
            let child = format!(
                "{}/{}",
                remote.trim_end_matches('/'),
                entry.file_name().to_string_lossy()
            );
            upload_blocking(&entry.path(), &child, _host)?;
        }
        return Ok(());
    }

    let local_sum = local_file_sha256(local).map_err(|e| ArmadaError::Io {
        message: format!("failed to hash local file: {}", e),
        path: Some(local.to_path_buf()),
    })?;
    if remote_path.is_file() {
        let remote_sum = local_file_sha256(remote_path).map_err(|e| ArmadaError::Io {
            message: format!("failed to hash file: {}", e),
            path: Some(remote_path.to_path_buf()),
        })?;
        if remote_sum == local_sum {
            return Ok(());
        }
    }

    std::fs::copy(local, remote_path).map_err(|e| ArmadaError::Io {
        message: format!("failed to copy {}: {}", local.display(), e),
        path: Some(remote_path.to_path_buf()),
    })?;

    let copied_sum = local_file_sha256(remote_path).map_err(|e| ArmadaError::Io {
        message: format!("failed to hash file: {}", e),
        path: Some(remote_path.to_path_buf()),
    })?;
    if copied_sum != local_sum {
        return Err(ArmadaError::Transfer {
            host: _host.to_string(),
            path: remote.to_string(),
            message: format!(
                "content hash mismatch after copy: {} != {}",
                local_sum, copied_sum
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    #[tokio::test]
    async fn test_local_exec() {
        let conn = LocalConnection::new("localhost");
        let result = conn.exec("echo 'hello world'").await.unwrap();

        assert!(result.success());
        assert!(result.stdout.contains("hello world"));
    }

    #[tokio::test]
    async fn test_local_exec_failure() {
        let conn = LocalConnection::new("localhost");
        let result = conn.exec("exit 1").await.unwrap();

        assert!(!result.success());
        assert_eq!(result.exit_code, 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_fails_exec() {
        let conn = LocalConnection::new("localhost");
        conn.close();
        conn.close();
        assert!(conn.is_closed());
        assert!(conn.exec("true").await.is_err());
    }

    #[tokio::test]
    async fn test_upload_skips_unchanged_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("artifact.bin");
        let dst = dir.path().join("deploy/artifact.bin");
        std::fs::write(&src, b"v1").unwrap();

        let conn = LocalConnection::new("localhost");
        conn.upload(&src, dst.to_str().unwrap()).await.unwrap();
        let first_mtime = modified(&dst);

        // Second transfer of identical content must not rewrite the target
        conn.upload(&src, dst.to_str().unwrap()).await.unwrap();
        assert_eq!(first_mtime, modified(&dst));

        // Changed content is copied and the hashes converge again
        std::fs::write(&src, b"v2").unwrap();
        conn.upload(&src, dst.to_str().unwrap()).await.unwrap();
        assert_eq!(
            conn.file_sha256(dst.to_str().unwrap()).await.unwrap(),
            conn.file_sha256(src.to_str().unwrap()).await.unwrap()
        );
        assert_eq!(std::fs::read(&dst).unwrap(), b"v2");
    }

    #[tokio::test]
    async fn test_upload_directory_recurses() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("bundle");
        std::fs::create_dir_all(src.join("manifests")).unwrap();
        std::fs::write(src.join("manifests/cni.yaml"), b"kind: DaemonSet").unwrap();
        std::fs::write(src.join("version"), b"1.29").unwrap();

        let dst = dir.path().join("out");
        let conn = LocalConnection::new("localhost");
        conn.upload(&src, dst.to_str().unwrap()).await.unwrap();

        assert_eq!(
            std::fs::read(dst.join("manifests/cni.yaml")).unwrap(),
            b"kind: DaemonSet"
        );
        assert_eq!(std::fs::read(dst.join("version")).unwrap(), b"1.29");
    }

    #[tokio::test]
    async fn test_fetch_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let remote = dir.path().join("etc/kubeconfig");
        std::fs::create_dir_all(remote.parent().unwrap()).unwrap();
        std::fs::write(&remote, b"clusters: []").unwrap();

        let local = dir.path().join("work/node-1/kubeconfig");
        let conn = LocalConnection::new("localhost");
        conn.fetch(&local, remote.to_str().unwrap()).await.unwrap();

        assert_eq!(std::fs::read(&local).unwrap(), b"clusters: []");
    }

    fn modified(path: &Path) -> SystemTime {
        std::fs::metadata(path).unwrap().modified().unwrap()
    }
}
