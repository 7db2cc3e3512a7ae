// Shell command capabilities

use async_trait::async_trait;

use crate::engine::{Action, Context, Prepare};
use crate::output::errors::ArmadaError;

/// Run a shell command on the bound host, optionally with privilege
/// escalation. A non-zero exit fails the action and is retried under the
/// owning task's policy.
pub struct CommandAction {
    pub cmd: String,
    pub sudo: bool,
}

impl CommandAction {
    pub fn new(cmd: impl Into<String>) -> Self {
        CommandAction {
            cmd: cmd.into(),
            sudo: false,
        }
    }

    pub fn with_sudo(mut self, sudo: bool) -> Self {
        self.sudo = sudo;
        self
    }
}

#[async_trait]
impl Action for CommandAction {
    async fn execute(&self, ctx: &Context) -> Result<(), ArmadaError> {
        let runner = ctx.runner()?;
        if self.sudo {
            runner.sudo_cmd(&self.cmd).await?;
        } else {
            runner.cmd(&self.cmd).await?;
        }
        Ok(())
    }
}

/// Precondition that passes when a command exits zero. A non-zero exit is a
/// clean skip, not an error.
pub struct CommandPrecheck {
    pub cmd: String,
    pub sudo: bool,
}

impl CommandPrecheck {
    pub fn new(cmd: impl Into<String>) -> Self {
        CommandPrecheck {
            cmd: cmd.into(),
            sudo: false,
        }
    }

    pub fn with_sudo(mut self, sudo: bool) -> Self {
        self.sudo = sudo;
        self
    }
}

#[async_trait]
impl Prepare for CommandPrecheck {
    async fn pre_check(&self, ctx: &Context) -> Result<bool, ArmadaError> {
        let runner = ctx.runner()?;
        let (_, code) = if self.sudo {
            runner.sudo_exec(&self.cmd).await?
        } else {
            runner.exec(&self.cmd).await?
        };
        Ok(code == 0)
    }
}

/// Precondition that passes when a remote file exists
pub struct FileExistPrecheck {
    pub path: String,
}

impl FileExistPrecheck {
    pub fn new(path: impl Into<String>) -> Self {
        FileExistPrecheck { path: path.into() }
    }
}

#[async_trait]
impl Prepare for FileExistPrecheck {
    async fn pre_check(&self, ctx: &Context) -> Result<bool, ArmadaError> {
        ctx.runner()?.file_exist(&self.path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache;
    use crate::engine::Runtime;
    use crate::inventory::{Host, Inventory};
    use crate::transport::{LocalConnection, Runner};
    use std::sync::Arc;

    fn bound_ctx() -> Context {
        let mut runtime = Runtime::new("t", Inventory::new(vec![Host::local()]));
        runtime.set_runner(Runner::new(
            Arc::new(Host::local()),
            Arc::new(LocalConnection::new("localhost")),
            0,
        ));
        Context::new(runtime, cache::shared(), cache::shared())
    }

    #[tokio::test]
    async fn test_command_action() {
        let ctx = bound_ctx();
        assert!(CommandAction::new("true").execute(&ctx).await.is_ok());
        assert!(CommandAction::new("exit 2").execute(&ctx).await.is_err());
    }

    #[tokio::test]
    async fn test_command_precheck_maps_exit_to_skip() {
        let ctx = bound_ctx();
        assert!(CommandPrecheck::new("true").pre_check(&ctx).await.unwrap());
        assert!(!CommandPrecheck::new("false").pre_check(&ctx).await.unwrap());
    }

    #[tokio::test]
    async fn test_file_exist_precheck() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let ctx = bound_ctx();

        let existing = FileExistPrecheck::new(file.path().to_string_lossy());
        assert!(existing.pre_check(&ctx).await.unwrap());

        let missing = FileExistPrecheck::new("/definitely/not/here");
        assert!(!missing.pre_check(&ctx).await.unwrap());
    }
}
