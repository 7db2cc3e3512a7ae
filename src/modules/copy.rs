// File distribution capabilities

use std::path::PathBuf;

use async_trait::async_trait;

use crate::engine::{Action, Context};
use crate::output::errors::ArmadaError;

/// Push a local file or directory to the bound host. Content that already
/// matches by hash is skipped, so re-running an interrupted distribution is
/// cheap. `sudo` stages through a temp path and moves into place for
/// root-owned destinations.
pub struct CopyAction {
    pub local: PathBuf,
    pub remote: String,
    pub sudo: bool,
}

impl CopyAction {
    pub fn new(local: impl Into<PathBuf>, remote: impl Into<String>) -> Self {
        CopyAction {
            local: local.into(),
            remote: remote.into(),
            sudo: false,
        }
    }

    pub fn with_sudo(mut self, sudo: bool) -> Self {
        self.sudo = sudo;
        self
    }
}

#[async_trait]
impl Action for CopyAction {
    async fn execute(&self, ctx: &Context) -> Result<(), ArmadaError> {
        let runner = ctx.runner()?;
        if self.sudo {
            runner.sudo_upload(&self.local, &self.remote).await
        } else {
            runner.upload(&self.local, &self.remote).await
        }
    }
}

/// Pull a remote file into the bound host's scratch directory under the run's
/// work dir, or to an explicit absolute path
pub struct FetchAction {
    pub remote: String,
    pub local: PathBuf,
}

impl FetchAction {
    pub fn new(remote: impl Into<String>, local: impl Into<PathBuf>) -> Self {
        FetchAction {
            remote: remote.into(),
            local: local.into(),
        }
    }
}

#[async_trait]
impl Action for FetchAction {
    async fn execute(&self, ctx: &Context) -> Result<(), ArmadaError> {
        let local = if self.local.is_absolute() {
            self.local.clone()
        } else {
            ctx.runtime().host_work_dir()?.join(&self.local)
        };
        ctx.runner()?.fetch(&local, &self.remote).await
    }
}
