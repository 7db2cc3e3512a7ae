// Task execution engine

use std::sync::Arc;

use async_trait::async_trait;

use crate::cache::Cache;
use crate::output::errors::ArmadaError;

pub mod graph;
pub mod pipeline;
pub mod result;
pub mod runtime;
pub mod task;

pub use graph::DependencyGraph;
pub use pipeline::{Pipeline, TaskModule};
pub use result::{ActionResult, ActionStatus, TaskResult, TaskStatus};
pub use runtime::{Context, Runtime, SchedulePool, DEFAULT_POOL_SIZE};
pub use task::{LocalTask, RemoteTask};

/// Read-only precondition for a unit of work.
///
/// `Ok(false)` means the bound host should skip the work; it is not an error
/// and is never retried. An `Err` is a failed check and is retried under the
/// owning task's policy.
#[async_trait]
pub trait Prepare: Send + Sync {
    async fn pre_check(&self, ctx: &Context) -> Result<bool, ArmadaError>;
}

/// The side-effecting operation a task performs on each bound host.
/// Idempotence is the implementation's responsibility: the engine retries on
/// error and never guarantees exactly-once remote execution.
#[async_trait]
pub trait Action: Send + Sync {
    async fn execute(&self, ctx: &Context) -> Result<(), ArmadaError>;
}

/// Best-effort compensating action, invoked per recorded host only after a
/// task has failed as a whole
#[async_trait]
pub trait Rollback: Send + Sync {
    async fn execute(&self, ctx: &Context, last: &ActionResult) -> Result<(), ArmadaError>;
}

/// AND-composition of preconditions: every check must pass, the first skip or
/// error short-circuits
pub struct PrepareCollection {
    checks: Vec<Arc<dyn Prepare>>,
}

impl PrepareCollection {
    pub fn new(checks: Vec<Arc<dyn Prepare>>) -> Self {
        PrepareCollection { checks }
    }

    pub fn push(&mut self, check: impl Prepare + 'static) {
        self.checks.push(Arc::new(check));
    }
}

#[async_trait]
impl Prepare for PrepareCollection {
    async fn pre_check(&self, ctx: &Context) -> Result<bool, ArmadaError> {
        for check in &self.checks {
            if !check.pre_check(ctx).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// A schedulable unit of work. The two variants are `LocalTask` (runs once
/// against the synthetic local host) and `RemoteTask` (runs once per target
/// host).
#[async_trait]
pub trait Task: Send + Sync {
    fn name(&self) -> &str;

    fn desc(&self) -> &str;

    /// Bind the run context and cache scopes, and apply configuration
    /// defaults. Must be called before `execute`.
    fn init(&mut self, runtime: &Runtime, module_cache: Arc<Cache>, pipeline_cache: Arc<Cache>);

    /// Run the task to completion and finalize its result
    async fn execute(&self) -> Arc<TaskResult>;

    /// Run the compensating action for every recorded host. A no-op unless
    /// the task failed and a rollback capability was supplied; rollback
    /// failures are logged, never propagated.
    async fn execute_rollback(&self);

    fn result(&self) -> Arc<TaskResult>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{Host, Inventory};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StubPrepare {
        pass: bool,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Prepare for StubPrepare {
        async fn pre_check(&self, _ctx: &Context) -> Result<bool, ArmadaError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.pass)
        }
    }

    fn ctx() -> Context {
        let runtime = Runtime::new("t", Inventory::new(vec![Host::local()]));
        Context::new(runtime, crate::cache::shared(), crate::cache::shared())
    }

    #[tokio::test]
    async fn test_prepare_collection_all_pass() {
        let calls = Arc::new(AtomicU32::new(0));
        let collection = PrepareCollection::new(vec![
            Arc::new(StubPrepare {
                pass: true,
                calls: calls.clone(),
            }),
            Arc::new(StubPrepare {
                pass: true,
                calls: calls.clone(),
            }),
        ]);

        assert!(collection.pre_check(&ctx()).await.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_prepare_collection_short_circuits() {
        let calls = Arc::new(AtomicU32::new(0));
        let collection = PrepareCollection::new(vec![
            Arc::new(StubPrepare {
                pass: false,
                calls: calls.clone(),
            }),
            Arc::new(StubPrepare {
                pass: true,
                calls: calls.clone(),
            }),
        ]);

        assert!(!collection.pre_check(&ctx()).await.unwrap());
        // The second check never ran
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
