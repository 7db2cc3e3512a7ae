// Run context: inventory view, connector, scheduling pool, runner binding

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::cache::Cache;
use crate::inventory::{Host, Inventory};
use crate::output::errors::ArmadaError;
use crate::transport::{Connector, Runner};

/// Process-wide ceiling on concurrently executing host sequences
pub const DEFAULT_POOL_SIZE: usize = 10;

/// The global scheduling pool: a counting semaphore shared by every remote
/// task in the run. However parallel an individual task is configured, at most
/// this many host sequences execute at once across the whole process.
pub struct SchedulePool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl SchedulePool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        SchedulePool {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, ArmadaError> {
        self.permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ArmadaError::Task {
                task: "scheduling pool".to_string(),
                message: "scheduling pool closed".to_string(),
            })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

impl Default for SchedulePool {
    fn default() -> Self {
        SchedulePool::new(DEFAULT_POOL_SIZE)
    }
}

/// Per-run execution context handed to every task.
///
/// The inventory, connector and pool are shared across copies; the runner
/// binding is not. Every per-host execution works on its own `copy()`, so
/// concurrent host sequences never alias the same runner.
#[derive(Clone)]
pub struct Runtime {
    name: String,
    connector: Arc<Connector>,
    inventory: Arc<Inventory>,
    pool: Arc<SchedulePool>,
    work_dir: PathBuf,
    runner: Option<Runner>,
}

impl Runtime {
    pub fn new(name: impl Into<String>, inventory: Inventory) -> Self {
        Runtime {
            name: name.into(),
            connector: Arc::new(Connector::new()),
            inventory: Arc::new(inventory),
            pool: Arc::new(SchedulePool::default()),
            work_dir: std::env::temp_dir().join("armada"),
            runner: None,
        }
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool = Arc::new(SchedulePool::new(size));
        self
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Clone the context for one per-host execution
    pub fn copy(&self) -> Runtime {
        self.clone()
    }

    pub fn set_runner(&mut self, runner: Runner) {
        self.runner = Some(runner);
    }

    /// The live runner for the currently bound host
    pub fn runner(&self) -> Result<&Runner, ArmadaError> {
        self.runner.as_ref().ok_or_else(|| ArmadaError::Task {
            task: self.name.clone(),
            message: "no runner bound to this context".to_string(),
        })
    }

    /// The host currently bound to this copy of the context
    pub fn remote_host(&self) -> Result<&Arc<Host>, ArmadaError> {
        Ok(&self.runner()?.host)
    }

    pub fn all_hosts(&self) -> &[Arc<Host>] {
        self.inventory.all_hosts()
    }

    pub fn hosts_by_role(&self, role: &str) -> Vec<Arc<Host>> {
        self.inventory.hosts_by_role(role)
    }

    pub fn inventory(&self) -> &Arc<Inventory> {
        &self.inventory
    }

    pub fn connector(&self) -> &Arc<Connector> {
        &self.connector
    }

    pub fn pool(&self) -> &Arc<SchedulePool> {
        &self.pool
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Per-host scratch directory under the run's work dir
    pub fn host_work_dir(&self) -> Result<PathBuf, ArmadaError> {
        Ok(self.work_dir.join(&self.remote_host()?.name))
    }

    /// Create the work dir plus one subdirectory per inventory host
    pub fn generate_work_dir(&self) -> Result<(), ArmadaError> {
        std::fs::create_dir_all(&self.work_dir).map_err(|e| ArmadaError::Io {
            message: format!("failed to create work dir: {}", e),
            path: Some(self.work_dir.clone()),
        })?;
        for host in self.inventory.all_hosts() {
            let sub = self.work_dir.join(&host.name);
            std::fs::create_dir_all(&sub).map_err(|e| ArmadaError::Io {
                message: format!("failed to create host work dir: {}", e),
                path: Some(sub.clone()),
            })?;
        }
        Ok(())
    }
}

/// What a capability sees while it runs: the per-host runtime copy plus the
/// two cache scopes of its owning task
pub struct Context {
    runtime: Runtime,
    module_cache: Arc<Cache>,
    pipeline_cache: Arc<Cache>,
}

impl Context {
    pub fn new(runtime: Runtime, module_cache: Arc<Cache>, pipeline_cache: Arc<Cache>) -> Self {
        Context {
            runtime,
            module_cache,
            pipeline_cache,
        }
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn runner(&self) -> Result<&Runner, ArmadaError> {
        self.runtime.runner()
    }

    pub fn host(&self) -> Result<&Arc<Host>, ArmadaError> {
        self.runtime.remote_host()
    }

    /// Cache scoped to the owning composed unit
    pub fn module_cache(&self) -> &Arc<Cache> {
        &self.module_cache
    }

    /// Cache scoped to the whole run
    pub fn pipeline_cache(&self) -> &Arc<Cache> {
        &self.pipeline_cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::role;
    use crate::transport::LocalConnection;

    fn runtime() -> Runtime {
        let inventory = Inventory::new(vec![
            Host::new("cp-1").with_role(role::CONTROL_PLANE),
            Host::new("worker-1").with_role(role::WORKER),
        ]);
        Runtime::new("test-run", inventory)
    }

    #[test]
    fn test_runner_unbound_by_default() {
        let rt = runtime();
        assert!(rt.runner().is_err());
        assert!(rt.remote_host().is_err());
    }

    #[test]
    fn test_copy_isolates_runner_binding() {
        let rt = runtime();
        let host = rt.hosts_by_role(role::WORKER)[0].clone();

        let mut copy = rt.copy();
        copy.set_runner(Runner::new(
            host,
            Arc::new(LocalConnection::new("worker-1")),
            0,
        ));

        assert_eq!(copy.remote_host().unwrap().name, "worker-1");
        // The original binding is untouched
        assert!(rt.remote_host().is_err());
    }

    #[test]
    fn test_role_queries_pass_through() {
        let rt = runtime();
        assert_eq!(rt.hosts_by_role(role::CONTROL_PLANE).len(), 1);
        assert_eq!(rt.all_hosts().len(), 2);
        assert!(rt.hosts_by_role(role::ETCD).is_empty());
    }

    #[tokio::test]
    async fn test_pool_bounds_permits() {
        let pool = SchedulePool::new(2);
        assert_eq!(pool.size(), 2);

        let first = pool.acquire().await.unwrap();
        let _second = pool.acquire().await.unwrap();
        assert_eq!(pool.available(), 0);

        drop(first);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_pool_floor_of_one() {
        let pool = SchedulePool::new(0);
        assert_eq!(pool.size(), 1);
    }
}
