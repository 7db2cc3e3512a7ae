// Composed units of work: modules, pipelines, cache scoping

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info};

use super::graph::DependencyGraph;
use super::runtime::Runtime;
use super::Task;
use crate::cache::{self, Cache};
use crate::output::errors::ArmadaError;
use crate::output::terminal::{RunRecap, TerminalOutput};

/// A named, fixed linear sequence of tasks sharing one module-scoped cache.
///
/// `requires` names other modules this one builds on. The references are
/// validated for cycles while the pipeline is composed; they never reorder
/// execution, which stays the declared module order.
pub struct TaskModule {
    pub name: String,
    pub desc: String,
    tasks: Vec<Box<dyn Task>>,
    requires: Vec<String>,
}

impl TaskModule {
    pub fn new(name: impl Into<String>) -> Self {
        TaskModule {
            name: name.into(),
            desc: String::new(),
            tasks: Vec::new(),
            requires: Vec::new(),
        }
    }

    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = desc.into();
        self
    }

    pub fn add_task(mut self, task: impl Task + 'static) -> Self {
        self.tasks.push(Box::new(task));
        self
    }

    pub fn requires(mut self, module: impl Into<String>) -> Self {
        self.requires.push(module.into());
        self
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }
}

/// An ordered run of modules over one shared runtime.
///
/// The pipeline cache lives for the whole run; each module gets a fresh
/// module cache that is dropped when the module finishes. The first failed
/// task rolls back, stops the run, and surfaces its combined per-host error.
pub struct Pipeline {
    pub name: String,
    runtime: Runtime,
    pipeline_cache: Arc<Cache>,
    modules: Vec<TaskModule>,
    graph: DependencyGraph,
    reporter: Option<TerminalOutput>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>, runtime: Runtime) -> Self {
        Pipeline {
            name: name.into(),
            runtime,
            pipeline_cache: cache::shared(),
            modules: Vec::new(),
            graph: DependencyGraph::new(),
            reporter: None,
        }
    }

    pub fn with_reporter(mut self, reporter: TerminalOutput) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Register a module, validating its composition references. An edge that
    /// closes a cycle rejects the module before anything is scheduled.
    pub fn add_module(&mut self, module: TaskModule) -> Result<(), ArmadaError> {
        for required in &module.requires {
            if self.graph.add_edge_and_check_cycle(&module.name, required) {
                return Err(ArmadaError::Graph {
                    message: format!(
                        "module reference cycle introduced by {} -> {}",
                        module.name, required
                    ),
                });
            }
        }
        self.modules.push(module);
        Ok(())
    }

    pub fn pipeline_cache(&self) -> &Arc<Cache> {
        &self.pipeline_cache
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// Run every module in order. Connections are torn down when the run
    /// ends, successful or not.
    pub async fn run(&mut self) -> Result<RunRecap, ArmadaError> {
        self.runtime.generate_work_dir()?;
        info!(pipeline = %self.name, modules = self.modules.len(), "pipeline starting");
        if let Some(ref reporter) = self.reporter {
            reporter.print_pipeline_header(&self.name, self.runtime.all_hosts().len());
        }

        let outcome = Self::run_modules(
            &mut self.modules,
            &self.runtime,
            &self.pipeline_cache,
            self.reporter.as_ref(),
        )
        .await;

        self.runtime.connector().close_all();

        match &outcome {
            Ok(_) => info!(pipeline = %self.name, "pipeline finished"),
            Err(e) => error!(pipeline = %self.name, "pipeline failed: {}", e.brief()),
        }
        outcome
    }

    async fn run_modules(
        modules: &mut [TaskModule],
        runtime: &Runtime,
        pipeline_cache: &Arc<Cache>,
        reporter: Option<&TerminalOutput>,
    ) -> Result<RunRecap, ArmadaError> {
        let started = Instant::now();
        let mut recap = RunRecap::new();

        for module in modules.iter_mut() {
            info!(module = %module.name, "module starting");
            if let Some(reporter) = reporter {
                reporter.print_module_header(&module.name);
            }

            // One fresh cache per composed unit; dropped when the unit ends
            let module_cache = cache::shared();

            for task in module.tasks.iter_mut() {
                task.init(runtime, module_cache.clone(), pipeline_cache.clone());
                if let Some(reporter) = reporter {
                    reporter.print_task_header(task.name());
                }

                let result = task.execute().await;
                recap.record(&result);
                if let Some(reporter) = reporter {
                    reporter.print_task_result(&result);
                }

                if result.is_failed() {
                    task.execute_rollback().await;

                    recap.total_duration = started.elapsed();
                    if let Some(reporter) = reporter {
                        reporter.print_recap(&recap);
                    }
                    return Err(result
                        .combine_err(task.name())
                        .unwrap_or_else(|| ArmadaError::Task {
                            task: task.name().to_string(),
                            message: "task failed".to_string(),
                        }));
                }
            }
        }

        recap.total_duration = started.elapsed();
        if let Some(reporter) = reporter {
            reporter.print_recap(&recap);
        }
        Ok(recap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::runtime::Context;
    use crate::engine::task::LocalTask;
    use crate::engine::{Action, ActionResult, Rollback};
    use crate::inventory::{Host, Inventory};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StoreAction {
        key: String,
        value: String,
        pipeline_scope: bool,
    }

    #[async_trait]
    impl Action for StoreAction {
        async fn execute(&self, ctx: &Context) -> Result<(), ArmadaError> {
            let cache = if self.pipeline_scope {
                ctx.pipeline_cache()
            } else {
                ctx.module_cache()
            };
            cache.set(&self.key, self.value.clone());
            Ok(())
        }
    }

    struct ExpectAction {
        key: String,
        expected: Option<String>,
        pipeline_scope: bool,
    }

    #[async_trait]
    impl Action for ExpectAction {
        async fn execute(&self, ctx: &Context) -> Result<(), ArmadaError> {
            let cache = if self.pipeline_scope {
                ctx.pipeline_cache()
            } else {
                ctx.module_cache()
            };
            let found = cache.get_string(&self.key);
            if found == self.expected {
                Ok(())
            } else {
                Err(ArmadaError::Task {
                    task: "expect".to_string(),
                    message: format!("expected {:?}, found {:?}", self.expected, found),
                })
            }
        }
    }

    struct CountingAction {
        calls: Arc<AtomicU32>,
        fail: bool,
    }

    #[async_trait]
    impl Action for CountingAction {
        async fn execute(&self, _ctx: &Context) -> Result<(), ArmadaError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ArmadaError::Task {
                    task: "stub".to_string(),
                    message: "simulated failure".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    struct CountingRollback {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Rollback for CountingRollback {
        async fn execute(&self, _ctx: &Context, _last: &ActionResult) -> Result<(), ArmadaError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn runtime() -> Runtime {
        let dir = tempfile::tempdir().unwrap();
        Runtime::new("test-pipeline", Inventory::new(vec![Host::local()]))
            .with_work_dir(dir.into_path())
    }

    #[tokio::test]
    async fn test_module_cache_does_not_leak_across_modules() {
        let mut pipeline = Pipeline::new("scope-check", runtime());

        pipeline
            .add_module(
                TaskModule::new("producer")
                    .add_task(LocalTask::new(
                        "store-module",
                        StoreAction {
                            key: "etcd-version".to_string(),
                            value: "3.5".to_string(),
                            pipeline_scope: false,
                        },
                    ))
                    .add_task(LocalTask::new(
                        "store-pipeline",
                        StoreAction {
                            key: "cluster-name".to_string(),
                            value: "prod".to_string(),
                            pipeline_scope: true,
                        },
                    ))
                    .add_task(LocalTask::new(
                        "visible-within-module",
                        ExpectAction {
                            key: "etcd-version".to_string(),
                            expected: Some("3.5".to_string()),
                            pipeline_scope: false,
                        },
                    )),
            )
            .unwrap();

        pipeline
            .add_module(
                TaskModule::new("consumer")
                    .add_task(LocalTask::new(
                        "module-scope-was-discarded",
                        ExpectAction {
                            key: "etcd-version".to_string(),
                            expected: None,
                            pipeline_scope: false,
                        },
                    ))
                    .add_task(LocalTask::new(
                        "pipeline-scope-survives",
                        ExpectAction {
                            key: "cluster-name".to_string(),
                            expected: Some("prod".to_string()),
                            pipeline_scope: true,
                        },
                    )),
            )
            .unwrap();

        let recap = pipeline.run().await.unwrap();
        assert_eq!(recap.tasks, 5);
        assert_eq!(recap.failed, 0);
    }

    #[tokio::test]
    async fn test_first_failure_stops_run_and_rolls_back() {
        let rollback_calls = Arc::new(AtomicU32::new(0));
        let later_calls = Arc::new(AtomicU32::new(0));

        let mut pipeline = Pipeline::new("failing", runtime());
        pipeline
            .add_module(
                TaskModule::new("install")
                    .add_task(
                        LocalTask::new(
                            "doomed",
                            CountingAction {
                                calls: Arc::new(AtomicU32::new(0)),
                                fail: true,
                            },
                        )
                        .with_rollback(CountingRollback {
                            calls: rollback_calls.clone(),
                        }),
                    )
                    .add_task(LocalTask::new(
                        "never-reached",
                        CountingAction {
                            calls: later_calls.clone(),
                            fail: false,
                        },
                    )),
            )
            .unwrap();

        let err = pipeline.run().await.unwrap_err();
        assert!(err.brief().contains("host(s) failed"));
        assert_eq!(rollback_calls.load(Ordering::SeqCst), 1);
        assert_eq!(later_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cyclic_module_references_are_rejected() {
        let mut pipeline = Pipeline::new("cyclic", runtime());

        pipeline
            .add_module(TaskModule::new("etcd").requires("certs"))
            .unwrap();
        pipeline
            .add_module(TaskModule::new("certs").requires("registry"))
            .unwrap();

        let err = pipeline
            .add_module(TaskModule::new("registry").requires("etcd"))
            .unwrap_err();
        assert!(err.brief().contains("cycle"));
        // The rejected module was not registered
        assert_eq!(pipeline.module_count(), 2);
    }

    #[tokio::test]
    async fn test_self_reference_is_rejected() {
        let mut pipeline = Pipeline::new("selfref", runtime());
        assert!(pipeline
            .add_module(TaskModule::new("bootstrap").requires("bootstrap"))
            .is_err());
    }
}
