// Local and remote task scheduling: retry, timeout, fan-out, rollback

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};

use super::result::{ActionResult, TaskResult};
use super::runtime::{Context, Runtime};
use super::{Action, Prepare, Rollback, Task};
use crate::cache::Cache;
use crate::inventory::Host;
use crate::output::errors::ArmadaError;
use crate::transport::{Connection, LocalConnection, Runner};

pub const DEFAULT_TASK_NAME: &str = "unnamed task";
const DEFAULT_REMOTE_RETRY: u32 = 3;
const DEFAULT_LOCAL_RETRY: u32 = 1;
const DEFAULT_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120 * 60);

/// Run the precondition under the task's retry policy.
///
/// An error counts as a failed check and is retried after the delay; a clean
/// negative is an immediate skip and is never retried. Exhaustion folds every
/// attempt's error into one message.
async fn pre_check_with_retry(
    prepare: Option<&Arc<dyn Prepare>>,
    ctx: &Context,
    task: &str,
    host: &str,
    retry: u32,
    delay: Duration,
) -> Result<bool, ArmadaError> {
    let prepare = match prepare {
        Some(p) => p,
        None => return Ok(true),
    };

    let mut attempts: Vec<String> = Vec::new();
    for i in 0..retry {
        match prepare.pre_check(ctx).await {
            Ok(pass) => return Ok(pass),
            Err(e) => {
                warn!(task, host, attempt = i + 1, "pre-check failed: {}", e.brief());
                attempts.push(e.brief());
                if i + 1 < retry {
                    info!(host, "retry: pre-check");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    Err(ArmadaError::Task {
        task: task.to_string(),
        message: format!(
            "pre-check failed after {} attempts: {}",
            retry,
            attempts.join("; ")
        ),
    })
}

/// Run the unit of work under the task's retry policy; any attempt's success
/// ends the loop
async fn execute_with_retry(
    action: &Arc<dyn Action>,
    ctx: &Context,
    task: &str,
    host: &str,
    retry: u32,
    delay: Duration,
) -> Result<(), ArmadaError> {
    let mut attempts: Vec<String> = Vec::new();
    for i in 0..retry {
        match action.execute(ctx).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(task, host, attempt = i + 1, "action failed: {}", e.brief());
                attempts.push(e.brief());
                if i + 1 < retry {
                    info!(host, "retry: action");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    Err(ArmadaError::Task {
        task: task.to_string(),
        message: format!(
            "action failed after {} attempts: {}",
            retry,
            attempts.join("; ")
        ),
    })
}

/// A unit of work that runs once per target host.
///
/// Each host gets an independent sequence (connect, pre-check with retry,
/// action with retry, record) raced against one task-wide deadline. Host
/// sequences pass through the process-wide scheduling pool and, when
/// `parallel` is set, through a per-task lane bound derived from
/// `concurrency`.
///
/// Deadline handling is cooperative: a host sequence that misses the deadline
/// is recorded as failed and abandoned, but a remote command already in
/// flight keeps running on the host until it returns. Callers that cannot
/// accept that may close the host's connection themselves.
pub struct RemoteTask {
    pub name: String,
    pub desc: String,
    pub hosts: Vec<Arc<Host>>,
    pub prepare: Option<Arc<dyn Prepare>>,
    pub action: Arc<dyn Action>,
    pub rollback: Option<Arc<dyn Rollback>>,
    pub parallel: bool,
    pub retry: u32,
    pub delay: Duration,
    pub timeout: Duration,
    /// Fraction in (0,1] of this task's hosts allowed to run at once
    pub concurrency: f64,

    runtime: Option<Runtime>,
    module_cache: Option<Arc<Cache>>,
    pipeline_cache: Option<Arc<Cache>>,
    result: Arc<TaskResult>,
}

impl RemoteTask {
    pub fn new(
        name: impl Into<String>,
        hosts: Vec<Arc<Host>>,
        action: impl Action + 'static,
    ) -> Self {
        RemoteTask {
            name: name.into(),
            desc: String::new(),
            hosts,
            prepare: None,
            action: Arc::new(action),
            rollback: None,
            parallel: false,
            retry: 0,
            delay: Duration::ZERO,
            timeout: Duration::ZERO,
            concurrency: 1.0,
            runtime: None,
            module_cache: None,
            pipeline_cache: None,
            result: Arc::new(TaskResult::new()),
        }
    }

    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = desc.into();
        self
    }

    pub fn with_prepare(mut self, prepare: impl Prepare + 'static) -> Self {
        self.prepare = Some(Arc::new(prepare));
        self
    }

    pub fn with_rollback(mut self, rollback: impl Rollback + 'static) -> Self {
        self.rollback = Some(Arc::new(rollback));
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: f64) -> Self {
        self.concurrency = concurrency;
        self
    }

    fn apply_defaults(&mut self) {
        if self.name.is_empty() {
            self.name = DEFAULT_TASK_NAME.to_string();
        }
        if self.retry < 1 {
            self.retry = DEFAULT_REMOTE_RETRY;
        }
        if self.delay.is_zero() {
            self.delay = DEFAULT_DELAY;
        }
        if self.timeout.is_zero() {
            self.timeout = DEFAULT_TIMEOUT;
        }
        if self.concurrency <= 0.0 || self.concurrency > 1.0 {
            self.concurrency = 1.0;
        }
        if self.hosts.is_empty() {
            self.result.append_err(
                None,
                ArmadaError::Task {
                    task: self.name.clone(),
                    message: "task has no target hosts".to_string(),
                },
            );
        }
    }

    /// How many of this task's hosts may run at once: round(concurrency * n),
    /// floored at one
    pub fn calculate_concurrency(&self) -> usize {
        let lanes = (self.concurrency * self.hosts.len() as f64).round() as usize;
        lanes.max(1)
    }

    fn context_for(&self, runtime: Runtime) -> Context {
        Context::new(
            runtime,
            self.module_cache.clone().unwrap_or_default(),
            self.pipeline_cache.clone().unwrap_or_default(),
        )
    }

    async fn run_with_timeout(
        &self,
        runtime: Runtime,
        host: Arc<Host>,
        index: usize,
        deadline: Instant,
        lanes: Arc<Semaphore>,
    ) {
        let _slot = match runtime.pool().acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                self.result.append_err(Some(host), e);
                return;
            }
        };
        let _lane = match lanes.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                self.result.append_err(
                    Some(host.clone()),
                    ArmadaError::Task {
                        task: self.name.clone(),
                        message: "task lane semaphore closed".to_string(),
                    },
                );
                return;
            }
        };

        match timeout_at(deadline, self.run_host(runtime, &host, index)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.result.append_err(Some(host), e),
            Err(_) => {
                warn!(task = %self.name, host = %host.name, "host sequence abandoned at deadline");
                self.result.append_err(
                    Some(host.clone()),
                    ArmadaError::Timeout {
                        task: self.name.clone(),
                        host: host.name.clone(),
                        duration: self.timeout,
                    },
                );
            }
        }
    }

    async fn run_host(
        &self,
        mut runtime: Runtime,
        host: &Arc<Host>,
        index: usize,
    ) -> Result<(), ArmadaError> {
        let conn = runtime.connector().connect(host).await?;
        runtime.set_runner(Runner::new(host.clone(), conn, index));
        let ctx = self.context_for(runtime);

        if !pre_check_with_retry(
            self.prepare.as_ref(),
            &ctx,
            &self.name,
            &host.name,
            self.retry,
            self.delay,
        )
        .await?
        {
            debug!(task = %self.name, host = %host.name, "skipped");
            self.result.append_skip(host.clone());
            return Ok(());
        }

        execute_with_retry(
            &self.action,
            &ctx,
            &self.name,
            &host.name,
            self.retry,
            self.delay,
        )
        .await?;

        debug!(task = %self.name, host = %host.name, "success");
        self.result.append_success(host.clone());
        Ok(())
    }

    async fn rollback_with_timeout(
        &self,
        rollback: &Arc<dyn Rollback>,
        runtime: Runtime,
        host: Arc<Host>,
        last: Arc<ActionResult>,
        index: usize,
        deadline: Instant,
    ) {
        let _slot = match runtime.pool().acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                error!(host = %host.name, "rollback could not be scheduled: {}", e.brief());
                return;
            }
        };

        match timeout_at(
            deadline,
            self.run_rollback(rollback, runtime, &host, &last, index),
        )
        .await
        {
            Ok(Ok(())) => info!(task = %self.name, host = %host.name, "rolled back"),
            Ok(Err(e)) => {
                error!(task = %self.name, host = %host.name, "rollback failed: {}", e.brief())
            }
            Err(_) => {
                error!(task = %self.name, host = %host.name, "rollback abandoned at deadline")
            }
        }
    }

    async fn run_rollback(
        &self,
        rollback: &Arc<dyn Rollback>,
        mut runtime: Runtime,
        host: &Arc<Host>,
        last: &ActionResult,
        index: usize,
    ) -> Result<(), ArmadaError> {
        let conn = runtime.connector().connect(host).await?;
        runtime.set_runner(Runner::new(host.clone(), conn, index));
        let ctx = self.context_for(runtime);
        rollback.execute(&ctx, last).await
    }
}

#[async_trait]
impl Task for RemoteTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn desc(&self) -> &str {
        &self.desc
    }

    fn init(&mut self, runtime: &Runtime, module_cache: Arc<Cache>, pipeline_cache: Arc<Cache>) {
        self.runtime = Some(runtime.copy());
        self.module_cache = Some(module_cache);
        self.pipeline_cache = Some(pipeline_cache);
        self.apply_defaults();
    }

    async fn execute(&self) -> Arc<TaskResult> {
        // Configuration errors recorded at init short-circuit execution
        if self.result.is_failed() {
            return self.result.clone();
        }
        let runtime = match &self.runtime {
            Some(r) => r,
            None => {
                self.result.append_err(
                    None,
                    ArmadaError::Task {
                        task: self.name.clone(),
                        message: "task executed before init".to_string(),
                    },
                );
                return self.result.clone();
            }
        };

        info!(task = %self.name, hosts = self.hosts.len(), parallel = self.parallel, "executing");
        let deadline = Instant::now() + self.timeout;
        let lanes = Arc::new(Semaphore::new(self.calculate_concurrency()));

        if self.parallel {
            let sequences: Vec<_> = self
                .hosts
                .iter()
                .enumerate()
                .map(|(index, host)| {
                    self.run_with_timeout(
                        runtime.copy(),
                        host.clone(),
                        index,
                        deadline,
                        lanes.clone(),
                    )
                })
                .collect();
            join_all(sequences).await;
        } else {
            for (index, host) in self.hosts.iter().enumerate() {
                self.run_with_timeout(runtime.copy(), host.clone(), index, deadline, lanes.clone())
                    .await;
            }
        }

        if self.result.is_failed() {
            self.result.err_result();
        } else {
            self.result.normal_result();
        }
        self.result.clone()
    }

    async fn execute_rollback(&self) {
        let rollback = match &self.rollback {
            Some(r) => r,
            None => return,
        };
        if !self.result.is_failed() {
            return;
        }
        let runtime = match &self.runtime {
            Some(r) => r,
            None => return,
        };

        let deadline = Instant::now() + self.timeout;
        let records = self.result.action_results();
        let passes: Vec<_> = records
            .iter()
            .enumerate()
            .filter(|(_, record)| record.status != super::result::ActionStatus::Skipped)
            .filter_map(|(index, record)| {
                let host = record.host.clone()?;
                Some(self.rollback_with_timeout(
                    rollback,
                    runtime.copy(),
                    host,
                    record.clone(),
                    index,
                    deadline,
                ))
            })
            .collect();

        if self.parallel {
            join_all(passes).await;
        } else {
            for pass in passes {
                pass.await;
            }
        }
    }

    fn result(&self) -> Arc<TaskResult> {
        self.result.clone()
    }
}

/// A unit of work that always runs exactly once, bound to the synthetic local
/// host. Used for run-scoped work such as rendering artifacts before they are
/// distributed.
pub struct LocalTask {
    pub name: String,
    pub desc: String,
    pub prepare: Option<Arc<dyn Prepare>>,
    pub action: Arc<dyn Action>,
    pub rollback: Option<Arc<dyn Rollback>>,
    pub retry: u32,
    pub delay: Duration,
    pub timeout: Duration,

    runtime: Option<Runtime>,
    module_cache: Option<Arc<Cache>>,
    pipeline_cache: Option<Arc<Cache>>,
    result: Arc<TaskResult>,
}

impl LocalTask {
    pub fn new(name: impl Into<String>, action: impl Action + 'static) -> Self {
        LocalTask {
            name: name.into(),
            desc: String::new(),
            prepare: None,
            action: Arc::new(action),
            rollback: None,
            retry: 0,
            delay: Duration::ZERO,
            timeout: Duration::ZERO,
            runtime: None,
            module_cache: None,
            pipeline_cache: None,
            result: Arc::new(TaskResult::new()),
        }
    }

    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = desc.into();
        self
    }

    pub fn with_prepare(mut self, prepare: impl Prepare + 'static) -> Self {
        self.prepare = Some(Arc::new(prepare));
        self
    }

    pub fn with_rollback(mut self, rollback: impl Rollback + 'static) -> Self {
        self.rollback = Some(Arc::new(rollback));
        self
    }

    pub fn with_retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn apply_defaults(&mut self) {
        if self.name.is_empty() {
            self.name = DEFAULT_TASK_NAME.to_string();
        }
        if self.retry < 1 {
            self.retry = DEFAULT_LOCAL_RETRY;
        }
        if self.delay.is_zero() {
            self.delay = DEFAULT_DELAY;
        }
        if self.timeout.is_zero() {
            self.timeout = DEFAULT_TIMEOUT;
        }
    }

    fn context_for(&self, runtime: Runtime) -> Context {
        Context::new(
            runtime,
            self.module_cache.clone().unwrap_or_default(),
            self.pipeline_cache.clone().unwrap_or_default(),
        )
    }

    async fn run_host(&self, mut runtime: Runtime, host: &Arc<Host>) -> Result<(), ArmadaError> {
        let conn: Arc<dyn Connection> = Arc::new(LocalConnection::new(&host.name));
        runtime.set_runner(Runner::new(host.clone(), conn, 0));
        let ctx = self.context_for(runtime);

        if !pre_check_with_retry(
            self.prepare.as_ref(),
            &ctx,
            &self.name,
            &host.name,
            self.retry,
            self.delay,
        )
        .await?
        {
            debug!(task = %self.name, "skipped");
            self.result.append_skip(host.clone());
            return Ok(());
        }

        execute_with_retry(
            &self.action,
            &ctx,
            &self.name,
            &host.name,
            self.retry,
            self.delay,
        )
        .await?;

        debug!(task = %self.name, "success");
        self.result.append_success(host.clone());
        Ok(())
    }
}

#[async_trait]
impl Task for LocalTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn desc(&self) -> &str {
        &self.desc
    }

    fn init(&mut self, runtime: &Runtime, module_cache: Arc<Cache>, pipeline_cache: Arc<Cache>) {
        self.runtime = Some(runtime.copy());
        self.module_cache = Some(module_cache);
        self.pipeline_cache = Some(pipeline_cache);
        self.apply_defaults();
    }

    async fn execute(&self) -> Arc<TaskResult> {
        if self.result.is_failed() {
            return self.result.clone();
        }
        let runtime = match &self.runtime {
            Some(r) => r,
            None => {
                self.result.append_err(
                    None,
                    ArmadaError::Task {
                        task: self.name.clone(),
                        message: "task executed before init".to_string(),
                    },
                );
                return self.result.clone();
            }
        };

        info!(task = %self.name, "executing locally");
        let host = Arc::new(Host::local());
        let deadline = Instant::now() + self.timeout;

        match timeout_at(deadline, self.run_host(runtime.copy(), &host)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.result.append_err(Some(host), e),
            Err(_) => {
                self.result.append_err(
                    Some(host.clone()),
                    ArmadaError::Timeout {
                        task: self.name.clone(),
                        host: host.name.clone(),
                        duration: self.timeout,
                    },
                );
            }
        }

        if self.result.is_failed() {
            self.result.err_result();
        } else {
            self.result.normal_result();
        }
        self.result.clone()
    }

    async fn execute_rollback(&self) {
        let rollback = match &self.rollback {
            Some(r) => r,
            None => return,
        };
        if !self.result.is_failed() {
            return;
        }
        let runtime = match &self.runtime {
            Some(r) => r,
            None => return,
        };

        let deadline = Instant::now() + self.timeout;
        for record in self.result.action_results() {
            if record.status == super::result::ActionStatus::Skipped {
                continue;
            }
            let host = match record.host.clone() {
                Some(h) => h,
                None => continue,
            };
            let mut rt = runtime.copy();
            let conn: Arc<dyn Connection> = Arc::new(LocalConnection::new(&host.name));
            rt.set_runner(Runner::new(host.clone(), conn, 0));
            let ctx = self.context_for(rt);

            match timeout_at(deadline, rollback.execute(&ctx, &record)).await {
                Ok(Ok(())) => info!(task = %self.name, "rolled back"),
                Ok(Err(e)) => error!(task = %self.name, "rollback failed: {}", e.brief()),
                Err(_) => error!(task = %self.name, "rollback abandoned at deadline"),
            }
        }
    }

    fn result(&self) -> Arc<TaskResult> {
        self.result.clone()
    }
}
