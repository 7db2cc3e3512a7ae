// Per-host and per-task outcome records

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::inventory::Host;
use crate::output::errors::ArmadaError;

/// Task-level status lattice. NULL until the first terminal write; it never
/// changes afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Null,
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStatus {
    Success,
    Failed,
    Skipped,
}

/// One host's outcome within a task
#[derive(Debug)]
pub struct ActionResult {
    /// None only for configuration errors recorded before any host ran
    pub host: Option<Arc<Host>>,
    pub status: ActionStatus,
    /// Present iff the status is Failed
    pub error: Option<ArmadaError>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl ActionResult {
    pub fn host_name(&self) -> &str {
        self.host.as_ref().map(|h| h.name.as_str()).unwrap_or("unknown")
    }
}

struct Inner {
    status: TaskStatus,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    results: Vec<Arc<ActionResult>>,
}

/// Aggregated result of one task, safe for concurrent per-host writers.
///
/// Action results are append-only and ordered by completion, not by
/// inventory position. `append_err` pins the status to Failed: a single
/// failed host fails the whole task no matter what the finalizers say.
pub struct TaskResult {
    inner: Mutex<Inner>,
}

impl Default for TaskResult {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskResult {
    pub fn new() -> Self {
        let now = Utc::now();
        TaskResult {
            inner: Mutex::new(Inner {
                status: TaskStatus::Null,
                start_time: now,
                end_time: now,
                results: Vec::new(),
            }),
        }
    }

    fn append(&self, host: Option<Arc<Host>>, status: ActionStatus, error: Option<ArmadaError>) {
        let mut inner = self.inner.lock();
        let now = Utc::now();
        inner.end_time = now;
        if status == ActionStatus::Failed {
            inner.status = TaskStatus::Failed;
        }
        let started_at = inner.start_time;
        inner.results.push(Arc::new(ActionResult {
            host,
            status,
            error,
            started_at,
            ended_at: now,
        }));
    }

    pub fn append_success(&self, host: Arc<Host>) {
        self.append(Some(host), ActionStatus::Success, None);
    }

    pub fn append_skip(&self, host: Arc<Host>) {
        self.append(Some(host), ActionStatus::Skipped, None);
    }

    /// Record a failed host and force the task status to Failed
    pub fn append_err(&self, host: Option<Arc<Host>>, err: ArmadaError) {
        self.append(host, ActionStatus::Failed, Some(err));
    }

    fn finalize(&self, status: TaskStatus) {
        let mut inner = self.inner.lock();
        if inner.status == TaskStatus::Null {
            inner.status = status;
            inner.end_time = Utc::now();
        }
    }

    /// Finalize as Success; a no-op once any terminal status is set
    pub fn normal_result(&self) {
        self.finalize(TaskStatus::Success);
    }

    pub fn err_result(&self) {
        self.finalize(TaskStatus::Failed);
    }

    pub fn skipped_result(&self) {
        self.finalize(TaskStatus::Skipped);
    }

    pub fn status(&self) -> TaskStatus {
        self.inner.lock().status
    }

    pub fn is_failed(&self) -> bool {
        self.status() == TaskStatus::Failed
    }

    pub fn is_success(&self) -> bool {
        self.status() == TaskStatus::Success
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.inner.lock().start_time
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.inner.lock().end_time
    }

    /// Snapshot of the per-host records, in completion order
    pub fn action_results(&self) -> Vec<Arc<ActionResult>> {
        self.inner.lock().results.clone()
    }

    pub fn success_count(&self) -> usize {
        self.count(ActionStatus::Success)
    }

    pub fn failed_count(&self) -> usize {
        self.count(ActionStatus::Failed)
    }

    pub fn skipped_count(&self) -> usize {
        self.count(ActionStatus::Skipped)
    }

    fn count(&self, status: ActionStatus) -> usize {
        self.inner
            .lock()
            .results
            .iter()
            .filter(|r| r.status == status)
            .count()
    }

    /// One error aggregating every failed host, for propagation upward
    /// through nested task sequences
    pub fn combine_err(&self, task: &str) -> Option<ArmadaError> {
        let inner = self.inner.lock();
        let failed: Vec<String> = inner
            .results
            .iter()
            .filter(|r| r.status == ActionStatus::Failed)
            .map(|r| {
                let reason = r
                    .error
                    .as_ref()
                    .map(|e| e.brief())
                    .unwrap_or_else(|| "unknown error".to_string());
                format!("[{}] {}", r.host_name(), reason)
            })
            .collect();

        if failed.is_empty() {
            return None;
        }
        Some(ArmadaError::Task {
            task: task.to_string(),
            message: format!("{} host(s) failed: {}", failed.len(), failed.join("; ")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(name: &str) -> Arc<Host> {
        Arc::new(Host::new(name))
    }

    fn err(msg: &str) -> ArmadaError {
        ArmadaError::Task {
            task: "t".to_string(),
            message: msg.to_string(),
        }
    }

    #[test]
    fn test_append_err_forces_failed() {
        let result = TaskResult::new();
        result.append_success(host("a"));
        result.append_success(host("b"));
        result.append_err(Some(host("c")), err("boom"));

        assert!(result.is_failed());

        // A later success append and finalize cannot undo the failure
        result.append_success(host("d"));
        result.normal_result();
        assert!(result.is_failed());
    }

    #[test]
    fn test_finalize_first_write_wins() {
        let result = TaskResult::new();
        result.append_success(host("a"));
        result.normal_result();
        result.err_result();
        result.skipped_result();

        assert!(result.is_success());
    }

    #[test]
    fn test_skip_does_not_count_as_failure() {
        let result = TaskResult::new();
        result.append_skip(host("a"));
        result.skipped_result();

        assert_eq!(result.status(), TaskStatus::Skipped);
        assert_eq!(result.failed_count(), 0);
        assert_eq!(result.skipped_count(), 1);
    }

    #[test]
    fn test_combine_err_lists_every_failed_host() {
        let result = TaskResult::new();
        result.append_success(host("a"));
        result.append_err(Some(host("b")), err("disk full"));
        result.append_err(Some(host("c")), err("unreachable"));

        let combined = result.combine_err("install etcd").unwrap();
        let brief = combined.brief();
        assert!(brief.contains("2 host(s) failed"));
        assert!(brief.contains("[b]"));
        assert!(brief.contains("disk full"));
        assert!(brief.contains("[c]"));
        assert!(brief.contains("unreachable"));
    }

    #[test]
    fn test_combine_err_none_when_nothing_failed() {
        let result = TaskResult::new();
        result.append_success(host("a"));
        assert!(result.combine_err("t").is_none());
    }

    #[test]
    fn test_results_keep_completion_order() {
        let result = TaskResult::new();
        result.append_success(host("b"));
        result.append_skip(host("a"));
        result.append_success(host("c"));

        let names: Vec<String> = result
            .action_results()
            .iter()
            .map(|r| r.host_name().to_string())
            .collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_concurrent_appends() {
        let result = Arc::new(TaskResult::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let result = result.clone();
            handles.push(std::thread::spawn(move || {
                if i % 4 == 0 {
                    result.append_err(Some(host(&format!("h{}", i))), err("x"));
                } else {
                    result.append_success(host(&format!("h{}", i)));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(result.action_results().len(), 16);
        assert_eq!(result.failed_count(), 4);
        assert!(result.is_failed());
    }

    #[test]
    fn test_end_time_advances_on_append() {
        let result = TaskResult::new();
        let before = result.end_time();
        std::thread::sleep(std::time::Duration::from_millis(5));
        result.append_success(host("a"));
        assert!(result.end_time() > before);
    }
}
