// Armada - Fleet Provisioning Orchestrator
//
// Turns declarative tasks ("run this unit of work on this set of hosts, with
// this many retries, this timeout, this degree of parallelism") into
// scheduled, fault-tolerant execution over SSH, with partial-failure
// isolation and best-effort rollback.

pub mod cache;
pub mod engine;
pub mod inventory;
pub mod modules;
pub mod output;
pub mod transport;

pub use cache::Cache;
pub use engine::{
    Action, Context, DependencyGraph, LocalTask, Pipeline, Prepare, RemoteTask, Rollback, Runtime,
    SchedulePool, Task, TaskModule, TaskResult,
};
pub use inventory::{Host, Inventory};
pub use output::{ArmadaError, RunRecap, TerminalOutput};
pub use transport::{Connection, Connector, Runner, SshConfig, SshConnection};

/// Version of the Armada tool
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::engine::{
        Action, Context, LocalTask, Pipeline, Prepare, RemoteTask, Rollback, Runtime, Task,
        TaskModule,
    };
    pub use crate::inventory::{Host, Inventory};
    pub use crate::output::{ArmadaError, RunRecap, TerminalOutput};
    pub use crate::transport::Runner;
}
