// Armada CLI - fleet provisioning orchestrator

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use armada::engine::{Pipeline, RemoteTask, Runtime, TaskModule};
use armada::inventory::{Host, Inventory};
use armada::modules::CommandAction;
use armada::output::{ArmadaError, TerminalOutput};

#[derive(Parser)]
#[command(
    name = "armada",
    about = "Fleet provisioning orchestrator",
    version,
    disable_colored_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode - only show errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an ad-hoc command across the fleet
    Run {
        /// Shell command to execute on each target host
        command: String,

        /// Path to the inventory file
        #[arg(short, long)]
        inventory: PathBuf,

        /// Limit targets to hosts carrying this role
        #[arg(short, long)]
        role: Option<String>,

        /// Run with privilege escalation
        #[arg(short, long)]
        sudo: bool,

        /// Attempts per host
        #[arg(long, default_value = "1")]
        retry: u32,

        /// Seconds to sleep between attempts
        #[arg(long, default_value = "5")]
        delay: u64,

        /// Task deadline in seconds
        #[arg(long, default_value = "300")]
        timeout: u64,

        /// Process-wide concurrency ceiling
        #[arg(long, default_value = "10")]
        forks: usize,

        /// Prompt for an SSH password applied to every host
        #[arg(short = 'k', long)]
        ask_pass: bool,
    },

    /// Check connectivity to every host in the inventory
    Ping {
        /// Path to the inventory file
        #[arg(short, long)]
        inventory: PathBuf,

        /// Limit targets to hosts carrying this role
        #[arg(short, long)]
        role: Option<String>,

        /// Prompt for an SSH password applied to every host
        #[arg(short = 'k', long)]
        ask_pass: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{}", e);
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<(), ArmadaError> {
    match cli.command {
        Commands::Run {
            command,
            inventory,
            role,
            sudo,
            retry,
            delay,
            timeout,
            forks,
            ask_pass,
        } => {
            let inventory = load_inventory(&inventory, ask_pass)?;
            let hosts = select_hosts(&inventory, role.as_deref())?;

            let task = RemoteTask::new(
                "ad-hoc command",
                hosts,
                CommandAction::new(command.as_str()).with_sudo(sudo),
            )
            .with_desc(command)
            .with_parallel(true)
            .with_retry(retry)
            .with_delay(Duration::from_secs(delay))
            .with_timeout(Duration::from_secs(timeout));

            let runtime = Runtime::new("ad-hoc", inventory).with_pool_size(forks);
            let mut pipeline = Pipeline::new("ad-hoc", runtime)
                .with_reporter(TerminalOutput::new(cli.verbose, cli.quiet));
            pipeline.add_module(TaskModule::new("ad-hoc").add_task(task))?;
            pipeline.run().await?;
            Ok(())
        }

        Commands::Ping {
            inventory,
            role,
            ask_pass,
        } => {
            let inventory = load_inventory(&inventory, ask_pass)?;
            let hosts = select_hosts(&inventory, role.as_deref())?;

            let task = RemoteTask::new("ping", hosts, CommandAction::new("echo pong"))
                .with_parallel(true)
                .with_retry(1)
                .with_timeout(Duration::from_secs(30));

            let runtime = Runtime::new("ping", inventory);
            let mut pipeline = Pipeline::new("ping", runtime)
                .with_reporter(TerminalOutput::new(cli.verbose, cli.quiet));
            pipeline.add_module(TaskModule::new("ping").add_task(task))?;
            pipeline.run().await?;
            Ok(())
        }
    }
}

fn load_inventory(path: &PathBuf, ask_pass: bool) -> Result<Inventory, ArmadaError> {
    let inventory = Inventory::from_path(path)?;
    if !ask_pass {
        return Ok(inventory);
    }

    let password = rpassword::prompt_password("SSH password: ").map_err(|e| ArmadaError::Io {
        message: format!("failed to read password: {}", e),
        path: None,
    })?;

    let hosts: Vec<Host> = inventory
        .all_hosts()
        .iter()
        .map(|h| {
            let mut host = (**h).clone();
            host.password = Some(password.clone());
            host
        })
        .collect();
    Ok(Inventory::new(hosts))
}

fn select_hosts(
    inventory: &Inventory,
    role: Option<&str>,
) -> Result<Vec<Arc<Host>>, ArmadaError> {
    let hosts = match role {
        Some(role) => inventory.hosts_by_role(role),
        None => inventory.all_hosts().to_vec(),
    };
    if hosts.is_empty() {
        return Err(ArmadaError::Inventory {
            message: match role {
                Some(role) => format!("no hosts carry the role '{}'", role),
                None => "the inventory is empty".to_string(),
            },
            suggestion: Some("Check the inventory file and role spelling".to_string()),
        });
    }
    Ok(hosts)
}
