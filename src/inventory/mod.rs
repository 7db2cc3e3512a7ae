// Inventory module for fleet host management

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::output::errors::ArmadaError;

/// Well-known cluster roles
pub mod role {
    pub const CONTROL_PLANE: &str = "control-plane";
    pub const WORKER: &str = "worker";
    pub const ETCD: &str = "etcd";
    pub const REGISTRY: &str = "registry";
}

/// Name of the synthetic host backing local tasks
pub const LOCAL_HOST_NAME: &str = "localhost";

fn default_port() -> u16 {
    22
}

fn default_arch() -> String {
    "amd64".to_string()
}

/// Bastion (jump host) settings for hosts that are not directly reachable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bastion {
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Defaults to the target host's user when unset
    #[serde(default)]
    pub user: Option<String>,
}

/// A single machine in the managed fleet.
///
/// Hosts are immutable for the duration of a run and shared read-only
/// (`Arc<Host>`) by every task that targets them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub name: String,
    pub address: String,
    /// Address used for traffic inside the cluster, when it differs from the
    /// management address
    #[serde(default)]
    pub internal_address: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
    /// In-memory PEM private key
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,
    /// SSH agent socket path; the `env:NAME` form resolves the path from the
    /// named environment variable
    #[serde(default)]
    pub agent_socket: Option<String>,
    #[serde(default = "default_arch")]
    pub arch: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub bastion: Option<Bastion>,
    /// Dial timeout in seconds; the transport default applies when unset
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl Host {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Host {
            address: name.clone(),
            name,
            internal_address: None,
            port: 22,
            user: String::new(),
            password: None,
            private_key: None,
            private_key_path: None,
            agent_socket: None,
            arch: default_arch(),
            roles: Vec::new(),
            bastion: None,
            timeout: None,
        }
    }

    /// The synthetic host bound by local tasks
    pub fn local() -> Self {
        let mut host = Host::new(LOCAL_HOST_NAME);
        host.address = "127.0.0.1".to_string();
        host
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_private_key(mut self, key: impl Into<String>) -> Self {
        self.private_key = Some(key.into());
        self
    }

    pub fn with_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = arch.into();
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn with_bastion(mut self, bastion: Bastion) -> Self {
        self.bastion = Some(bastion);
        self
    }

    pub fn is_local(&self) -> bool {
        self.name == LOCAL_HOST_NAME
            || self.address == "127.0.0.1"
            || self.address == "::1"
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// "address:port" form used as the dial endpoint and pool key
    pub fn ssh_target(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// The full host inventory for a run, queryable by role.
///
/// The role map is built once at construction; hosts never change afterwards.
#[derive(Debug, Default)]
pub struct Inventory {
    hosts: Vec<Arc<Host>>,
    roles: HashMap<String, Vec<Arc<Host>>>,
}

#[derive(Deserialize)]
struct InventoryFile {
    hosts: Vec<Host>,
}

impl Inventory {
    pub fn new(hosts: Vec<Host>) -> Self {
        let hosts: Vec<Arc<Host>> = hosts.into_iter().map(Arc::new).collect();
        let mut roles: HashMap<String, Vec<Arc<Host>>> = HashMap::new();
        for host in &hosts {
            for role in &host.roles {
                roles.entry(role.clone()).or_default().push(host.clone());
            }
        }
        Inventory { hosts, roles }
    }

    /// Load a YAML inventory document (`hosts: [...]`)
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ArmadaError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ArmadaError::Io {
            message: format!("failed to read inventory: {}", e),
            path: Some(path.to_path_buf()),
        })?;
        let file: InventoryFile =
            serde_yaml::from_str(&content).map_err(|e| ArmadaError::Inventory {
                message: format!("invalid inventory {}: {}", path.display(), e),
                suggestion: Some(
                    "The inventory is a YAML document with a top-level 'hosts' list".to_string(),
                ),
            })?;
        if file.hosts.is_empty() {
            return Err(ArmadaError::Inventory {
                message: format!("inventory {} contains no hosts", path.display()),
                suggestion: None,
            });
        }
        Ok(Inventory::new(file.hosts))
    }

    pub fn all_hosts(&self) -> &[Arc<Host>] {
        &self.hosts
    }

    /// Hosts carrying the given role, in inventory order; empty when the role
    /// is unknown
    pub fn hosts_by_role(&self, role: &str) -> Vec<Arc<Host>> {
        self.roles.get(role).cloned().unwrap_or_default()
    }

    pub fn host(&self, name: &str) -> Option<Arc<Host>> {
        self.hosts.iter().find(|h| h.name == name).cloned()
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}
