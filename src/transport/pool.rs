// Connection establishment and reuse, one connection per host

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::{Connection, LocalConnection, SshConfig, SshConnection};
use crate::inventory::Host;
use crate::output::errors::ArmadaError;

/// Dials hosts and caches the resulting connections by host name.
///
/// A cached connection is handed back as long as it is open; a closed one is
/// replaced by a fresh dial. Establishment failures are returned to the caller
/// untouched: retrying them is the scheduler's decision, never the
/// transport's.
#[derive(Default)]
pub struct Connector {
    connections: DashMap<String, Arc<dyn Connection>>,
}

impl Connector {
    pub fn new() -> Self {
        Connector {
            connections: DashMap::new(),
        }
    }

    /// Establish or reuse the connection for a host
    pub async fn connect(&self, host: &Arc<Host>) -> Result<Arc<dyn Connection>, ArmadaError> {
        if let Some(existing) = self.connections.get(&host.name) {
            if !existing.is_closed() {
                return Ok(existing.clone());
            }
        }

        let conn: Arc<dyn Connection> = if host.is_local() {
            Arc::new(LocalConnection::new(&host.name))
        } else {
            let cfg = SshConfig::from_host(host);
            let connected = tokio::task::spawn_blocking(move || SshConnection::connect(cfg))
                .await
                .map_err(|e| ArmadaError::Ssh {
                    host: host.name.clone(),
                    message: format!("connect worker failed: {}", e),
                    suggestion: None,
                })??;
            Arc::new(connected)
        };

        debug!(host = %host.name, target = %host.ssh_target(), "connected");
        self.connections.insert(host.name.clone(), conn.clone());
        Ok(conn)
    }

    /// Close and forget every cached connection
    pub fn close_all(&self) {
        for entry in self.connections.iter() {
            entry.value().close();
        }
        self.connections.clear();
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_connection_is_reused() {
        let connector = Connector::new();
        let host = Arc::new(Host::local());

        let first = connector.connect(&host).await.unwrap();
        let second = connector.connect(&host).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(connector.len(), 1);
    }

    #[tokio::test]
    async fn test_closed_connection_is_replaced() {
        let connector = Connector::new();
        let host = Arc::new(Host::local());

        let first = connector.connect(&host).await.unwrap();
        first.close();

        let second = connector.connect(&host).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(!second.is_closed());
    }

    #[tokio::test]
    async fn test_close_all() {
        let connector = Connector::new();
        let host = Arc::new(Host::local());
        let conn = connector.connect(&host).await.unwrap();

        connector.close_all();
        assert!(conn.is_closed());
        assert!(connector.is_empty());
    }
}
