//! Process-wide tunnel registry
//!
//! Tunnels are keyed by (host, remote_port); only one tunnel per key may
//! exist. Setup work (SSH dial, listener bind) happens before the map is
//! touched, so the lock is never held across network I/O.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tm_core::error::TunnelError;
use tm_core::ipc::TunnelInfo;

use crate::ssh::SshConnector;
use crate::tunnel::{Tunnel, TunnelSpec};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TunnelKey {
    host: String,
    remote_port: u16,
}

/// Indexed collection of all active tunnels
pub struct TunnelRegistry {
    tunnels: RwLock<HashMap<TunnelKey, Arc<Tunnel>>>,
    connector: Arc<SshConnector>,
}

impl TunnelRegistry {
    pub fn new(connector: Arc<SshConnector>) -> Self {
        Self {
            tunnels: RwLock::new(HashMap::new()),
            connector,
        }
    }

    /// Create and register one tunnel. Fails without side effects when the
    /// key is taken or setup fails.
    pub async fn create(
        &self,
        host: String,
        local_port: u16,
        remote_port: u16,
    ) -> Result<(), TunnelError> {
        let key = TunnelKey {
            host: host.clone(),
            remote_port,
        };

        if self.read().contains_key(&key) {
            return Err(TunnelError::AlreadyExists);
        }

        let spec = TunnelSpec {
            host,
            local_port,
            remote_port,
        };
        let tunnel = Tunnel::open(spec, Arc::clone(&self.connector)).await?;

        let mut tunnels = self.write();
        if tunnels.contains_key(&key) {
            // Lost a create race while setting up; tear the fresh one down.
            drop(tunnels);
            tunnel.close();
            return Err(TunnelError::AlreadyExists);
        }
        tunnels.insert(key, tunnel);
        Ok(())
    }

    /// Remove and drain the tunnel keyed by (host, remote_port)
    pub fn close(&self, host: &str, remote_port: u16) -> Result<(), TunnelError> {
        let key = TunnelKey {
            host: host.to_string(),
            remote_port,
        };
        let tunnel = self.write().remove(&key).ok_or(TunnelError::NotFound)?;
        tunnel.close();
        Ok(())
    }

    /// Remove every tunnel and signal each to drain. Returns the number of
    /// tunnels present at entry; does not wait for the drains.
    pub fn close_all(&self) -> usize {
        let drained: Vec<Arc<Tunnel>> = self.write().drain().map(|(_, t)| t).collect();
        let count = drained.len();
        for tunnel in drained {
            tunnel.close();
        }
        count
    }

    /// Snapshot every tunnel, ordered by (host, remote_port). Tunnels that
    /// died internally since the last call are pruned here.
    pub fn list(&self) -> Vec<TunnelInfo> {
        let dead: Vec<TunnelKey> = self
            .read()
            .iter()
            .filter(|(_, tunnel)| tunnel.is_closed())
            .map(|(key, _)| key.clone())
            .collect();
        if !dead.is_empty() {
            let mut tunnels = self.write();
            for key in dead {
                if tunnels.get(&key).is_some_and(|t| t.is_closed()) {
                    tunnels.remove(&key);
                }
            }
        }

        let mut infos: Vec<TunnelInfo> =
            self.read().values().map(|tunnel| tunnel.snapshot()).collect();
        infos.sort_by(|a, b| {
            (a.host.as_str(), a.remote_port).cmp(&(b.host.as_str(), b.remote_port))
        });
        infos
    }

    /// Number of registered tunnels
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether no tunnels are registered
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<TunnelKey, Arc<Tunnel>>> {
        self.tunnels.read().expect("registry lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<TunnelKey, Arc<Tunnel>>> {
        self.tunnels.write().expect("registry lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::SshAuth;
    use std::time::Duration;

    /// Registry whose connector points at a port nothing listens on, so
    /// every create fails during SSH setup.
    fn unreachable_registry() -> TunnelRegistry {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            let port = listener.local_addr().unwrap().port();
            drop(listener);
            port
        };
        let auth = SshAuth {
            username: "test".to_string(),
            key: Arc::new(
                russh_keys::key::KeyPair::generate_ed25519().expect("ed25519 keygen"),
            ),
        };
        let connector = Arc::new(SshConnector::new(
            port,
            Duration::from_secs(5),
            Arc::new(auth),
        ));
        TunnelRegistry::new(connector)
    }

    #[tokio::test]
    async fn test_close_missing_tunnel() {
        let registry = unreachable_registry();
        let err = registry.close("nowhere", 80).unwrap_err();
        assert!(matches!(err, TunnelError::NotFound));
    }

    #[tokio::test]
    async fn test_close_all_empty() {
        let registry = unreachable_registry();
        assert_eq!(registry.close_all(), 0);
        assert!(registry.list().is_empty());
    }

    #[tokio::test]
    async fn test_failed_create_leaves_registry_unchanged() {
        let registry = unreachable_registry();
        let err = registry
            .create("127.0.0.1".to_string(), 18080, 80)
            .await
            .unwrap_err();
        assert!(matches!(err, TunnelError::Connect(_)));
        assert!(registry.is_empty());
        assert!(registry.list().is_empty());
    }
}
