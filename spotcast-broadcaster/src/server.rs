use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::{Mutex, RwLock};
use tokio::task::{JoinHandle, JoinSet};

use crate::broadcaster::Broadcaster;
use crate::config::ServerConfig;
use crate::connection::{handle_connection, Endpoint};
use crate::error::{Result, ServerError};
use crate::registry::ConnectionRegistry;

/// WebSocket endpoint serving availability updates to map clients
pub struct AvailabilityServer {
    endpoint: Arc<Endpoint>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    local_addr: RwLock<Option<SocketAddr>>,
}

impl AvailabilityServer {
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Arc::new(Broadcaster::new(Arc::clone(&registry)));

        Self {
            endpoint: Arc::new(Endpoint {
                registry,
                broadcaster,
                config,
            }),
            accept_task: Mutex::new(None),
            local_addr: RwLock::new(None),
        }
    }

    /// Bind and start accepting clients. Returns the bound address.
    pub async fn start(&self, addr: impl ToSocketAddrs) -> Result<SocketAddr> {
        let mut accept_task = self.accept_task.lock().await;
        if accept_task.is_some() {
            return Err(ServerError::AlreadyRunning);
        }

        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        *self.local_addr.write().await = Some(local_addr);

        tracing::info!(
            "Availability server listening on ws://{}{}",
            local_addr,
            self.endpoint.config.path
        );

        let endpoint = Arc::clone(&self.endpoint);
        *accept_task = Some(tokio::spawn(async move {
            // Dropping the set on abort tears down every connection task
            let mut connections = JoinSet::new();
            loop {
                tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            tracing::debug!("Accepted TCP connection from {}", peer);
                            connections.spawn(handle_connection(stream, peer, Arc::clone(&endpoint)));
                        }
                        Err(e) => {
                            tracing::error!("Failed to accept client: {}", e);
                        }
                    },
                    Some(_) = connections.join_next(), if !connections.is_empty() => {}
                }
            }
        }));

        Ok(local_addr)
    }

    /// Stop accepting and close every open connection
    pub async fn stop(&self) -> Result<()> {
        let task = self.accept_task.lock().await.take();
        let Some(task) = task else {
            return Err(ServerError::NotStarted);
        };

        task.abort();
        let _ = task.await;
        *self.local_addr.write().await = None;

        tracing::info!(
            "Availability server stopped ({} connections left)",
            self.endpoint.registry.len()
        );
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.accept_task.lock().await.is_some()
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read().await
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.endpoint.registry)
    }

    /// Handle for occupancy producers
    pub fn broadcaster(&self) -> Arc<Broadcaster> {
        Arc::clone(&self.endpoint.broadcaster)
    }

    pub fn connection_count(&self) -> usize {
        self.endpoint.registry.len()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.endpoint.config
    }
}

impl Drop for AvailabilityServer {
    fn drop(&mut self) {
        if let Ok(mut task) = self.accept_task.try_lock() {
            if let Some(task) = task.take() {
                task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_server_create() {
        let server = AvailabilityServer::new(ServerConfig::default());
        assert_eq!(server.connection_count(), 0);
        assert!(!server.is_running().await);
        assert!(server.local_addr().await.is_none());
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let server = AvailabilityServer::new(ServerConfig::default());
        let addr = server.start("127.0.0.1:0").await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(server.local_addr().await, Some(addr));

        assert!(matches!(
            server.start("127.0.0.1:0").await,
            Err(ServerError::AlreadyRunning)
        ));

        server.stop().await.unwrap();
        assert!(!server.is_running().await);
        assert!(matches!(server.stop().await, Err(ServerError::NotStarted)));
    }
}
