use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use crate::error::ClientError;

/// Builds the execution client for a cluster identifier.
#[async_trait]
pub trait ClientFactory: Send + Sync + 'static {
    type Client: Clone + Send + Sync + 'static;

    async fn create_client(&self, cluster: &str) -> Result<Self::Client, ClientError>;
}

/// Process-wide map from cluster identifier to a lazily created client.
///
/// Each key owns a [`OnceCell`]: concurrent first lookups for the same cluster
/// wait on a single construction, lookups for other clusters only contend on
/// the map lock long enough to fetch their cell. A failed construction leaves
/// no entry behind, so the next lookup retries.
pub struct ClientCache<F: ClientFactory> {
    factory: F,
    clients: Mutex<HashMap<String, Arc<OnceCell<F::Client>>>>,
}

impl<F: ClientFactory> ClientCache<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Return the client for `cluster`, constructing it on first use.
    pub async fn get_client(&self, cluster: &str) -> Result<F::Client, ClientError> {
        let cell = {
            let mut clients = self.clients.lock().await;
            clients.entry(cluster.to_string()).or_default().clone()
        };

        let result = cell
            .get_or_try_init(|| async {
                debug!(cluster = %cluster, "Constructing cluster client");
                match self.factory.create_client(cluster).await {
                    Ok(client) => {
                        info!(cluster = %cluster, "Cluster client ready");
                        Ok(client)
                    }
                    Err(e) => {
                        warn!(cluster = %cluster, error = %e, "Cluster client construction failed");
                        Err(e)
                    }
                }
            })
            .await
            .cloned();

        if result.is_err() {
            self.evict_failed(cluster, cell).await;
        }
        result
    }

    /// Drop an empty cell left by a failed construction, unless another
    /// lookup still holds it and may retry.
    async fn evict_failed(&self, cluster: &str, cell: Arc<OnceCell<F::Client>>) {
        let mut clients = self.clients.lock().await;
        let stale = match clients.get(cluster) {
            Some(current) if Arc::ptr_eq(current, &cell) && !current.initialized() => {
                drop(cell);
                Arc::strong_count(current) == 1
            }
            _ => false,
        };
        if stale {
            clients.remove(cluster);
        }
    }

    /// Cluster identifiers that currently hold a constructed client.
    pub async fn cached_clusters(&self) -> Vec<String> {
        let clients = self.clients.lock().await;
        let mut clusters: Vec<String> = clients
            .iter()
            .filter(|(_, cell)| cell.initialized())
            .map(|(cluster, _)| cluster.clone())
            .collect();
        clusters.sort();
        clusters
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    #[cfg(test)]
    pub(crate) async fn entry_count(&self) -> usize {
        self.clients.lock().await.len()
    }
}
