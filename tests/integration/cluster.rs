//! Cluster management for integration tests
//!
//! Uses existing kubeconfig (~/.kube/config or KUBECONFIG environment variable).

use std::path::PathBuf;
use std::sync::Arc;

use kube::{Client, Config};
use operator_deployer::KubeCluster;
use thiserror::Error;
use tokio::sync::OnceCell;

/// Env var pointing at the operator's manifest templates
pub const MANIFEST_DIR_ENV: &str = "MANIFEST_DIR";

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Failed to create kube client: {0}")]
    ClientCreation(#[from] kube::Error),

    #[error("Failed to infer config: {0}")]
    InferConfig(#[from] kube::config::InferConfigError),
}

/// Global shared cluster instance
static SHARED_CLUSTER: OnceCell<Arc<SharedTestCluster>> = OnceCell::const_new();

/// A shared test cluster for all integration tests
pub struct SharedTestCluster {
    client: Client,
}

impl SharedTestCluster {
    /// Get or initialize the shared cluster
    pub async fn get() -> Result<Arc<SharedTestCluster>, ClusterError> {
        SHARED_CLUSTER
            .get_or_try_init(|| async {
                let cluster = Self::connect().await?;
                Ok(Arc::new(cluster))
            })
            .await
            .map(Arc::clone)
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    /// Deployer-facing view of the cluster
    pub fn kube_cluster(&self) -> KubeCluster {
        KubeCluster::new(self.client())
    }

    async fn connect() -> Result<Self, ClusterError> {
        let config = Config::infer().await?;
        let client = Client::try_from(config)?;

        let version = client.apiserver_version().await?;
        tracing::info!(
            "Connected to Kubernetes cluster: {} {}",
            version.platform,
            version.git_version
        );

        Ok(Self { client })
    }
}

/// Operator manifest templates used by the manifest-strategy tests
pub fn manifest_dir() -> PathBuf {
    std::env::var(MANIFEST_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("deploy"))
}
