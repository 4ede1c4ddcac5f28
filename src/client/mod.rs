//! Cluster API seam
//!
//! The installers talk to the cluster exclusively through [`ClusterApi`].
//! [`KubeCluster`] implements it on top of `kube`; tests substitute an
//! in-memory implementation.

mod kube_cluster;

use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;

pub use kube_cluster::KubeCluster;

use crate::crd::{ClusterServiceVersion, PackageManifest, Subscription};
use crate::error::Result;
use crate::resources::ResourceDocument;

/// Operations the deployer needs from a cluster.
///
/// `apply` has create-or-replace semantics. `delete` treats a missing object
/// as already deleted. Cluster-scoped kinds ignore `namespace`.
#[allow(async_fn_in_trait)]
pub trait ClusterApi {
    async fn apply(&self, namespace: &str, doc: &ResourceDocument) -> Result<()>;

    async fn delete(&self, namespace: &str, doc: &ResourceDocument) -> Result<()>;

    async fn deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>>;

    /// Pods whose name starts with `prefix`
    async fn pods_with_prefix(&self, namespace: &str, prefix: &str) -> Result<Vec<Pod>>;

    async fn subscription(&self, namespace: &str, name: &str) -> Result<Option<Subscription>>;

    async fn cluster_service_version(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ClusterServiceVersion>>;

    async fn package_manifest(&self, namespace: &str, name: &str)
    -> Result<Option<PackageManifest>>;
}

impl<T: ClusterApi> ClusterApi for Arc<T> {
    async fn apply(&self, namespace: &str, doc: &ResourceDocument) -> Result<()> {
        (**self).apply(namespace, doc).await
    }

    async fn delete(&self, namespace: &str, doc: &ResourceDocument) -> Result<()> {
        (**self).delete(namespace, doc).await
    }

    async fn deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        (**self).deployment(namespace, name).await
    }

    async fn pods_with_prefix(&self, namespace: &str, prefix: &str) -> Result<Vec<Pod>> {
        (**self).pods_with_prefix(namespace, prefix).await
    }

    async fn subscription(&self, namespace: &str, name: &str) -> Result<Option<Subscription>> {
        (**self).subscription(namespace, name).await
    }

    async fn cluster_service_version(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ClusterServiceVersion>> {
        (**self).cluster_service_version(namespace, name).await
    }

    async fn package_manifest(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PackageManifest>> {
        (**self).package_manifest(namespace, name).await
    }
}
