//! `kube`-backed [`ClusterApi`]

use std::collections::HashMap;
use std::sync::Mutex;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{
    Api, DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams,
};
use kube::discovery::{ApiCapabilities, ApiResource, Scope};
use kube::{Client, ResourceExt};
use tracing::{debug, info};

use super::ClusterApi;
use crate::crd::{ClusterServiceVersion, PackageManifest, Subscription};
use crate::error::{Error, Result};
use crate::resources::ResourceDocument;
use crate::resources::common::FIELD_MANAGER;

/// Discovery found the group but not the kind
fn is_missing_kind(e: &Error) -> bool {
    matches!(e, Error::KubeError(kube::Error::Discovery(_)))
}

/// Cluster access through a kube [`Client`]
pub struct KubeCluster {
    client: Client,
    /// Discovery results per kind, resolved once per process
    resources: Mutex<HashMap<GroupVersionKind, (ApiResource, ApiCapabilities)>>,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            resources: Mutex::new(HashMap::new()),
        }
    }

    /// Connect using the inferred kubeconfig or in-cluster config
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self::new(client))
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    async fn resolve(&self, gvk: &GroupVersionKind) -> Result<(ApiResource, ApiCapabilities)> {
        if let Some(found) = self.cached(gvk) {
            return Ok(found);
        }
        let found = kube::discovery::pinned_kind(&self.client, gvk).await?;
        if let Ok(mut cache) = self.resources.lock() {
            cache.insert(gvk.clone(), found.clone());
        }
        Ok(found)
    }

    fn cached(&self, gvk: &GroupVersionKind) -> Option<(ApiResource, ApiCapabilities)> {
        self.resources
            .lock()
            .ok()
            .and_then(|cache| cache.get(gvk).cloned())
    }

    async fn dynamic_api(&self, namespace: &str, doc: &ResourceDocument) -> Result<(Api<DynamicObject>, Scope)> {
        let (resource, caps) = self.resolve(&doc.gvk()?).await?;
        let api = match caps.scope {
            Scope::Cluster => Api::all_with(self.client.clone(), &resource),
            Scope::Namespaced => Api::namespaced_with(self.client.clone(), namespace, &resource),
        };
        Ok((api, caps.scope))
    }
}

impl ClusterApi for KubeCluster {
    async fn apply(&self, namespace: &str, doc: &ResourceDocument) -> Result<()> {
        let (api, scope) = self.dynamic_api(namespace, doc).await?;
        let name = doc.name()?;

        let mut body = doc.value().clone();
        if matches!(scope, Scope::Namespaced) {
            if let Some(meta) = body.get_mut("metadata").and_then(|m| m.as_object_mut()) {
                meta.insert("namespace".to_string(), namespace.into());
            }
        }

        let params = PatchParams::apply(FIELD_MANAGER).force();
        api.patch(name, &params, &Patch::Apply(&body)).await?;
        info!(resource = %doc.display_name(), namespace = %namespace, "Applied");
        Ok(())
    }

    async fn delete(&self, namespace: &str, doc: &ResourceDocument) -> Result<()> {
        let (api, _) = match self.dynamic_api(namespace, doc).await {
            Ok(found) => found,
            // The kind itself is gone (e.g. its CRD was removed first)
            Err(e) if e.is_not_found() || is_missing_kind(&e) => return Ok(()),
            Err(e) => return Err(e),
        };

        match api
            .delete(doc.name()?, &DeleteParams::background())
            .await
            .map_err(Error::from)
        {
            Ok(_) => {
                info!(resource = %doc.display_name(), namespace = %namespace, "Deleted");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!(resource = %doc.display_name(), namespace = %namespace, "Already absent");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn pods_with_prefix(&self, namespace: &str, prefix: &str) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api.list(&ListParams::default()).await?;
        Ok(pods
            .items
            .into_iter()
            .filter(|p| p.name_any().starts_with(prefix))
            .collect())
    }

    async fn subscription(&self, namespace: &str, name: &str) -> Result<Option<Subscription>> {
        let api: Api<Subscription> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn cluster_service_version(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ClusterServiceVersion>> {
        let api: Api<ClusterServiceVersion> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn package_manifest(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PackageManifest>> {
        let api: Api<PackageManifest> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }
}
