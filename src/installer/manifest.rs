//! Raw-manifest installation strategy

use std::path::{Path, PathBuf};

use k8s_openapi::api::apps::v1::Deployment;
use tracing::{info, warn};

use crate::client::ClusterApi;
use crate::error::{Error, Result};
use crate::installer::readiness::{
    resolve_operator_name, wait_for_operator_ready, wait_for_operator_removal,
};
use crate::installer::{
    DeploymentEvent, DeploymentState, Installer, OperatorHandle, OperatorNames, OperatorSetting,
};
use crate::resources::common::{strip_server_fields, upsert_flag};
use crate::resources::{
    InstallManifest, ManifestRole, ManifestSet, ManifestTemplates, OperatorScope, ResourceDocument,
};
use crate::wait::Timeouts;

/// Installs the operator by applying its manifests in order
pub struct ManifestInstaller<C> {
    cluster: C,
    namespace: String,
    scope: OperatorScope,
    watched_namespaces: Vec<String>,
    /// ClusterRoleBinding subject set by `update_cluster_role_binding`
    subject_namespace: Option<String>,
    templates: ManifestTemplates,
    generated_dir: PathBuf,
    names: OperatorNames,
    timeouts: Timeouts,
    /// Set applied by the last deploy, kept so teardown deletes exactly it
    manifests: Option<ManifestSet>,
    handle: Option<OperatorHandle>,
}

impl<C: ClusterApi> ManifestInstaller<C> {
    pub fn new(
        cluster: C,
        namespace: &str,
        scope: OperatorScope,
        watched_namespaces: Vec<String>,
        templates: ManifestTemplates,
        generated_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            cluster,
            namespace: namespace.to_string(),
            scope,
            watched_namespaces,
            subject_namespace: None,
            templates,
            generated_dir: generated_dir.into(),
            names: OperatorNames::default(),
            timeouts: Timeouts::default(),
            manifests: None,
            handle: None,
        }
    }

    pub fn with_names(mut self, names: OperatorNames) -> Self {
        self.names = names;
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn cluster(&self) -> &C {
        &self.cluster
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Manifests applied by the last deploy
    pub fn manifest_set(&self) -> Option<&ManifestSet> {
        self.manifests.as_ref()
    }

    /// Directory receiving this installer's mutated manifests
    pub fn output_dir(&self) -> PathBuf {
        self.generated_dir.join(&self.namespace)
    }

    /// Build the scope-appropriate set, mutated for cluster-wide scope
    pub fn build_manifest_set(&self) -> Result<ManifestSet> {
        let mut set = ManifestSet::build(self.scope, &self.templates)?;
        if self.scope == OperatorScope::ClusterWide {
            let subject = self.subject_namespace.as_deref().unwrap_or(&self.namespace);
            set.scope_to(subject, &self.watched_namespaces, &self.output_dir())?;
        }
        Ok(set)
    }

    /// Apply every document of `set` in ordinal order
    pub async fn apply_manifests(&self, set: &ManifestSet, namespace: &str) -> Result<()> {
        for manifest in set.manifests() {
            self.apply_manifest(manifest, namespace).await?;
        }
        Ok(())
    }

    /// Delete every document of `set` in exact reverse apply order
    pub async fn delete_manifests(&self, set: &ManifestSet, namespace: &str) -> Result<()> {
        for manifest in set.teardown_order() {
            for doc in manifest.documents()?.iter().rev() {
                self.cluster.delete(namespace, doc).await?;
            }
        }
        Ok(())
    }

    async fn apply_manifest(&self, manifest: &InstallManifest, namespace: &str) -> Result<()> {
        for doc in manifest.documents()? {
            self.cluster.apply(namespace, &doc).await?;
        }
        Ok(())
    }

    /// Change the namespaces a cluster-wide operator watches and re-apply it
    pub async fn watch_namespaces(&mut self, namespaces: Vec<String>) -> Result<()> {
        self.require_cluster_wide("watchNamespaces")?;
        let out_dir = self.output_dir();
        let set = self
            .manifests
            .as_mut()
            .ok_or_else(|| Error::config("operator is not deployed"))?;
        set.mutate_watched_namespaces(&namespaces, &out_dir)?;
        let manifest = set
            .find(ManifestRole::OperatorDeployment)
            .cloned()
            .ok_or_else(|| Error::config("manifest set has no operator Deployment"))?;

        self.apply_manifest(&manifest, &self.namespace).await?;
        info!(namespace = %self.namespace, watched = %namespaces.join(","), "Updated watched namespaces");

        if let Some(handle) = self.handle.as_mut() {
            handle.set_watched_namespaces(namespaces.clone());
        }
        self.watched_namespaces = namespaces;
        Ok(())
    }

    /// Point the ClusterRoleBinding subject at `namespace` and re-apply it
    pub async fn update_cluster_role_binding(&mut self, namespace: &str) -> Result<()> {
        self.require_cluster_wide("updateClusterRoleBinding")?;
        let out_dir = self.output_dir();
        let set = self
            .manifests
            .as_mut()
            .ok_or_else(|| Error::config("operator is not deployed"))?;
        set.mutate_for_namespace(namespace, &out_dir)?;
        let manifest = set
            .find(ManifestRole::ClusterRoleBinding)
            .cloned()
            .ok_or_else(|| Error::config("manifest set has no ClusterRoleBinding"))?;

        self.apply_manifest(&manifest, &self.namespace).await?;
        info!(namespace = %self.namespace, subject_namespace = %namespace, "Updated ClusterRoleBinding");
        self.subject_namespace = Some(namespace.to_string());
        Ok(())
    }

    fn require_cluster_wide(&self, operation: &str) -> Result<()> {
        match &self.handle {
            Some(handle) => handle.require_cluster_wide(operation),
            None if self.scope == OperatorScope::ClusterWide => Ok(()),
            None => Err(Error::config(format!(
                "{operation} requires cluster-wide scope, operator in {} is {}",
                self.namespace, self.scope
            ))),
        }
    }

    fn ensure_handle(&mut self) -> Result<&mut OperatorHandle> {
        if self.handle.is_none() {
            self.handle = Some(OperatorHandle::new(
                &self.namespace,
                self.scope,
                self.watched_namespaces.clone(),
            )?);
        }
        self.handle
            .as_mut()
            .ok_or_else(|| Error::config("operator handle missing"))
    }

    fn advance(&mut self, event: DeploymentEvent) -> Result<DeploymentState> {
        self.ensure_handle()?.advance(event)
    }

    fn snapshot(&self) -> Result<OperatorHandle> {
        self.handle
            .clone()
            .ok_or_else(|| Error::config("operator is not deployed"))
    }

    /// Mark the deploy failed, tear down what was applied, return `err`
    async fn fail_and_rollback(&mut self, err: Error) -> Error {
        warn!(namespace = %self.namespace, error = %err, "Operator deployment failed, rolling back");
        if let Err(e) = self.advance(DeploymentEvent::InstallFailed) {
            warn!(namespace = %self.namespace, error = %e, "Could not record failure");
        }
        if let Err(e) = self.undeploy(false).await {
            warn!(namespace = %self.namespace, error = %e, "Rollback failed");
        }
        err
    }

    async fn confirm_ready(&mut self) -> Result<()> {
        let resolved = self.handle.as_ref().and_then(|h| h.resolved_name()).map(str::to_string);
        match resolved {
            Some(name) => {
                wait_for_operator_ready(&self.cluster, &self.namespace, &name, &self.timeouts).await?
            }
            None => {
                let name =
                    resolve_operator_name(&self.cluster, &self.namespace, &self.names, &self.timeouts)
                        .await?;
                self.ensure_handle()?.set_resolved_name(name);
            }
        }
        self.advance(DeploymentEvent::ReadinessConfirmed)?;
        Ok(())
    }

    fn remove_generated_files(&self, set: &ManifestSet) {
        for path in set.mutated_files() {
            remove_file(path);
        }
    }
}

fn remove_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => info!(path = %path.display(), "Removed generated manifest"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Could not remove generated manifest"),
    }
}

impl<C: ClusterApi> Installer for ManifestInstaller<C> {
    async fn deploy(&mut self, wait_for_ready: bool) -> Result<OperatorHandle> {
        let set = self.build_manifest_set()?;
        self.advance(DeploymentEvent::DeployRequested)?;
        info!(
            namespace = %self.namespace,
            scope = %self.scope,
            manifests = set.len(),
            "Deploying operator from manifests"
        );

        let applied = self.apply_manifests(&set, &self.namespace).await;
        self.manifests = Some(set);
        if let Err(e) = applied {
            return Err(self.fail_and_rollback(e).await);
        }
        self.advance(DeploymentEvent::ManifestsApplied)?;

        if wait_for_ready {
            return self.wait_for_ready().await;
        }
        self.snapshot()
    }

    async fn undeploy(&mut self, wait_for_removal: bool) -> Result<()> {
        let set = match self.manifests.take() {
            Some(set) => set,
            None => self.build_manifest_set()?,
        };
        self.advance(DeploymentEvent::UndeployRequested)?;
        info!(namespace = %self.namespace, scope = %self.scope, "Undeploying operator");

        let mut result = self.delete_manifests(&set, &self.namespace).await;
        if result.is_ok() && wait_for_removal {
            let resolved = self.handle.as_ref().and_then(|h| h.resolved_name());
            let names: Vec<&str> = match resolved {
                Some(name) => vec![name],
                None => self.names.candidates().to_vec(),
            };
            result =
                wait_for_operator_removal(&self.cluster, &self.namespace, &names, &self.timeouts).await;
        }

        if let Err(e) = result {
            self.manifests = Some(set);
            self.advance(DeploymentEvent::InstallFailed)?;
            return Err(e);
        }

        if set.scope() == OperatorScope::ClusterWide {
            self.remove_generated_files(&set);
        }
        self.advance(DeploymentEvent::RemovalConfirmed)?;
        Ok(())
    }

    async fn wait_for_ready(&mut self) -> Result<OperatorHandle> {
        let state = self.handle.as_ref().map(|h| h.state());
        match state {
            Some(DeploymentState::Ready) => return self.snapshot(),
            Some(DeploymentState::ManifestsApplied) => {}
            _ => {
                return Err(Error::InvalidTransition {
                    state: state.unwrap_or_default().to_string(),
                    event: DeploymentEvent::ReadinessConfirmed.to_string(),
                });
            }
        }

        if let Err(e) = self.confirm_ready().await {
            return Err(self.fail_and_rollback(e).await);
        }
        self.snapshot()
    }

    async fn apply_setting(&mut self, setting: OperatorSetting) -> Result<()> {
        let name = self
            .handle
            .as_ref()
            .and_then(|h| h.resolved_name())
            .ok_or_else(|| Error::config("operator name is not resolved, deploy and wait for readiness first"))?
            .to_string();

        let mut deployment: Deployment = self
            .cluster
            .deployment(&self.namespace, &name)
            .await?
            .ok_or_else(|| Error::config(format!("operator deployment {name} not found in {}", self.namespace)))?;

        let container = deployment
            .spec
            .as_mut()
            .and_then(|s| s.template.spec.as_mut())
            .and_then(|s| s.containers.first_mut())
            .ok_or_else(|| Error::MalformedManifest(format!("deployment {name} has no containers")))?;
        upsert_flag(
            container.args.get_or_insert_with(Vec::new),
            setting.flag(),
            &setting.value(),
        );
        deployment.status = None;
        strip_server_fields(&mut deployment.metadata);

        self.cluster
            .apply(&self.namespace, &ResourceDocument::from_object(&deployment)?)
            .await?;
        info!(
            namespace = %self.namespace,
            name = %name,
            flag = setting.flag(),
            value = %setting.value(),
            "Applied operator setting"
        );
        Ok(())
    }

    fn handle(&self) -> Option<&OperatorHandle> {
        self.handle.as_ref()
    }
}
