//! Ordered manifest sets for the raw-manifest install strategy
//!
//! A [`ManifestSet`] is built per [`OperatorScope`] from a directory of YAML
//! templates. Apply order follows the ordinal of each [`InstallManifest`];
//! teardown walks the same list backwards. Cluster-wide installs rewrite two
//! templates (the operator Deployment's watch list and the
//! ClusterRoleBinding's subject namespace) into generated files that replace
//! the templates at the same ordinal, leaving the templates untouched.

use std::fmt;
use std::path::{Path, PathBuf};

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::rbac::v1::ClusterRoleBinding;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::resources::common::{WATCH_NAMESPACE_ENV, upsert_env};
use crate::resources::document::ResourceDocument;

/// Directory holding the CRD templates
pub const CRDS_DIR: &str = "crds";
pub const SERVICE_ACCOUNT_FILE: &str = "service_account.yaml";
pub const ROLE_FILE: &str = "role.yaml";
pub const ROLE_BINDING_FILE: &str = "role_binding.yaml";
pub const CLUSTER_ROLE_FILE: &str = "cluster_role.yaml";
pub const CLUSTER_ROLE_BINDING_FILE: &str = "cluster_role_binding.yaml";
pub const ELECTION_ROLE_FILE: &str = "election_role.yaml";
pub const ELECTION_ROLE_BINDING_FILE: &str = "election_role_binding.yaml";
pub const OPERATOR_FILE: &str = "operator.yaml";

/// Resource-scoping model of an operator instance
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperatorScope {
    /// Manages resources in its own namespace only
    #[default]
    Namespaced,
    /// Watches a list of namespaces with cluster-scoped RBAC
    ClusterWide,
}

impl fmt::Display for OperatorScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatorScope::Namespaced => write!(f, "namespaced"),
            OperatorScope::ClusterWide => write!(f, "cluster-wide"),
        }
    }
}

impl std::str::FromStr for OperatorScope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "namespaced" | "namespace" => Ok(OperatorScope::Namespaced),
            "cluster-wide" | "clusterwide" | "cluster" => Ok(OperatorScope::ClusterWide),
            other => Err(Error::config(format!("unknown operator scope '{other}'"))),
        }
    }
}

/// What a manifest installs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ManifestRole {
    CustomResourceDefinition,
    ServiceAccount,
    Role,
    ClusterRole,
    RoleBinding,
    ClusterRoleBinding,
    OperatorDeployment,
}

impl ManifestRole {
    /// Only valid for cluster-wide installs
    pub fn is_cluster_rbac(&self) -> bool {
        matches!(self, ManifestRole::ClusterRole | ManifestRole::ClusterRoleBinding)
    }
}

impl fmt::Display for ManifestRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifestRole::CustomResourceDefinition => write!(f, "CustomResourceDefinition"),
            ManifestRole::ServiceAccount => write!(f, "ServiceAccount"),
            ManifestRole::Role => write!(f, "Role"),
            ManifestRole::ClusterRole => write!(f, "ClusterRole"),
            ManifestRole::RoleBinding => write!(f, "RoleBinding"),
            ManifestRole::ClusterRoleBinding => write!(f, "ClusterRoleBinding"),
            ManifestRole::OperatorDeployment => write!(f, "OperatorDeployment"),
        }
    }
}

/// One installable template file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstallManifest {
    pub path: PathBuf,
    pub role: ManifestRole,
    /// Position in apply order
    pub ordinal: usize,
    /// True for generated files produced by a mutation
    pub mutated: bool,
}

impl InstallManifest {
    pub fn new(path: impl Into<PathBuf>, role: ManifestRole, ordinal: usize) -> Self {
        Self {
            path: path.into(),
            role,
            ordinal,
            mutated: false,
        }
    }

    /// Read and parse every document in the file
    pub fn documents(&self) -> Result<Vec<ResourceDocument>> {
        ResourceDocument::read_all(&self.path)
    }

    /// Rewrite `subjects[0].namespace` of a ClusterRoleBinding template
    pub fn mutate_for_namespace(&self, namespace: &str, out_dir: &Path) -> Result<InstallManifest> {
        if self.role != ManifestRole::ClusterRoleBinding {
            return Err(Error::config(format!(
                "namespace mutation applies to ClusterRoleBinding manifests, not {}",
                self.role
            )));
        }

        let mut docs = self.documents()?;
        let mut touched = false;
        for doc in docs.iter_mut().filter(|d| d.kind().ok() == Some("ClusterRoleBinding")) {
            let mut binding: ClusterRoleBinding = doc.to_object()?;
            let subject = binding
                .subjects
                .as_mut()
                .and_then(|s| s.first_mut())
                .ok_or_else(|| {
                    Error::MalformedManifest(format!(
                        "{} has no subjects",
                        self.path.display()
                    ))
                })?;
            subject.namespace = Some(namespace.to_string());
            *doc = ResourceDocument::from_object(&binding)?;
            touched = true;
        }
        if !touched {
            return Err(Error::MalformedManifest(format!(
                "{} contains no ClusterRoleBinding",
                self.path.display()
            )));
        }

        self.write_mutated(&docs, out_dir)
    }

    /// Point the operator Deployment's watch-namespace env entry at
    /// `namespaces`, dropping any indirect value source
    pub fn mutate_watched_namespaces(
        &self,
        namespaces: &[String],
        out_dir: &Path,
    ) -> Result<InstallManifest> {
        if self.role != ManifestRole::OperatorDeployment {
            return Err(Error::config(format!(
                "watch-namespace mutation applies to the operator Deployment, not {}",
                self.role
            )));
        }
        if namespaces.is_empty() {
            return Err(Error::config("watched namespaces must not be empty"));
        }

        let joined = namespaces.join(",");
        let mut docs = self.documents()?;
        let mut touched = false;
        for doc in docs.iter_mut().filter(|d| d.kind().ok() == Some("Deployment")) {
            let mut deployment: Deployment = doc.to_object()?;
            set_watch_namespace(&mut deployment, &joined)?;
            *doc = ResourceDocument::from_object(&deployment)?;
            touched = true;
        }
        if !touched {
            return Err(Error::MalformedManifest(format!(
                "{} contains no Deployment",
                self.path.display()
            )));
        }

        self.write_mutated(&docs, out_dir)
    }

    fn write_mutated(&self, docs: &[ResourceDocument], out_dir: &Path) -> Result<InstallManifest> {
        let file_name = self.path.file_name().ok_or_else(|| {
            Error::MalformedManifest(format!("{} has no file name", self.path.display()))
        })?;
        let target = out_dir.join(file_name);
        if target == self.path && !self.mutated {
            return Err(Error::config(format!(
                "refusing to overwrite template {} with its mutation",
                self.path.display()
            )));
        }

        std::fs::create_dir_all(out_dir)?;
        std::fs::write(&target, ResourceDocument::render_all(docs)?)?;
        debug!(template = %self.path.display(), generated = %target.display(), "Wrote mutated manifest");

        Ok(InstallManifest {
            path: target,
            role: self.role,
            ordinal: self.ordinal,
            mutated: true,
        })
    }
}

/// Set the watch-namespace env entry on every container carrying it, or on
/// the first container when none does
fn set_watch_namespace(deployment: &mut Deployment, value: &str) -> Result<()> {
    let containers = deployment
        .spec
        .as_mut()
        .and_then(|s| s.template.spec.as_mut())
        .map(|s| &mut s.containers)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| Error::MalformedManifest("operator Deployment has no containers".into()))?;

    let carrying = containers.iter().any(|c| {
        c.env
            .as_ref()
            .is_some_and(|env| env.iter().any(|e| e.name == WATCH_NAMESPACE_ENV))
    });

    for (i, container) in containers.iter_mut().enumerate() {
        let has_entry = container
            .env
            .as_ref()
            .is_some_and(|env| env.iter().any(|e| e.name == WATCH_NAMESPACE_ENV));
        if has_entry || (!carrying && i == 0) {
            upsert_env(container.env.get_or_insert_with(Vec::new), WATCH_NAMESPACE_ENV, value);
        }
    }
    Ok(())
}

/// Template file locations discovered from a deploy directory
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ManifestTemplates {
    pub dir: PathBuf,
    pub crds: Vec<PathBuf>,
    pub service_account: Option<PathBuf>,
    pub role: Option<PathBuf>,
    pub role_binding: Option<PathBuf>,
    pub cluster_role: Option<PathBuf>,
    pub cluster_role_binding: Option<PathBuf>,
    pub election_role: Option<PathBuf>,
    pub election_role_binding: Option<PathBuf>,
    pub operator: Option<PathBuf>,
}

impl ManifestTemplates {
    /// Discover templates under `dir`. Missing files are recorded as absent;
    /// [`ManifestSet::build`] decides which ones the scope requires.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(Error::FatalInstall {
                path: dir.to_path_buf(),
                reason: "manifest directory does not exist".to_string(),
            });
        }

        let crd_dir = dir.join(CRDS_DIR);
        let mut crds = Vec::new();
        if crd_dir.is_dir() {
            for entry in std::fs::read_dir(&crd_dir)? {
                let path = entry?.path();
                let is_yaml = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e == "yaml" || e == "yml");
                if path.is_file() && is_yaml {
                    crds.push(path);
                }
            }
        }
        crds.sort();

        let existing = |name: &str| {
            let path = dir.join(name);
            path.is_file().then_some(path)
        };

        Ok(Self {
            dir: dir.to_path_buf(),
            crds,
            service_account: existing(SERVICE_ACCOUNT_FILE),
            role: existing(ROLE_FILE),
            role_binding: existing(ROLE_BINDING_FILE),
            cluster_role: existing(CLUSTER_ROLE_FILE),
            cluster_role_binding: existing(CLUSTER_ROLE_BINDING_FILE),
            election_role: existing(ELECTION_ROLE_FILE),
            election_role_binding: existing(ELECTION_ROLE_BINDING_FILE),
            operator: existing(OPERATOR_FILE),
        })
    }

    fn require<'a>(&self, path: &'a Option<PathBuf>, file_name: &str) -> Result<&'a PathBuf> {
        path.as_ref().ok_or_else(|| Error::FatalInstall {
            path: self.dir.join(file_name),
            reason: "required manifest template not found".to_string(),
        })
    }
}

/// Scope-specific, ordered list of manifests for one deploy
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestSet {
    scope: OperatorScope,
    manifests: Vec<InstallManifest>,
}

impl ManifestSet {
    /// Build the ordered manifest list for `scope`.
    ///
    /// Namespaced sets never contain cluster RBAC; cluster-wide sets always
    /// contain both the ClusterRole and the ClusterRoleBinding.
    pub fn build(scope: OperatorScope, templates: &ManifestTemplates) -> Result<Self> {
        if templates.crds.is_empty() {
            return Err(Error::FatalInstall {
                path: templates.dir.join(CRDS_DIR),
                reason: "no CRD templates found".to_string(),
            });
        }

        let mut entries: Vec<(PathBuf, ManifestRole)> = templates
            .crds
            .iter()
            .map(|p| (p.clone(), ManifestRole::CustomResourceDefinition))
            .collect();

        entries.push((
            templates
                .require(&templates.service_account, SERVICE_ACCOUNT_FILE)?
                .clone(),
            ManifestRole::ServiceAccount,
        ));

        match scope {
            OperatorScope::Namespaced => {
                entries.push((
                    templates.require(&templates.role, ROLE_FILE)?.clone(),
                    ManifestRole::Role,
                ));
                entries.push((
                    templates
                        .require(&templates.role_binding, ROLE_BINDING_FILE)?
                        .clone(),
                    ManifestRole::RoleBinding,
                ));
            }
            OperatorScope::ClusterWide => {
                entries.push((
                    templates
                        .require(&templates.cluster_role, CLUSTER_ROLE_FILE)?
                        .clone(),
                    ManifestRole::ClusterRole,
                ));
                entries.push((
                    templates
                        .require(&templates.cluster_role_binding, CLUSTER_ROLE_BINDING_FILE)?
                        .clone(),
                    ManifestRole::ClusterRoleBinding,
                ));
            }
        }

        // Leader election RBAC is namespace-scoped in both models
        if let Some(path) = &templates.election_role {
            entries.push((path.clone(), ManifestRole::Role));
        }
        if let Some(path) = &templates.election_role_binding {
            entries.push((path.clone(), ManifestRole::RoleBinding));
        }

        entries.push((
            templates.require(&templates.operator, OPERATOR_FILE)?.clone(),
            ManifestRole::OperatorDeployment,
        ));

        let manifests = entries
            .into_iter()
            .enumerate()
            .map(|(ordinal, (path, role))| InstallManifest::new(path, role, ordinal))
            .collect();

        Ok(Self { scope, manifests })
    }

    pub fn scope(&self) -> OperatorScope {
        self.scope
    }

    /// Manifests in apply order
    pub fn manifests(&self) -> &[InstallManifest] {
        &self.manifests
    }

    /// Manifests in teardown order
    pub fn teardown_order(&self) -> impl Iterator<Item = &InstallManifest> {
        self.manifests.iter().rev()
    }

    pub fn len(&self) -> usize {
        self.manifests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty()
    }

    pub fn contains_role(&self, role: ManifestRole) -> bool {
        self.manifests.iter().any(|m| m.role == role)
    }

    /// First manifest with the given role
    pub fn find(&self, role: ManifestRole) -> Option<&InstallManifest> {
        self.manifests.iter().find(|m| m.role == role)
    }

    /// Generated files produced by mutation
    pub fn mutated_files(&self) -> Vec<&Path> {
        self.manifests
            .iter()
            .filter(|m| m.mutated)
            .map(|m| m.path.as_path())
            .collect()
    }

    /// Replace the entry at `manifest.ordinal`
    pub fn replace(&mut self, manifest: InstallManifest) -> Result<()> {
        let slot = self
            .manifests
            .iter_mut()
            .find(|m| m.ordinal == manifest.ordinal)
            .ok_or_else(|| {
                Error::config(format!("no manifest at ordinal {}", manifest.ordinal))
            })?;
        if slot.role != manifest.role {
            return Err(Error::config(format!(
                "cannot replace {} at ordinal {} with {}",
                slot.role, manifest.ordinal, manifest.role
            )));
        }
        *slot = manifest;
        Ok(())
    }

    /// Rewrite the ClusterRoleBinding subject to `namespace`
    pub fn mutate_for_namespace(&mut self, namespace: &str, out_dir: &Path) -> Result<()> {
        self.require_cluster_wide("ClusterRoleBinding namespace mutation")?;
        let mutated = self
            .find(ManifestRole::ClusterRoleBinding)
            .ok_or_else(|| Error::config("manifest set has no ClusterRoleBinding"))?
            .mutate_for_namespace(namespace, out_dir)?;
        self.replace(mutated)
    }

    /// Rewrite the operator Deployment's watch list
    pub fn mutate_watched_namespaces(&mut self, namespaces: &[String], out_dir: &Path) -> Result<()> {
        self.require_cluster_wide("watch-namespace mutation")?;
        let mutated = self
            .find(ManifestRole::OperatorDeployment)
            .ok_or_else(|| Error::config("manifest set has no operator Deployment"))?
            .mutate_watched_namespaces(namespaces, out_dir)?;
        self.replace(mutated)
    }

    /// Apply both cluster-wide mutations
    pub fn scope_to(
        &mut self,
        deployment_namespace: &str,
        watched_namespaces: &[String],
        out_dir: &Path,
    ) -> Result<()> {
        self.mutate_watched_namespaces(watched_namespaces, out_dir)?;
        self.mutate_for_namespace(deployment_namespace, out_dir)
    }

    fn require_cluster_wide(&self, operation: &str) -> Result<()> {
        if self.scope != OperatorScope::ClusterWide {
            return Err(Error::config(format!(
                "{operation} requires cluster-wide scope, manifest set is {}",
                self.scope
            )));
        }
        Ok(())
    }
}
