//! Manifest template layouts and configuration builders
//!
//! ```rust,ignore
//! let templates = TemplateDir::new();
//! let templates = TemplateDir::builder()
//!     .operator_name("activemq-artemis-operator")
//!     .without_cluster_rbac()
//!     .build();
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use operator_deployer::config::{CatalogConfig, CatalogSourceRef};
use operator_deployer::crd::{PackageChannel, PackageManifest, PackageManifestSpec, PackageManifestStatus};
use operator_deployer::{ManifestTemplates, Timeouts};
use tempfile::TempDir;

pub const TEST_NAMESPACE: &str = "ns-a";
pub const CURRENT_NAME: &str = "activemq-artemis-controller-manager";
pub const LEGACY_NAME: &str = "activemq-artemis-operator";
pub const CATALOG_NAME: &str = "artemis-catalog";
pub const PACKAGE_NAME: &str = "activemq-artemis-operator";
pub const SUBSCRIPTION_NAME: &str = "artemis-subscription";
pub const OPERATOR_GROUP_NAME: &str = "artemis-group";
pub const CATALOG_IMAGE: &str = "quay.io/artemiscloud/catalog:1.0";

/// Install tracing output for a test, once per process
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug,kube=warn")
        .with_test_writer()
        .try_init();
}

/// Short wait budgets; tests run on a paused clock
pub fn fast_timeouts() -> Timeouts {
    Timeouts {
        poll_interval: Duration::from_secs(1),
        operator_ready: Duration::from_secs(30),
        removal: Duration::from_secs(30),
        subscription: Duration::from_secs(20),
        csv_succeeded: Duration::from_secs(30),
        resubscribe_delay: Duration::from_secs(2),
    }
}

const BROKER_CRD: &str = r#"apiVersion: apiextensions.k8s.io/v1
kind: CustomResourceDefinition
metadata:
  name: activemqartemises.broker.amq.io
spec:
  group: broker.amq.io
  names:
    kind: ActiveMQArtemis
    plural: activemqartemises
  scope: Namespaced
"#;

const ADDRESS_CRD: &str = r#"apiVersion: apiextensions.k8s.io/v1
kind: CustomResourceDefinition
metadata:
  name: activemqartemisaddresses.broker.amq.io
spec:
  group: broker.amq.io
  names:
    kind: ActiveMQArtemisAddress
    plural: activemqartemisaddresses
  scope: Namespaced
"#;

const SERVICE_ACCOUNT: &str = r#"apiVersion: v1
kind: ServiceAccount
metadata:
  name: activemq-artemis-controller-manager
"#;

const ROLE: &str = r#"apiVersion: rbac.authorization.k8s.io/v1
kind: Role
metadata:
  name: activemq-artemis-operator-role
rules:
  - apiGroups: ["broker.amq.io"]
    resources: ["*"]
    verbs: ["*"]
"#;

const ROLE_BINDING: &str = r#"apiVersion: rbac.authorization.k8s.io/v1
kind: RoleBinding
metadata:
  name: activemq-artemis-operator-rolebinding
roleRef:
  apiGroup: rbac.authorization.k8s.io
  kind: Role
  name: activemq-artemis-operator-role
subjects:
  - kind: ServiceAccount
    name: activemq-artemis-controller-manager
"#;

const CLUSTER_ROLE: &str = r#"apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRole
metadata:
  name: activemq-artemis-operator-clusterrole
rules:
  - apiGroups: ["broker.amq.io"]
    resources: ["*"]
    verbs: ["*"]
"#;

const CLUSTER_ROLE_BINDING: &str = r#"apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRoleBinding
metadata:
  name: activemq-artemis-operator-clusterrolebinding
roleRef:
  apiGroup: rbac.authorization.k8s.io
  kind: ClusterRole
  name: activemq-artemis-operator-clusterrole
subjects:
  - kind: ServiceAccount
    name: activemq-artemis-controller-manager
    namespace: placeholder
"#;

const ELECTION_ROLE: &str = r#"apiVersion: rbac.authorization.k8s.io/v1
kind: Role
metadata:
  name: activemq-artemis-leader-election-role
rules:
  - apiGroups: ["coordination.k8s.io"]
    resources: ["leases"]
    verbs: ["get", "create", "update"]
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: activemq-artemis-election-settings
data:
  leaseDuration: "15"
"#;

const ELECTION_ROLE_BINDING: &str = r#"apiVersion: rbac.authorization.k8s.io/v1
kind: RoleBinding
metadata:
  name: activemq-artemis-leader-election-rolebinding
roleRef:
  apiGroup: rbac.authorization.k8s.io
  kind: Role
  name: activemq-artemis-leader-election-role
subjects:
  - kind: ServiceAccount
    name: activemq-artemis-controller-manager
"#;

fn operator_yaml(name: &str) -> String {
    format!(
        r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: {name}
spec:
  replicas: 1
  selector:
    matchLabels:
      name: {name}
  template:
    metadata:
      labels:
        name: {name}
    spec:
      serviceAccountName: activemq-artemis-controller-manager
      containers:
        - name: manager
          image: quay.io/artemiscloud/activemq-artemis-operator:latest
          args:
            - --leader-elect
            - --zap-log-level=info
          env:
            - name: WATCH_NAMESPACE
              valueFrom:
                fieldRef:
                  fieldPath: metadata.namespace
            - name: OPERATOR_NAME
              value: {name}
"#
    )
}

/// A manifest template layout on disk, removed when dropped
pub struct TemplateDir {
    dir: TempDir,
}

pub struct TemplateDirBuilder {
    operator_name: String,
    cluster_rbac: bool,
    election: bool,
}

impl TemplateDirBuilder {
    /// Name of the Deployment in `operator.yaml`
    pub fn operator_name(mut self, name: &str) -> Self {
        self.operator_name = name.to_string();
        self
    }

    /// Leave out `cluster_role.yaml` and `cluster_role_binding.yaml`
    pub fn without_cluster_rbac(mut self) -> Self {
        self.cluster_rbac = false;
        self
    }

    /// Leave out the leader-election Role and RoleBinding
    pub fn without_election(mut self) -> Self {
        self.election = false;
        self
    }

    pub fn build(self) -> TemplateDir {
        let dir = tempfile::tempdir().expect("create template dir");
        let root = dir.path();
        std::fs::create_dir_all(root.join("crds")).unwrap();
        write(root, "crds/broker_crd.yaml", BROKER_CRD);
        write(root, "crds/address_crd.yaml", ADDRESS_CRD);
        write(root, "service_account.yaml", SERVICE_ACCOUNT);
        write(root, "role.yaml", ROLE);
        write(root, "role_binding.yaml", ROLE_BINDING);
        if self.cluster_rbac {
            write(root, "cluster_role.yaml", CLUSTER_ROLE);
            write(root, "cluster_role_binding.yaml", CLUSTER_ROLE_BINDING);
        }
        if self.election {
            write(root, "election_role.yaml", ELECTION_ROLE);
            write(root, "election_role_binding.yaml", ELECTION_ROLE_BINDING);
        }
        write(root, "operator.yaml", &operator_yaml(&self.operator_name));
        TemplateDir { dir }
    }
}

fn write(root: &Path, relative: &str, contents: &str) {
    std::fs::write(root.join(relative), contents).unwrap();
}

impl TemplateDir {
    /// Complete layout with the current operator name
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> TemplateDirBuilder {
        TemplateDirBuilder {
            operator_name: CURRENT_NAME.to_string(),
            cluster_rbac: true,
            election: true,
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn file(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    pub fn templates(&self) -> ManifestTemplates {
        ManifestTemplates::from_dir(self.path()).unwrap()
    }

    /// Snapshot of every template file, to prove templates stay untouched
    pub fn contents(&self) -> Vec<(PathBuf, String)> {
        let mut files = Vec::new();
        collect(self.path(), &mut files);
        files.sort();
        files
    }
}

fn collect(dir: &Path, files: &mut Vec<(PathBuf, String)>) {
    for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            collect(&path, files);
        } else {
            let contents = std::fs::read_to_string(&path).unwrap();
            files.push((path, contents));
        }
    }
}

/// Catalog settings matching [`package_manifest`]
pub fn catalog_config() -> CatalogConfig {
    CatalogConfig {
        source_name: CATALOG_NAME.to_string(),
        image: Some(CATALOG_IMAGE.to_string()),
        namespace: None,
        pre_released_source: None,
        package_name: PACKAGE_NAME.to_string(),
        channel: None,
        lts: false,
        operator_group_name: OPERATOR_GROUP_NAME.to_string(),
        subscription_name: SUBSCRIPTION_NAME.to_string(),
    }
}

pub fn pre_released_catalog(name: &str, namespace: &str) -> CatalogConfig {
    CatalogConfig {
        image: None,
        pre_released_source: Some(CatalogSourceRef {
            name: name.to_string(),
            namespace: namespace.to_string(),
        }),
        ..catalog_config()
    }
}

/// PackageManifest served by `catalog` with `(channel, currentCSV)` entries
pub fn package_manifest(catalog: &str, default_channel: &str, channels: &[(&str, &str)]) -> PackageManifest {
    let mut manifest = PackageManifest::new(PACKAGE_NAME, PackageManifestSpec {});
    manifest.status = Some(PackageManifestStatus {
        catalog_source: catalog.to_string(),
        catalog_source_namespace: TEST_NAMESPACE.to_string(),
        package_name: PACKAGE_NAME.to_string(),
        default_channel: default_channel.to_string(),
        channels: channels
            .iter()
            .map(|(name, csv)| PackageChannel {
                name: name.to_string(),
                current_csv: csv.to_string(),
            })
            .collect(),
    });
    manifest
}

/// The two-channel Artemis package used by most catalog tests
pub fn artemis_package() -> PackageManifest {
    package_manifest(
        CATALOG_NAME,
        "7.12.x",
        &[
            ("7.11.x", "activemq-artemis-operator.v7.11.7"),
            ("7.12.x", "activemq-artemis-operator.v7.12.2"),
        ],
    )
}
