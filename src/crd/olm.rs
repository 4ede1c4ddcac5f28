//! Typed models of the Operator Lifecycle Manager resources used by the
//! subscription strategy.
//!
//! Only the fields the deployer reads or writes are modelled. These CRDs are
//! owned by OLM, so no schema is generated for them.

use k8s_openapi::api::core::v1::EnvVar;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// CSV phase reported once the installed version is fully reconciled
pub const CSV_PHASE_SUCCEEDED: &str = "Succeeded";

/// CatalogSource serves bundles from an index image
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq)]
#[kube(
    group = "operators.coreos.com",
    version = "v1alpha1",
    kind = "CatalogSource",
    plural = "catalogsources",
    namespaced,
    status = "CatalogSourceStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSourceSpec {
    /// Always `grpc` for image-backed catalogs
    pub source_type: String,

    /// Index image serving the catalog
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSourceStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_state: Option<CatalogConnectionState>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CatalogConnectionState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_observed_state: Option<String>,
}

/// OperatorGroup selects the namespaces an OLM-installed operator watches
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[kube(
    group = "operators.coreos.com",
    version = "v1",
    kind = "OperatorGroup",
    plural = "operatorgroups",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct OperatorGroupSpec {
    /// Omitted for an all-namespaces group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_namespaces: Option<Vec<String>>,
}

/// Subscription installs a package from a catalog and tracks a channel
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq)]
#[kube(
    group = "operators.coreos.com",
    version = "v1alpha1",
    kind = "Subscription",
    plural = "subscriptions",
    namespaced,
    status = "SubscriptionStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSpec {
    pub channel: String,

    /// `Automatic` or `Manual`
    pub install_plan_approval: String,

    /// Package name
    pub name: String,

    /// CatalogSource name
    pub source: String,

    pub source_namespace: String,

    #[serde(rename = "startingCSV", default, skip_serializing_if = "Option::is_none")]
    pub starting_csv: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<SubscriptionConfig>,
}

/// Overrides OLM applies to the operator Deployment it manages
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatus {
    #[serde(rename = "currentCSV", default, skip_serializing_if = "Option::is_none")]
    pub current_csv: Option<String>,

    #[serde(rename = "installedCSV", default, skip_serializing_if = "Option::is_none")]
    pub installed_csv: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// ClusterServiceVersion describes one installed version of an operator
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[kube(
    group = "operators.coreos.com",
    version = "v1alpha1",
    kind = "ClusterServiceVersion",
    plural = "clusterserviceversions",
    shortname = "csv",
    namespaced,
    status = "ClusterServiceVersionStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterServiceVersionSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterServiceVersionStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ClusterServiceVersion {
    pub fn phase(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.phase.as_deref())
    }

    pub fn succeeded(&self) -> bool {
        self.phase() == Some(CSV_PHASE_SUCCEEDED)
    }
}

/// PackageManifest is the read-only package descriptor served by the
/// package server for every catalog entry
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[kube(
    group = "packages.operators.coreos.com",
    version = "v1",
    kind = "PackageManifest",
    plural = "packagemanifests",
    namespaced,
    status = "PackageManifestStatus",
    schema = "disabled"
)]
pub struct PackageManifestSpec {}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifestStatus {
    /// Name of the CatalogSource serving this package
    #[serde(default)]
    pub catalog_source: String,

    #[serde(default)]
    pub catalog_source_namespace: String,

    #[serde(default)]
    pub package_name: String,

    #[serde(default)]
    pub default_channel: String,

    #[serde(default)]
    pub channels: Vec<PackageChannel>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct PackageChannel {
    pub name: String,

    #[serde(rename = "currentCSV", default)]
    pub current_csv: String,
}
