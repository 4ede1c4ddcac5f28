//! Deployer configuration
//!
//! Loaded from a YAML file named by `DEPLOYER_CONFIG`, or from individual
//! environment variables when no file is given.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::installer::OperatorNames;
use crate::resources::OperatorScope;
use crate::wait::{self, Timeouts};

/// Env var naming a YAML config file
pub const CONFIG_FILE_ENV: &str = "DEPLOYER_CONFIG";

pub const NAMESPACE_ENV: &str = "OPERATOR_NAMESPACE";
pub const SCOPE_ENV: &str = "OPERATOR_SCOPE";
pub const WATCH_NAMESPACES_ENV: &str = "WATCH_NAMESPACES";
pub const STRATEGY_ENV: &str = "INSTALL_STRATEGY";
pub const MANIFEST_DIR_ENV: &str = "MANIFEST_DIR";
pub const GENERATED_DIR_ENV: &str = "GENERATED_DIR";
pub const CATALOG_SOURCE_ENV: &str = "CATALOG_SOURCE";
pub const CATALOG_IMAGE_ENV: &str = "CATALOG_IMAGE";
pub const CATALOG_NAMESPACE_ENV: &str = "CATALOG_NAMESPACE";
/// `<namespace>/<name>` of a catalog source that already exists
pub const PRE_RELEASED_CATALOG_ENV: &str = "PRE_RELEASED_CATALOG";
pub const PACKAGE_NAME_ENV: &str = "PACKAGE_NAME";
pub const CHANNEL_ENV: &str = "OPERATOR_CHANNEL";
pub const LTS_ENV: &str = "OPERATOR_LTS";

const DEFAULT_MANIFEST_DIR: &str = "deploy";
const DEFAULT_GENERATED_DIR: &str = "target/generated-manifests";
const DEFAULT_CATALOG_SOURCE: &str = "activemq-artemis-catalog";
const DEFAULT_PACKAGE_NAME: &str = "activemq-artemis-operator";
const DEFAULT_OPERATOR_GROUP: &str = "activemq-artemis-operator-group";
const DEFAULT_SUBSCRIPTION: &str = "activemq-artemis-subscription";

/// How the operator gets installed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstallStrategy {
    #[default]
    Manifest,
    Subscription,
}

impl fmt::Display for InstallStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallStrategy::Manifest => write!(f, "manifest"),
            InstallStrategy::Subscription => write!(f, "subscription"),
        }
    }
}

impl FromStr for InstallStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "manifest" | "manifests" | "bundle" => Ok(InstallStrategy::Manifest),
            "subscription" | "olm" => Ok(InstallStrategy::Subscription),
            other => Err(Error::config(format!("unknown install strategy '{other}'"))),
        }
    }
}

/// A catalog source the deployer uses but does not own
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSourceRef {
    pub name: String,
    pub namespace: String,
}

impl FromStr for CatalogSourceRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('/') {
            Some((namespace, name)) if !namespace.is_empty() && !name.is_empty() => Ok(Self {
                name: name.to_string(),
                namespace: namespace.to_string(),
            }),
            _ => Err(Error::config(format!(
                "catalog source reference '{s}' must be <namespace>/<name>"
            ))),
        }
    }
}

/// Catalog settings for the subscription strategy
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CatalogConfig {
    /// Name of the CatalogSource the deployer creates
    pub source_name: String,
    /// Catalog index image
    pub image: Option<String>,
    /// Namespace for the created CatalogSource, defaults to the operator's
    pub namespace: Option<String>,
    /// Use this existing catalog instead of creating one
    pub pre_released_source: Option<CatalogSourceRef>,
    pub package_name: String,
    /// Channel to subscribe to, resolved from the catalog when absent
    pub channel: Option<String>,
    /// Prefer the long-term-support channel during resolution
    pub lts: bool,
    pub operator_group_name: String,
    pub subscription_name: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            source_name: DEFAULT_CATALOG_SOURCE.to_string(),
            image: None,
            namespace: None,
            pre_released_source: None,
            package_name: DEFAULT_PACKAGE_NAME.to_string(),
            channel: None,
            lts: false,
            operator_group_name: DEFAULT_OPERATOR_GROUP.to_string(),
            subscription_name: DEFAULT_SUBSCRIPTION.to_string(),
        }
    }
}

impl CatalogConfig {
    /// Name the PackageManifest must report as its catalog source
    pub fn expected_source(&self) -> &str {
        match &self.pre_released_source {
            Some(source) => &source.name,
            None => &self.source_name,
        }
    }

    /// Namespace holding the catalog source
    pub fn source_namespace<'a>(&'a self, operator_namespace: &'a str) -> &'a str {
        match (&self.pre_released_source, &self.namespace) {
            (Some(source), _) => &source.namespace,
            (None, Some(namespace)) => namespace,
            (None, None) => operator_namespace,
        }
    }
}

/// Wait budgets in seconds
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimeoutSettings {
    pub poll_interval_secs: u64,
    pub operator_ready_secs: u64,
    pub removal_secs: u64,
    pub subscription_secs: u64,
    pub csv_succeeded_secs: u64,
    pub resubscribe_delay_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: wait::DEFAULT_POLL_INTERVAL.as_secs(),
            operator_ready_secs: wait::DEFAULT_OPERATOR_READY_TIMEOUT.as_secs(),
            removal_secs: wait::DEFAULT_REMOVAL_TIMEOUT.as_secs(),
            subscription_secs: wait::DEFAULT_SUBSCRIPTION_TIMEOUT.as_secs(),
            csv_succeeded_secs: wait::DEFAULT_CSV_TIMEOUT.as_secs(),
            resubscribe_delay_secs: wait::DEFAULT_RESUBSCRIBE_DELAY.as_secs(),
        }
    }
}

impl TimeoutSettings {
    pub fn to_timeouts(&self) -> Timeouts {
        Timeouts {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            operator_ready: Duration::from_secs(self.operator_ready_secs),
            removal: Duration::from_secs(self.removal_secs),
            subscription: Duration::from_secs(self.subscription_secs),
            csv_succeeded: Duration::from_secs(self.csv_succeeded_secs),
            resubscribe_delay: Duration::from_secs(self.resubscribe_delay_secs),
        }
    }
}

/// Complete deployer configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployerConfig {
    /// Namespace the operator is deployed into
    pub namespace: String,
    #[serde(default)]
    pub scope: OperatorScope,
    /// Namespaces a cluster-wide operator watches
    #[serde(default)]
    pub watch_namespaces: Vec<String>,
    #[serde(default)]
    pub strategy: InstallStrategy,
    #[serde(default = "default_manifest_dir")]
    pub manifest_dir: PathBuf,
    #[serde(default = "default_generated_dir")]
    pub generated_dir: PathBuf,
    #[serde(default)]
    pub operator_names: OperatorNames,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
}

fn default_manifest_dir() -> PathBuf {
    PathBuf::from(DEFAULT_MANIFEST_DIR)
}

fn default_generated_dir() -> PathBuf {
    PathBuf::from(DEFAULT_GENERATED_DIR)
}

impl DeployerConfig {
    /// Defaults for `namespace`
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            scope: OperatorScope::default(),
            watch_namespaces: Vec::new(),
            strategy: InstallStrategy::default(),
            manifest_dir: default_manifest_dir(),
            generated_dir: default_generated_dir(),
            operator_names: OperatorNames::default(),
            catalog: CatalogConfig::default(),
            timeouts: TimeoutSettings::default(),
        }
    }

    /// Load from `DEPLOYER_CONFIG` if set, otherwise from the environment
    pub fn load() -> Result<Self> {
        match std::env::var(CONFIG_FILE_ENV) {
            Ok(path) => Self::from_file(path),
            Err(_) => Self::from_env(),
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        let config: Self = serde_yaml::from_str(&contents)?;
        debug!(path = %path.display(), namespace = %config.namespace, "Loaded deployer config");
        Ok(config)
    }

    /// Build from a key lookup, typically the process environment
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let namespace = get(NAMESPACE_ENV).unwrap_or_else(|| {
            warn!("{NAMESPACE_ENV} not set, using 'default'");
            "default".to_string()
        });
        let mut config = Self::new(&namespace);

        if let Some(scope) = get(SCOPE_ENV) {
            config.scope = scope.parse()?;
        }
        if let Some(watched) = get(WATCH_NAMESPACES_ENV) {
            config.watch_namespaces = split_list(&watched);
        }
        if let Some(strategy) = get(STRATEGY_ENV) {
            config.strategy = strategy.parse()?;
        }
        if let Some(dir) = get(MANIFEST_DIR_ENV) {
            config.manifest_dir = PathBuf::from(dir);
        }
        if let Some(dir) = get(GENERATED_DIR_ENV) {
            config.generated_dir = PathBuf::from(dir);
        }

        let catalog = &mut config.catalog;
        if let Some(source) = get(CATALOG_SOURCE_ENV) {
            catalog.source_name = source;
        }
        catalog.image = get(CATALOG_IMAGE_ENV);
        catalog.namespace = get(CATALOG_NAMESPACE_ENV);
        if let Some(source) = get(PRE_RELEASED_CATALOG_ENV) {
            catalog.pre_released_source = Some(source.parse()?);
        }
        if let Some(package) = get(PACKAGE_NAME_ENV) {
            catalog.package_name = package;
        }
        catalog.channel = get(CHANNEL_ENV);
        if let Some(lts) = get(LTS_ENV) {
            catalog.lts = parse_bool(LTS_ENV, &lts)?;
        }

        Ok(config)
    }

    /// Reject combinations that can never deploy
    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            return Err(Error::config("namespace must not be empty"));
        }
        if self.scope == OperatorScope::ClusterWide && self.watch_namespaces.is_empty() {
            return Err(Error::config(
                "cluster-wide scope requires at least one watched namespace",
            ));
        }
        if self.strategy == InstallStrategy::Subscription {
            if self.catalog.package_name.is_empty() {
                return Err(Error::config("subscription strategy requires a package name"));
            }
            if self.catalog.image.is_none() && self.catalog.pre_released_source.is_none() {
                return Err(Error::config(
                    "subscription strategy requires a catalog image or a pre-released catalog source",
                ));
            }
        }
        Ok(())
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(Error::config(format!("{key} must be a boolean, got '{other}'"))),
    }
}
