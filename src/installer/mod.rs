//! Operator installation strategies
//!
//! Two strategies implement [`Installer`]:
//!
//! - [`ManifestInstaller`] applies raw manifests in a fixed order
//! - [`SubscriptionInstaller`] installs through a catalog Subscription
//!
//! [`AnyInstaller`] dispatches to whichever one the configuration selects.

pub mod handle;
pub mod manifest;
pub mod readiness;
pub mod state_machine;
pub mod subscription;

use serde::{Deserialize, Serialize};

pub use handle::OperatorHandle;
pub use manifest::ManifestInstaller;
pub use state_machine::{DeploymentEvent, DeploymentState, DeploymentStateMachine};
pub use subscription::{ResolvedChannel, SubscriptionInstaller};

use crate::client::ClusterApi;
use crate::config::{DeployerConfig, InstallStrategy};
use crate::error::{Error, Result};
use crate::resources::ManifestTemplates;
use crate::resources::common::{CURRENT_OPERATOR_NAME, LEGACY_OPERATOR_NAME};

/// The two names the operator Deployment may carry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorNames {
    pub legacy: String,
    pub current: String,
}

impl Default for OperatorNames {
    fn default() -> Self {
        Self {
            legacy: LEGACY_OPERATOR_NAME.to_string(),
            current: CURRENT_OPERATOR_NAME.to_string(),
        }
    }
}

impl OperatorNames {
    /// Probe order used during name resolution
    pub fn candidates(&self) -> [&str; 2] {
        [self.current.as_str(), self.legacy.as_str()]
    }
}

/// Runtime-tunable operator settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OperatorSetting {
    LogLevel(String),
    /// Leader-election lease duration in seconds
    LeaseDuration(u32),
    /// Leader-election renew deadline in seconds
    RenewDeadline(u32),
    /// Leader-election retry period in seconds
    RetryPeriod(u32),
}

impl OperatorSetting {
    /// Container flag carrying the setting (manifest strategy)
    pub fn flag(&self) -> &'static str {
        match self {
            OperatorSetting::LogLevel(_) => "--zap-log-level",
            OperatorSetting::LeaseDuration(_) => "--lease-duration",
            OperatorSetting::RenewDeadline(_) => "--renew-deadline",
            OperatorSetting::RetryPeriod(_) => "--retry-period",
        }
    }

    /// Subscription env entry carrying the setting (subscription strategy)
    pub fn env_name(&self) -> &'static str {
        match self {
            OperatorSetting::LogLevel(_) => "LOG_LEVEL",
            OperatorSetting::LeaseDuration(_) => "LEASE_DURATION",
            OperatorSetting::RenewDeadline(_) => "RENEW_DEADLINE",
            OperatorSetting::RetryPeriod(_) => "RETRY_PERIOD",
        }
    }

    pub fn value(&self) -> String {
        match self {
            OperatorSetting::LogLevel(level) => level.clone(),
            OperatorSetting::LeaseDuration(n)
            | OperatorSetting::RenewDeadline(n)
            | OperatorSetting::RetryPeriod(n) => n.to_string(),
        }
    }
}

/// Lifecycle operations common to every installation strategy
#[allow(async_fn_in_trait)]
pub trait Installer {
    /// Install the operator. With `wait_for_ready` the call returns only once
    /// the operator Deployment is ready; any failure rolls back first.
    async fn deploy(&mut self, wait_for_ready: bool) -> Result<OperatorHandle>;

    /// Remove every resource the installer created
    async fn undeploy(&mut self, wait_for_removal: bool) -> Result<()>;

    /// Finish a deploy started without waiting
    async fn wait_for_ready(&mut self) -> Result<OperatorHandle>;

    async fn apply_setting(&mut self, setting: OperatorSetting) -> Result<()>;

    fn handle(&self) -> Option<&OperatorHandle>;

    async fn set_log_level(&mut self, level: &str) -> Result<()> {
        self.apply_setting(OperatorSetting::LogLevel(level.to_string()))
            .await
    }

    async fn set_lease_duration(&mut self, seconds: u32) -> Result<()> {
        self.apply_setting(OperatorSetting::LeaseDuration(seconds))
            .await
    }

    async fn set_renew_deadline(&mut self, seconds: u32) -> Result<()> {
        self.apply_setting(OperatorSetting::RenewDeadline(seconds))
            .await
    }

    async fn set_retry_period(&mut self, seconds: u32) -> Result<()> {
        self.apply_setting(OperatorSetting::RetryPeriod(seconds))
            .await
    }
}

/// Strategy selected at runtime
pub enum AnyInstaller<C> {
    Manifest(ManifestInstaller<C>),
    Subscription(SubscriptionInstaller<C>),
}

impl<C: ClusterApi> AnyInstaller<C> {
    /// Build the installer `config` selects. Manifest templates are located
    /// here so a missing file fails before any cluster call.
    pub fn from_config(cluster: C, config: &DeployerConfig) -> Result<Self> {
        config.validate()?;
        let timeouts = config.timeouts.to_timeouts();
        match config.strategy {
            InstallStrategy::Manifest => {
                let templates = ManifestTemplates::from_dir(&config.manifest_dir)?;
                Ok(AnyInstaller::Manifest(
                    ManifestInstaller::new(
                        cluster,
                        &config.namespace,
                        config.scope,
                        config.watch_namespaces.clone(),
                        templates,
                        &config.generated_dir,
                    )
                    .with_names(config.operator_names.clone())
                    .with_timeouts(timeouts),
                ))
            }
            InstallStrategy::Subscription => Ok(AnyInstaller::Subscription(
                SubscriptionInstaller::new(
                    cluster,
                    &config.namespace,
                    config.scope,
                    config.watch_namespaces.clone(),
                    config.catalog.clone(),
                )
                .with_names(config.operator_names.clone())
                .with_timeouts(timeouts),
            )),
        }
    }

    pub fn strategy(&self) -> InstallStrategy {
        match self {
            AnyInstaller::Manifest(_) => InstallStrategy::Manifest,
            AnyInstaller::Subscription(_) => InstallStrategy::Subscription,
        }
    }

    /// Take over a running catalog install without re-applying it
    pub async fn adopt(&mut self) -> Result<OperatorHandle> {
        match self {
            AnyInstaller::Subscription(installer) => installer.adopt().await,
            AnyInstaller::Manifest(_) => Err(Error::config(
                "adopting an install requires the subscription install strategy",
            )),
        }
    }

    /// Move the operator to a new channel and catalog image
    pub async fn upgrade(&mut self, channel: &str, catalog_image: &str) -> Result<OperatorHandle> {
        match self {
            AnyInstaller::Subscription(installer) => installer.upgrade(channel, catalog_image).await,
            AnyInstaller::Manifest(_) => Err(Error::config(
                "upgrade requires the subscription install strategy",
            )),
        }
    }

    /// Change the namespaces a cluster-wide operator watches
    pub async fn watch_namespaces(&mut self, namespaces: Vec<String>) -> Result<()> {
        match self {
            AnyInstaller::Manifest(installer) => installer.watch_namespaces(namespaces).await,
            AnyInstaller::Subscription(installer) => installer.watch_namespaces(namespaces).await,
        }
    }

    /// Rebind the cluster-wide operator's ClusterRoleBinding subject
    pub async fn update_cluster_role_binding(&mut self, namespace: &str) -> Result<()> {
        match self {
            AnyInstaller::Manifest(installer) => installer.update_cluster_role_binding(namespace).await,
            AnyInstaller::Subscription(_) => Err(Error::config(
                "ClusterRoleBinding is managed by the catalog with the subscription strategy",
            )),
        }
    }
}

impl<C: ClusterApi> Installer for AnyInstaller<C> {
    async fn deploy(&mut self, wait_for_ready: bool) -> Result<OperatorHandle> {
        match self {
            AnyInstaller::Manifest(i) => i.deploy(wait_for_ready).await,
            AnyInstaller::Subscription(i) => i.deploy(wait_for_ready).await,
        }
    }

    async fn undeploy(&mut self, wait_for_removal: bool) -> Result<()> {
        match self {
            AnyInstaller::Manifest(i) => i.undeploy(wait_for_removal).await,
            AnyInstaller::Subscription(i) => i.undeploy(wait_for_removal).await,
        }
    }

    async fn wait_for_ready(&mut self) -> Result<OperatorHandle> {
        match self {
            AnyInstaller::Manifest(i) => i.wait_for_ready().await,
            AnyInstaller::Subscription(i) => i.wait_for_ready().await,
        }
    }

    async fn apply_setting(&mut self, setting: OperatorSetting) -> Result<()> {
        match self {
            AnyInstaller::Manifest(i) => i.apply_setting(setting).await,
            AnyInstaller::Subscription(i) => i.apply_setting(setting).await,
        }
    }

    fn handle(&self) -> Option<&OperatorHandle> {
        match self {
            AnyInstaller::Manifest(i) => i.handle(),
            AnyInstaller::Subscription(i) => i.handle(),
        }
    }
}
