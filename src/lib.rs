pub mod cli;
pub mod client;
pub mod config;
pub mod crd;
pub mod error;
pub mod installer;
pub mod registry;
pub mod resources;
pub mod wait;

pub use client::{ClusterApi, KubeCluster};
pub use config::{CatalogConfig, DeployerConfig, InstallStrategy};
pub use error::{Error, Result};
pub use installer::{
    AnyInstaller, DeploymentEvent, DeploymentState, Installer, ManifestInstaller, OperatorHandle,
    OperatorNames, OperatorSetting, SubscriptionInstaller,
};
pub use registry::DeploymentRegistry;
pub use resources::{ManifestSet, ManifestTemplates, OperatorScope, ResourceDocument};
pub use wait::{Timeouts, WaitCondition, wait_for};
