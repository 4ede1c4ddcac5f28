//! Catalog subscription installation strategy
//!
//! Installs the operator through OLM: an OperatorGroup and CatalogSource are
//! created, the package's channel is resolved from its PackageManifest, and a
//! Subscription is applied. Readiness means the installed
//! ClusterServiceVersion reached `Succeeded` and the operator Deployment is
//! ready. Any failure on the way rolls every created object back.

use std::cell::Cell;

use kube::Resource;
use tracing::{debug, info, warn};

use crate::client::ClusterApi;
use crate::config::CatalogConfig;
use crate::crd::{
    CatalogSource, ClusterServiceVersion, OperatorGroup, PackageManifest, PackageManifestStatus,
    Subscription, SubscriptionConfig,
};
use crate::error::{Error, Result};
use crate::installer::readiness::{
    resolve_operator_name, wait_for_operator_ready, wait_for_operator_removal,
};
use crate::installer::{
    DeploymentEvent, DeploymentState, Installer, OperatorHandle, OperatorNames, OperatorSetting,
};
use crate::resources::common::{strip_server_fields, upsert_env};
use crate::resources::olm::{self, SubscriptionParams};
use crate::resources::{OperatorScope, ResourceDocument};
use crate::wait::{Timeouts, WaitCondition};

/// Channel chosen for a Subscription
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedChannel {
    pub name: String,
    /// Head CSV of the channel, used as `startingCSV` when known
    pub current_csv: Option<String>,
}

/// Pick the LTS or non-LTS channel of a two-channel package.
///
/// The catalog's default channel is the non-LTS one; the other channel is
/// LTS. The result does not depend on the order channels are listed in.
pub fn select_channel(status: &PackageManifestStatus, is_lts: bool) -> Result<ResolvedChannel> {
    if status.channels.len() != 2 {
        return Err(Error::config(format!(
            "package {} exposes {} channels, expected an LTS and a non-LTS channel",
            status.package_name,
            status.channels.len()
        )));
    }
    if !status.channels.iter().any(|c| c.name == status.default_channel) {
        return Err(Error::config(format!(
            "default channel '{}' of package {} is not one of its channels",
            status.default_channel, status.package_name
        )));
    }

    let channel = status
        .channels
        .iter()
        .find(|c| (c.name == status.default_channel) != is_lts)
        .ok_or_else(|| {
            Error::config(format!(
                "package {} has no {} channel",
                status.package_name,
                if is_lts { "LTS" } else { "non-LTS" }
            ))
        })?;

    Ok(ResolvedChannel {
        name: channel.name.clone(),
        current_csv: (!channel.current_csv.is_empty()).then(|| channel.current_csv.clone()),
    })
}

/// Look up a named channel, tolerating channels the status does not list
pub fn channel_named(status: &PackageManifestStatus, name: &str) -> ResolvedChannel {
    let current_csv = status
        .channels
        .iter()
        .find(|c| c.name == name && !c.current_csv.is_empty())
        .map(|c| c.current_csv.clone());
    ResolvedChannel {
        name: name.to_string(),
        current_csv,
    }
}

/// The package must be served by the catalog the deployer expects
pub fn verify_catalog_source(status: &PackageManifestStatus, expected: &str) -> Result<()> {
    if status.catalog_source != expected {
        return Err(Error::config(format!(
            "package {} is served by catalog source '{}', expected '{expected}'",
            status.package_name, status.catalog_source
        )));
    }
    Ok(())
}

fn reference<K: Resource<DynamicType = ()>>(name: &str) -> ResourceDocument {
    ResourceDocument::reference(&K::api_version(&()), &K::kind(&()), name)
}

/// Installs the operator through a catalog Subscription
pub struct SubscriptionInstaller<C> {
    cluster: C,
    namespace: String,
    scope: OperatorScope,
    watched_namespaces: Vec<String>,
    /// OperatorGroup targets set by `watch_namespaces`; all namespaces until then
    group_targets: Option<Vec<String>>,
    catalog: CatalogConfig,
    names: OperatorNames,
    timeouts: Timeouts,
    handle: Option<OperatorHandle>,
}

impl<C: ClusterApi> SubscriptionInstaller<C> {
    pub fn new(
        cluster: C,
        namespace: &str,
        scope: OperatorScope,
        watched_namespaces: Vec<String>,
        catalog: CatalogConfig,
    ) -> Self {
        Self {
            cluster,
            namespace: namespace.to_string(),
            scope,
            watched_namespaces,
            group_targets: None,
            catalog,
            names: OperatorNames::default(),
            timeouts: Timeouts::default(),
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

    pub fn catalog(&self) -> &CatalogConfig {
        &self.catalog
    }

    /// Resolve the LTS or non-LTS channel from the package's PackageManifest
    pub async fn resolve_channel(&self, is_lts: bool) -> Result<ResolvedChannel> {
        let package = self
            .cluster
            .package_manifest(&self.namespace, &self.catalog.package_name)
            .await?
            .ok_or_else(|| {
                Error::config(format!(
                    "package {} not found in {}",
                    self.catalog.package_name, self.namespace
                ))
            })?;
        let status = package.status.unwrap_or_default();
        verify_catalog_source(&status, self.catalog.expected_source())?;
        select_channel(&status, is_lts)
    }

    /// Take over an install made by an earlier run without changing it.
    ///
    /// The handle is filled from the live Subscription and its installed CSV,
    /// then readiness is checked. Nothing is applied, and a failure leaves
    /// the install as it was.
    pub async fn adopt(&mut self) -> Result<OperatorHandle> {
        let name = self.catalog.subscription_name.clone();
        let subscription = self
            .cluster
            .subscription(&self.namespace, &name)
            .await?
            .ok_or_else(|| {
                Error::config(format!("subscription {name} not found in {}, nothing to adopt", self.namespace))
            })?;
        let channel = subscription.spec.channel;
        let csv = subscription
            .status
            .and_then(|s| s.installed_csv)
            .ok_or_else(|| Error::config(format!("subscription {name} has no installed version")))?;

        let succeeded = self
            .cluster
            .cluster_service_version(&self.namespace, &csv)
            .await?
            .is_some_and(|c| c.succeeded());
        if !succeeded {
            return Err(Error::config(format!("installed version {csv} has not succeeded")));
        }
        let resolved =
            resolve_operator_name(&self.cluster, &self.namespace, &self.names, &self.timeouts).await?;

        let handle = self.ensure_handle()?;
        handle.advance(DeploymentEvent::DeployRequested)?;
        handle.advance(DeploymentEvent::SubscriptionCreated)?;
        handle.set_channel(Some(channel.clone()));
        handle.set_installed_csv(Some(csv.clone()));
        handle.set_resolved_name(resolved);
        handle.advance(DeploymentEvent::ReadinessConfirmed)?;
        info!(namespace = %self.namespace, channel = %channel, csv = %csv, "Adopted running catalog install");
        self.snapshot()
    }

    /// Refresh the catalog image and move to `channel` if it changed
    pub async fn upgrade(&mut self, channel: &str, catalog_image: &str) -> Result<OperatorHandle> {
        if self.catalog.pre_released_source.is_some() {
            return Err(Error::config(
                "cannot upgrade through a pre-released catalog source the deployer does not own",
            ));
        }
        let current_channel = self
            .handle
            .as_ref()
            .filter(|h| h.state() == DeploymentState::Ready)
            .ok_or_else(|| Error::config("upgrade requires a ready operator"))?
            .channel()
            .map(str::to_string);

        self.catalog.image = Some(catalog_image.to_string());
        self.advance(DeploymentEvent::DeployRequested)?;
        info!(
            namespace = %self.namespace,
            from = ?current_channel,
            to = %channel,
            image = %catalog_image,
            "Upgrading operator"
        );

        if let Err(e) = self.run_upgrade(current_channel.as_deref(), channel).await {
            return Err(self.fail_and_rollback(e).await);
        }
        self.snapshot()
    }

    /// Restrict the OperatorGroup of a cluster-wide install to `namespaces`
    pub async fn watch_namespaces(&mut self, namespaces: Vec<String>) -> Result<()> {
        self.require_cluster_wide("watchNamespaces")?;
        if namespaces.is_empty() {
            return Err(Error::config("watched namespaces must not be empty"));
        }
        let group = olm::operator_group(&self.catalog.operator_group_name, &self.namespace, &namespaces);
        self.cluster
            .apply(&self.namespace, &ResourceDocument::from_object(&group)?)
            .await?;
        info!(namespace = %self.namespace, watched = %namespaces.join(","), "Updated watched namespaces");

        if let Some(handle) = self.handle.as_mut() {
            handle.set_watched_namespaces(namespaces.clone());
        }
        self.group_targets = Some(namespaces.clone());
        self.watched_namespaces = namespaces;
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

    async fn fail_and_rollback(&mut self, err: Error) -> Error {
        warn!(namespace = %self.namespace, error = %err, "Catalog install failed, rolling back");
        if let Err(e) = self.advance(DeploymentEvent::InstallFailed) {
            warn!(namespace = %self.namespace, error = %e, "Could not record failure");
        }
        if let Err(e) = self.undeploy(false).await {
            warn!(namespace = %self.namespace, error = %e, "Rollback failed");
        }
        err
    }

    async fn apply_object<K: serde::Serialize>(&self, namespace: &str, object: &K) -> Result<()> {
        self.cluster
            .apply(namespace, &ResourceDocument::from_object(object)?)
            .await
    }

    async fn apply_operator_group(&self) -> Result<()> {
        let targets: &[String] = match (self.scope, &self.group_targets) {
            (OperatorScope::Namespaced, _) => std::slice::from_ref(&self.namespace),
            (OperatorScope::ClusterWide, Some(narrowed)) => narrowed.as_slice(),
            (OperatorScope::ClusterWide, None) => &[],
        };
        let group = olm::operator_group(&self.catalog.operator_group_name, &self.namespace, targets);
        self.apply_object(&self.namespace, &group).await
    }

    async fn apply_catalog_source(&self) -> Result<()> {
        if let Some(source) = &self.catalog.pre_released_source {
            debug!(name = %source.name, namespace = %source.namespace, "Using pre-released catalog source");
            return Ok(());
        }
        let image = self.catalog.image.as_deref().ok_or_else(|| {
            Error::config("a catalog image is required when no pre-released catalog source is configured")
        })?;
        let namespace = self.catalog.source_namespace(&self.namespace);
        let source = olm::catalog_source(&self.catalog.source_name, namespace, image);
        self.apply_object(namespace, &source).await?;
        info!(name = %self.catalog.source_name, namespace = %namespace, image = %image, "Applied catalog source");
        Ok(())
    }

    async fn wait_for_package_manifest(&self) -> Result<PackageManifestStatus> {
        let found: Cell<Option<PackageManifest>> = Cell::new(None);
        WaitCondition::new(format!(
            "package {} available in {}",
            self.catalog.package_name, self.namespace
        ))
        .poll_interval(self.timeouts.poll_interval)
        .timeout(self.timeouts.subscription)
        .until(|| {
            package_served(
                &self.cluster,
                &self.namespace,
                &self.catalog.package_name,
                &found,
            )
        })
        .await?;

        Ok(found
            .into_inner()
            .and_then(|p| p.status)
            .unwrap_or_default())
    }

    async fn subscribe(&mut self, channel: &ResolvedChannel) -> Result<()> {
        let source_namespace = self.catalog.source_namespace(&self.namespace);
        let params = SubscriptionParams {
            name: &self.catalog.subscription_name,
            namespace: &self.namespace,
            package: &self.catalog.package_name,
            channel: &channel.name,
            source: self.catalog.expected_source(),
            source_namespace,
            starting_csv: channel.current_csv.as_deref(),
        };
        let subscription = olm::subscription(&params, None);
        self.apply_object(&self.namespace, &subscription).await?;
        info!(
            namespace = %self.namespace,
            name = %self.catalog.subscription_name,
            channel = %channel.name,
            starting_csv = ?channel.current_csv,
            "Applied subscription"
        );

        self.ensure_handle()?.set_channel(Some(channel.name.clone()));
        Ok(())
    }

    fn choose_channel(&self, status: &PackageManifestStatus) -> Result<ResolvedChannel> {
        verify_catalog_source(status, self.catalog.expected_source())?;
        match &self.catalog.channel {
            Some(name) => Ok(channel_named(status, name)),
            None => select_channel(status, self.catalog.lts),
        }
    }

    async fn install(&mut self, wait_for_ready: bool) -> Result<()> {
        self.apply_operator_group().await?;
        self.apply_catalog_source().await?;

        let status = self.wait_for_package_manifest().await?;
        let channel = self.choose_channel(&status)?;
        self.subscribe(&channel).await?;
        self.advance(DeploymentEvent::SubscriptionCreated)?;

        if wait_for_ready {
            self.await_installation().await?;
        }
        Ok(())
    }

    async fn run_upgrade(&mut self, current_channel: Option<&str>, channel: &str) -> Result<()> {
        self.apply_catalog_source().await?;

        if current_channel != Some(channel) {
            self.remove_subscription().await?;
            tokio::time::sleep(self.timeouts.resubscribe_delay).await;

            let status = self.wait_for_package_manifest().await?;
            verify_catalog_source(&status, self.catalog.expected_source())?;
            self.subscribe(&channel_named(&status, channel)).await?;
        }
        self.advance(DeploymentEvent::SubscriptionCreated)?;
        self.await_installation().await
    }

    /// Wait for the Subscription, its CSV and the operator Deployment
    async fn await_installation(&mut self) -> Result<()> {
        let subscription_name = self.catalog.subscription_name.clone();

        WaitCondition::new(format!("subscription {subscription_name} in {}", self.namespace))
            .poll_interval(self.timeouts.poll_interval)
            .timeout(self.timeouts.subscription)
            .until(|| subscription_exists(&self.cluster, &self.namespace, &subscription_name))
            .await?;

        let observed: Cell<Option<String>> = Cell::new(None);
        let succeeded = WaitCondition::new(format!(
            "installed version of {subscription_name} succeeded in {}",
            self.namespace
        ))
        .poll_interval(self.timeouts.poll_interval)
        .timeout(self.timeouts.csv_succeeded)
        .until(|| {
            installed_csv_succeeded(&self.cluster, &self.namespace, &subscription_name, &observed)
        })
        .await;

        // Keep the CSV name even on timeout so rollback can delete it
        if let Some(csv) = observed.into_inner() {
            self.ensure_handle()?.set_installed_csv(Some(csv));
        }
        succeeded?;

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
        info!(
            namespace = %self.namespace,
            csv = ?self.handle.as_ref().and_then(|h| h.installed_csv()),
            "Catalog install succeeded"
        );
        Ok(())
    }

    /// Name of the installed CSV, from the handle or the live Subscription
    async fn installed_csv(&self) -> Result<Option<String>> {
        if let Some(csv) = self.handle.as_ref().and_then(|h| h.installed_csv()) {
            return Ok(Some(csv.to_string()));
        }
        let subscription = self
            .cluster
            .subscription(&self.namespace, &self.catalog.subscription_name)
            .await?;
        Ok(subscription
            .and_then(|s| s.status)
            .and_then(|s| s.installed_csv.or(s.current_csv)))
    }

    /// Delete the Subscription and its installed CSV
    async fn remove_subscription(&mut self) -> Result<()> {
        let csv = self.installed_csv().await?;
        self.cluster
            .delete(
                &self.namespace,
                &reference::<Subscription>(&self.catalog.subscription_name),
            )
            .await?;
        if let Some(csv) = csv {
            self.cluster
                .delete(&self.namespace, &reference::<ClusterServiceVersion>(&csv))
                .await?;
        }
        if let Some(handle) = self.handle.as_mut() {
            handle.set_installed_csv(None);
        }
        Ok(())
    }

    async fn remove_all(&mut self) -> Result<()> {
        self.remove_subscription().await?;
        self.cluster
            .delete(
                &self.namespace,
                &reference::<OperatorGroup>(&self.catalog.operator_group_name),
            )
            .await?;
        if self.catalog.pre_released_source.is_none() {
            let namespace = self.catalog.source_namespace(&self.namespace);
            self.cluster
                .delete(namespace, &reference::<CatalogSource>(&self.catalog.source_name))
                .await?;
        }
        Ok(())
    }
}

async fn package_served<C: ClusterApi>(
    cluster: &C,
    namespace: &str,
    package: &str,
    found: &Cell<Option<PackageManifest>>,
) -> Result<bool> {
    let Some(manifest) = cluster.package_manifest(namespace, package).await? else {
        return Ok(false);
    };
    let served = manifest
        .status
        .as_ref()
        .is_some_and(|s| !s.channels.is_empty());
    if served {
        found.set(Some(manifest));
    }
    Ok(served)
}

async fn subscription_exists<C: ClusterApi>(cluster: &C, namespace: &str, name: &str) -> Result<bool> {
    Ok(cluster.subscription(namespace, name).await?.is_some())
}

async fn installed_csv_succeeded<C: ClusterApi>(
    cluster: &C,
    namespace: &str,
    subscription: &str,
    observed: &Cell<Option<String>>,
) -> Result<bool> {
    let csv_name = cluster
        .subscription(namespace, subscription)
        .await?
        .and_then(|s| s.status)
        .and_then(|s| s.installed_csv.or(s.current_csv));
    let Some(csv_name) = csv_name else {
        return Ok(false);
    };
    observed.set(Some(csv_name.clone()));

    let csv = cluster.cluster_service_version(namespace, &csv_name).await?;
    if let Some(phase) = csv.as_ref().and_then(|c| c.phase()) {
        debug!(namespace = %namespace, csv = %csv_name, phase = %phase, "CSV phase");
    }
    Ok(csv.is_some_and(|c| c.succeeded()))
}

impl<C: ClusterApi> Installer for SubscriptionInstaller<C> {
    async fn deploy(&mut self, wait_for_ready: bool) -> Result<OperatorHandle> {
        self.advance(DeploymentEvent::DeployRequested)?;
        info!(
            namespace = %self.namespace,
            scope = %self.scope,
            package = %self.catalog.package_name,
            "Deploying operator from catalog"
        );

        if let Err(e) = self.install(wait_for_ready).await {
            return Err(self.fail_and_rollback(e).await);
        }
        self.snapshot()
    }

    async fn undeploy(&mut self, wait_for_removal: bool) -> Result<()> {
        self.advance(DeploymentEvent::UndeployRequested)?;
        info!(namespace = %self.namespace, "Undeploying catalog install");

        let mut result = self.remove_all().await;
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
            self.advance(DeploymentEvent::InstallFailed)?;
            return Err(e);
        }

        if let Some(handle) = self.handle.as_mut() {
            handle.set_channel(None);
        }
        self.advance(DeploymentEvent::RemovalConfirmed)?;
        Ok(())
    }

    async fn wait_for_ready(&mut self) -> Result<OperatorHandle> {
        let state = self.handle.as_ref().map(|h| h.state());
        match state {
            Some(DeploymentState::Ready) => return self.snapshot(),
            Some(DeploymentState::SubscriptionPending) => {}
            _ => {
                return Err(Error::InvalidTransition {
                    state: state.unwrap_or_default().to_string(),
                    event: DeploymentEvent::ReadinessConfirmed.to_string(),
                });
            }
        }

        if let Err(e) = self.await_installation().await {
            return Err(self.fail_and_rollback(e).await);
        }
        self.snapshot()
    }

    async fn apply_setting(&mut self, setting: OperatorSetting) -> Result<()> {
        let name = self.catalog.subscription_name.clone();
        let mut subscription: Subscription = self
            .cluster
            .subscription(&self.namespace, &name)
            .await?
            .ok_or_else(|| Error::config(format!("subscription {name} not found in {}", self.namespace)))?;

        let config = subscription
            .spec
            .config
            .get_or_insert_with(SubscriptionConfig::default);
        upsert_env(&mut config.env, setting.env_name(), &setting.value());
        subscription.status = None;
        strip_server_fields(&mut subscription.metadata);

        self.apply_object(&self.namespace, &subscription).await?;
        info!(
            namespace = %self.namespace,
            subscription = %name,
            env = setting.env_name(),
            value = %setting.value(),
            "Applied operator setting"
        );
        Ok(())
    }

    fn handle(&self) -> Option<&OperatorHandle> {
        self.handle.as_ref()
    }
}
