//! Resolved identity, scope and lifecycle state of one deployed operator

use std::sync::LazyLock;

use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::installer::state_machine::{
    DeploymentEvent, DeploymentState, DeploymentStateMachine, TransitionResult,
};
use crate::resources::OperatorScope;

static STATE_MACHINE: LazyLock<DeploymentStateMachine> = LazyLock::new(DeploymentStateMachine::new);

/// Handle on one operator instance.
///
/// Created at the first deploy and owned by the installer that created it;
/// callers get snapshots. Only the installer updates the resolved name and
/// state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorHandle {
    deployment_namespace: String,
    scope: OperatorScope,
    watched_namespaces: Vec<String>,
    resolved_name: Option<String>,
    state: DeploymentState,
    channel: Option<String>,
    installed_csv: Option<String>,
}

impl OperatorHandle {
    /// A namespaced handle always watches exactly its own namespace; a
    /// cluster-wide handle needs an explicit, non-empty watch list.
    pub fn new(
        deployment_namespace: &str,
        scope: OperatorScope,
        watched_namespaces: Vec<String>,
    ) -> Result<Self> {
        if deployment_namespace.is_empty() {
            return Err(Error::config("deployment namespace must not be empty"));
        }
        let watched_namespaces = match scope {
            OperatorScope::Namespaced => vec![deployment_namespace.to_string()],
            OperatorScope::ClusterWide if watched_namespaces.is_empty() => {
                return Err(Error::config(
                    "cluster-wide scope requires at least one watched namespace",
                ));
            }
            OperatorScope::ClusterWide => watched_namespaces,
        };

        Ok(Self {
            deployment_namespace: deployment_namespace.to_string(),
            scope,
            watched_namespaces,
            resolved_name: None,
            state: DeploymentState::Undeployed,
            channel: None,
            installed_csv: None,
        })
    }

    pub fn deployment_namespace(&self) -> &str {
        &self.deployment_namespace
    }

    pub fn scope(&self) -> OperatorScope {
        self.scope
    }

    pub fn watched_namespaces(&self) -> &[String] {
        &self.watched_namespaces
    }

    /// Operator Deployment name adopted during deploy
    pub fn resolved_name(&self) -> Option<&str> {
        self.resolved_name.as_deref()
    }

    pub fn state(&self) -> DeploymentState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == DeploymentState::Ready
    }

    /// Subscription channel (catalog strategy only)
    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    /// Installed CSV name (catalog strategy only)
    pub fn installed_csv(&self) -> Option<&str> {
        self.installed_csv.as_deref()
    }

    /// Fail fast unless the handle is cluster-wide
    pub fn require_cluster_wide(&self, operation: &str) -> Result<()> {
        if self.scope != OperatorScope::ClusterWide {
            return Err(Error::config(format!(
                "{operation} requires cluster-wide scope, operator in {} is {}",
                self.deployment_namespace, self.scope
            )));
        }
        Ok(())
    }

    pub(crate) fn advance(&mut self, event: DeploymentEvent) -> Result<DeploymentState> {
        match STATE_MACHINE.transition(self.state, event) {
            TransitionResult::Success {
                from,
                to,
                description,
                ..
            } => {
                debug!(
                    namespace = %self.deployment_namespace,
                    from = %from,
                    to = %to,
                    event = %event,
                    "{}",
                    description
                );
                self.state = to;
                Ok(to)
            }
            TransitionResult::InvalidTransition { current, event } => Err(Error::InvalidTransition {
                state: current.to_string(),
                event: event.to_string(),
            }),
        }
    }

    pub(crate) fn set_resolved_name(&mut self, name: impl Into<String>) {
        self.resolved_name = Some(name.into());
    }

    pub(crate) fn set_watched_namespaces(&mut self, namespaces: Vec<String>) {
        self.watched_namespaces = namespaces;
    }

    pub(crate) fn set_channel(&mut self, channel: Option<String>) {
        self.channel = channel;
    }

    pub(crate) fn set_installed_csv(&mut self, csv: Option<String>) {
        self.installed_csv = csv;
    }
}
