//! Finite state machine for the operator deployment lifecycle
//!
//! Transitions are driven synchronously by the installers; there is no
//! background reconciliation. Every transition the lifecycle allows is listed
//! in one table so invalid sequences are rejected instead of silently
//! overwriting the state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of one deployed operator instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeploymentState {
    #[default]
    Undeployed,
    Deploying,
    /// Manifest strategy: every manifest applied, readiness not yet confirmed
    ManifestsApplied,
    /// Subscription strategy: Subscription created, install not yet confirmed
    SubscriptionPending,
    Ready,
    Undeploying,
    Failed,
}

impl DeploymentState {
    /// States in which a deploy or undeploy is in flight
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            DeploymentState::Deploying
                | DeploymentState::ManifestsApplied
                | DeploymentState::SubscriptionPending
                | DeploymentState::Undeploying
        )
    }

    /// States in which operator resources may exist in the cluster
    pub fn is_active(&self) -> bool {
        !matches!(self, DeploymentState::Undeployed)
    }
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentState::Undeployed => write!(f, "Undeployed"),
            DeploymentState::Deploying => write!(f, "Deploying"),
            DeploymentState::ManifestsApplied => write!(f, "ManifestsApplied"),
            DeploymentState::SubscriptionPending => write!(f, "SubscriptionPending"),
            DeploymentState::Ready => write!(f, "Ready"),
            DeploymentState::Undeploying => write!(f, "Undeploying"),
            DeploymentState::Failed => write!(f, "Failed"),
        }
    }
}

/// Events that trigger lifecycle transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeploymentEvent {
    /// A deploy (or redeploy/upgrade) was started
    DeployRequested,
    /// All manifests were applied
    ManifestsApplied,
    /// The Subscription was created
    SubscriptionCreated,
    /// The operator Deployment reported ready
    ReadinessConfirmed,
    /// A wait timed out or a cluster call failed
    InstallFailed,
    /// Teardown was started
    UndeployRequested,
    /// Every operator resource is gone
    RemovalConfirmed,
}

impl fmt::Display for DeploymentEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentEvent::DeployRequested => write!(f, "DeployRequested"),
            DeploymentEvent::ManifestsApplied => write!(f, "ManifestsApplied"),
            DeploymentEvent::SubscriptionCreated => write!(f, "SubscriptionCreated"),
            DeploymentEvent::ReadinessConfirmed => write!(f, "ReadinessConfirmed"),
            DeploymentEvent::InstallFailed => write!(f, "InstallFailed"),
            DeploymentEvent::UndeployRequested => write!(f, "UndeployRequested"),
            DeploymentEvent::RemovalConfirmed => write!(f, "RemovalConfirmed"),
        }
    }
}

/// A state transition definition
#[derive(Debug)]
pub struct Transition {
    pub from: DeploymentState,
    pub to: DeploymentState,
    pub event: DeploymentEvent,
    /// Human-readable description of this transition
    pub description: &'static str,
}

impl Transition {
    const fn new(
        from: DeploymentState,
        to: DeploymentState,
        event: DeploymentEvent,
        description: &'static str,
    ) -> Self {
        Self {
            from,
            to,
            event,
            description,
        }
    }
}

/// Result of attempting a state transition
#[derive(Debug, PartialEq, Eq)]
pub enum TransitionResult {
    Success {
        from: DeploymentState,
        to: DeploymentState,
        event: DeploymentEvent,
        description: &'static str,
    },
    InvalidTransition {
        current: DeploymentState,
        event: DeploymentEvent,
    },
}

/// Transition table for the deployment lifecycle
pub struct DeploymentStateMachine {
    transitions: Vec<Transition>,
}

impl Default for DeploymentStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl DeploymentStateMachine {
    pub fn new() -> Self {
        use DeploymentEvent as E;
        use DeploymentState as S;

        Self {
            transitions: vec![
                // === Undeployed ===
                Transition::new(S::Undeployed, S::Deploying, E::DeployRequested, "Starting deployment"),
                Transition::new(
                    S::Undeployed,
                    S::Undeploying,
                    E::UndeployRequested,
                    "Cleaning up leftovers of an earlier deployment",
                ),
                // === Deploying ===
                Transition::new(
                    S::Deploying,
                    S::ManifestsApplied,
                    E::ManifestsApplied,
                    "All manifests applied",
                ),
                Transition::new(
                    S::Deploying,
                    S::SubscriptionPending,
                    E::SubscriptionCreated,
                    "Subscription created, waiting for install",
                ),
                Transition::new(S::Deploying, S::Failed, E::InstallFailed, "Deployment failed"),
                Transition::new(
                    S::Deploying,
                    S::Undeploying,
                    E::UndeployRequested,
                    "Removing an interrupted deployment",
                ),
                // === ManifestsApplied ===
                Transition::new(
                    S::ManifestsApplied,
                    S::Ready,
                    E::ReadinessConfirmed,
                    "Operator deployment is ready",
                ),
                Transition::new(
                    S::ManifestsApplied,
                    S::Failed,
                    E::InstallFailed,
                    "Operator did not become ready",
                ),
                Transition::new(
                    S::ManifestsApplied,
                    S::Undeploying,
                    E::UndeployRequested,
                    "Undeploy requested before readiness was confirmed",
                ),
                // === SubscriptionPending ===
                Transition::new(
                    S::SubscriptionPending,
                    S::Ready,
                    E::ReadinessConfirmed,
                    "Installed version succeeded and operator is ready",
                ),
                Transition::new(
                    S::SubscriptionPending,
                    S::Failed,
                    E::InstallFailed,
                    "Catalog install did not complete",
                ),
                Transition::new(
                    S::SubscriptionPending,
                    S::Undeploying,
                    E::UndeployRequested,
                    "Undeploy requested before install completed",
                ),
                // === Ready ===
                Transition::new(
                    S::Ready,
                    S::Deploying,
                    E::DeployRequested,
                    "Redeploy or upgrade of a ready operator",
                ),
                Transition::new(S::Ready, S::Undeploying, E::UndeployRequested, "Starting teardown"),
                // === Failed ===
                // Installers roll back automatically from here
                Transition::new(
                    S::Failed,
                    S::Undeploying,
                    E::UndeployRequested,
                    "Rolling back failed deployment",
                ),
                // === Undeploying ===
                Transition::new(
                    S::Undeploying,
                    S::Undeployed,
                    E::RemovalConfirmed,
                    "All operator resources removed",
                ),
                Transition::new(S::Undeploying, S::Failed, E::InstallFailed, "Teardown failed"),
            ],
        }
    }

    /// Attempt a transition from `current` on `event`
    pub fn transition(&self, current: DeploymentState, event: DeploymentEvent) -> TransitionResult {
        match self
            .transitions
            .iter()
            .find(|t| t.from == current && t.event == event)
        {
            Some(t) => TransitionResult::Success {
                from: t.from,
                to: t.to,
                event,
                description: t.description,
            },
            None => TransitionResult::InvalidTransition { current, event },
        }
    }

    pub fn can_transition(&self, from: DeploymentState, event: DeploymentEvent) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == from && t.event == event)
    }

    /// All events accepted in `state`
    pub fn valid_events(&self, state: DeploymentState) -> Vec<DeploymentEvent> {
        self.transitions
            .iter()
            .filter(|t| t.from == state)
            .map(|t| t.event)
            .collect()
    }
}
