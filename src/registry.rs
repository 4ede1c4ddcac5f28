//! Session-scoped registry of deployed operators
//!
//! Owned by the caller (one per test session) and passed by reference.
//! A namespace can be claimed by only one active deployment at a time.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::{Error, Result};
use crate::installer::{DeploymentState, OperatorHandle};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    /// Claimed by an installer that has not reported a handle yet
    Claimed,
    Deployed(OperatorHandle),
}

#[derive(Debug, Default)]
pub struct DeploymentRegistry {
    slots: BTreeMap<String, Slot>,
}

impl DeploymentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `namespace` for one installer
    pub fn claim(&mut self, namespace: &str) -> Result<()> {
        let held = match self.slots.get(namespace) {
            Some(Slot::Claimed) => true,
            Some(Slot::Deployed(handle)) => handle.state().is_active(),
            None => false,
        };
        if held {
            return Err(Error::config(format!(
                "namespace {namespace} already has an active operator deployment"
            )));
        }
        self.slots.insert(namespace.to_string(), Slot::Claimed);
        debug!(namespace = %namespace, "Claimed namespace");
        Ok(())
    }

    /// Store the latest snapshot of `handle`, replacing any earlier one
    pub fn record(&mut self, handle: OperatorHandle) {
        self.slots.insert(
            handle.deployment_namespace().to_string(),
            Slot::Deployed(handle),
        );
    }

    /// Drop whatever is held for `namespace`
    pub fn release(&mut self, namespace: &str) -> Option<OperatorHandle> {
        debug!(namespace = %namespace, "Released namespace");
        match self.slots.remove(namespace) {
            Some(Slot::Deployed(handle)) => Some(handle),
            _ => None,
        }
    }

    pub fn get(&self, namespace: &str) -> Option<&OperatorHandle> {
        match self.slots.get(namespace) {
            Some(Slot::Deployed(handle)) => Some(handle),
            _ => None,
        }
    }

    /// Handles whose operator may still have resources in the cluster
    pub fn active(&self) -> impl Iterator<Item = &OperatorHandle> {
        self.slots.values().filter_map(|slot| match slot {
            Slot::Deployed(handle) if handle.state() != DeploymentState::Undeployed => Some(handle),
            _ => None,
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
