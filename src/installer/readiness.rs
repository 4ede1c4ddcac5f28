//! Operator Deployment readiness and removal checks shared by both strategies

use std::cell::Cell;

use tracing::{debug, info};

use crate::client::ClusterApi;
use crate::error::{Error, Result};
use crate::installer::OperatorNames;
use crate::resources::common::POD_PHASE_RUNNING;
use crate::wait::{Timeouts, WaitCondition};

/// A candidate is ready when its Deployment reports all desired replicas
/// ready and at least one pod with its name prefix is running.
pub async fn operator_ready<C: ClusterApi>(cluster: &C, namespace: &str, name: &str) -> Result<bool> {
    let Some(deployment) = cluster.deployment(namespace, name).await? else {
        return Ok(false);
    };

    let desired = deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let ready = deployment
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    if ready != desired {
        debug!(namespace = %namespace, name = %name, ready, desired, "Operator replicas not ready");
        return Ok(false);
    }

    let pods = cluster.pods_with_prefix(namespace, name).await?;
    let running = pods.iter().any(|p| {
        p.status.as_ref().and_then(|s| s.phase.as_deref()) == Some(POD_PHASE_RUNNING)
    });
    Ok(running)
}

/// Poll both candidate names until one is ready and return it.
///
/// Both names are probed on every evaluation; the first that qualifies wins.
pub async fn resolve_operator_name<C: ClusterApi>(
    cluster: &C,
    namespace: &str,
    names: &OperatorNames,
    timeouts: &Timeouts,
) -> Result<String> {
    let resolved: Cell<Option<String>> = Cell::new(None);
    let candidates = names.candidates();

    WaitCondition::new(format!(
        "operator deployment {} or {} ready in {namespace}",
        names.current, names.legacy
    ))
    .poll_interval(timeouts.poll_interval)
    .timeout(timeouts.operator_ready)
    .until(|| first_ready_candidate(cluster, namespace, candidates, &resolved))
    .await?;

    let name = resolved
        .into_inner()
        .ok_or_else(|| Error::config("operator readiness confirmed without a resolved name"))?;
    info!(namespace = %namespace, name = %name, "Operator deployment ready");
    Ok(name)
}

/// Record the first ready candidate in `resolved`
async fn first_ready_candidate<C: ClusterApi>(
    cluster: &C,
    namespace: &str,
    candidates: [&str; 2],
    resolved: &Cell<Option<String>>,
) -> Result<bool> {
    for candidate in candidates {
        if operator_ready(cluster, namespace, candidate).await? {
            resolved.set(Some(candidate.to_string()));
            return Ok(true);
        }
    }
    Ok(false)
}

/// Poll a single, already resolved operator name until it is ready
pub async fn wait_for_operator_ready<C: ClusterApi>(
    cluster: &C,
    namespace: &str,
    name: &str,
    timeouts: &Timeouts,
) -> Result<()> {
    WaitCondition::new(format!("operator deployment {name} ready in {namespace}"))
        .poll_interval(timeouts.poll_interval)
        .timeout(timeouts.operator_ready)
        .until(|| operator_ready(cluster, namespace, name))
        .await?;
    info!(namespace = %namespace, name = %name, "Operator deployment ready");
    Ok(())
}

/// True when none of `names` has a Deployment or a pod left
pub async fn operator_removed<C: ClusterApi>(cluster: &C, namespace: &str, names: &[&str]) -> Result<bool> {
    for name in names {
        if cluster.deployment(namespace, name).await?.is_some() {
            return Ok(false);
        }
        if !cluster.pods_with_prefix(namespace, name).await?.is_empty() {
            return Ok(false);
        }
    }
    Ok(true)
}

pub async fn wait_for_operator_removal<C: ClusterApi>(
    cluster: &C,
    namespace: &str,
    names: &[&str],
    timeouts: &Timeouts,
) -> Result<()> {
    WaitCondition::new(format!("operator {} removed from {namespace}", names.join("/")))
        .poll_interval(timeouts.poll_interval)
        .timeout(timeouts.removal)
        .until(|| operator_removed(cluster, namespace, names))
        .await?;
    info!(namespace = %namespace, "Operator removed");
    Ok(())
}
