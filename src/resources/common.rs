//! Common constants and helpers shared by the manifest and catalog builders

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::EnvVar;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Field manager name for server-side apply
pub const FIELD_MANAGER: &str = "operator-deployer";

/// Env entry on the operator container listing the watched namespaces
pub const WATCH_NAMESPACE_ENV: &str = "WATCH_NAMESPACE";

/// Operator Deployment name before the product rename
pub const LEGACY_OPERATOR_NAME: &str = "activemq-artemis-operator";

/// Operator Deployment name after the product rename
pub const CURRENT_OPERATOR_NAME: &str = "activemq-artemis-controller-manager";

/// Pod phase counted as running
pub const POD_PHASE_RUNNING: &str = "Running";

/// Labels stamped on every object the deployer creates itself
pub fn standard_labels(component: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            "app.kubernetes.io/component".to_string(),
            component.to_string(),
        ),
        (
            "app.kubernetes.io/managed-by".to_string(),
            FIELD_MANAGER.to_string(),
        ),
    ])
}

/// Set `name` to `value` in an env list, replacing any existing entry
/// (including its `valueFrom`) or appending a new one.
pub fn upsert_env(env: &mut Vec<EnvVar>, name: &str, value: &str) {
    let entry = EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        value_from: None,
    };
    match env.iter_mut().find(|e| e.name == name) {
        Some(existing) => *existing = entry,
        None => env.push(entry),
    }
}

/// Set `--flag=value` in a container arg list, replacing an existing flag of
/// the same name or appending it.
pub fn upsert_flag(args: &mut Vec<String>, flag: &str, value: &str) {
    let prefix = format!("{flag}=");
    let rendered = format!("{flag}={value}");
    match args.iter_mut().find(|a| a.starts_with(&prefix) || *a == flag) {
        Some(existing) => *existing = rendered,
        None => args.push(rendered),
    }
}

/// Drop server-populated metadata from an object read back from the cluster
/// so it can be sent as an apply patch
pub fn strip_server_fields(meta: &mut ObjectMeta) {
    meta.managed_fields = None;
    meta.resource_version = None;
    meta.uid = None;
    meta.creation_timestamp = None;
    meta.generation = None;
}
