//! Builders for the catalog objects created by the subscription strategy

use kube::core::ObjectMeta;

use crate::crd::{
    CatalogSource, CatalogSourceSpec, OperatorGroup, OperatorGroupSpec, Subscription,
    SubscriptionConfig, SubscriptionSpec,
};
use crate::resources::common::standard_labels;

/// Catalog source type for image-backed catalogs
pub const SOURCE_TYPE_GRPC: &str = "grpc";

/// Install plans are approved without manual intervention
pub const INSTALL_PLAN_AUTOMATIC: &str = "Automatic";

fn metadata(name: &str, namespace: &str, component: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(standard_labels(component)),
        ..Default::default()
    }
}

/// Build a grpc CatalogSource serving `image`
pub fn catalog_source(name: &str, namespace: &str, image: &str) -> CatalogSource {
    CatalogSource {
        metadata: metadata(name, namespace, "catalog-source"),
        spec: CatalogSourceSpec {
            source_type: SOURCE_TYPE_GRPC.to_string(),
            image: Some(image.to_string()),
            display_name: Some(name.to_string()),
            publisher: None,
        },
        status: None,
    }
}

/// Build an OperatorGroup. An empty target list selects all namespaces.
pub fn operator_group(name: &str, namespace: &str, target_namespaces: &[String]) -> OperatorGroup {
    OperatorGroup {
        metadata: metadata(name, namespace, "operator-group"),
        spec: OperatorGroupSpec {
            target_namespaces: (!target_namespaces.is_empty()).then(|| target_namespaces.to_vec()),
        },
    }
}

/// Parameters for a Subscription
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionParams<'a> {
    pub name: &'a str,
    pub namespace: &'a str,
    pub package: &'a str,
    pub channel: &'a str,
    pub source: &'a str,
    pub source_namespace: &'a str,
    pub starting_csv: Option<&'a str>,
}

/// Build an automatically-approved Subscription
pub fn subscription(params: &SubscriptionParams<'_>, config: Option<SubscriptionConfig>) -> Subscription {
    Subscription {
        metadata: metadata(params.name, params.namespace, "subscription"),
        spec: SubscriptionSpec {
            channel: params.channel.to_string(),
            install_plan_approval: INSTALL_PLAN_AUTOMATIC.to_string(),
            name: params.package.to_string(),
            source: params.source.to_string(),
            source_namespace: params.source_namespace.to_string(),
            starting_csv: params.starting_csv.map(str::to_string),
            config,
        },
        status: None,
    }
}
