//! Unit tests for manifest set construction and cluster-wide mutation

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::rbac::v1::ClusterRoleBinding;
use operator_deployer::resources::{InstallManifest, ManifestRole, ManifestSet, OperatorScope};
use operator_deployer::{Error, ManifestTemplates, ResourceDocument};

use crate::common::*;

fn roles(set: &ManifestSet) -> Vec<ManifestRole> {
    set.manifests().iter().map(|m| m.role).collect()
}

fn watch_namespace(manifest: &InstallManifest) -> Option<String> {
    let docs = manifest.documents().unwrap();
    let deployment: Deployment = docs[0].to_object().unwrap();
    deployment.spec.unwrap().template.spec.unwrap().containers[0]
        .env
        .as_ref()
        .unwrap()
        .iter()
        .find(|e| e.name == "WATCH_NAMESPACE")
        .map(|e| {
            assert!(e.value_from.is_none(), "valueFrom must be cleared");
            e.value.clone().unwrap_or_default()
        })
}

mod build_tests {
    use super::*;

    #[test]
    fn test_namespaced_order() {
        let templates = TemplateDir::new();
        let set = ManifestSet::build(OperatorScope::Namespaced, &templates.templates()).unwrap();

        assert_eq!(
            roles(&set),
            vec![
                ManifestRole::CustomResourceDefinition,
                ManifestRole::CustomResourceDefinition,
                ManifestRole::ServiceAccount,
                ManifestRole::Role,
                ManifestRole::RoleBinding,
                ManifestRole::Role,
                ManifestRole::RoleBinding,
                ManifestRole::OperatorDeployment,
            ]
        );
        let ordinals: Vec<usize> = set.manifests().iter().map(|m| m.ordinal).collect();
        assert_eq!(ordinals, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_namespaced_never_contains_cluster_rbac() {
        let templates = TemplateDir::new();
        let set = ManifestSet::build(OperatorScope::Namespaced, &templates.templates()).unwrap();
        assert!(!set.contains_role(ManifestRole::ClusterRole));
        assert!(!set.contains_role(ManifestRole::ClusterRoleBinding));
    }

    #[test]
    fn test_cluster_wide_contains_both_cluster_rbac() {
        let templates = TemplateDir::new();
        let set = ManifestSet::build(OperatorScope::ClusterWide, &templates.templates()).unwrap();
        assert!(set.contains_role(ManifestRole::ClusterRole));
        assert!(set.contains_role(ManifestRole::ClusterRoleBinding));
        assert_eq!(set.manifests()[3].role, ManifestRole::ClusterRole);
        assert_eq!(set.manifests()[4].role, ManifestRole::ClusterRoleBinding);
    }

    #[test]
    fn test_missing_cluster_rbac_is_fatal_only_for_cluster_wide() {
        let templates = TemplateDir::builder().without_cluster_rbac().build();
        assert!(ManifestSet::build(OperatorScope::Namespaced, &templates.templates()).is_ok());

        let err = ManifestSet::build(OperatorScope::ClusterWide, &templates.templates()).unwrap_err();
        match err {
            Error::FatalInstall { path, .. } => {
                assert!(path.ends_with("cluster_role.yaml"), "unexpected path {}", path.display());
            }
            other => panic!("expected FatalInstall, got {other:?}"),
        }
    }

    #[test]
    fn test_election_templates_are_optional() {
        let templates = TemplateDir::builder().without_election().build();
        let set = ManifestSet::build(OperatorScope::Namespaced, &templates.templates()).unwrap();
        assert_eq!(set.len(), 6);
        assert_eq!(
            set.manifests().last().unwrap().role,
            ManifestRole::OperatorDeployment
        );
    }

    #[test]
    fn test_missing_operator_template_is_fatal() {
        let templates = TemplateDir::new();
        std::fs::remove_file(templates.file("operator.yaml")).unwrap();
        let err = ManifestSet::build(OperatorScope::Namespaced, &templates.templates()).unwrap_err();
        assert!(matches!(err, Error::FatalInstall { .. }));
    }

    #[test]
    fn test_missing_crds_is_fatal() {
        let templates = TemplateDir::new();
        std::fs::remove_dir_all(templates.file("crds")).unwrap();
        let err = ManifestSet::build(OperatorScope::Namespaced, &templates.templates()).unwrap_err();
        assert!(matches!(err, Error::FatalInstall { .. }));
    }

    #[test]
    fn test_missing_directory_is_fatal() {
        let err = ManifestTemplates::from_dir("/nonexistent/operator/deploy").unwrap_err();
        assert!(matches!(err, Error::FatalInstall { .. }));
    }

    #[test]
    fn test_teardown_is_reverse_of_apply() {
        let templates = TemplateDir::new();
        let set = ManifestSet::build(OperatorScope::ClusterWide, &templates.templates()).unwrap();
        let forward: Vec<_> = set.manifests().iter().map(|m| m.ordinal).collect();
        let mut backward: Vec<_> = set.teardown_order().map(|m| m.ordinal).collect();
        backward.reverse();
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_multi_document_template() {
        let templates = TemplateDir::new();
        let docs = ResourceDocument::read_all(&templates.file("election_role.yaml")).unwrap();
        let kinds: Vec<&str> = docs.iter().map(|d| d.kind().unwrap()).collect();
        assert_eq!(kinds, vec!["Role", "ConfigMap"]);
    }
}

mod mutation_tests {
    use super::*;

    #[test]
    fn test_scope_to_rewrites_watch_list_and_subject() {
        let templates = TemplateDir::new();
        let out = tempfile::tempdir().unwrap();
        let before = templates.contents();

        let mut set = ManifestSet::build(OperatorScope::ClusterWide, &templates.templates()).unwrap();
        set.scope_to(
            "ns-a",
            &["ns-a".to_string(), "ns-b".to_string()],
            out.path(),
        )
        .unwrap();

        let operator = set.find(ManifestRole::OperatorDeployment).unwrap();
        assert!(operator.mutated);
        assert!(operator.path.starts_with(out.path()));
        assert_eq!(watch_namespace(operator).as_deref(), Some("ns-a,ns-b"));

        let binding_manifest = set.find(ManifestRole::ClusterRoleBinding).unwrap();
        assert!(binding_manifest.mutated);
        let binding: ClusterRoleBinding =
            binding_manifest.documents().unwrap()[0].to_object().unwrap();
        assert_eq!(
            binding.subjects.unwrap()[0].namespace.as_deref(),
            Some("ns-a")
        );

        // Templates are never modified in place
        assert_eq!(templates.contents(), before);
        assert_eq!(set.mutated_files().len(), 2);
    }

    #[test]
    fn test_mutation_keeps_ordinal_and_role() {
        let templates = TemplateDir::new();
        let out = tempfile::tempdir().unwrap();
        let set = ManifestSet::build(OperatorScope::ClusterWide, &templates.templates()).unwrap();
        let original = set.find(ManifestRole::ClusterRoleBinding).unwrap().clone();

        let mutated = original.mutate_for_namespace("ns-b", out.path()).unwrap();
        assert_eq!(mutated.ordinal, original.ordinal);
        assert_eq!(mutated.role, ManifestRole::ClusterRoleBinding);
        assert_ne!(mutated.path, original.path);
    }

    #[test]
    fn test_generated_file_can_be_regenerated() {
        let templates = TemplateDir::new();
        let out = tempfile::tempdir().unwrap();
        let mut set = ManifestSet::build(OperatorScope::ClusterWide, &templates.templates()).unwrap();
        set.mutate_watched_namespaces(&["ns-a".to_string()], out.path())
            .unwrap();
        set.mutate_watched_namespaces(&["ns-c".to_string()], out.path())
            .unwrap();

        let operator = set.find(ManifestRole::OperatorDeployment).unwrap();
        assert_eq!(watch_namespace(operator).as_deref(), Some("ns-c"));
    }

    #[test]
    fn test_wrong_role_is_configuration_error() {
        let templates = TemplateDir::new();
        let out = tempfile::tempdir().unwrap();
        let set = ManifestSet::build(OperatorScope::ClusterWide, &templates.templates()).unwrap();
        let operator = set.find(ManifestRole::OperatorDeployment).unwrap();

        let err = operator.mutate_for_namespace("ns-a", out.path()).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_namespaced_set_rejects_mutation() {
        let templates = TemplateDir::new();
        let out = tempfile::tempdir().unwrap();
        let mut set = ManifestSet::build(OperatorScope::Namespaced, &templates.templates()).unwrap();

        assert!(matches!(
            set.mutate_watched_namespaces(&["ns-a".to_string()], out.path()),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            set.mutate_for_namespace("ns-a", out.path()),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_empty_watch_list_rejected() {
        let templates = TemplateDir::new();
        let out = tempfile::tempdir().unwrap();
        let set = ManifestSet::build(OperatorScope::ClusterWide, &templates.templates()).unwrap();
        let operator = set.find(ManifestRole::OperatorDeployment).unwrap();
        assert!(matches!(
            operator.mutate_watched_namespaces(&[], out.path()),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_replace_requires_matching_role() {
        let templates = TemplateDir::new();
        let mut set = ManifestSet::build(OperatorScope::Namespaced, &templates.templates()).unwrap();
        let mut wrong = set.manifests()[0].clone();
        wrong.role = ManifestRole::OperatorDeployment;
        assert!(matches!(set.replace(wrong), Err(Error::Configuration(_))));
    }
}
