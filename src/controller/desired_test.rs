//! Tests for the desired-state compiler

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::api::core::v1::{ConfigMap, Secret};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use kube::api::ObjectMeta;
    use kube::ResourceExt;

    use super::super::chart_name::MockChartNameResolver;
    use super::super::desired::*;
    use super::super::keys;
    use super::super::release::{ComponentVersion, MockReleaseSource, ReleaseApp};
    use super::super::store::fake::MemoryStore;
    use crate::config::{AppDefaults, OperatorConfig, OverrideRule};
    use crate::crd::{Cluster, ClusterSpec, ObjectReference};
    use crate::error::Error;

    fn cluster() -> Cluster {
        Cluster {
            metadata: ObjectMeta {
                name: Some("demo0".into()),
                namespace: Some("org-acme".into()),
                labels: Some(BTreeMap::from([
                    (keys::LABEL_CLUSTER.to_string(), "demo0".to_string()),
                    (keys::LABEL_RELEASE_VERSION.to_string(), "25.0.0".to_string()),
                ])),
                ..Default::default()
            },
            spec: ClusterSpec::default(),
            status: None,
        }
    }

    fn config() -> OperatorConfig {
        OperatorConfig {
            base_domain: "example.com".into(),
            dns_ip: "172.31.0.10".into(),
            app_defaults: AppDefaults {
                catalog: "default".into(),
                namespace: "kube-system".into(),
                use_upgrade_force: true,
            },
            ..Default::default()
        }
    }

    fn releases(apps: &[(&str, &str)]) -> MockReleaseSource {
        let apps: BTreeMap<String, ReleaseApp> = apps
            .iter()
            .map(|(name, version)| {
                (
                    name.to_string(),
                    ReleaseApp {
                        version: version.to_string(),
                        ..Default::default()
                    },
                )
            })
            .collect();

        let mut releases = MockReleaseSource::new();
        releases.expect_component_versions().returning(|_| {
            Ok(BTreeMap::from([(
                "app-operator".to_string(),
                ComponentVersion {
                    version: "6.11.0".into(),
                    catalog: Some("control-plane-catalog".into()),
                    reference: None,
                },
            )]))
        });
        releases
            .expect_apps()
            .returning(move |_| Ok(apps.clone()));
        releases
    }

    fn suffixing_charts() -> MockChartNameResolver {
        let mut charts = MockChartNameResolver::new();
        charts
            .expect_chart_name()
            .returning(|_, app, _| Ok(format!("{app}-app")));
        charts
    }

    #[tokio::test]
    async fn platform_agent_comes_first() {
        let config = config();
        let releases = releases(&[("coredns", "1.21.0"), ("app-operator", "6.11.0")]);
        let charts = suffixing_charts();
        let store = MemoryStore::new();

        let compiled = Compiler::new(&config, &releases, &charts, &store)
            .compile(&cluster())
            .await
            .unwrap();

        let names: Vec<_> = compiled.apps.iter().map(|a| a.name_any()).collect();
        assert_eq!(names, ["demo0-app-operator", "demo0-coredns"]);

        let agent = &compiled.apps[0];
        assert_eq!(agent.labels()[keys::LABEL_APP_OPERATOR_VERSION], "0.0.0");
        assert_eq!(agent.spec.version, "6.11.0");
        assert_eq!(agent.spec.catalog, "control-plane-catalog");
        assert_eq!(agent.spec.namespace, "org-acme");
        assert!(agent.spec.kube_config.in_cluster);
        assert_eq!(
            agent.spec.config.as_ref().and_then(|c| c.config_map.as_ref()).map(|c| c.name.as_str()),
            Some("demo0-app-operator-values")
        );
    }

    #[tokio::test]
    async fn manifest_apps_use_defaults() {
        let config = config();
        let releases = releases(&[("coredns", "1.21.0")]);
        let charts = suffixing_charts();
        let store = MemoryStore::new();

        let compiled = Compiler::new(&config, &releases, &charts, &store)
            .compile(&cluster())
            .await
            .unwrap();
        let coredns = &compiled.apps[1];

        assert_eq!(coredns.namespace().as_deref(), Some("org-acme"));
        assert_eq!(coredns.spec.name, "coredns-app");
        assert_eq!(coredns.spec.catalog, "default");
        assert_eq!(coredns.spec.namespace, "kube-system");
        assert_eq!(coredns.labels()[keys::LABEL_APP_OPERATOR_VERSION], "6.11.0");
        assert_eq!(coredns.labels()[keys::LABEL_APP_NAME], "coredns");
        assert!(keys::is_managed_by_us(coredns.labels()));
        assert_eq!(coredns.annotations()[keys::ANNOTATION_FORCE_HELM_UPGRADE], "true");
        assert!(!coredns.spec.kube_config.in_cluster);
        assert_eq!(
            coredns.spec.kube_config.context.as_ref().map(|c| c.name.as_str()),
            Some("demo0-kubeconfig")
        );
        assert!(coredns.spec.user_config.is_none());
        assert!(compiled.failures.is_empty());
    }

    #[tokio::test]
    async fn override_sets_chart_and_secret() {
        let mut config = config();
        config.overrides.insert(
            "cert-exporter".into(),
            OverrideRule {
                chart: Some("x-app".into()),
                has_cluster_values_secret: Some(true),
                use_upgrade_force: Some(false),
                ..Default::default()
            },
        );
        let releases = releases(&[("cert-exporter", "2.9.0")]);
        let mut charts = MockChartNameResolver::new();
        charts.expect_chart_name().never();
        let store = MemoryStore::new();

        let compiled = Compiler::new(&config, &releases, &charts, &store)
            .compile(&cluster())
            .await
            .unwrap();
        let exporter = &compiled.apps[1];

        assert_eq!(exporter.spec.name, "x-app");
        let secret = exporter
            .spec
            .config
            .as_ref()
            .and_then(|c| c.secret.as_ref())
            .expect("secret reference");
        assert_eq!(secret.name, "demo0-cluster-values");
        assert_eq!(exporter.annotations()[keys::ANNOTATION_FORCE_HELM_UPGRADE], "false");
    }

    #[tokio::test]
    async fn unresolvable_chart_does_not_block_others() {
        let config = config();
        let releases = releases(&[("broken", "1.0.0"), ("coredns", "1.21.0")]);
        let mut charts = MockChartNameResolver::new();
        charts.expect_chart_name().returning(|catalog, app, version| {
            if app == "broken" {
                Err(Error::not_found("chart", format!("{app}@{version} in {catalog}")))
            } else {
                Ok(app.to_string())
            }
        });
        let store = MemoryStore::new();

        let compiled = Compiler::new(&config, &releases, &charts, &store)
            .compile(&cluster())
            .await
            .unwrap();

        let names: Vec<_> = compiled.apps.iter().map(|a| a.name_any()).collect();
        assert_eq!(names, ["demo0-app-operator", "demo0-coredns"]);
        assert_eq!(compiled.failures.len(), 1);
        assert_eq!(compiled.failures[0].0, "broken");
        assert!(compiled.failure_error().is_some());
    }

    #[tokio::test]
    async fn missing_platform_agent_aborts() {
        let config = config();
        let mut releases = MockReleaseSource::new();
        releases
            .expect_component_versions()
            .returning(|_| Ok(BTreeMap::new()));
        releases.expect_apps().never();
        let charts = MockChartNameResolver::new();
        let store = MemoryStore::new();

        let err = Compiler::new(&config, &releases, &charts, &store)
            .compile(&cluster())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ValidationError(_)));
    }

    #[tokio::test]
    async fn deleting_cluster_desires_nothing() {
        let config = config();
        let mut releases = MockReleaseSource::new();
        releases.expect_component_versions().never();
        let charts = MockChartNameResolver::new();
        let store = MemoryStore::new();

        let mut cluster = cluster();
        cluster.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));

        let compiled = Compiler::new(&config, &releases, &charts, &store)
            .compile(&cluster)
            .await
            .unwrap();
        assert!(compiled.apps.is_empty());
    }

    #[tokio::test]
    async fn managed_control_plane_excludes_builtin_apps() {
        let config = config();
        let releases = releases(&[
            ("aws-cni", "1.0.0"),
            ("cert-exporter", "2.9.0"),
            ("coredns", "1.21.0"),
            ("kube-proxy", "1.0.0"),
        ]);
        let charts = suffixing_charts();
        let store = MemoryStore::new();

        let mut cluster = cluster();
        cluster.spec.control_plane_ref = Some(ObjectReference {
            kind: "AWSManagedControlPlane".into(),
            name: "demo0".into(),
            ..Default::default()
        });
        cluster.spec.infrastructure_ref = Some(ObjectReference {
            kind: "AWSManagedCluster".into(),
            name: "demo0".into(),
            ..Default::default()
        });

        let compiled = Compiler::new(&config, &releases, &charts, &store)
            .compile(&cluster)
            .await
            .unwrap();
        let names: Vec<_> = compiled.apps.iter().map(|a| a.name_any()).collect();
        assert_eq!(names, ["demo0-app-operator", "demo0-cert-exporter"]);
    }

    #[tokio::test]
    async fn user_config_only_when_present() {
        let config = config();
        let releases = releases(&[("cert-exporter", "2.9.0"), ("coredns", "1.21.0")]);
        let charts = suffixing_charts();
        let store = MemoryStore::new();
        store.insert_config_map(ConfigMap {
            metadata: ObjectMeta {
                name: Some("demo0-coredns-user-values".into()),
                namespace: Some("org-acme".into()),
                ..Default::default()
            },
            ..Default::default()
        });
        store.insert_secret(Secret {
            metadata: ObjectMeta {
                name: Some("demo0-coredns-user-secrets".into()),
                namespace: Some("org-acme".into()),
                ..Default::default()
            },
            ..Default::default()
        });

        let compiled = Compiler::new(&config, &releases, &charts, &store)
            .compile(&cluster())
            .await
            .unwrap();

        let exporter = compiled.by_chart_app("cert-exporter").unwrap();
        assert!(exporter.spec.user_config.is_none());

        let coredns = compiled.by_chart_app("coredns").unwrap();
        let user = coredns.spec.user_config.as_ref().unwrap();
        assert_eq!(
            user.config_map.as_ref().map(|c| c.name.as_str()),
            Some("demo0-coredns-user-values")
        );
        assert_eq!(
            user.secret.as_ref().map(|s| s.name.as_str()),
            Some("demo0-coredns-user-secrets")
        );
    }
}
