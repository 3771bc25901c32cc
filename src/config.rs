//! Operator configuration
//!
//! Everything here is parsed once at startup and shared read-only through an
//! `Arc<OperatorConfig>`. The app defaults and per-app override rules come
//! from a YAML document with `default:` and `overrides:` sections.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Proxy settings of the management cluster
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProxyConfig {
    pub http_proxy: String,
    pub https_proxy: String,
    pub no_proxy: String,
}

impl ProxyConfig {
    pub fn is_empty(&self) -> bool {
        self.http_proxy.is_empty() && self.https_proxy.is_empty() && self.no_proxy.is_empty()
    }
}

/// Defaults applied to every release app
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppDefaults {
    #[serde(default)]
    pub catalog: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub use_upgrade_force: bool,
}

/// Per-app deviation from [`AppDefaults`]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_upgrade_force: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_cluster_values_secret: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_cluster: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct AppConfigFile {
    #[serde(default)]
    pub default: AppDefaults,
    #[serde(default)]
    pub overrides: BTreeMap<String, OverrideRule>,
}

impl AppConfigFile {
    pub fn from_yaml(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw)
            .map_err(|e| Error::ConfigError(format!("invalid app config: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_yaml(&raw)
    }
}

#[derive(Clone, Debug, Default)]
pub struct OperatorConfig {
    /// Management cluster base domain; workload clusters get `<id>.<base>`
    pub base_domain: String,
    /// Default service CIDR of workload clusters
    pub cluster_ip_range: String,
    /// Default DNS service IP, derived from `cluster_ip_range` unless given
    pub dns_ip: String,
    pub registry_domain: String,
    /// Management provider kind written into platform agent values
    pub provider: String,
    pub default_pod_cidr: String,
    pub proxy: ProxyConfig,
    pub app_defaults: AppDefaults,
    pub overrides: BTreeMap<String, OverrideRule>,
    pub watch_namespace: Option<String>,
}

impl OperatorConfig {
    pub fn with_app_config(mut self, file: AppConfigFile) -> Self {
        self.app_defaults = file.default;
        self.overrides = file.overrides;
        self
    }

    pub fn override_for(&self, app: &str) -> Option<&OverrideRule> {
        self.overrides.get(app)
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_domain.is_empty() {
            return Err(Error::ConfigError("base domain must not be empty".into()));
        }
        if self.dns_ip.is_empty() {
            return Err(Error::ConfigError("DNS IP must not be empty".into()));
        }
        if self.app_defaults.catalog.is_empty() {
            return Err(Error::ConfigError("default catalog must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const APP_CONFIG: &str = r#"
default:
  catalog: default
  namespace: kube-system
  useUpgradeForce: true
overrides:
  cert-exporter:
    chart: cert-exporter-app
    hasClusterValuesSecret: true
  chart-operator:
    namespace: giantswarm
    useUpgradeForce: false
"#;

    #[test]
    fn parses_defaults_and_overrides() {
        let file = AppConfigFile::from_yaml(APP_CONFIG).unwrap();
        assert_eq!(file.default.catalog, "default");
        assert!(file.default.use_upgrade_force);

        let exporter = &file.overrides["cert-exporter"];
        assert_eq!(exporter.chart.as_deref(), Some("cert-exporter-app"));
        assert_eq!(exporter.has_cluster_values_secret, Some(true));
        assert!(exporter.namespace.is_none());

        let chart_operator = &file.overrides["chart-operator"];
        assert_eq!(chart_operator.use_upgrade_force, Some(false));
    }

    #[test]
    fn rejects_malformed_yaml() {
        let err = AppConfigFile::from_yaml("default: [not, a, map]").unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("apps.yaml");
        std::fs::write(&path, APP_CONFIG).unwrap();

        let config = OperatorConfig {
            base_domain: "example.com".into(),
            dns_ip: "172.31.0.10".into(),
            ..Default::default()
        }
        .with_app_config(AppConfigFile::load(&path).unwrap());

        assert!(config.validate().is_ok());
        assert!(config.override_for("chart-operator").is_some());
        assert!(config.override_for("coredns").is_none());
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = AppConfigFile::load(Path::new("/nonexistent/apps.yaml")).unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn proxy_emptiness() {
        assert!(ProxyConfig::default().is_empty());
        let proxy = ProxyConfig {
            https_proxy: "http://proxy:3128".into(),
            ..Default::default()
        };
        assert!(!proxy.is_empty());
    }
}
