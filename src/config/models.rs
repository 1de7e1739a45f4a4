// src/config/models.rs
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    #[serde(default = "default_backends")]
    pub backends: Vec<BackendConfig>,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub static_files: StaticFilesConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub url: Url,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_check_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_health_path")]
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
    /// Mark a backend unhealthy as soon as a forwarded request to it fails,
    /// instead of waiting for the next health check cycle.
    #[serde(default)]
    pub mark_unhealthy_on_error: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticFilesConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_static_dir")]
    pub dir: String,
    #[serde(default = "default_static_prefix")]
    pub prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 80))
}

fn default_backends() -> Vec<BackendConfig> {
    ["http://localhost:8080", "http://localhost:8081", "http://localhost:8082"]
        .iter()
        .filter_map(|raw| Url::parse(raw).ok())
        .map(|url| BackendConfig { url })
        .collect()
}

fn default_interval_secs() -> u64 {
    10
}

fn default_check_timeout_secs() -> u64 {
    2
}

fn default_health_path() -> String {
    "/".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_static_dir() -> String {
    "static".to_string()
}

fn default_static_prefix() -> String {
    "/static/".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            backends: default_backends(),
            health_check: HealthCheckConfig::default(),
            proxy: ProxyConfig::default(),
            static_files: StaticFilesConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            timeout_secs: default_check_timeout_secs(),
            path: default_health_path(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_request_timeout_secs(),
            mark_unhealthy_on_error: false,
        }
    }
}

impl Default for StaticFilesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_static_dir(),
            prefix: default_static_prefix(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
            path: default_metrics_path(),
        }
    }
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ProxyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.backends.is_empty() {
            bail!("At least one backend must be configured");
        }

        let mut seen = HashSet::new();
        for backend in &self.backends {
            let scheme = backend.url.scheme();
            if scheme != "http" && scheme != "https" {
                bail!("Backend {} must use http or https, got {}", backend.url, scheme);
            }
            if backend.url.host_str().is_none() {
                bail!("Backend {} has no host", backend.url);
            }
            if !seen.insert(backend_id(&backend.url)) {
                bail!("Backend {} is configured more than once", backend.url);
            }
        }

        if self.health_check.interval_secs == 0 {
            bail!("health_check.interval_secs must be greater than zero");
        }
        if self.health_check.timeout_secs == 0 {
            bail!("health_check.timeout_secs must be greater than zero");
        }
        if !self.health_check.path.starts_with('/') {
            bail!("health_check.path must start with '/'");
        }
        if self.proxy.timeout_secs == 0 {
            bail!("proxy.timeout_secs must be greater than zero");
        }

        let prefix = &self.static_files.prefix;
        if self.static_files.enabled && (!prefix.starts_with('/') || !prefix.ends_with('/') || prefix == "/") {
            bail!("static_files.prefix must look like /name/, got {:?}", prefix);
        }

        Ok(())
    }
}

/// Stable identifier for a backend: `host:port`, with the scheme's default
/// port filled in.
pub fn backend_id(url: &Url) -> String {
    format!(
        "{}:{}",
        url.host_str().unwrap_or("unknown"),
        url.port_or_known_default().unwrap_or(80)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert_eq!(config.backends.len(), 3);
        assert_eq!(config.listen.port(), 80);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn yaml_fills_missing_sections_with_defaults() {
        let yaml = r#"
backends:
  - url: "http://10.0.0.1:9000"
  - url: "http://10.0.0.2:9000"
health_check:
  path: /health
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.backends.len(), 2);
        assert_eq!(config.health_check.path, "/health");
        assert_eq!(config.health_check.timeout_secs, 2);
        assert!(!config.proxy.mark_unhealthy_on_error);
        assert_eq!(config.static_files.prefix, "/static/");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_duplicate_backends() {
        let mut config = Config::default();
        config.backends.push(config.backends[0].clone());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn rejects_empty_backend_list() {
        let config = Config {
            backends: Vec::new(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_non_http_backend() {
        let mut config = Config::default();
        config.backends[0].url = Url::parse("ftp://localhost:21").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_bad_static_prefix() {
        let mut config = Config::default();
        config.static_files.prefix = "/static".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn backend_id_uses_default_port() {
        let url = Url::parse("https://example.com/api").unwrap();
        assert_eq!(backend_id(&url), "example.com:443");
    }
}
