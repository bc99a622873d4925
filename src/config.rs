//! Configuration management for Turnstile.
//!
//! Configuration is layered: built-in defaults, then an optional file, then
//! environment variables prefixed with `TURNSTILE` using `__` as the nesting
//! separator, e.g. `TURNSTILE__SERVER__HTTP_ADDR=0.0.0.0:8080` or
//! `TURNSTILE__SERVER__TRUSTED_PROXIES=10.0.0.1,10.0.0.2`.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::admission::{PolicyConfig, PolicyTable};
use crate::error::{Result, TurnstileError};

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Admission control configuration
    #[serde(default)]
    pub admission: AdmissionConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,

    /// Reverse proxies whose forwarding headers are trusted
    #[serde(default)]
    pub trusted_proxies: Vec<IpAddr>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            trusted_proxies: Vec::new(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Admission control configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Interval between stale-window sweeps in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Default policy name and overrides of the built-in tiers
    #[serde(flatten)]
    pub policy: PolicyConfig,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            policy: PolicyConfig::default(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    30
}

impl AdmissionConfig {
    /// Sweep interval as a duration.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Build the validated policy table.
    pub fn policy_table(&self) -> Result<PolicyTable> {
        PolicyTable::from_config(&self.policy)
    }
}

impl TurnstileConfig {
    /// Load configuration from an optional file plus the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("TURNSTILE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("server.trusted_proxies"),
        );

        let config: TurnstileConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TurnstileConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot run.
    pub fn validate(&self) -> Result<()> {
        if self.admission.sweep_interval_secs == 0 {
            return Err(TurnstileError::Config(
                "admission.sweep_interval_secs must be greater than zero".to_string(),
            ));
        }
        self.admission.policy_table().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::{PolicyKey, PolicyTier};

    #[test]
    fn test_defaults() {
        let config = TurnstileConfig::default();
        assert_eq!(config.server.http_addr, "127.0.0.1:8080".parse().unwrap());
        assert!(config.server.trusted_proxies.is_empty());
        assert_eq!(config.admission.sweep_interval(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
server:
  http_addr: 0.0.0.0:9000
  trusted_proxies:
    - 10.0.0.254
admission:
  sweep_interval_secs: 5
  default_policy: DATA_FETCH
  policies:
    FILE_UPLOAD:
      limit: 3
      window_secs: 120
"#;
        let config = TurnstileConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.http_addr.port(), 9000);
        assert_eq!(config.server.trusted_proxies, vec!["10.0.0.254".parse::<IpAddr>().unwrap()]);

        let table = config.admission.policy_table().unwrap();
        assert_eq!(table.get(PolicyKey::FileUpload), PolicyTier::new(3, 120));
        assert_eq!(table.default_policy(), PolicyKey::DataFetch);
    }

    #[test]
    fn test_invalid_tier_fails_load() {
        let yaml = r#"
admission:
  policies:
    AUTH:
      limit: 0
      window_secs: 60
      strict: true
"#;
        assert!(matches!(
            TurnstileConfig::from_yaml(yaml),
            Err(TurnstileError::InvalidPolicy { .. })
        ));
    }

    #[test]
    fn test_zero_sweep_interval_rejected() {
        let yaml = "admission:\n  sweep_interval_secs: 0\n";
        assert!(matches!(
            TurnstileConfig::from_yaml(yaml),
            Err(TurnstileError::Config(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("turnstile-{}.yaml", std::process::id()));
        std::fs::write(
            &path,
            "admission:\n  policies:\n    ADMIN:\n      limit: 7\n      window_secs: 60\n",
        )
        .unwrap();

        let config = TurnstileConfig::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();

        let table = config.admission.policy_table().unwrap();
        assert_eq!(table.get(PolicyKey::Admin).limit, 7);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let path = Path::new("/nonexistent/turnstile.yaml");
        assert!(matches!(
            TurnstileConfig::load(Some(path)),
            Err(TurnstileError::Config(_))
        ));
    }
}
