//! Policy tiers and the table that maps route categories to them.
//!
//! Every route category is a [`PolicyKey`]. The [`PolicyTable`] is the single
//! source of truth for limits: it starts from the built-in defaults, merges
//! any configured overrides, and is validated exhaustively before the
//! controller ever sees it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{info, warn};

use crate::error::{Result, TurnstileError};

/// Route categories that carry their own rate limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyKey {
    Auth,
    PaymentCreate,
    PaymentVerify,
    FileUpload,
    FileDelete,
    Email,
    Registration,
    DataFetch,
    Admin,
    /// Fallback applied to unknown policy names.
    Default,
}

impl PolicyKey {
    /// Every key, in declaration order.
    pub const ALL: [PolicyKey; 10] = [
        PolicyKey::Auth,
        PolicyKey::PaymentCreate,
        PolicyKey::PaymentVerify,
        PolicyKey::FileUpload,
        PolicyKey::FileDelete,
        PolicyKey::Email,
        PolicyKey::Registration,
        PolicyKey::DataFetch,
        PolicyKey::Admin,
        PolicyKey::Default,
    ];

    /// Canonical name, also used as the bucket key in the window store.
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyKey::Auth => "AUTH",
            PolicyKey::PaymentCreate => "PAYMENT_CREATE",
            PolicyKey::PaymentVerify => "PAYMENT_VERIFY",
            PolicyKey::FileUpload => "FILE_UPLOAD",
            PolicyKey::FileDelete => "FILE_DELETE",
            PolicyKey::Email => "EMAIL",
            PolicyKey::Registration => "REGISTRATION",
            PolicyKey::DataFetch => "DATA_FETCH",
            PolicyKey::Admin => "ADMIN",
            PolicyKey::Default => "DEFAULT",
        }
    }
}

impl fmt::Display for PolicyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string names no known policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPolicy(pub String);

impl fmt::Display for UnknownPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown policy key: {}", self.0)
    }
}

impl std::error::Error for UnknownPolicy {}

impl FromStr for PolicyKey {
    type Err = UnknownPolicy;

    /// Accepts the canonical form as well as lower-case and kebab-case
    /// spellings (`payment-create`), which is how they appear in URLs.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().replace('-', "_").to_ascii_uppercase();
        PolicyKey::ALL
            .into_iter()
            .find(|key| key.as_str() == normalized)
            .ok_or_else(|| UnknownPolicy(s.to_string()))
    }
}

// Layered config sources may lower-case map keys, so keys are parsed
// through `FromStr` rather than matched exactly.
impl<'de> Deserialize<'de> for PolicyKey {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Longest window a tier may use: one year.
pub const MAX_WINDOW_SECS: u64 = 365 * 24 * 60 * 60;

/// Limit configuration for one route category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyTier {
    /// Maximum requests allowed in the window
    pub limit: u32,
    /// Window length in seconds
    pub window_secs: u64,
    /// Reject callers whose identity cannot be established instead of
    /// placing them in the shared anonymous bucket
    #[serde(default)]
    pub strict: bool,
}

impl PolicyTier {
    /// A relaxed tier allowing `limit` requests per `window_secs`.
    pub const fn new(limit: u32, window_secs: u64) -> Self {
        Self {
            limit,
            window_secs,
            strict: false,
        }
    }

    /// A tier that rejects unidentifiable callers.
    pub const fn strict(limit: u32, window_secs: u64) -> Self {
        Self {
            limit,
            window_secs,
            strict: true,
        }
    }

    /// Window length as a duration.
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.window_secs as i64)
    }

    fn validate(&self, key: PolicyKey) -> Result<()> {
        if self.limit == 0 {
            return Err(TurnstileError::InvalidPolicy {
                key: key.to_string(),
                reason: "limit must be greater than zero".to_string(),
            });
        }
        if self.window_secs == 0 || self.window_secs > MAX_WINDOW_SECS {
            return Err(TurnstileError::InvalidPolicy {
                key: key.to_string(),
                reason: format!("window_secs must be in 1..={}", MAX_WINDOW_SECS),
            });
        }
        Ok(())
    }
}

/// Built-in tier for a key.
pub fn builtin_tier(key: PolicyKey) -> PolicyTier {
    match key {
        PolicyKey::Auth => PolicyTier::strict(5, 60),
        PolicyKey::PaymentCreate => PolicyTier::new(10, 60),
        PolicyKey::PaymentVerify => PolicyTier::new(15, 60),
        PolicyKey::FileUpload => PolicyTier::new(10, 60),
        PolicyKey::FileDelete => PolicyTier::new(10, 60),
        PolicyKey::Email => PolicyTier::strict(5, 60),
        PolicyKey::Registration => PolicyTier::new(10, 60),
        PolicyKey::DataFetch => PolicyTier::new(20, 60),
        PolicyKey::Admin => PolicyTier::new(30, 60),
        PolicyKey::Default => PolicyTier::new(10, 60),
    }
}

/// Serialized form of the policy table, as found in configuration files.
///
/// Only the keys that differ from the built-in defaults need to be listed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Tier applied when a caller names an unknown policy
    #[serde(default = "default_policy_key")]
    pub default_policy: PolicyKey,

    /// Per-key overrides of the built-in tiers
    #[serde(default)]
    pub policies: HashMap<PolicyKey, PolicyTier>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            default_policy: default_policy_key(),
            policies: HashMap::new(),
        }
    }
}

fn default_policy_key() -> PolicyKey {
    PolicyKey::Default
}

/// A policy key resolved from a caller-supplied name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedPolicy {
    pub key: PolicyKey,
    pub tier: PolicyTier,
    /// Whether the requested name was unknown and the default tier was used
    pub fell_back: bool,
}

/// Validated, immutable mapping from every [`PolicyKey`] to its tier.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    tiers: HashMap<PolicyKey, PolicyTier>,
    default_policy: PolicyKey,
}

impl PolicyTable {
    /// The built-in tiers with no overrides.
    pub fn builtin() -> Self {
        Self {
            tiers: PolicyKey::ALL
                .into_iter()
                .map(|key| (key, builtin_tier(key)))
                .collect(),
            default_policy: PolicyKey::Default,
        }
    }

    /// Merge configured overrides over the built-in tiers and validate the result.
    pub fn from_config(config: &PolicyConfig) -> Result<Self> {
        let mut table = Self::builtin();
        table.default_policy = config.default_policy;
        for (key, tier) in &config.policies {
            table.tiers.insert(*key, *tier);
        }
        table.validate()?;

        info!(
            overrides = config.policies.len(),
            default_policy = %table.default_policy,
            "Policy table loaded"
        );
        Ok(table)
    }

    /// Load a policy table from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PolicyConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(format!("Failed to parse policy config: {}", e)))?;
        Self::from_config(&config)
    }

    /// Load a policy table from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading policy configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Check that every key maps to a well-formed tier.
    pub fn validate(&self) -> Result<()> {
        for key in PolicyKey::ALL {
            match self.tiers.get(&key) {
                Some(tier) => tier.validate(key)?,
                None => {
                    return Err(TurnstileError::InvalidPolicy {
                        key: key.to_string(),
                        reason: "no tier configured".to_string(),
                    })
                }
            }
        }
        Ok(())
    }

    /// Tier for a key.
    ///
    /// Tables are only constructed through validating paths, so every key
    /// is present; the built-in tier is a last resort.
    pub fn get(&self, key: PolicyKey) -> PolicyTier {
        self.tiers
            .get(&key)
            .copied()
            .unwrap_or_else(|| builtin_tier(key))
    }

    /// The key used for unknown policy names.
    pub fn default_policy(&self) -> PolicyKey {
        self.default_policy
    }

    /// Resolve a caller-supplied policy name, falling back to the default tier.
    pub fn resolve(&self, name: &str) -> ResolvedPolicy {
        match name.parse::<PolicyKey>() {
            Ok(key) => ResolvedPolicy {
                key,
                tier: self.get(key),
                fell_back: false,
            },
            Err(_) => {
                warn!(
                    requested = %name,
                    fallback = %self.default_policy,
                    "Unknown policy key, using default tier"
                );
                ResolvedPolicy {
                    key: self.default_policy,
                    tier: self.get(self.default_policy),
                    fell_back: true,
                }
            }
        }
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_tiers() {
        let table = PolicyTable::builtin();
        assert!(table.validate().is_ok());

        assert_eq!(table.get(PolicyKey::Auth), PolicyTier::strict(5, 60));
        assert_eq!(table.get(PolicyKey::Email), PolicyTier::strict(5, 60));
        assert_eq!(table.get(PolicyKey::PaymentVerify).limit, 15);
        assert_eq!(table.get(PolicyKey::DataFetch).limit, 20);
        assert_eq!(table.get(PolicyKey::Admin).limit, 30);
        assert!(!table.get(PolicyKey::Registration).strict);
    }

    #[test]
    fn test_policy_key_parsing() {
        assert_eq!("AUTH".parse::<PolicyKey>().unwrap(), PolicyKey::Auth);
        assert_eq!(
            "payment-create".parse::<PolicyKey>().unwrap(),
            PolicyKey::PaymentCreate
        );
        assert_eq!(
            "file_upload".parse::<PolicyKey>().unwrap(),
            PolicyKey::FileUpload
        );
        assert!("uploads".parse::<PolicyKey>().is_err());
    }

    #[test]
    fn test_parse_overrides() {
        let yaml = r#"
policies:
  AUTH:
    limit: 3
    window_secs: 30
    strict: true
  DATA_FETCH:
    limit: 100
    window_secs: 60
"#;
        let table = PolicyTable::from_yaml(yaml).unwrap();
        assert_eq!(table.get(PolicyKey::Auth), PolicyTier::strict(3, 30));
        assert_eq!(table.get(PolicyKey::DataFetch), PolicyTier::new(100, 60));
        // Untouched keys keep their defaults
        assert_eq!(table.get(PolicyKey::Admin), PolicyTier::new(30, 60));
    }

    #[test]
    fn test_zero_limit_rejected_at_load() {
        let yaml = r#"
policies:
  EMAIL:
    limit: 0
    window_secs: 60
"#;
        let err = PolicyTable::from_yaml(yaml).unwrap_err();
        match err {
            TurnstileError::InvalidPolicy { key, .. } => assert_eq!(key, "EMAIL"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_zero_window_rejected_at_load() {
        let yaml = r#"
policies:
  ADMIN:
    limit: 10
    window_secs: 0
"#;
        assert!(matches!(
            PolicyTable::from_yaml(yaml),
            Err(TurnstileError::InvalidPolicy { .. })
        ));
    }

    #[test]
    fn test_oversized_window_rejected_at_load() {
        let yaml = r#"
policies:
  ADMIN:
    limit: 5
    window_secs: 9000000000000
"#;
        let err = PolicyTable::from_yaml(yaml).unwrap_err();
        match err {
            TurnstileError::InvalidPolicy { key, .. } => assert_eq!(key, "ADMIN"),
            other => panic!("unexpected error: {other}"),
        }

        let yaml = format!(
            "policies:\n  ADMIN:\n    limit: 5\n    window_secs: {}\n",
            MAX_WINDOW_SECS
        );
        assert!(PolicyTable::from_yaml(&yaml).is_ok());
    }

    #[test]
    fn test_negative_limit_rejected_at_load() {
        let yaml = r#"
policies:
  ADMIN:
    limit: -1
    window_secs: 60
"#;
        assert!(matches!(
            PolicyTable::from_yaml(yaml),
            Err(TurnstileError::Config(_))
        ));
    }

    #[test]
    fn test_unknown_key_in_config_rejected() {
        let yaml = r#"
policies:
  UPLOADS:
    limit: 10
    window_secs: 60
"#;
        assert!(PolicyTable::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_resolve_unknown_falls_back() {
        let table = PolicyTable::builtin();

        let resolved = table.resolve("registration");
        assert_eq!(resolved.key, PolicyKey::Registration);
        assert!(!resolved.fell_back);

        let resolved = table.resolve("not-a-route");
        assert_eq!(resolved.key, PolicyKey::Default);
        assert_eq!(resolved.tier, PolicyTier::new(10, 60));
        assert!(resolved.fell_back);
    }

    #[test]
    fn test_configured_default_policy() {
        let yaml = "default_policy: DATA_FETCH\n";
        let table = PolicyTable::from_yaml(yaml).unwrap();
        let resolved = table.resolve("unknown");
        assert_eq!(resolved.key, PolicyKey::DataFetch);
        assert_eq!(resolved.tier.limit, 20);
    }
}
