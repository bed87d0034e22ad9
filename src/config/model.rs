use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Contents of an optional `devfleet.toml` at the solution root.
///
/// Every section is optional; a missing file is equivalent to an empty one.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct FleetConfig {
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub bulk: BulkConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub launch: LaunchConfig,
}

// ---------------------------------------------------------------------------
// [supervisor]
// ---------------------------------------------------------------------------

fn default_port() -> u16 {
    5000
}

fn default_probe_timeout_ms() -> u64 {
    2000
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_readiness_timeout_secs() -> u64 {
    60
}

fn default_console_throttle_ms() -> u64 {
    50
}

fn default_console_capacity() -> usize {
    10_000
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SupervisorConfig {
    /// Port used when a project has no `launchSettings.json` or no `sslPort`.
    #[serde(default = "default_port")]
    pub default_port: u16,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_readiness_timeout_secs")]
    pub readiness_timeout_secs: u64,
    #[serde(default = "default_console_throttle_ms")]
    pub console_throttle_ms: u64,
    /// Maximum number of console chunks retained per service.
    #[serde(default = "default_console_capacity")]
    pub console_capacity: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            default_port: default_port(),
            probe_timeout_ms: default_probe_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            readiness_timeout_secs: default_readiness_timeout_secs(),
            console_throttle_ms: default_console_throttle_ms(),
            console_capacity: default_console_capacity(),
        }
    }
}

impl SupervisorConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_secs)
    }

    pub fn console_throttle(&self) -> Duration {
        Duration::from_millis(self.console_throttle_ms)
    }
}

// ---------------------------------------------------------------------------
// [bulk]
// ---------------------------------------------------------------------------

fn default_required_minimum() -> usize {
    4
}

fn default_settle_delay_ms() -> u64 {
    2000
}

fn default_required_keywords() -> Vec<String> {
    ["ocelotapi", "gateway", "location", "identity", "notification"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_web_keywords() -> Vec<String> {
    vec!["web".to_string()]
}

fn default_communication_keywords() -> Vec<String> {
    vec!["chat".to_string(), "messaging".to_string()]
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct BulkConfig {
    /// Bulk start refuses to run when fewer required-tier services exist.
    #[serde(default = "default_required_minimum")]
    pub required_minimum: usize,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_required_keywords")]
    pub required: Vec<String>,
    #[serde(default = "default_web_keywords")]
    pub web: Vec<String>,
    #[serde(default = "default_communication_keywords")]
    pub communication: Vec<String>,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            required_minimum: default_required_minimum(),
            settle_delay_ms: default_settle_delay_ms(),
            required: default_required_keywords(),
            web: default_web_keywords(),
            communication: default_communication_keywords(),
        }
    }
}

impl BulkConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

// ---------------------------------------------------------------------------
// [health]
// ---------------------------------------------------------------------------

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct HealthConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Explicit `host:port` of the datastore. When absent the address is
    /// taken from the identity service's connection string.
    #[serde(default)]
    pub address: Option<String>,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: None,
        }
    }
}

// ---------------------------------------------------------------------------
// [build]
// ---------------------------------------------------------------------------

fn default_build_program() -> String {
    "dotnet".to_string()
}

fn default_build_configuration() -> String {
    "Debug".to_string()
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct BuildConfig {
    #[serde(default = "default_build_program")]
    pub program: String,
    #[serde(default = "default_build_configuration")]
    pub configuration: String,
    #[serde(default = "default_true")]
    pub sanitize_connection_strings: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            program: default_build_program(),
            configuration: default_build_configuration(),
            sanitize_connection_strings: true,
        }
    }
}

// ---------------------------------------------------------------------------
// [launch]
// ---------------------------------------------------------------------------

fn default_environment() -> String {
    "Development".to_string()
}

fn default_url_scheme() -> String {
    "https".to_string()
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LaunchConfig {
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default = "default_url_scheme")]
    pub url_scheme: String,
    /// Extra variables passed to every launched service.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            url_scheme: default_url_scheme(),
            env: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: FleetConfig = toml::from_str("").unwrap();
        assert_eq!(config, FleetConfig::default());
        assert_eq!(config.supervisor.default_port, 5000);
        assert_eq!(config.supervisor.probe_timeout(), Duration::from_secs(2));
        assert_eq!(config.supervisor.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.supervisor.readiness_timeout(), Duration::from_secs(60));
        assert_eq!(config.bulk.required_minimum, 4);
        assert_eq!(config.bulk.settle_delay(), Duration::from_secs(2));
        assert!(config.health.enabled);
        assert_eq!(config.build.program, "dotnet");
        assert_eq!(config.launch.environment, "Development");
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config: FleetConfig = toml::from_str(
            r#"
[supervisor]
readiness_timeout_secs = 120

[bulk]
required_minimum = 1
web = ["portal"]

[health]
address = "db.local:1433"

[launch.env]
FEATURE_FLAGS = "dev"
"#,
        )
        .unwrap();

        assert_eq!(config.supervisor.readiness_timeout_secs, 120);
        assert_eq!(config.supervisor.default_port, 5000);
        assert_eq!(config.bulk.required_minimum, 1);
        assert_eq!(config.bulk.web, vec!["portal".to_string()]);
        assert_eq!(config.bulk.communication, vec!["chat", "messaging"]);
        assert_eq!(config.health.address.as_deref(), Some("db.local:1433"));
        assert_eq!(config.launch.env["FEATURE_FLAGS"], "dev");
        assert_eq!(config.launch.url_scheme, "https");
    }

    #[test]
    fn default_required_keywords_cover_gateway_identity_and_notification() {
        let bulk = BulkConfig::default();
        for keyword in ["ocelotapi", "location", "identity", "notification"] {
            assert!(bulk.required.iter().any(|k| k == keyword), "{keyword}");
        }
    }
}
