use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::model::{FleetConfig, HealthConfig};
use crate::discovery::ServiceDescriptor;
use crate::orchestrator::probe;

/// SQL Server's default TCP port.
pub const DEFAULT_DATASTORE_PORT: u16 = 1433;

/// Pre-flight check run before a bulk start.
pub trait HealthCheck: Send + Sync {
    /// `Err` carries a human-readable reason.
    fn check(&self) -> impl Future<Output = Result<(), String>> + Send;
}

/// Reachability of the datastore the identity service depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatastoreCheck {
    Disabled,
    Tcp {
        host: String,
        port: u16,
        timeout: Duration,
    },
    /// Read from the identity service's development settings when the check
    /// runs, since a build may rewrite them.
    IdentitySettings {
        service: String,
        project_dir: PathBuf,
        configuration: String,
        timeout: Duration,
    },
    /// The address could not be determined; the check fails with this reason.
    Unresolved(String),
}

impl DatastoreCheck {
    pub fn from_config(config: &FleetConfig, services: &[ServiceDescriptor]) -> Self {
        Self::resolve(
            &config.health,
            &config.build.configuration,
            services,
            config.supervisor.probe_timeout(),
        )
    }

    fn resolve(
        health: &HealthConfig,
        configuration: &str,
        services: &[ServiceDescriptor],
        timeout: Duration,
    ) -> Self {
        if !health.enabled {
            return DatastoreCheck::Disabled;
        }

        if let Some(address) = &health.address {
            return match address.rsplit_once(':').map(|(h, p)| (h, p.parse::<u16>())) {
                Some((host, Ok(port))) => DatastoreCheck::Tcp {
                    host: host.to_string(),
                    port,
                    timeout,
                },
                _ => DatastoreCheck::Unresolved(format!("invalid address `{}`", address)),
            };
        }

        match services
            .iter()
            .find(|s| s.name.to_lowercase().contains("identity"))
        {
            Some(identity) => DatastoreCheck::IdentitySettings {
                service: identity.name.clone(),
                project_dir: identity.project_dir().to_path_buf(),
                configuration: configuration.to_string(),
                timeout,
            },
            None => DatastoreCheck::Unresolved("identity service not found".to_string()),
        }
    }
}

impl HealthCheck for DatastoreCheck {
    async fn check(&self) -> Result<(), String> {
        match self {
            DatastoreCheck::Disabled => {
                debug!("datastore health check disabled");
                Ok(())
            }
            DatastoreCheck::Tcp {
                host,
                port,
                timeout,
            } => reach(host, *port, *timeout).await,
            DatastoreCheck::IdentitySettings {
                service,
                project_dir,
                configuration,
                timeout,
            } => {
                let (service, project_dir, configuration) =
                    (service.clone(), project_dir.clone(), configuration.clone());
                let (host, port) = tokio::task::spawn_blocking(move || {
                    settings_address(&service, &project_dir, &configuration)
                })
                .await
                .map_err(|e| format!("datastore settings lookup failed: {}", e))??;
                reach(&host, port, *timeout).await
            }
            DatastoreCheck::Unresolved(reason) => Err(reason.clone()),
        }
    }
}

async fn reach(host: &str, port: u16, timeout: Duration) -> Result<(), String> {
    if probe::is_open(host, port, timeout).await {
        info!(host = %host, port, "datastore reachable");
        Ok(())
    } else {
        Err(format!("datastore at {}:{} is not reachable", host, port))
    }
}

/// Blocking: walks the build output and reads the settings file.
fn settings_address(
    service: &str,
    project_dir: &Path,
    configuration: &str,
) -> Result<(String, u16), String> {
    let settings = find_dev_settings(project_dir, configuration).ok_or_else(|| {
        format!("appsettings.Development.json not found for '{}'", service)
    })?;

    let connection = std::fs::read_to_string(&settings)
        .ok()
        .and_then(|text| default_connection(&text))
        .ok_or_else(|| {
            format!(
                "no ConnectionStrings.DefaultConnection in {}",
                settings.display()
            )
        })?;

    parse_server_address(&connection).ok_or_else(|| {
        format!(
            "cannot derive a TCP address from the '{}' connection string",
            service
        )
    })
}

/// Build output is preferred because it carries the sanitized copy.
fn find_dev_settings(project_dir: &Path, configuration: &str) -> Option<PathBuf> {
    let built = WalkDir::new(project_dir.join("bin").join(configuration))
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .find(|e| e.file_type().is_file() && e.file_name() == "appsettings.Development.json")
        .map(|e| e.into_path());
    built.or_else(|| {
        let source = project_dir.join("appsettings.Development.json");
        source.is_file().then_some(source)
    })
}

fn default_connection(settings: &str) -> Option<String> {
    let json: serde_json::Value = serde_json::from_str(settings).ok()?;
    json.get("ConnectionStrings")?
        .get("DefaultConnection")?
        .as_str()
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

/// Extract `(host, port)` from a SQL Server connection string.
///
/// Understands `Server`, `Data Source`, `Address` and `Addr` keys, the
/// `tcp:` prefix, `host,port`, named instances (`host\instance`) and the
/// `.`/`(local)` aliases. LocalDB is not reachable over TCP and yields `None`.
pub fn parse_server_address(connection: &str) -> Option<(String, u16)> {
    let value = connection.split(';').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        let key = key.trim().to_lowercase();
        matches!(
            key.as_str(),
            "server" | "data source" | "address" | "addr" | "network address"
        )
        .then(|| value.trim().to_string())
    })?;

    let value = value.strip_prefix("tcp:").unwrap_or(&value);
    let (host, port) = match value.split_once(',') {
        Some((host, port)) => (host.trim(), port.trim().parse::<u16>().ok()?),
        None => (value.trim(), DEFAULT_DATASTORE_PORT),
    };
    let host = host.split('\\').next().unwrap_or(host).trim();

    let host = match host.to_lowercase().as_str() {
        "" => return None,
        "(localdb)" => return None,
        "." | "(local)" | "localhost" => "localhost".to_string(),
        _ => host.to_string(),
    };
    Some((host, port))
}
