use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Port a service listens on when its launch settings do not say otherwise.
pub const DEFAULT_PORT: u16 = 5000;

static SSL_PORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""sslPort"\s*:\s*(\d+)"#).unwrap());

/// `<project dir>/Properties/launchSettings.json`
pub fn launch_settings_path(project_dir: &Path) -> PathBuf {
    project_dir.join("Properties").join("launchSettings.json")
}

/// First usable `"sslPort"` in a launch settings document.
pub fn parse_ssl_port(text: &str) -> Option<u16> {
    let digits = SSL_PORT_RE.captures(text)?.get(1)?.as_str();
    match digits.parse::<u16>() {
        Ok(0) | Err(_) => None,
        Ok(port) => Some(port),
    }
}

/// Resolve the port for the project in `project_dir`.
///
/// Never fails: a missing or unreadable settings file, an absent field and
/// an out-of-range value all fall back to `default`.
pub fn resolve_port(project_dir: &Path, default: u16) -> u16 {
    let path = launch_settings_path(project_dir);
    match std::fs::read_to_string(&path) {
        Ok(text) => parse_ssl_port(&text).unwrap_or_else(|| {
            tracing::debug!(settings = %path.display(), default, "no usable sslPort");
            default
        }),
        Err(_) => default,
    }
}

/// Identify which process owns a given port.
pub fn identify_port_owner(port: u16) -> Option<String> {
    crate::platform::identify_port_owner(port)
}
