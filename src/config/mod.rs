pub mod model;
pub mod recent;
pub mod resolve;
pub mod validate;

use std::path::Path;

use model::FleetConfig;

pub const CONFIG_FILENAME: &str = "devfleet.toml";

pub fn load_config(path: &Path) -> anyhow::Result<(FleetConfig, String)> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file {}: {}", path.display(), e))?;
    let config: FleetConfig = toml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse config file {}: {}", path.display(), e))?;
    Ok((config, content))
}

/// Load and validate the configuration for a solution root.
///
/// An explicit `file` must exist. Otherwise `<root>/devfleet.toml` is used
/// when present, and built-in defaults when it is not.
pub fn load_for_root(root: &Path, file: Option<&Path>) -> anyhow::Result<FleetConfig> {
    let path = match file {
        Some(path) if path.is_file() => path.to_path_buf(),
        Some(path) => anyhow::bail!("Config file not found: {}", path.display()),
        None => {
            let candidate = root.join(CONFIG_FILENAME);
            if !candidate.is_file() {
                tracing::debug!(root = %root.display(), "no config file, using defaults");
                return Ok(FleetConfig::default());
            }
            candidate
        }
    };

    let (config, source) = load_config(&path)?;
    let filename = path
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_else(|| CONFIG_FILENAME.to_string());

    if let Err(errors) = validate::validate(&config, &source, &filename) {
        let count = errors.len();
        for err in errors {
            let report: miette::Report = err.into();
            eprintln!("{:?}", report);
        }
        anyhow::bail!("{} has {} configuration error(s)", filename, count);
    }

    tracing::debug!(config = %path.display(), "loaded configuration");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = load_for_root(tmp.path(), None).unwrap();
        assert_eq!(config, FleetConfig::default());
    }

    #[test]
    fn root_file_is_picked_up() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join(CONFIG_FILENAME),
            "[bulk]\nrequired_minimum = 2\n",
        )
        .unwrap();
        let config = load_for_root(tmp.path(), None).unwrap();
        assert_eq!(config.bulk.required_minimum, 2);
    }

    #[test]
    fn explicit_missing_file_errors() {
        let tmp = TempDir::new().unwrap();
        let err = load_for_root(tmp.path(), Some(&tmp.path().join("nope.toml"))).unwrap_err();
        assert!(err.to_string().contains("Config file not found"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("custom.toml");
        std::fs::write(&path, "[supervisor]\nreadiness_timeout_secs = 0\n").unwrap();
        let err = load_for_root(tmp.path(), Some(&path)).unwrap_err();
        assert!(err.to_string().contains("1 configuration error"), "{err}");
    }

    #[test]
    fn parse_errors_name_the_file() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(CONFIG_FILENAME), "[bulk\n").unwrap();
        let err = load_for_root(tmp.path(), None).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
