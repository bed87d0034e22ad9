use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;

use regex::Regex;
use tokio::process::Command;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::model::BuildConfig;
use crate::discovery::ServiceDescriptor;

/// Lines of build output kept for the error message.
const BUILD_TAIL_LINES: usize = 15;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("could not run `{program}`")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("build exited with {}\n{tail}", describe_exit(.code))]
    Failed { code: Option<i32>, tail: String },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("code {}", c),
        None => "a signal".to_string(),
    }
}

/// Compiles a project and reports where its output landed.
pub trait ProjectBuilder: Send + Sync + 'static {
    /// Build `service`, returning the directory to search for runnable artifacts.
    fn build(
        &self,
        service: &ServiceDescriptor,
    ) -> impl Future<Output = Result<PathBuf, BuildError>> + Send;
}

/// `dotnet build "<csproj>" -c <configuration>`
#[derive(Debug, Clone)]
pub struct DotnetBuilder {
    program: String,
    configuration: String,
    sanitize: bool,
}

impl DotnetBuilder {
    pub fn from_config(config: &BuildConfig) -> Self {
        Self {
            program: config.program.clone(),
            configuration: config.configuration.clone(),
            sanitize: config.sanitize_connection_strings,
        }
    }

    pub fn output_dir(&self, service: &ServiceDescriptor) -> PathBuf {
        service.project_dir().join("bin").join(&self.configuration)
    }
}

impl ProjectBuilder for DotnetBuilder {
    async fn build(&self, service: &ServiceDescriptor) -> Result<PathBuf, BuildError> {
        info!(service = %service.name, configuration = %self.configuration, "building");

        let output = Command::new(&self.program)
            .arg("build")
            .arg(&service.project)
            .arg("-c")
            .arg(&self.configuration)
            .current_dir(service.project_dir())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| BuildError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let out_dir = self.output_dir(service);
        if self.sanitize && out_dir.is_dir() {
            let dir = out_dir.clone();
            match tokio::task::spawn_blocking(move || sanitize_connection_strings(&dir)).await {
                Ok(Ok(0)) => {}
                Ok(Ok(count)) => debug!(service = %service.name, files = count, "sanitized connection strings"),
                Ok(Err(e)) => warn!(service = %service.name, error = %e, "connection string sanitization failed"),
                Err(e) => warn!(service = %service.name, error = %e, "connection string sanitization task failed"),
            }
        }

        if !output.status.success() {
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(BuildError::Failed {
                code: output.status.code(),
                tail: tail_lines(&text, BUILD_TAIL_LINES),
            });
        }

        debug!(service = %service.name, out_dir = %out_dir.display(), "build succeeded");
        Ok(out_dir)
    }
}

fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}

// ---------------------------------------------------------------------------
// Connection string sanitization
// ---------------------------------------------------------------------------

const DEV_SETTINGS_FILE: &str = "appsettings.Development.json";

static USER_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r";?User ID=.*?;").unwrap());
static PASSWORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r";?Password=.*?;").unwrap());
static SERVER_VALUE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""(Server=.*?)""#).unwrap());
static INTEGRATED_SECURITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Integrated Security=\w+").unwrap());
static MAX_POOL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Max Pool Size=\d+").unwrap());

/// Rewrite SQL Server connection strings in a settings document for local use:
/// credentials are dropped, Windows authentication forced, pool size capped at 5.
pub fn sanitize_connection_string_text(content: &str) -> String {
    let content = USER_ID_RE.replace_all(content, ";");
    let content = PASSWORD_RE.replace_all(&content, ";");

    let content = if content.contains("Integrated Security") {
        INTEGRATED_SECURITY_RE
            .replace_all(&content, "Integrated Security=true")
            .into_owned()
    } else {
        SERVER_VALUE_RE
            .replace_all(&content, "\"${1};Integrated Security=true\"")
            .into_owned()
    };

    if content.contains("Max Pool Size") {
        MAX_POOL_RE.replace_all(&content, "Max Pool Size=5").into_owned()
    } else {
        SERVER_VALUE_RE
            .replace_all(&content, "\"${1};Max Pool Size=5\"")
            .into_owned()
    }
}

fn has_default_connection(content: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(content)
        .ok()
        .and_then(|json| json.get("ConnectionStrings")?.get("DefaultConnection").cloned())
        .is_some_and(|v| !v.is_null())
}

/// Sanitize every `appsettings.Development.json` under `dir`.
///
/// Files without `ConnectionStrings.DefaultConnection` are skipped with a
/// warning. Returns the number of files rewritten.
pub fn sanitize_connection_strings(dir: &Path) -> std::io::Result<usize> {
    let mut rewritten = 0;
    for entry in WalkDir::new(dir).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() || entry.file_name() != DEV_SETTINGS_FILE {
            continue;
        }
        let path = entry.path();
        let content = std::fs::read_to_string(path)?;
        if !has_default_connection(&content) {
            warn!(file = %path.display(), "DefaultConnection not found, leaving file untouched");
            continue;
        }
        let updated = sanitize_connection_string_text(&content);
        if updated != content {
            std::fs::write(path, updated)?;
            rewritten += 1;
        }
    }
    Ok(rewritten)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::Category;
    use tempfile::TempDir;

    #[test]
    fn credentials_removed_and_local_auth_forced() {
        let input = r#"{"ConnectionStrings":{"DefaultConnection":"Server=.;Database=Identity;User ID=sa;Password=Secret1;TrustServerCertificate=True"}}"#;
        assert_eq!(
            sanitize_connection_string_text(input),
            r#"{"ConnectionStrings":{"DefaultConnection":"Server=.;Database=Identity;TrustServerCertificate=True;Integrated Security=true;Max Pool Size=5"}}"#
        );
    }

    #[test]
    fn existing_settings_are_overridden_in_place() {
        let input = r#"{"ConnectionStrings":{"DefaultConnection":"Server=db;Database=X;Integrated Security=false;Max Pool Size=100"}}"#;
        assert_eq!(
            sanitize_connection_string_text(input),
            r#"{"ConnectionStrings":{"DefaultConnection":"Server=db;Database=X;Integrated Security=true;Max Pool Size=5"}}"#
        );
    }

    #[test]
    fn sanitize_walks_output_tree_and_skips_files_without_default_connection() {
        let tmp = TempDir::new().unwrap();
        let nested = tmp.path().join("net8.0");
        std::fs::create_dir_all(&nested).unwrap();

        let with_conn = nested.join(DEV_SETTINGS_FILE);
        std::fs::write(
            &with_conn,
            r#"{"ConnectionStrings":{"DefaultConnection":"Server=.;Database=A;User ID=sa;Password=x;"}}"#,
        )
        .unwrap();
        let without = tmp.path().join(DEV_SETTINGS_FILE);
        let untouched = r#"{"Logging":{"LogLevel":{"Default":"Information"}}}"#;
        std::fs::write(&without, untouched).unwrap();

        assert_eq!(sanitize_connection_strings(tmp.path()).unwrap(), 1);

        let updated = std::fs::read_to_string(&with_conn).unwrap();
        assert!(!updated.contains("User ID"));
        assert!(!updated.contains("Password"));
        assert!(updated.contains("Integrated Security=true"));
        assert!(updated.contains("Max Pool Size=5"));
        assert_eq!(std::fs::read_to_string(&without).unwrap(), untouched);
    }

    #[test]
    fn tail_keeps_last_non_empty_lines() {
        let text = "a\n\nb\nc\n  \nd\n";
        assert_eq!(tail_lines(text, 2), "c\nd");
        assert_eq!(tail_lines("", 5), "");
    }

    #[tokio::test]
    async fn missing_program_is_spawn_error() {
        let tmp = TempDir::new().unwrap();
        let builder = DotnetBuilder::from_config(&BuildConfig {
            program: "devfleet-no-such-build-tool".into(),
            ..BuildConfig::default()
        });
        let service =
            ServiceDescriptor::new("Api", tmp.path().join("Api.csproj"), Category::Service);
        let err = builder.build(&service).await.unwrap_err();
        assert!(matches!(err, BuildError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_is_build_failure_with_tail() {
        let tmp = TempDir::new().unwrap();
        // `sh build ...` runs this script from the project directory.
        std::fs::write(
            tmp.path().join("build"),
            "echo 'error CS1002: ; expected'\nexit 1\n",
        )
        .unwrap();
        let builder = DotnetBuilder::from_config(&BuildConfig {
            program: "sh".into(),
            ..BuildConfig::default()
        });
        let service =
            ServiceDescriptor::new("Api", tmp.path().join("Api.csproj"), Category::Service);

        match builder.build(&service).await.unwrap_err() {
            BuildError::Failed { code, tail } => {
                assert_eq!(code, Some(1));
                assert!(tail.contains("CS1002"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn successful_build_sanitizes_output_settings() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("build"), "exit 0\n").unwrap();
        let builder = DotnetBuilder::from_config(&BuildConfig {
            program: "sh".into(),
            configuration: "Debug".into(),
            sanitize_connection_strings: true,
        });
        let service =
            ServiceDescriptor::new("Api", tmp.path().join("Api.csproj"), Category::Service);
        let settings = builder.output_dir(&service).join("net8.0").join(DEV_SETTINGS_FILE);
        std::fs::create_dir_all(settings.parent().unwrap()).unwrap();
        std::fs::write(
            &settings,
            r#"{"ConnectionStrings":{"DefaultConnection":"Server=.;Database=A;User ID=sa;Password=x;"}}"#,
        )
        .unwrap();

        let out_dir = builder.build(&service).await.unwrap();
        assert_eq!(out_dir, builder.output_dir(&service));
        let updated = std::fs::read_to_string(&settings).unwrap();
        assert!(!updated.contains("Password"));
        assert!(updated.contains("Integrated Security=true"));
    }
}
