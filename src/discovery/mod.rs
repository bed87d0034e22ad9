use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Where a project sits in the solution layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Service,
    Gateway,
    Web,
}

impl Category {
    /// Scan order and the directory under `src/` each category lives in.
    pub const ALL: [(Category, &'static str); 3] = [
        (Category::Service, "Services"),
        (Category::Gateway, "ApiGateways"),
        (Category::Web, "Web"),
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Service => "service",
            Category::Gateway => "gateway",
            Category::Web => "web",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A runnable project found under the solution root. Immutable once discovered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceDescriptor {
    pub name: String,
    /// Path to the `.csproj` file.
    pub project: PathBuf,
    pub category: Category,
}

impl ServiceDescriptor {
    pub fn new(name: impl Into<String>, project: impl Into<PathBuf>, category: Category) -> Self {
        Self {
            name: name.into(),
            project: project.into(),
            category,
        }
    }

    /// Directory containing the project file.
    pub fn project_dir(&self) -> &Path {
        self.project.parent().unwrap_or_else(|| Path::new("."))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("invalid solution layout: {} not found", .0.display())]
    DirectoryNotFound(PathBuf),
    #[error("failed to read project file {}", .path.display())]
    ReadProject {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(
        "service name '{name}' is used by both {} and {}",
        .first.display(),
        .second.display()
    )]
    DuplicateName {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },
}

/// Scan `<root>/src` for web projects, grouped by category.
///
/// Category directories that do not exist yield empty groups; a missing
/// `src` directory means the root is not a solution at all.
pub fn detect(root: &Path) -> Result<Vec<(Category, Vec<ServiceDescriptor>)>, DiscoveryError> {
    let src = root.join("src");
    if !src.is_dir() {
        return Err(DiscoveryError::DirectoryNotFound(src));
    }

    let mut groups = Vec::with_capacity(Category::ALL.len());
    for (category, dir) in Category::ALL {
        let dir = src.join(dir);
        let projects = if dir.is_dir() {
            scan_category(&dir, category)?
        } else {
            debug!(dir = %dir.display(), "category directory absent");
            Vec::new()
        };
        groups.push((category, projects));
    }
    Ok(groups)
}

/// Flattened, name-unique descriptor list in discovery order.
pub fn load_solution(root: &Path) -> Result<Vec<ServiceDescriptor>, DiscoveryError> {
    let mut seen: BTreeMap<String, PathBuf> = BTreeMap::new();
    let mut services = Vec::new();
    for (_, group) in detect(root)? {
        for descriptor in group {
            if let Some(first) = seen.get(&descriptor.name) {
                return Err(DiscoveryError::DuplicateName {
                    name: descriptor.name,
                    first: first.clone(),
                    second: descriptor.project,
                });
            }
            seen.insert(descriptor.name.clone(), descriptor.project.clone());
            services.push(descriptor);
        }
    }
    Ok(services)
}

fn scan_category(dir: &Path, category: Category) -> Result<Vec<ServiceDescriptor>, DiscoveryError> {
    let mut found = Vec::new();
    let walker = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_build_output(e));

    for entry in walker.filter_map(Result::ok) {
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().and_then(|e| e.to_str()) != Some("csproj")
        {
            continue;
        }
        if !is_api_project(path)? {
            continue;
        }
        let Some(name) = path.file_stem().map(|s| s.to_string_lossy().to_string()) else {
            continue;
        };
        found.push(ServiceDescriptor::new(name, path, category));
    }
    Ok(found)
}

fn is_build_output(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && matches!(entry.file_name().to_str(), Some("bin" | "obj" | ".git"))
}

/// A project is runnable when it uses the web SDK or follows the `*.Api.csproj` naming.
pub fn is_api_project(path: &Path) -> Result<bool, DiscoveryError> {
    let by_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase().ends_with(".api.csproj"))
        .unwrap_or(false);
    if by_name {
        return Ok(true);
    }
    let text = std::fs::read_to_string(path).map_err(|source| DiscoveryError::ReadProject {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(text.contains("Microsoft.NET.Sdk.Web"))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::path::Path;

    pub const WEB_SDK: &str = r#"<Project Sdk="Microsoft.NET.Sdk.Web"></Project>"#;
    pub const LIB_SDK: &str = r#"<Project Sdk="Microsoft.NET.Sdk"></Project>"#;

    /// Write `<root>/src/<category_dir>/<name>/<name>.csproj`.
    pub fn project(root: &Path, category_dir: &str, name: &str, body: &str) {
        let dir = root.join("src").join(category_dir).join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(format!("{name}.csproj")), body).unwrap();
    }
}
