use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The last solution root that loaded successfully.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentSolution {
    pub root: PathBuf,
    pub opened_at: DateTime<Utc>,
}

impl RecentSolution {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            opened_at: Utc::now(),
        }
    }

    fn record_path() -> PathBuf {
        crate::platform::home_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(".devfleet")
            .join("recent.json")
    }

    pub fn load() -> Option<Self> {
        Self::load_from(&Self::record_path())
    }

    /// Missing or corrupt records read as `None`.
    pub fn load_from(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }

    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::record_path())
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Remember `root` for the next run. Failures are only logged.
    pub fn record(root: &Path) {
        if let Err(e) = Self::new(root).save() {
            tracing::warn!(root = %root.display(), error = %e, "could not record solution root");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn save_then_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state").join("recent.json");
        let entry = RecentSolution::new("/work/pathway");
        entry.save_to(&path).unwrap();

        assert!(!path.with_extension("json.tmp").exists());
        assert_eq!(RecentSolution::load_from(&path), Some(entry));
    }

    #[test]
    fn corrupt_record_reads_as_none() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("recent.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(RecentSolution::load_from(&path), None);
        assert_eq!(RecentSolution::load_from(&tmp.path().join("missing.json")), None);
    }
}
