#![allow(dead_code)]
use assert_cmd::Command;
use std::net::TcpListener;
use std::path::Path;
use tempfile::TempDir;

pub const WEB_SDK: &str = r#"<Project Sdk="Microsoft.NET.Sdk.Web"></Project>"#;

/// A throwaway solution root plus an isolated home directory, so the
/// recent-solution record never touches the real one.
pub struct TestSolution {
    pub root: TempDir,
    pub home: TempDir,
}

impl TestSolution {
    pub fn new() -> Self {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("src")).unwrap();
        Self {
            root,
            home: TempDir::new().unwrap(),
        }
    }

    /// Add `src/<category_dir>/<name>/<name>.csproj` listening on `port`.
    pub fn project(&self, category_dir: &str, name: &str, port: u16) -> &Self {
        let dir = self.project_dir(category_dir, name);
        std::fs::create_dir_all(dir.join("Properties")).unwrap();
        std::fs::write(dir.join(format!("{name}.csproj")), WEB_SDK).unwrap();
        std::fs::write(
            dir.join("Properties").join("launchSettings.json"),
            format!(r#"{{ "iisSettings": {{ "iisExpress": {{ "sslPort": {port} }} }} }}"#),
        )
        .unwrap();
        self
    }

    pub fn project_dir(&self, category_dir: &str, name: &str) -> std::path::PathBuf {
        self.root.path().join("src").join(category_dir).join(name)
    }

    pub fn config(&self, toml: &str) -> &Self {
        std::fs::write(self.root.path().join("devfleet.toml"), toml).unwrap();
        self
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    /// The binary, pointed at this solution with an isolated `HOME`.
    pub fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("devfleet").unwrap();
        cmd.env("HOME", self.home.path())
            .env("USERPROFILE", self.home.path())
            .env_remove("DEVFLEET_ROOT")
            .env_remove("DEVFLEET_NO_RECENT")
            .env("RUST_LOG", "warn")
            .arg("--root")
            .arg(self.root.path());
        cmd
    }
}

pub fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}
