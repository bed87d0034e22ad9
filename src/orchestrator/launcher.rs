use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::model::{BuildConfig, FleetConfig, LaunchConfig};
use crate::discovery::ServiceDescriptor;
use crate::orchestrator::build::{DotnetBuilder, ProjectBuilder};
use crate::orchestrator::error::StartError;
use crate::platform;
use crate::ui::logs::ConsoleLine;

/// Upper bound on waiting for a killed process to be reaped.
const KILL_WAIT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Process events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum ProcessEvent {
    /// A batch of output chunks from one stream.
    Console(Vec<ConsoleLine>),
    Exited {
        service: String,
        pid: u32,
        code: Option<i32>,
    },
}

/// Callback invoked from drainer and reaper tasks.
#[derive(Clone)]
pub struct ProcessObserver(Arc<dyn Fn(ProcessEvent) + Send + Sync>);

impl ProcessObserver {
    pub fn new(f: impl Fn(ProcessEvent) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    pub(crate) fn notify(&self, event: ProcessEvent) {
        (self.0)(event)
    }
}

impl std::fmt::Debug for ProcessObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ProcessObserver")
    }
}

// ---------------------------------------------------------------------------
// ProcessHandle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    pub code: Option<i32>,
}

/// Owning reference to a launched process.
///
/// The child itself lives in a reaper task; dropping the handle kills the
/// whole process tree.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: u32,
    kill_tx: Option<oneshot::Sender<()>>,
    exit_rx: watch::Receiver<Option<ProcessExit>>,
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn exit(&self) -> Option<ProcessExit> {
        *self.exit_rx.borrow()
    }

    pub fn has_exited(&self) -> bool {
        self.exit().is_some()
    }

    /// Wait for the process to exit on its own.
    pub async fn wait(&mut self) -> Option<ProcessExit> {
        match self.exit_rx.wait_for(Option::is_some).await {
            Ok(exit) => *exit,
            Err(_) => None,
        }
    }

    /// Force-kill the process tree and wait for it to be reaped.
    pub async fn kill(mut self) -> Option<ProcessExit> {
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
        }
        match tokio::time::timeout(KILL_WAIT, self.exit_rx.wait_for(Option::is_some)).await {
            Ok(Ok(exit)) => *exit,
            _ => {
                warn!(pid = self.pid, "process not reaped after kill");
                None
            }
        }
    }
}

/// Take ownership of a spawned child: drain its output and watch for exit.
pub fn watch_child(
    mut child: Child,
    service: &str,
    observer: ProcessObserver,
    throttle: Duration,
) -> Result<ProcessHandle, StartError> {
    let Some(pid) = child.id() else {
        return Err(StartError::LaunchFailure {
            service: service.to_string(),
            reason: "process exited during spawn".to_string(),
        });
    };
    let group = platform::post_spawn_setup(Some(pid));

    if let Some(out) = child.stdout.take() {
        tokio::spawn(drain(out, service.to_string(), false, observer.clone(), throttle));
    }
    if let Some(err) = child.stderr.take() {
        tokio::spawn(drain(err, service.to_string(), true, observer.clone(), throttle));
    }

    let (kill_tx, kill_rx) = oneshot::channel::<()>();
    let (exit_tx, exit_rx) = watch::channel(None);
    let name = service.to_string();

    tokio::spawn(async move {
        let code = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => status.code(),
                Err(e) => {
                    warn!(service = %name, pid, error = %e, "wait() failed");
                    None
                }
            },
            // Fires on an explicit kill and when the handle is dropped.
            _ = kill_rx => {
                platform::kill_tree(&mut child, Some(pid), group.as_ref()).await;
                child.try_wait().ok().flatten().and_then(|s| s.code())
            }
        };
        drop(group);

        debug!(service = %name, pid, ?code, "process exited");
        let _ = exit_tx.send(Some(ProcessExit { code }));
        observer.notify(ProcessEvent::Exited {
            service: name,
            pid,
            code,
        });
    });

    Ok(ProcessHandle {
        pid,
        kill_tx: Some(kill_tx),
        exit_rx,
    })
}

/// Forward lines from one stream, flushing at most once per `throttle`.
///
/// Bytes that are not UTF-8 are replaced, never treated as an error: the
/// pipe must stay drained for as long as the child holds it open.
async fn drain<R>(
    reader: R,
    service: String,
    is_stderr: bool,
    observer: ProcessObserver,
    throttle: Duration,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    // Survives a cancelled read_until, which appends partial input here.
    let mut raw: Vec<u8> = Vec::new();
    let mut pending: Vec<ConsoleLine> = Vec::new();
    let mut flush_at: Option<Instant> = None;

    loop {
        tokio::select! {
            read = reader.read_until(b'\n', &mut raw) => match read {
                Ok(0) => break,
                Ok(_) => {
                    pending.push(ConsoleLine::new(&service, decode_line(&raw), is_stderr));
                    raw.clear();
                    flush_at.get_or_insert_with(|| Instant::now() + throttle);
                }
                Err(e) => {
                    warn!(service = %service, error = %e, stderr = is_stderr, "output read error");
                    break;
                }
            },
            _ = tokio::time::sleep_until(flush_at.unwrap_or_else(Instant::now)), if flush_at.is_some() => {
                flush_at = None;
                observer.notify(ProcessEvent::Console(std::mem::take(&mut pending)));
            }
        }
    }

    if !raw.is_empty() {
        pending.push(ConsoleLine::new(&service, decode_line(&raw), is_stderr));
    }
    if !pending.is_empty() {
        observer.notify(ProcessEvent::Console(pending));
    }
}

fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches(['\n', '\r'])
        .to_string()
}

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

/// What the build produced for a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    /// Self-contained app host, run directly.
    Native(PathBuf),
    /// Framework-dependent assembly, run as `dotnet <dll>`.
    Runtime { dll: PathBuf },
}

#[cfg(windows)]
fn native_file_name(project: &str) -> String {
    format!("{}.exe", project)
}

#[cfg(not(windows))]
fn native_file_name(project: &str) -> String {
    project.to_string()
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
    true
}

fn find_file(dir: &Path, file_name: &str) -> Option<PathBuf> {
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .find(|e| e.file_type().is_file() && e.file_name().to_str() == Some(file_name))
        .map(|e| e.into_path())
}

/// Locate the runnable output for `project` under `out_dir`, searching
/// recursively. The native app host wins over the assembly.
pub fn find_artifact(out_dir: &Path, project: &str) -> Option<Artifact> {
    if let Some(native) = find_file(out_dir, &native_file_name(project)).filter(|p| is_executable(p))
    {
        return Some(Artifact::Native(native));
    }
    find_file(out_dir, &format!("{}.dll", project)).map(|dll| Artifact::Runtime { dll })
}

// ---------------------------------------------------------------------------
// Launcher
// ---------------------------------------------------------------------------

/// Starts the OS process for a service.
pub trait Launcher: Send + Sync + 'static {
    fn launch(
        &self,
        service: &ServiceDescriptor,
        port: u16,
        observer: ProcessObserver,
    ) -> impl Future<Output = Result<ProcessHandle, StartError>> + Send;
}

/// Builds the project, then runs its output with the development environment.
#[derive(Debug, Clone)]
pub struct DotnetLauncher<B> {
    builder: B,
    runtime: String,
    launch: LaunchConfig,
    throttle: Duration,
}

impl DotnetLauncher<DotnetBuilder> {
    pub fn from_config(config: &FleetConfig) -> Self {
        Self::new(
            DotnetBuilder::from_config(&config.build),
            &config.build,
            config.launch.clone(),
            config.supervisor.console_throttle(),
        )
    }
}

impl<B: ProjectBuilder> DotnetLauncher<B> {
    pub fn new(builder: B, build: &BuildConfig, launch: LaunchConfig, throttle: Duration) -> Self {
        Self {
            builder,
            runtime: build.program.clone(),
            launch,
            throttle,
        }
    }

    fn environment(&self, port: u16) -> BTreeMap<String, String> {
        let mut env = self.launch.env.clone();
        env.insert(
            "ASPNETCORE_ENVIRONMENT".to_string(),
            self.launch.environment.clone(),
        );
        env.insert(
            "ASPNETCORE_URLS".to_string(),
            format!("{}://localhost:{}", self.launch.url_scheme, port),
        );
        env
    }
}

impl<B: ProjectBuilder> Launcher for DotnetLauncher<B> {
    async fn launch(
        &self,
        service: &ServiceDescriptor,
        port: u16,
        observer: ProcessObserver,
    ) -> Result<ProcessHandle, StartError> {
        let out_dir =
            self.builder
                .build(service)
                .await
                .map_err(|source| StartError::BuildFailure {
                    service: service.name.clone(),
                    source,
                })?;

        let artifact = {
            let (dir, name) = (out_dir.clone(), service.name.clone());
            tokio::task::spawn_blocking(move || find_artifact(&dir, &name))
                .await
                .map_err(|e| StartError::LaunchFailure {
                    service: service.name.clone(),
                    reason: format!("artifact lookup failed: {}", e),
                })?
        }
        .ok_or_else(|| StartError::LaunchFailure {
            service: service.name.clone(),
            reason: format!("no runnable output under {}", out_dir.display()),
        })?;

        let mut cmd = match &artifact {
            Artifact::Native(path) => Command::new(path),
            Artifact::Runtime { dll } => {
                let mut cmd = Command::new(&self.runtime);
                cmd.arg(dll);
                cmd
            }
        };
        cmd.current_dir(service.project_dir())
            .envs(self.environment(port))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        platform::configure_process_group(&mut cmd);

        let child = cmd.spawn().map_err(|e| StartError::LaunchFailure {
            service: service.name.clone(),
            reason: e.to_string(),
        })?;

        let handle = watch_child(child, &service.name, observer, self.throttle)?;
        info!(service = %service.name, pid = handle.pid(), port, artifact = ?artifact, "process spawned");
        Ok(handle)
    }
}
