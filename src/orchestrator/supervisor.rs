use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::model::SupervisorConfig;
use crate::discovery::ServiceDescriptor;
use crate::orchestrator::error::{StartError, Transition};
use crate::orchestrator::launcher::{Launcher, ProcessEvent, ProcessHandle, ProcessObserver};
use crate::orchestrator::ports;
use crate::orchestrator::probe;
use crate::orchestrator::ready::{self, Readiness, ReadinessPolicy};
use crate::orchestrator::state::{ServicePhase, ServiceState, StateChange};
use crate::ui::buffer::ConsoleBuffer;
use crate::ui::logs::ConsoleLine;

const STATE_CHANNEL_CAPACITY: usize = 256;
const CONSOLE_CHANNEL_CAPACITY: usize = 4096;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub default_port: u16,
    pub readiness: ReadinessPolicy,
    /// Chunks kept per service console.
    pub console_capacity: usize,
}

impl SupervisorSettings {
    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self {
            default_port: config.default_port,
            readiness: ReadinessPolicy::from_config(config),
            console_capacity: config.console_capacity,
        }
    }
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self::from_config(&SupervisorConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

type Reply<T> = oneshot::Sender<T>;

/// Everything that mutates service state goes through the worker queue.
enum SupervisorCommand {
    Start {
        name: String,
        reply: Reply<Result<Transition, StartError>>,
    },
    Stop {
        name: String,
        reply: Reply<Result<Transition, StartError>>,
    },
    Toggle {
        name: String,
        reply: Reply<Result<Transition, StartError>>,
    },
    /// Mark stopped services as starting on behalf of a bulk run.
    Reserve {
        names: Vec<String>,
        reply: Reply<Vec<String>>,
    },
    Release {
        names: Vec<String>,
        reply: Reply<()>,
    },
    StartReserved {
        name: String,
        reply: Reply<Result<Transition, StartError>>,
    },
    StartFinished {
        name: String,
        outcome: Result<ProcessHandle, StartError>,
    },
    ProcessExited {
        name: String,
        pid: u32,
        code: Option<i32>,
    },
    Console(Vec<ConsoleLine>),
    Snapshot {
        reply: Reply<Vec<ServiceState>>,
    },
    ConsoleText {
        name: String,
        reply: Reply<Result<String, StartError>>,
    },
    SetConsoleVisible {
        name: String,
        visible: bool,
        reply: Reply<Result<(), StartError>>,
    },
    StopAll {
        reply: Reply<Vec<String>>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

// ---------------------------------------------------------------------------
// ServiceSupervisor
// ---------------------------------------------------------------------------

/// Cloneable handle to the supervisor worker.
///
/// The worker owns every [`ServiceState`] and applies requests one at a time.
/// When the last handle is dropped the worker kills whatever is still
/// running and exits.
#[derive(Clone)]
pub struct ServiceSupervisor {
    tx: mpsc::UnboundedSender<SupervisorCommand>,
    states: broadcast::Sender<StateChange>,
    console: broadcast::Sender<ConsoleLine>,
}

impl ServiceSupervisor {
    /// Spawn the worker for `services`, resolving each service's port now.
    pub fn spawn<L: Launcher>(
        services: Vec<ServiceDescriptor>,
        launcher: L,
        settings: SupervisorSettings,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (states, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);
        let (console, _) = broadcast::channel(CONSOLE_CHANNEL_CAPACITY);

        let entries = services
            .into_iter()
            .map(|descriptor| {
                let port = ports::resolve_port(descriptor.project_dir(), settings.default_port);
                Entry {
                    state: ServiceState::stopped(&descriptor.name, descriptor.category, port),
                    descriptor,
                    handle: None,
                    console: ConsoleBuffer::new(settings.console_capacity),
                    reserved: false,
                    pending: None,
                }
            })
            .collect();

        let worker = Worker {
            entries,
            launcher: Arc::new(launcher),
            settings,
            queue: tx.downgrade(),
            states: states.clone(),
            console: console.clone(),
            tasks: TaskTracker::new(),
            cancel: CancellationToken::new(),
        };
        tokio::spawn(worker.run(rx));

        Self {
            tx,
            states,
            console,
        }
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> SupervisorCommand) -> Option<T> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).ok()?;
        rx.await.ok()
    }

    /// Start one service and wait until it is ready or has failed.
    ///
    /// A service that is already running or starting is left alone.
    pub async fn start(&self, name: &str) -> Result<Transition, StartError> {
        self.request(|reply| SupervisorCommand::Start {
            name: name.to_string(),
            reply,
        })
        .await
        .unwrap_or(Err(StartError::SupervisorGone))
    }

    /// Kill a running service. Stopping a stopped service is a no-op.
    pub async fn stop(&self, name: &str) -> Result<Transition, StartError> {
        self.request(|reply| SupervisorCommand::Stop {
            name: name.to_string(),
            reply,
        })
        .await
        .unwrap_or(Err(StartError::SupervisorGone))
    }

    pub async fn toggle(&self, name: &str) -> Result<Transition, StartError> {
        self.request(|reply| SupervisorCommand::Toggle {
            name: name.to_string(),
            reply,
        })
        .await
        .unwrap_or(Err(StartError::SupervisorGone))
    }

    /// Returns the names actually reserved; running, starting and unknown
    /// services are skipped.
    pub(crate) async fn reserve(&self, names: Vec<String>) -> Result<Vec<String>, StartError> {
        self.request(|reply| SupervisorCommand::Reserve { names, reply })
            .await
            .ok_or(StartError::SupervisorGone)
    }

    pub(crate) async fn release(&self, names: Vec<String>) {
        let _ = self
            .request(|reply| SupervisorCommand::Release { names, reply })
            .await;
    }

    pub(crate) async fn start_reserved(&self, name: &str) -> Result<Transition, StartError> {
        self.request(|reply| SupervisorCommand::StartReserved {
            name: name.to_string(),
            reply,
        })
        .await
        .unwrap_or(Err(StartError::SupervisorGone))
    }

    /// Every service's state, in discovery order.
    pub async fn snapshot(&self) -> Vec<ServiceState> {
        self.request(|reply| SupervisorCommand::Snapshot { reply })
            .await
            .unwrap_or_default()
    }

    /// Accumulated console text of one service.
    pub async fn console(&self, name: &str) -> Result<String, StartError> {
        self.request(|reply| SupervisorCommand::ConsoleText {
            name: name.to_string(),
            reply,
        })
        .await
        .unwrap_or(Err(StartError::SupervisorGone))
    }

    pub async fn set_console_visible(&self, name: &str, visible: bool) -> Result<(), StartError> {
        self.request(|reply| SupervisorCommand::SetConsoleVisible {
            name: name.to_string(),
            visible,
            reply,
        })
        .await
        .unwrap_or(Err(StartError::SupervisorGone))
    }

    /// Kill every running service. Returns the names that were stopped.
    pub async fn stop_all(&self) -> Vec<String> {
        self.request(|reply| SupervisorCommand::StopAll { reply })
            .await
            .unwrap_or_default()
    }

    /// True when at least one service is stopped.
    pub async fn can_start_all(&self) -> bool {
        self.snapshot()
            .await
            .iter()
            .any(|s| s.phase == ServicePhase::Stopped)
    }

    /// True when at least one service is running.
    pub async fn can_stop_all(&self) -> bool {
        self.snapshot().await.iter().any(ServiceState::is_running)
    }

    /// Unload: abort in-flight starts, kill everything, stop the worker.
    pub async fn shutdown(&self) {
        let _ = self
            .request(|reply| SupervisorCommand::Shutdown { reply })
            .await;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.states.subscribe()
    }

    pub fn subscribe_console(&self) -> broadcast::Receiver<ConsoleLine> {
        self.console.subscribe()
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

struct Entry {
    descriptor: ServiceDescriptor,
    state: ServiceState,
    handle: Option<ProcessHandle>,
    console: ConsoleBuffer,
    /// Held by a bulk run; `state` is `Starting` while set.
    reserved: bool,
    pending: Option<Reply<Result<Transition, StartError>>>,
}

struct Worker<L> {
    entries: Vec<Entry>,
    launcher: Arc<L>,
    settings: SupervisorSettings,
    // Weak so that start tasks and observers never keep the worker alive.
    queue: mpsc::WeakUnboundedSender<SupervisorCommand>,
    states: broadcast::Sender<StateChange>,
    console: broadcast::Sender<ConsoleLine>,
    tasks: TaskTracker,
    cancel: CancellationToken,
}

fn reset_to_stopped(state: &mut ServiceState) {
    state.phase = ServicePhase::Stopped;
    state.console_visible = false;
    state.started_at = None;
}

impl<L: Launcher> Worker<L> {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SupervisorCommand>) {
        while let Some(command) = rx.recv().await {
            if let SupervisorCommand::Shutdown { reply } = command {
                self.shutdown(&mut rx).await;
                let _ = reply.send(());
                return;
            }
            self.handle(command).await;
        }
        self.shutdown(&mut rx).await;
    }

    async fn handle(&mut self, command: SupervisorCommand) {
        match command {
            SupervisorCommand::Start { name, reply } => self.request_start(&name, reply, false),
            SupervisorCommand::StartReserved { name, reply } => {
                self.request_start(&name, reply, true)
            }
            SupervisorCommand::Stop { name, reply } => {
                let result = self.stop(&name).await;
                let _ = reply.send(result);
            }
            SupervisorCommand::Toggle { name, reply } => match self.index(&name) {
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
                Ok(idx) if self.entries[idx].state.is_running() => {
                    let result = self.stop(&name).await;
                    let _ = reply.send(result);
                }
                Ok(_) => self.request_start(&name, reply, false),
            },
            SupervisorCommand::Reserve { names, reply } => {
                let reserved = self.reserve(names);
                let _ = reply.send(reserved);
            }
            SupervisorCommand::Release { names, reply } => {
                self.release(names);
                let _ = reply.send(());
            }
            SupervisorCommand::StartFinished { name, outcome } => self.finish_start(&name, outcome),
            SupervisorCommand::ProcessExited { name, pid, code } => {
                self.process_exited(&name, pid, code)
            }
            SupervisorCommand::Console(lines) => self.append_console(lines),
            SupervisorCommand::Snapshot { reply } => {
                let _ = reply.send(self.entries.iter().map(|e| e.state.clone()).collect());
            }
            SupervisorCommand::ConsoleText { name, reply } => {
                let result = self.index(&name).map(|idx| self.entries[idx].console.render());
                let _ = reply.send(result);
            }
            SupervisorCommand::SetConsoleVisible {
                name,
                visible,
                reply,
            } => {
                let result = self
                    .index(&name)
                    .map(|idx| self.update(idx, |s| s.console_visible = visible));
                let _ = reply.send(result);
            }
            SupervisorCommand::StopAll { reply } => {
                let stopped = self.stop_all().await;
                let _ = reply.send(stopped);
            }
            // Handled in `run`.
            SupervisorCommand::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn index(&self, name: &str) -> Result<usize, StartError> {
        let names = || self.entries.iter().map(|e| e.descriptor.name.as_str());
        if let Some(idx) = names().position(|n| n == name) {
            return Ok(idx);
        }
        if let Some(idx) = names().position(|n| n.eq_ignore_ascii_case(name)) {
            return Ok(idx);
        }
        Err(StartError::UnknownService {
            name: name.to_string(),
            suggestion: find_closest_match(name, names()),
        })
    }

    /// Replace one service's state, publishing a change only if it differs.
    fn update(&mut self, idx: usize, f: impl FnOnce(&mut ServiceState)) {
        let entry = &mut self.entries[idx];
        let mut next = entry.state.clone();
        f(&mut next);
        if next == entry.state {
            return;
        }
        let previous = std::mem::replace(&mut entry.state, next);
        let _ = self.states.send(StateChange {
            previous,
            state: entry.state.clone(),
        });
    }

    fn request_start(
        &mut self,
        name: &str,
        reply: Reply<Result<Transition, StartError>>,
        reserved: bool,
    ) {
        let idx = match self.index(name) {
            Ok(idx) => idx,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };

        let entry = &mut self.entries[idx];
        let claim = reserved && entry.reserved;
        match entry.state.phase {
            ServicePhase::Running { .. } => {
                let _ = reply.send(Ok(Transition::AlreadyRunning));
                return;
            }
            ServicePhase::Starting if !claim => {
                debug!(service = %entry.descriptor.name, "start ignored, already starting");
                let _ = reply.send(Ok(Transition::AlreadyStarting));
                return;
            }
            _ => {}
        }

        entry.reserved = false;
        entry.pending = Some(reply);
        // Each run gets a fresh console.
        entry.console.clear();
        self.update(idx, |s| s.phase = ServicePhase::Starting);
        self.spawn_start(idx);
    }

    fn spawn_start(&self, idx: usize) {
        let entry = &self.entries[idx];
        let descriptor = entry.descriptor.clone();
        let port = entry.state.port;
        let launcher = self.launcher.clone();
        let policy = self.settings.readiness.clone();
        let observer = queue_observer(self.queue.clone());
        let ticket = StartTicket::new(self.queue.clone(), &descriptor.name);
        let cancel = self.cancel.clone();

        info!(service = %descriptor.name, port, "starting");
        self.tasks.spawn(async move {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => Err(StartError::SupervisorGone),
                outcome = start_service(&*launcher, &descriptor, port, &policy, observer) => outcome,
            };
            ticket.finish(outcome);
        });
    }

    fn finish_start(&mut self, name: &str, outcome: Result<ProcessHandle, StartError>) {
        let Ok(idx) = self.index(name) else {
            return;
        };
        let reply = self.entries[idx].pending.take();

        let result = match outcome {
            // Exit can race readiness; the exit watcher's notice is ignored
            // while starting, so it is checked here.
            Ok(handle) if handle.has_exited() => Err(StartError::ProcessCrash {
                service: name.to_string(),
                code: handle.exit().and_then(|e| e.code),
            }),
            Ok(handle) => {
                let pid = handle.pid();
                self.entries[idx].handle = Some(handle);
                self.update(idx, |s| {
                    s.phase = ServicePhase::Running { pid };
                    s.started_at = Some(Utc::now());
                });
                info!(service = %name, pid, port = self.entries[idx].state.port, "service running");
                Ok(Transition::Started { pid })
            }
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            warn!(service = %name, error = %e, "start failed");
            self.update(idx, reset_to_stopped);
        }
        match reply {
            Some(reply) => {
                let _ = reply.send(result);
            }
            None => debug!(service = %name, "start finished with no waiting caller"),
        }
    }

    fn process_exited(&mut self, name: &str, pid: u32, code: Option<i32>) {
        let Ok(idx) = self.index(name) else {
            return;
        };
        if self.entries[idx].state.process_id() != pid {
            return;
        }
        self.entries[idx].handle = None;
        self.update(idx, reset_to_stopped);
        info!(service = %name, pid, ?code, "service exited");
    }

    async fn stop(&mut self, name: &str) -> Result<Transition, StartError> {
        let idx = self.index(name)?;
        if self.entries[idx].state.is_starting() {
            return Ok(Transition::AlreadyStarting);
        }
        let transition = match self.entries[idx].handle.take() {
            Some(handle) => {
                let pid = handle.pid();
                handle.kill().await;
                info!(service = %name, pid, "stopped");
                Transition::Stopped
            }
            None => Transition::NotRunning,
        };
        self.update(idx, reset_to_stopped);
        Ok(transition)
    }

    async fn stop_all(&mut self) -> Vec<String> {
        let (indices, handles): (Vec<usize>, Vec<ProcessHandle>) = self
            .entries
            .iter_mut()
            .enumerate()
            .filter_map(|(idx, e)| e.handle.take().map(|h| (idx, h)))
            .unzip();

        join_all(handles.into_iter().map(ProcessHandle::kill)).await;

        indices
            .into_iter()
            .map(|idx| {
                self.update(idx, reset_to_stopped);
                self.entries[idx].descriptor.name.clone()
            })
            .collect()
    }

    fn reserve(&mut self, names: Vec<String>) -> Vec<String> {
        let mut reserved = Vec::new();
        for name in names {
            let Ok(idx) = self.index(&name) else {
                continue;
            };
            if self.entries[idx].state.phase != ServicePhase::Stopped {
                continue;
            }
            self.entries[idx].reserved = true;
            self.update(idx, |s| s.phase = ServicePhase::Starting);
            reserved.push(self.entries[idx].descriptor.name.clone());
        }
        reserved
    }

    fn release(&mut self, names: Vec<String>) {
        for name in names {
            let Ok(idx) = self.index(&name) else {
                continue;
            };
            if !self.entries[idx].reserved {
                continue;
            }
            self.entries[idx].reserved = false;
            self.update(idx, reset_to_stopped);
        }
    }

    fn append_console(&mut self, lines: Vec<ConsoleLine>) {
        for line in lines {
            if let Some(entry) = self
                .entries
                .iter_mut()
                .find(|e| e.descriptor.name == line.service)
            {
                entry.console.push(line.clone());
            }
            let _ = self.console.send(line);
        }
    }

    async fn shutdown(&mut self, rx: &mut mpsc::UnboundedReceiver<SupervisorCommand>) {
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;

        rx.close();
        while let Ok(command) = rx.try_recv() {
            // Other requests are dropped; their callers see `SupervisorGone`.
            if let SupervisorCommand::StartFinished { name, outcome } = command {
                self.finish_start(&name, outcome);
            }
        }

        let stopped = self.stop_all().await;
        for idx in 0..self.entries.len() {
            self.entries[idx].reserved = false;
            self.update(idx, reset_to_stopped);
        }
        info!(killed = stopped.len(), "supervisor shut down");
    }
}

fn find_closest_match<'a>(name: &str, candidates: impl Iterator<Item = &'a str>) -> Option<String> {
    let name = name.to_lowercase();
    let mut best: Option<(&str, f64)> = None;
    for candidate in candidates {
        let score = strsim::jaro_winkler(&name, &candidate.to_lowercase());
        if score >= 0.8 && best.is_none_or(|(_, s)| score > s) {
            best = Some((candidate, score));
        }
    }
    best.map(|(name, _)| name.to_string())
}

/// Routes drainer and reaper events back onto the worker queue.
fn queue_observer(queue: mpsc::WeakUnboundedSender<SupervisorCommand>) -> ProcessObserver {
    ProcessObserver::new(move |event| {
        let Some(tx) = queue.upgrade() else {
            return;
        };
        let command = match event {
            ProcessEvent::Console(lines) => SupervisorCommand::Console(lines),
            ProcessEvent::Exited { service, pid, code } => SupervisorCommand::ProcessExited {
                name: service,
                pid,
                code,
            },
        };
        let _ = tx.send(command);
    })
}

/// Port check, launch, readiness. A process that never becomes ready is
/// killed before the error is returned.
async fn start_service<L: Launcher>(
    launcher: &L,
    service: &ServiceDescriptor,
    port: u16,
    policy: &ReadinessPolicy,
    observer: ProcessObserver,
) -> Result<ProcessHandle, StartError> {
    if probe::is_open(&policy.host, port, policy.probe_timeout).await {
        let owner = tokio::task::spawn_blocking(move || ports::identify_port_owner(port))
            .await
            .ok()
            .flatten();
        return Err(StartError::PortConflict {
            service: service.name.clone(),
            port,
            owner,
        });
    }

    let handle = launcher.launch(service, port, observer).await?;

    match ready::wait_until_ready(&handle, &service.name, port, policy).await {
        Readiness::Ready => Ok(handle),
        Readiness::Exited(code) => Err(StartError::ProcessCrash {
            service: service.name.clone(),
            code,
        }),
        Readiness::TimedOut => {
            handle.kill().await;
            Err(StartError::ReadinessTimeout {
                service: service.name.clone(),
                port,
                timeout: policy.timeout,
            })
        }
    }
}

/// Guarantees the worker hears back from every start task, even one that
/// panics or is aborted.
struct StartTicket {
    queue: mpsc::WeakUnboundedSender<SupervisorCommand>,
    service: String,
    armed: bool,
}

impl StartTicket {
    fn new(queue: mpsc::WeakUnboundedSender<SupervisorCommand>, service: &str) -> Self {
        Self {
            queue,
            service: service.to_string(),
            armed: true,
        }
    }

    fn finish(mut self, outcome: Result<ProcessHandle, StartError>) {
        self.armed = false;
        self.post(outcome);
    }

    fn post(&self, outcome: Result<ProcessHandle, StartError>) {
        let Some(tx) = self.queue.upgrade() else {
            // Dropping the outcome kills any process it holds.
            debug!(service = %self.service, "supervisor gone before start finished");
            return;
        };
        let _ = tx.send(SupervisorCommand::StartFinished {
            name: self.service.clone(),
            outcome,
        });
    }
}

impl Drop for StartTicket {
    fn drop(&mut self) {
        if self.armed {
            self.post(Err(StartError::LaunchFailure {
                service: self.service.clone(),
                reason: "start task ended unexpectedly".to_string(),
            }));
        }
    }
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------
