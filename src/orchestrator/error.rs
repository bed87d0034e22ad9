use std::time::Duration;

use crate::orchestrator::build::BuildError;

/// Why a single service failed to start. Always names the service.
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("unknown service '{name}'{}", suggestion_suffix(.suggestion))]
    UnknownService {
        name: String,
        suggestion: Option<String>,
    },

    #[error(
        "port {port} required by '{service}' is already in use{}",
        owner_suffix(.owner)
    )]
    PortConflict {
        service: String,
        port: u16,
        owner: Option<String>,
    },

    #[error("build of '{service}' failed")]
    BuildFailure {
        service: String,
        #[source]
        source: BuildError,
    },

    #[error("could not launch '{service}': {reason}")]
    LaunchFailure { service: String, reason: String },

    #[error(
        "'{service}' did not open port {port} within {}",
        humantime::format_duration(.timeout.to_owned())
    )]
    ReadinessTimeout {
        service: String,
        port: u16,
        timeout: Duration,
    },

    #[error(
        "'{service}' exited before becoming ready{}",
        code_suffix(.code)
    )]
    ProcessCrash { service: String, code: Option<i32> },

    #[error("the supervisor has shut down")]
    SupervisorGone,
}

fn suggestion_suffix(suggestion: &Option<String>) -> String {
    suggestion
        .as_ref()
        .map(|s| format!(", did you mean '{}'?", s))
        .unwrap_or_default()
}

fn owner_suffix(owner: &Option<String>) -> String {
    owner
        .as_ref()
        .map(|o| format!(" by {}", o))
        .unwrap_or_default()
}

fn code_suffix(code: &Option<i32>) -> String {
    code.map(|c| format!(" (exit code {})", c)).unwrap_or_default()
}

fn join_names(names: &[String]) -> String {
    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(", ")
    }
}

/// Failures that abort a whole bulk start before any process is spawned.
#[derive(Debug, thiserror::Error)]
pub enum BulkError {
    #[error("dependency health check failed: {reason}")]
    DependencyHealthFailure { reason: String },

    #[error(
        "only {found} of the {required} required services were found ({})",
        join_names(.names)
    )]
    InsufficientRequiredServices {
        found: usize,
        required: usize,
        names: Vec<String>,
    },

    #[error("the supervisor has shut down")]
    SupervisorGone,
}

/// What a successful start/stop/toggle request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Started { pid: u32 },
    AlreadyRunning,
    AlreadyStarting,
    Stopped,
    NotRunning,
}
