use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::discovery::Category;

/// Lifecycle phase of one service.
///
/// A process id exists only while running, and a service cannot be starting
/// and running at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "lowercase")]
pub enum ServicePhase {
    Stopped,
    Starting,
    Running { pid: u32 },
}

/// Snapshot of a service's runtime state, as published by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceState {
    pub name: String,
    pub category: Category,
    pub port: u16,
    #[serde(flatten)]
    pub phase: ServicePhase,
    pub console_visible: bool,
    pub started_at: Option<DateTime<Utc>>,
}

impl ServiceState {
    pub fn stopped(name: impl Into<String>, category: Category, port: u16) -> Self {
        Self {
            name: name.into(),
            category,
            port,
            phase: ServicePhase::Stopped,
            console_visible: false,
            started_at: None,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.phase, ServicePhase::Running { .. })
    }

    pub fn is_starting(&self) -> bool {
        self.phase == ServicePhase::Starting
    }

    /// 0 when not running.
    pub fn process_id(&self) -> u32 {
        match self.phase {
            ServicePhase::Running { pid } => pid,
            _ => 0,
        }
    }

    pub fn status_label(&self) -> &'static str {
        match self.phase {
            ServicePhase::Stopped => "stopped",
            ServicePhase::Starting => "starting",
            ServicePhase::Running { .. } => "running",
        }
    }
}

/// Emitted once per state replacement.
#[derive(Debug, Clone)]
pub struct StateChange {
    pub previous: ServiceState,
    pub state: ServiceState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopped_state_is_fully_zeroed() {
        let state = ServiceState::stopped("Identity.Api", Category::Service, 5101);
        assert!(!state.is_running());
        assert!(!state.is_starting());
        assert_eq!(state.process_id(), 0);
        assert!(!state.console_visible);
        assert!(state.started_at.is_none());
    }

    #[test]
    fn flag_view_follows_phase() {
        let mut state = ServiceState::stopped("Web", Category::Web, 5000);

        state.phase = ServicePhase::Starting;
        assert!(state.is_starting() && !state.is_running());
        assert_eq!(state.process_id(), 0);
        assert_eq!(state.status_label(), "starting");

        state.phase = ServicePhase::Running { pid: 4242 };
        assert!(state.is_running() && !state.is_starting());
        assert_eq!(state.process_id(), 4242);
    }

    #[test]
    fn serializes_phase_inline() {
        let mut state = ServiceState::stopped("Web", Category::Web, 5000);
        state.phase = ServicePhase::Running { pid: 7 };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["phase"], "running");
        assert_eq!(json["pid"], 7);
        assert_eq!(json["category"], "web");
    }
}
