pub mod build;
pub mod error;
pub mod health;
pub mod launcher;
pub mod planner;
pub mod ports;
pub mod probe;
pub mod ready;
pub mod state;
pub mod supervisor;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::config;
use crate::config::model::FleetConfig;
use crate::discovery::{self, ServiceDescriptor};

use health::DatastoreCheck;
use launcher::DotnetLauncher;
use planner::{BulkPolicy, BulkStartPlanner, Tier, TierKeywords, TierPlan};
use supervisor::{ServiceSupervisor, SupervisorSettings};

/// A loaded solution: its root, configuration and discovered services.
///
/// Holds no processes. [`Fleet::supervisor`] spawns the worker that does,
/// and dropping every supervisor handle unloads the solution again.
#[derive(Debug, Clone)]
pub struct Fleet {
    pub root: PathBuf,
    pub config: FleetConfig,
    pub services: Vec<ServiceDescriptor>,
}

impl Fleet {
    /// Read the configuration for `root` and discover its services.
    pub fn load(root: &Path, config_file: Option<&Path>) -> Result<Self> {
        let config = config::load_for_root(root, config_file)?;
        let services = discovery::load_solution(root)
            .with_context(|| format!("loading solution at {}", root.display()))?;
        info!(root = %root.display(), services = services.len(), "solution loaded");
        Ok(Self {
            root: root.to_path_buf(),
            config,
            services,
        })
    }

    /// Spawn the supervisor worker. Must be called inside a tokio runtime.
    pub fn supervisor(&self) -> ServiceSupervisor {
        ServiceSupervisor::spawn(
            self.services.clone(),
            DotnetLauncher::from_config(&self.config),
            SupervisorSettings::from_config(&self.config.supervisor),
        )
    }

    pub fn planner(&self, supervisor: ServiceSupervisor) -> BulkStartPlanner<DatastoreCheck> {
        BulkStartPlanner::new(
            supervisor,
            DatastoreCheck::from_config(&self.config, &self.services),
            BulkPolicy::from_config(&self.config.bulk),
        )
    }

    pub fn keywords(&self) -> TierKeywords {
        TierKeywords::from_config(&self.config.bulk)
    }

    pub fn tier_of(&self, service: &ServiceDescriptor) -> Tier {
        self.keywords().classify(&service.name)
    }

    /// Tier plan over every discovered service.
    pub fn tier_plan(&self) -> TierPlan {
        TierPlan::classify(self.services.iter().map(|s| s.name.as_str()), &self.keywords())
    }

    pub fn port_of(&self, service: &ServiceDescriptor) -> u16 {
        ports::resolve_port(service.project_dir(), self.config.supervisor.default_port)
    }

    /// `(found, minimum)` for the required-tier guard of a bulk start.
    pub fn required_guard(&self) -> (usize, usize) {
        (self.tier_plan().required.len(), self.config.bulk.required_minimum)
    }
}
