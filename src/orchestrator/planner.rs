use std::fmt;
use std::time::Duration;

use futures_util::future::join_all;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::model::BulkConfig;
use crate::orchestrator::error::{BulkError, StartError, Transition};
use crate::orchestrator::health::HealthCheck;
use crate::orchestrator::state::{ServicePhase, ServiceState};
use crate::orchestrator::supervisor::ServiceSupervisor;

// ---------------------------------------------------------------------------
// Tiers
// ---------------------------------------------------------------------------

/// Start-order bucket of a service during a bulk start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tier {
    /// Infrastructure the rest depends on; counted by the bulk guard.
    Required,
    Web,
    BestEffort,
    /// Started concurrently, last.
    Communication,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Required => "required",
            Tier::Web => "web",
            Tier::BestEffort => "best-effort",
            Tier::Communication => "communication",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Case-insensitive substring keywords per tier.
#[derive(Debug, Clone)]
pub struct TierKeywords {
    required: Vec<String>,
    web: Vec<String>,
    communication: Vec<String>,
}

impl TierKeywords {
    pub fn from_config(config: &BulkConfig) -> Self {
        let lower = |words: &[String]| -> Vec<String> {
            words.iter().map(|w| w.to_lowercase()).collect()
        };
        Self {
            required: lower(&config.required),
            web: lower(&config.web),
            communication: lower(&config.communication),
        }
    }

    /// First match wins: required, web, communication, then best-effort.
    pub fn classify(&self, name: &str) -> Tier {
        let name = name.to_lowercase();
        let hit = |words: &[String]| words.iter().any(|w| name.contains(w.as_str()));
        if hit(&self.required) {
            Tier::Required
        } else if hit(&self.web) {
            Tier::Web
        } else if hit(&self.communication) {
            Tier::Communication
        } else {
            Tier::BestEffort
        }
    }
}

impl Default for TierKeywords {
    fn default() -> Self {
        Self::from_config(&BulkConfig::default())
    }
}

/// Services grouped by tier, each group in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TierPlan {
    pub required: Vec<String>,
    pub web: Vec<String>,
    pub best_effort: Vec<String>,
    pub communication: Vec<String>,
}

impl TierPlan {
    pub fn classify<'a>(names: impl IntoIterator<Item = &'a str>, keywords: &TierKeywords) -> Self {
        let mut plan = TierPlan::default();
        for name in names {
            plan.tier_mut(keywords.classify(name)).push(name.to_string());
        }
        plan
    }

    fn tier_mut(&mut self, tier: Tier) -> &mut Vec<String> {
        match tier {
            Tier::Required => &mut self.required,
            Tier::Web => &mut self.web,
            Tier::BestEffort => &mut self.best_effort,
            Tier::Communication => &mut self.communication,
        }
    }

    /// Tiers in execution order.
    pub fn tiers(&self) -> [(Tier, &[String]); 4] {
        [
            (Tier::Required, self.required.as_slice()),
            (Tier::Web, self.web.as_slice()),
            (Tier::BestEffort, self.best_effort.as_slice()),
            (Tier::Communication, self.communication.as_slice()),
        ]
    }

    pub fn names(&self) -> Vec<String> {
        self.tiers()
            .iter()
            .flat_map(|(_, names)| names.iter().cloned())
            .collect()
    }

    pub fn retain(&mut self, keep: impl Fn(&str) -> bool) {
        for tier in [Tier::Required, Tier::Web, Tier::BestEffort, Tier::Communication] {
            self.tier_mut(tier).retain(|n| keep(n.as_str()));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tiers().iter().all(|(_, names)| names.is_empty())
    }
}

// ---------------------------------------------------------------------------
// BulkStartPlanner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BulkPolicy {
    pub keywords: TierKeywords,
    pub required_minimum: usize,
    pub settle_delay: Duration,
}

impl BulkPolicy {
    pub fn from_config(config: &BulkConfig) -> Self {
        Self {
            keywords: TierKeywords::from_config(config),
            required_minimum: config.required_minimum,
            settle_delay: config.settle_delay(),
        }
    }
}

impl Default for BulkPolicy {
    fn default() -> Self {
        Self::from_config(&BulkConfig::default())
    }
}

/// What a bulk start did, per service.
#[derive(Debug, Default)]
pub struct BulkReport {
    pub started: Vec<String>,
    /// Already running or starting elsewhere.
    pub skipped: Vec<String>,
    pub failed: Vec<(String, StartError)>,
}

impl BulkReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, name: &str, result: Result<Transition, StartError>) {
        match result {
            Ok(Transition::Started { .. }) => self.started.push(name.to_string()),
            Ok(_) => self.skipped.push(name.to_string()),
            Err(e) => {
                warn!(service = %name, error = %e, "bulk start: service failed");
                self.failed.push((name.to_string(), e));
            }
        }
    }
}

/// Tiered start of every stopped service.
pub struct BulkStartPlanner<H> {
    supervisor: ServiceSupervisor,
    health: H,
    policy: BulkPolicy,
}

impl<H: HealthCheck> BulkStartPlanner<H> {
    pub fn new(supervisor: ServiceSupervisor, health: H, policy: BulkPolicy) -> Self {
        Self {
            supervisor,
            health,
            policy,
        }
    }

    pub fn policy(&self) -> &BulkPolicy {
        &self.policy
    }

    /// Tier plan over the services that are currently stopped.
    pub fn plan(&self, states: &[ServiceState]) -> TierPlan {
        TierPlan::classify(
            states
                .iter()
                .filter(|s| s.phase == ServicePhase::Stopped)
                .map(|s| s.name.as_str()),
            &self.policy.keywords,
        )
    }

    /// Health check, reserve, guard, then start tier by tier.
    ///
    /// Whole-run failures return `Err` before any process is spawned. A
    /// single service failing is recorded in the report and the run goes on.
    pub async fn start_all(&self) -> Result<BulkReport, BulkError> {
        if let Err(reason) = self.health.check().await {
            return Err(BulkError::DependencyHealthFailure { reason });
        }

        let states = self.supervisor.snapshot().await;
        if states.is_empty() {
            return Err(BulkError::SupervisorGone);
        }
        let mut report = BulkReport::default();
        let mut plan = self.plan(&states);
        // The guard counts only required services this run would start.
        let required = plan.required.clone();

        let reserved = self
            .supervisor
            .reserve(plan.names())
            .await
            .map_err(|_| BulkError::SupervisorGone)?;
        plan.retain(|name| reserved.iter().any(|r| r == name));
        report.skipped = states
            .iter()
            .filter(|s| !reserved.contains(&s.name))
            .map(|s| s.name.clone())
            .collect();

        if required.len() < self.policy.required_minimum {
            self.supervisor.release(reserved).await;
            return Err(BulkError::InsufficientRequiredServices {
                found: required.len(),
                required: self.policy.required_minimum,
                names: required,
            });
        }

        for (tier, names) in plan.tiers() {
            if names.is_empty() {
                continue;
            }
            info!(tier = %tier, services = names.len(), "starting tier");
            if tier == Tier::Communication {
                let results = join_all(names.iter().map(|n| self.supervisor.start_reserved(n))).await;
                for (name, result) in names.iter().zip(results) {
                    report.record(name, result);
                }
            } else {
                for name in names {
                    let result = self.supervisor.start_reserved(name).await;
                    report.record(name, result);
                    tokio::time::sleep(self.policy.settle_delay).await;
                }
            }
        }

        info!(
            started = report.started.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "bulk start finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::Category;
    use crate::orchestrator::supervisor::fakes::{self, Behavior, FakeLauncher};
    use tempfile::TempDir;

    struct StaticHealth(Result<(), String>);

    impl HealthCheck for StaticHealth {
        async fn check(&self) -> Result<(), String> {
            self.0.clone()
        }
    }

    fn policy(required_minimum: usize, settle: Duration) -> BulkPolicy {
        BulkPolicy {
            required_minimum,
            settle_delay: settle,
            ..BulkPolicy::default()
        }
    }

    fn fleet(
        tmp: &TempDir,
        names: &[(&str, Category)],
        health: Result<(), String>,
        policy: BulkPolicy,
    ) -> (BulkStartPlanner<StaticHealth>, ServiceSupervisor, FakeLauncher) {
        let services = names
            .iter()
            .map(|(n, c)| fakes::service(tmp.path(), n, *c))
            .collect();
        let launcher = FakeLauncher::new(Behavior::Ready);
        let sup = ServiceSupervisor::spawn(
            services,
            launcher.clone(),
            fakes::settings(Duration::from_secs(5)),
        );
        let planner = BulkStartPlanner::new(sup.clone(), StaticHealth(health), policy);
        (planner, sup, launcher)
    }

    #[test]
    fn classification_precedence() {
        let keywords = TierKeywords::default();
        assert_eq!(keywords.classify("IdentityService"), Tier::Required);
        assert_eq!(keywords.classify("IdentityWebHost"), Tier::Required);
        assert_eq!(keywords.classify("OcelotApiGw"), Tier::Required);
        assert_eq!(keywords.classify("WebMVC"), Tier::Web);
        assert_eq!(keywords.classify("WebChatHub"), Tier::Web);
        assert_eq!(keywords.classify("Chat.Api"), Tier::Communication);
        assert_eq!(keywords.classify("MESSAGING.Api"), Tier::Communication);
        assert_eq!(keywords.classify("Catalog.Api"), Tier::BestEffort);
    }

    #[test]
    fn plan_keeps_discovery_order_within_tiers() {
        let plan = TierPlan::classify(
            ["Location.Api", "Catalog.Api", "Identity.Api", "WebSPA", "Chat.Api", "Basket.Api"],
            &TierKeywords::default(),
        );
        assert_eq!(plan.required, vec!["Location.Api", "Identity.Api"]);
        assert_eq!(plan.web, vec!["WebSPA"]);
        assert_eq!(plan.best_effort, vec!["Catalog.Api", "Basket.Api"]);
        assert_eq!(plan.communication, vec!["Chat.Api"]);
        assert_eq!(plan.names().len(), 6);
    }

    #[tokio::test]
    async fn identity_starts_before_web_with_settle_gap() {
        let tmp = TempDir::new().unwrap();
        let settle = Duration::from_millis(300);
        let (planner, sup, launcher) = fleet(
            &tmp,
            &[("WebMVC", Category::Web), ("Identity.Api", Category::Service)],
            Ok(()),
            policy(1, settle),
        );

        let report = planner.start_all().await.unwrap();
        assert!(report.is_success(), "{:?}", report.failed);
        assert_eq!(report.started, vec!["Identity.Api", "WebMVC"]);

        let launches = launcher.launches();
        assert_eq!(launches.len(), 2);
        assert_eq!(launches[0].0, "Identity.Api");
        assert_eq!(launches[1].0, "WebMVC");
        assert!(launches[1].1 - launches[0].1 >= settle);

        assert!(sup.snapshot().await.iter().all(ServiceState::is_running));
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn too_few_required_services_spawns_nothing() {
        let tmp = TempDir::new().unwrap();
        let (planner, sup, launcher) = fleet(
            &tmp,
            &[
                ("Identity.Api", Category::Service),
                ("OcelotApiGw", Category::Gateway),
                ("WebMVC", Category::Web),
                ("Chat.Api", Category::Service),
            ],
            Ok(()),
            policy(4, Duration::ZERO),
        );

        match planner.start_all().await.unwrap_err() {
            BulkError::InsufficientRequiredServices {
                found,
                required,
                names,
            } => {
                assert_eq!(found, 2);
                assert_eq!(required, 4);
                assert_eq!(names, vec!["Identity.Api", "OcelotApiGw"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(launcher.launch_count(), 0);
        for state in sup.snapshot().await {
            assert!(!state.is_starting(), "{} left starting", state.name);
            assert!(!state.is_running());
        }
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn failed_health_check_leaves_services_untouched() {
        let tmp = TempDir::new().unwrap();
        let (planner, sup, launcher) = fleet(
            &tmp,
            &[("Identity.Api", Category::Service)],
            Err("datastore at localhost:1433 is not reachable".into()),
            policy(1, Duration::ZERO),
        );

        let err = planner.start_all().await.unwrap_err();
        assert!(matches!(err, BulkError::DependencyHealthFailure { .. }));
        assert!(err.to_string().contains("localhost:1433"));
        assert_eq!(launcher.launch_count(), 0);
        assert!(sup.can_start_all().await);
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn one_failure_does_not_abort_the_run() {
        let tmp = TempDir::new().unwrap();
        let (planner, sup, launcher) = fleet(
            &tmp,
            &[
                ("Identity.Api", Category::Service),
                ("Catalog.Api", Category::Service),
                ("Chat.Api", Category::Service),
                ("Messaging.Api", Category::Service),
            ],
            Ok(()),
            policy(1, Duration::from_millis(10)),
        );
        let catalog_port = sup
            .snapshot()
            .await
            .into_iter()
            .find(|s| s.name == "Catalog.Api")
            .unwrap()
            .port;
        let _squatter = std::net::TcpListener::bind(("127.0.0.1", catalog_port)).unwrap();

        let report = planner.start_all().await.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "Catalog.Api");
        assert!(matches!(report.failed[0].1, StartError::PortConflict { .. }));

        let mut started = report.started.clone();
        started.sort();
        assert_eq!(started, vec!["Chat.Api", "Identity.Api", "Messaging.Api"]);
        assert_eq!(launcher.launch_count(), 3);
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn running_services_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let (planner, sup, launcher) = fleet(
            &tmp,
            &[
                ("Identity.Api", Category::Service),
                ("Location.Api", Category::Service),
            ],
            Ok(()),
            policy(1, Duration::ZERO),
        );
        sup.start("Identity.Api").await.unwrap();

        let report = planner.start_all().await.unwrap();
        assert_eq!(report.started, vec!["Location.Api"]);
        assert_eq!(report.skipped, vec!["Identity.Api"]);
        assert_eq!(launcher.launch_count(), 2);
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn running_required_services_do_not_count_toward_the_guard() {
        let tmp = TempDir::new().unwrap();
        let (planner, sup, launcher) = fleet(
            &tmp,
            &[
                ("Identity.Api", Category::Service),
                ("Location.Api", Category::Service),
                ("Catalog.Api", Category::Service),
            ],
            Ok(()),
            policy(2, Duration::ZERO),
        );
        sup.start("Identity.Api").await.unwrap();

        match planner.start_all().await.unwrap_err() {
            BulkError::InsufficientRequiredServices { found, required, names } => {
                assert_eq!(found, 1);
                assert_eq!(required, 2);
                assert_eq!(names, vec!["Location.Api"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(launcher.launch_count(), 1);
        for state in sup.snapshot().await {
            assert!(!state.is_starting(), "{} left starting", state.name);
        }
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn communication_tier_starts_concurrently_without_settle() {
        let tmp = TempDir::new().unwrap();
        let settle = Duration::from_millis(800);
        let (planner, sup, launcher) = fleet(
            &tmp,
            &[
                ("Identity.Api", Category::Service),
                ("WebMVC", Category::Web),
                ("Chat.Api", Category::Service),
                ("Messaging.Api", Category::Service),
            ],
            Ok(()),
            policy(1, settle),
        );

        let report = planner.start_all().await.unwrap();
        assert!(report.is_success(), "{:?}", report.failed);

        let launches = launcher.launches();
        let at = |name: &str| {
            launches
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, t)| *t)
                .unwrap()
        };
        assert!(at("WebMVC") - at("Identity.Api") >= settle);
        assert!(at("Chat.Api").min(at("Messaging.Api")) - at("WebMVC") >= settle);

        let (chat, messaging) = (at("Chat.Api"), at("Messaging.Api"));
        let gap = chat.max(messaging) - chat.min(messaging);
        assert!(gap < settle / 2, "communication tier ran sequentially: {gap:?}");
        sup.shutdown().await;
    }
}
