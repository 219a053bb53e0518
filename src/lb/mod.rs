//! Load balancing — discovery, filtering and per-call instance strategies
//!
//! `build_strategy` runs the selection pipeline for one call: discovery for
//! `(consumer, app, service, version)`, every configured filter in order,
//! then a fresh strategy seeded with the surviving instances.

pub mod discovery;
pub mod latency;
pub mod random;
pub mod registry;
pub mod round_robin;
pub mod session;
pub mod weighted_response;
pub mod zone;

pub use discovery::StaticDiscovery;
pub use latency::{LatencyCollector, LatencyGroup, ProtocolStats};
pub use registry::{FilterRegistry, StrategyFactory, StrategyRegistry};
pub use round_robin::RoundRobinIndex;
pub use session::SessionStore;
pub use zone::ZoneAwareFilter;

use crate::config::LoadBalancerConfig;
use crate::error::{GovernanceError, LbError, Result};
use crate::invocation::{Invocation, DEFAULT_APP};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Location of a process or instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataCenterInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub available_zone: String,
}

/// A discovered microservice instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub id: String,
    pub service_name: String,
    pub app: String,
    pub version: String,
    #[serde(default)]
    pub environment: String,
    /// Protocol → address
    #[serde(default)]
    pub endpoints: HashMap<String, String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub data_center: Option<DataCenterInfo>,
}

impl Instance {
    /// Instance of `service` at `version` in the default app
    pub fn new(id: impl Into<String>, service: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            service_name: service.into(),
            app: DEFAULT_APP.to_string(),
            version: version.into(),
            ..Default::default()
        }
    }

    pub fn with_endpoint(mut self, protocol: impl Into<String>, addr: impl Into<String>) -> Self {
        self.endpoints.insert(protocol.into(), addr.into());
        self
    }

    pub fn with_data_center(mut self, region: impl Into<String>, zone: impl Into<String>) -> Self {
        self.data_center = Some(DataCenterInfo {
            name: String::new(),
            region: region.into(),
            available_zone: zone.into(),
        });
        self
    }

    /// Address serving `protocol`
    pub fn endpoint(&self, protocol: &str) -> Option<&str> {
        self.endpoints.get(protocol).map(String::as_str)
    }
}

/// Per-call data handed to a strategy with the candidates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub service_name: String,
    /// `version|app` key used for latency lookups
    pub tags: String,
    pub protocol: String,
    pub session_id: Option<String>,
}

/// A per-call instance picker
pub trait Strategy: Send {
    /// Seed the candidates for this call
    fn receive_data(&mut self, instances: Vec<Instance>, selection: Selection);

    /// Choose one candidate; repeatable
    fn pick(&mut self) -> Result<Instance>;

    /// Session the strategy bound, if it tracks sessions
    fn session_id(&self) -> Option<&str> {
        None
    }
}

/// Narrows the discovered instances before a strategy sees them
pub trait Filter: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, instances: Vec<Instance>) -> Vec<Instance>;
}

/// Service registry lookup
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn find_microservice_instances(
        &self,
        consumer: &str,
        app: &str,
        service: &str,
        version: &str,
        environment: &str,
    ) -> Result<Vec<Instance>>;
}

/// State shared by every strategy of one balancer
#[derive(Clone)]
pub struct LbContext {
    pub round_robin: Arc<RoundRobinIndex>,
    pub sessions: Arc<SessionStore>,
    pub latency: Arc<LatencyCollector>,
}

impl LbContext {
    pub fn new(config: &LoadBalancerConfig) -> Self {
        Self {
            round_robin: Arc::new(RoundRobinIndex::new()),
            sessions: Arc::new(SessionStore::from_config(config)),
            latency: Arc::new(LatencyCollector::new()),
        }
    }
}

impl Default for LbContext {
    fn default() -> Self {
        Self::new(&LoadBalancerConfig::default())
    }
}

/// Builds strategies for calls
pub struct LoadBalancer {
    config: LoadBalancerConfig,
    consumer: String,
    environment: String,
    discovery: Arc<dyn Discovery>,
    strategies: StrategyRegistry,
    filters: FilterRegistry,
    ctx: LbContext,
    /// Last candidates per service, for introspection
    last_instances: RwLock<HashMap<String, Vec<Instance>>>,
}

impl LoadBalancer {
    /// Create a balancer; every configured strategy and filter must be registered
    pub fn new(
        config: LoadBalancerConfig,
        consumer: impl Into<String>,
        environment: impl Into<String>,
        discovery: Arc<dyn Discovery>,
        strategies: StrategyRegistry,
        filters: FilterRegistry,
        ctx: LbContext,
    ) -> Result<Self> {
        for (_, name) in config.strategy_names() {
            if !strategies.contains(name) {
                return Err(GovernanceError::UnknownStrategy(name.to_string()));
            }
        }
        for name in &config.filters {
            if !filters.contains(name) {
                return Err(GovernanceError::UnknownFilter(name.clone()));
            }
        }
        Ok(Self {
            config,
            consumer: consumer.into(),
            environment: environment.into(),
            discovery,
            strategies,
            filters,
            ctx,
            last_instances: RwLock::new(HashMap::new()),
        })
    }

    /// Filters configured by default, in order
    pub fn default_filters(&self) -> &[String] {
        &self.config.filters
    }

    /// Shared strategy state
    pub fn context(&self) -> &LbContext {
        &self.ctx
    }

    /// Strategy name used for `invocation`: explicit, then per-service, then global
    pub fn strategy_name<'a>(&'a self, invocation: &'a Invocation) -> &'a str {
        invocation
            .strategy
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.config.strategy_for(&invocation.microservice_name))
    }

    /// Discover, filter and seed a strategy for `invocation`
    pub async fn build_strategy(
        &self,
        invocation: &Invocation,
        filters: &[String],
    ) -> Result<Box<dyn Strategy>> {
        let service = invocation.microservice_name.as_str();
        let app = invocation.app_or_default();
        let version = invocation.version_or_latest();

        let mut instances = self
            .discovery
            .find_microservice_instances(&self.consumer, app, service, version, &self.environment)
            .await?;

        for name in filters {
            let filter = self.filters.get(name)?;
            instances = filter.apply(instances);
        }

        if instances.is_empty() {
            return Err(LbError {
                app: app.to_string(),
                service: service.to_string(),
                version: version.to_string(),
                message: "no available instance".to_string(),
            }
            .into());
        }

        let name = self.strategy_name(invocation);
        let mut strategy = self.strategies.build(name, &self.ctx)?;
        tracing::debug!(
            service,
            version,
            strategy = name,
            candidates = instances.len(),
            "Strategy built"
        );

        self.last_instances
            .write()
            .insert(service.to_string(), instances.clone());
        strategy.receive_data(
            instances,
            Selection {
                service_name: service.to_string(),
                tags: invocation.tags_key(),
                protocol: invocation.protocol.clone(),
                session_id: invocation.session_id.clone(),
            },
        );
        Ok(strategy)
    }

    /// Record the outcome of a call against an instance
    pub fn record_result(&self, instance_id: &str, success: bool) {
        if success {
            self.ctx.sessions.reset_failure(instance_id);
        } else {
            let count = self.ctx.sessions.increment_failure(instance_id);
            tracing::debug!(instance = instance_id, failures = count, "Call failed");
        }
    }

    /// Candidates from the most recent selection of every service
    pub fn last_instances(&self) -> HashMap<String, Vec<Instance>> {
        self.last_instances.read().clone()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::lb::registry::{STRATEGY_RANDOM, STRATEGY_SESSION_STICKINESS};
    use crate::lb::zone::ZONE_AWARE;

    /// Instances of `orders` 1.0 in the default app, served on `rest` at `<id>:80`
    pub(crate) fn instances(ids: &[&str]) -> Vec<Instance> {
        ids.iter()
            .map(|id| Instance::new(*id, "orders", "1.0").with_endpoint("rest", format!("{}:80", id)))
            .collect()
    }

    pub(crate) fn selection(service: &str) -> Selection {
        Selection {
            service_name: service.to_string(),
            tags: "1.0|default".to_string(),
            protocol: "rest".to_string(),
            session_id: None,
        }
    }

    fn discovery() -> Arc<StaticDiscovery> {
        let d = Arc::new(StaticDiscovery::new());
        d.register(
            Instance::new("a", "orders", "1.0")
                .with_endpoint("rest", "a:80")
                .with_data_center("us-east", "us-east-1a"),
        )
        .unwrap();
        d.register(
            Instance::new("b", "orders", "1.0")
                .with_endpoint("rest", "b:80")
                .with_data_center("eu-west", "eu-west-1a"),
        )
        .unwrap();
        d.register(Instance::new("c", "orders", "2.0").with_endpoint("rest", "c:80"))
            .unwrap();
        d
    }

    fn balancer(config: LoadBalancerConfig) -> Result<LoadBalancer> {
        let local = DataCenterInfo {
            name: "dc1".into(),
            region: "us-east".into(),
            available_zone: "us-east-1a".into(),
        };
        LoadBalancer::new(
            config,
            "gateway",
            "",
            discovery(),
            StrategyRegistry::with_defaults(),
            FilterRegistry::with_defaults(Some(local)),
            LbContext::default(),
        )
    }

    fn invocation(version: &str) -> Invocation {
        let mut inv = Invocation::new("orders", "rest");
        inv.version = Some(version.to_string());
        inv
    }

    // --- Construction ---

    #[test]
    fn test_new_rejects_unknown_names() {
        let config = LoadBalancerConfig {
            strategy: "Fastest".into(),
            ..Default::default()
        };
        assert!(matches!(balancer(config), Err(GovernanceError::UnknownStrategy(_))));

        let config = LoadBalancerConfig {
            filters: vec!["nearest".into()],
            ..Default::default()
        };
        assert!(matches!(balancer(config), Err(GovernanceError::UnknownFilter(_))));
    }

    // --- Build strategy ---

    #[tokio::test]
    async fn test_build_strategy_picks_matching_version() {
        let lb = balancer(LoadBalancerConfig::default()).unwrap();
        let mut strategy = lb.build_strategy(&invocation("2.0"), &[]).await.unwrap();
        assert_eq!(strategy.pick().unwrap().id, "c");
        assert_eq!(lb.last_instances()["orders"].len(), 1);
    }

    #[tokio::test]
    async fn test_build_strategy_applies_filters() {
        let lb = balancer(LoadBalancerConfig::default()).unwrap();
        let filters = vec![ZONE_AWARE.to_string()];
        let mut strategy = lb.build_strategy(&invocation("1.0"), &filters).await.unwrap();
        for _ in 0..5 {
            assert_eq!(strategy.pick().unwrap().id, "a");
        }
    }

    #[tokio::test]
    async fn test_build_strategy_none_available() {
        let lb = balancer(LoadBalancerConfig::default()).unwrap();
        let err = lb
            .build_strategy(&invocation("9.9"), &[])
            .await
            .err()
            .unwrap();
        match err {
            GovernanceError::LoadBalance(e) => {
                assert_eq!(e.service, "orders");
                assert_eq!(e.version, "9.9");
                assert_eq!(e.app, DEFAULT_APP);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_build_strategy_unknown_filter() {
        let lb = balancer(LoadBalancerConfig::default()).unwrap();
        let result = lb.build_strategy(&invocation("1.0"), &["nope".to_string()]).await;
        assert!(matches!(result, Err(GovernanceError::UnknownFilter(_))));
    }

    #[tokio::test]
    async fn test_build_strategy_latest() {
        let lb = balancer(LoadBalancerConfig::default()).unwrap();
        let inv = Invocation::new("orders", "rest");
        let mut strategy = lb.build_strategy(&inv, &[]).await.unwrap();
        assert_eq!(strategy.pick().unwrap().version, "2.0");
    }

    // --- Strategy resolution ---

    #[test]
    fn test_strategy_resolution_order() {
        let mut config = LoadBalancerConfig::default();
        config.services.insert(
            "orders".into(),
            crate::config::ServiceBalancerConfig {
                strategy: STRATEGY_RANDOM.into(),
            },
        );
        let lb = balancer(config).unwrap();

        let mut inv = invocation("1.0");
        assert_eq!(lb.strategy_name(&inv), STRATEGY_RANDOM);
        inv.strategy = Some(STRATEGY_SESSION_STICKINESS.into());
        assert_eq!(lb.strategy_name(&inv), STRATEGY_SESSION_STICKINESS);

        let other = Invocation::new("carts", "rest");
        assert_eq!(lb.strategy_name(&other), "RoundRobin");
    }

    #[tokio::test]
    async fn test_sticky_session_through_balancer() {
        let config = LoadBalancerConfig {
            strategy: STRATEGY_SESSION_STICKINESS.into(),
            ..Default::default()
        };
        let lb = balancer(config).unwrap();

        let mut strategy = lb.build_strategy(&invocation("1.0"), &[]).await.unwrap();
        let first = strategy.pick().unwrap().id;
        let session = strategy.session_id().unwrap().to_string();

        let mut inv = invocation("1.0");
        inv.session_id = Some(session);
        for _ in 0..5 {
            let mut s = lb.build_strategy(&inv, &[]).await.unwrap();
            assert_eq!(s.pick().unwrap().id, first);
        }
    }

    #[test]
    fn test_record_result() {
        let lb = balancer(LoadBalancerConfig::default()).unwrap();
        lb.record_result("a", false);
        lb.record_result("a", false);
        assert_eq!(lb.context().sessions.failure_count("a"), 2);
        lb.record_result("a", true);
        assert_eq!(lb.context().sessions.failure_count("a"), 0);
    }
}
