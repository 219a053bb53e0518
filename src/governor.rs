//! Governor — high-level coordinator for the traffic governance components
//!
//! Ties together the file-seeded rule store, the route selector, the config
//! hub with its governance listener, the load balancer and the latency
//! recompute task.

use crate::config::GovernanceConfig;
use crate::error::{GovernanceError, Result};
use crate::invocation::{Invocation, SourceInfo};
use crate::lb::{
    Discovery, FilterRegistry, Instance, LbContext, LoadBalancer, StrategyRegistry,
};
use crate::provider::{ConfigHub, ConfigSource};
use crate::router::{RouteRuleListener, RouteRuleStore, Router, WeightPoolRegistry};
use crate::{GovernorState, StatusSnapshot};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// The traffic governor, coordinating routing and instance selection
pub struct Governor {
    config: GovernanceConfig,
    /// Identity of the local process, used as the rule `source`
    source: SourceInfo,
    state: RwLock<GovernorState>,
    start_time: Instant,
    shutdown: AtomicBool,
    store: Arc<RouteRuleStore>,
    router: Router,
    hub: Arc<ConfigHub>,
    balancer: LoadBalancer,
    /// Background task handles
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Governor {
    /// Create a governor with the built-in strategies and filters
    pub fn new(config: GovernanceConfig, discovery: Arc<dyn Discovery>) -> Result<Self> {
        let filters = FilterRegistry::with_defaults(config.data_center.clone());
        Self::with_registries(config, discovery, StrategyRegistry::with_defaults(), filters)
    }

    /// Create a governor with explicit strategy and filter registries
    pub fn with_registries(
        config: GovernanceConfig,
        discovery: Arc<dyn Discovery>,
        strategies: StrategyRegistry,
        filters: FilterRegistry,
    ) -> Result<Self> {
        config.validate_rules()?;

        let pools = Arc::new(WeightPoolRegistry::new());
        let store = Arc::new(RouteRuleStore::new(pools.clone()));
        store.seed(&config.route_rule, &config.source_template)?;
        tracing::info!(services = store.len(), "Route rules seeded from configuration");

        let router = Router::new(store.clone(), pools, config.router.picker);

        let hub = ConfigHub::new();
        hub.register_listener(
            RouteRuleListener::key_pattern()?,
            Arc::new(RouteRuleListener::new(store.clone())),
        );

        let balancer = LoadBalancer::new(
            config.load_balancer.clone(),
            config.service.name.clone(),
            config.service.environment.clone(),
            discovery,
            strategies,
            filters,
            LbContext::new(&config.load_balancer),
        )?;

        Ok(Self {
            source: config.service.source_info(),
            config,
            state: RwLock::new(GovernorState::Created),
            start_time: Instant::now(),
            shutdown: AtomicBool::new(false),
            store,
            router,
            hub,
            balancer,
            handles: Mutex::new(Vec::new()),
        })
    }

    /// Start background work: the periodic latency recompute and session sweep
    pub async fn start(&self) -> Result<()> {
        if self.state() != GovernorState::Created {
            return Err(GovernanceError::Other(format!(
                "governor cannot start from state '{}'",
                self.state()
            )));
        }

        let interval = self.config.load_balancer.latency_recompute_interval();
        let ctx = self.balancer.context();
        let mut handles = self.handles.lock();
        handles.push(ctx.latency.spawn_recompute(interval));
        handles.push(ctx.sessions.spawn_sweep(interval));
        drop(handles);
        tracing::info!(interval_secs = interval.as_secs(), "Latency recompute and session sweep started");

        self.set_state(GovernorState::Running);
        Ok(())
    }

    /// Add a config source feeding governance keys
    pub fn add_source(&self, source: Arc<dyn ConfigSource>) -> Result<()> {
        self.hub.add_source(source)
    }

    /// Route `invocation` as the local service
    pub fn route(&self, headers: &HashMap<String, String>, invocation: &mut Invocation) -> Result<()> {
        self.router.route(headers, Some(&self.source), invocation)
    }

    /// Route `invocation` on behalf of an explicit caller
    pub fn route_from(
        &self,
        headers: &HashMap<String, String>,
        source: Option<&SourceInfo>,
        invocation: &mut Invocation,
    ) -> Result<()> {
        self.router.route(headers, source, invocation)
    }

    /// Route, discover, filter and pick an instance for `invocation`
    ///
    /// A session id issued by a sticky strategy is written back to the invocation.
    pub async fn select(
        &self,
        headers: &HashMap<String, String>,
        invocation: &mut Invocation,
    ) -> Result<Instance> {
        self.route(headers, invocation)?;
        let mut strategy = self
            .balancer
            .build_strategy(invocation, self.balancer.default_filters())
            .await?;
        let instance = strategy.pick()?;
        if let Some(session) = strategy.session_id() {
            invocation.session_id = Some(session.to_string());
        }
        Ok(instance)
    }

    /// Record the latency of a completed call, successful or not
    pub fn record_latency(&self, latency: Duration, instance: &Instance, invocation: &Invocation) {
        let Some(addr) = instance.endpoint(&invocation.protocol) else {
            tracing::warn!(
                instance = %instance.id,
                protocol = %invocation.protocol,
                "Instance has no endpoint for protocol, latency dropped"
            );
            return;
        };
        self.balancer.context().latency.set_latency(
            latency,
            addr,
            &invocation.microservice_name,
            &invocation.tags_key(),
            &invocation.protocol,
        );
    }

    /// Record the outcome of a call for sticky failure tracking
    pub fn record_result(&self, instance: &Instance, success: bool) {
        self.balancer.record_result(&instance.id, success);
    }

    /// Stop background tasks
    pub async fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        for handle in self.handles.lock().drain(..) {
            handle.abort();
        }
        self.set_state(GovernorState::Stopped);
        tracing::info!("Governor stopped");
    }

    pub fn state(&self) -> GovernorState {
        *self.state.read()
    }

    pub fn is_running(&self) -> bool {
        self.state() == GovernorState::Running
    }

    /// Status snapshot for introspection
    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            state: self.state(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            services_with_rules: self.store.len(),
            config_sources: self.hub.source_names(),
        }
    }

    pub fn config(&self) -> &GovernanceConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<RouteRuleStore> {
        &self.store
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn hub(&self) -> &Arc<ConfigHub> {
        &self.hub
    }

    pub fn balancer(&self) -> &LoadBalancer {
        &self.balancer
    }

    fn set_state(&self, new_state: GovernorState) {
        let mut state = self.state.write();
        tracing::debug!(from = %*state, to = %new_state, "State transition");
        *state = new_state;
    }
}
