//! Strategy and filter registries
//!
//! Built explicitly at startup and handed to the balancer; custom strategies
//! and filters are registered next to the built-in ones.

use super::random::RandomStrategy;
use super::round_robin::RoundRobin;
use super::session::SessionStickiness;
use super::weighted_response::WeightedResponse;
use super::zone::{ZoneAwareFilter, ZONE_AWARE};
use super::{DataCenterInfo, Filter, LbContext, Strategy};
use crate::error::{GovernanceError, Result};
use std::collections::HashMap;
use std::sync::Arc;

pub const STRATEGY_ROUND_ROBIN: &str = "RoundRobin";
pub const STRATEGY_RANDOM: &str = "Random";
pub const STRATEGY_SESSION_STICKINESS: &str = "SessionStickiness";
pub const STRATEGY_WEIGHTED_RESPONSE: &str = "WeightedResponse";

/// Names of the strategies every default registry provides
pub const BUILTIN_STRATEGIES: &[&str] = &[
    STRATEGY_ROUND_ROBIN,
    STRATEGY_RANDOM,
    STRATEGY_SESSION_STICKINESS,
    STRATEGY_WEIGHTED_RESPONSE,
];

/// Names of the filters every default registry provides
pub const BUILTIN_FILTERS: &[&str] = &[ZONE_AWARE];

/// Builds a fresh per-call strategy bound to the shared balancer state
pub type StrategyFactory = Arc<dyn Fn(&LbContext) -> Box<dyn Strategy> + Send + Sync>;

/// Wrap a strategy constructor into a [`StrategyFactory`]
pub fn strategy_factory<S, F>(build: F) -> StrategyFactory
where
    S: Strategy + 'static,
    F: Fn(&LbContext) -> S + Send + Sync + 'static,
{
    Arc::new(move |ctx: &LbContext| Box::new(build(ctx)) as Box<dyn Strategy>)
}

/// Name → strategy factory
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    factories: HashMap<String, StrategyFactory>,
}

impl StrategyRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the four built-in strategies
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let builtins: [(&str, StrategyFactory); 4] = [
            (STRATEGY_ROUND_ROBIN, strategy_factory(RoundRobin::new)),
            (STRATEGY_RANDOM, strategy_factory(|_| RandomStrategy::new())),
            (STRATEGY_SESSION_STICKINESS, strategy_factory(SessionStickiness::new)),
            (STRATEGY_WEIGHTED_RESPONSE, strategy_factory(WeightedResponse::new)),
        ];
        for (name, factory) in builtins {
            registry.factories.insert(name.to_string(), factory);
        }
        registry
    }

    /// Register a strategy under `name`
    pub fn register(&mut self, name: impl Into<String>, factory: StrategyFactory) -> Result<()> {
        let name = name.into();
        if name.is_empty() {
            return Err(GovernanceError::Registration(
                "strategy name must not be empty".to_string(),
            ));
        }
        if self.factories.contains_key(&name) {
            return Err(GovernanceError::Registration(format!(
                "strategy '{}' already registered",
                name
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Instantiate the strategy registered under `name`
    pub fn build(&self, name: &str, ctx: &LbContext) -> Result<Box<dyn Strategy>> {
        self.factories
            .get(name)
            .map(|factory| factory(ctx))
            .ok_or_else(|| GovernanceError::UnknownStrategy(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Name → instance filter
#[derive(Clone, Default)]
pub struct FilterRegistry {
    filters: HashMap<String, Arc<dyn Filter>>,
}

impl FilterRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the zone affinity filter for `data_center`
    pub fn with_defaults(data_center: Option<DataCenterInfo>) -> Self {
        let mut registry = Self::new();
        registry
            .filters
            .insert(ZONE_AWARE.to_string(), Arc::new(ZoneAwareFilter::new(data_center)));
        registry
    }

    /// Register a filter under its own name
    pub fn register(&mut self, filter: Arc<dyn Filter>) -> Result<()> {
        let name = filter.name().to_string();
        if name.is_empty() {
            return Err(GovernanceError::Registration(
                "filter name must not be empty".to_string(),
            ));
        }
        if self.filters.contains_key(&name) {
            return Err(GovernanceError::Registration(format!(
                "filter '{}' already registered",
                name
            )));
        }
        self.filters.insert(name, filter);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Filter>> {
        self.filters
            .get(name)
            .cloned()
            .ok_or_else(|| GovernanceError::UnknownFilter(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.filters.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
