//! Configuration types for A3S Traffic
//!
//! Bootstrap settings are read once at startup from YAML. Route rules found
//! here are the file-origin rules; governance keys delivered later through
//! the config hub override them per service.

mod load_balancer;
mod router;
mod service;

pub use load_balancer::{LoadBalancerConfig, ServiceBalancerConfig};
pub use router::{Picker, RouterConfig};
pub use service::LocalServiceConfig;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{GovernanceError, Result};
use crate::lb::registry::{BUILTIN_FILTERS, BUILTIN_STRATEGIES};
use crate::lb::DataCenterInfo;
use crate::router::rule::{validate_match, validate_rules, Match, RouteRule};

/// Top-level governance configuration
///
/// # YAML Example
///
/// ```yaml
/// service:
///   name: gateway
///   app: sockshop
/// dataCenter:
///   region: us-east
///   availableZone: us-east-1a
/// loadBalancer:
///   strategy: RoundRobin
///   filters: [zoneaware]
/// routeRule:
///   orders:
///     - precedence: 2
///       route:
///         - tags: { version: 0.0.1, app: sockshop }
///           weight: 100
/// sourceTemplate:
///   vip:
///     source: gateway
///     headers:
///       user: { regex: "vip.*" }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernanceConfig {
    /// Identity of the local process
    #[serde(default)]
    pub service: LocalServiceConfig,

    /// Data center of the local process; absent disables zone affinity
    #[serde(default)]
    pub data_center: Option<DataCenterInfo>,

    /// Route selection settings
    #[serde(default)]
    pub router: RouterConfig,

    /// Instance selection settings
    #[serde(default)]
    pub load_balancer: LoadBalancerConfig,

    /// File-origin route rules, keyed by destination service
    #[serde(default)]
    pub route_rule: HashMap<String, Vec<RouteRule>>,

    /// Reusable match templates referenced by `match.refer`
    #[serde(default)]
    pub source_template: HashMap<String, Match>,
}

impl GovernanceConfig {
    /// Load configuration from a YAML file
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            GovernanceError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
            .map_err(|e| GovernanceError::Config(format!("Failed to parse YAML config: {}", e)))
    }

    /// Validate rules, templates and the built-in strategy/filter names
    pub fn validate(&self) -> Result<()> {
        self.validate_rules()?;
        self.validate_load_balancer(BUILTIN_STRATEGIES, BUILTIN_FILTERS)
    }

    /// Validate the rule table and source templates
    pub fn validate_rules(&self) -> Result<()> {
        for (name, template) in &self.source_template {
            validate_match(template).map_err(|e| {
                GovernanceError::Config(format!("Source template '{}': {}", name, e))
            })?;
        }
        for (service, rules) in &self.route_rule {
            validate_rules(service, rules, &self.source_template).map_err(GovernanceError::Config)?;
        }
        Ok(())
    }

    /// Validate load balancer settings against the known strategy and filter names
    pub fn validate_load_balancer(&self, strategies: &[&str], filters: &[&str]) -> Result<()> {
        let lb = &self.load_balancer;
        for (scope, name) in lb.strategy_names() {
            if !strategies.contains(&name) {
                return Err(GovernanceError::UnknownStrategy(format!(
                    "'{}' (scope '{}')",
                    name, scope
                )));
            }
        }
        for name in &lb.filters {
            if !filters.contains(&name.as_str()) {
                return Err(GovernanceError::UnknownFilter(name.clone()));
            }
        }
        if lb.max_sessions == 0 {
            return Err(GovernanceError::Config(
                "loadBalancer.maxSessions must be greater than 0".to_string(),
            ));
        }
        if lb.latency_recompute_interval_secs == 0 {
            return Err(GovernanceError::Config(
                "loadBalancer.latencyRecomputeIntervalSecs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
