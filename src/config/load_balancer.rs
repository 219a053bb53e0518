//! Load balancer settings — strategy, filters and session/latency tuning

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Load balancer configuration
///
/// # Example
///
/// ```yaml
/// loadBalancer:
///   strategy: RoundRobin
///   filters: [zoneaware]
///   successiveFailedTimes: 3
///   services:
///     orders: { strategy: WeightedResponse }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerConfig {
    /// Global strategy name (default: RoundRobin)
    #[serde(default = "default_strategy")]
    pub strategy: String,

    /// Filters applied to discovered instances, in order
    #[serde(default)]
    pub filters: Vec<String>,

    /// Failures in a row after which a sticky binding is considered stale
    #[serde(default = "default_successive_failed_times")]
    pub successive_failed_times: u32,

    /// Idle lifetime of a sticky session in seconds
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,

    /// Maximum number of tracked sessions
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Period of the latency average recompute task in seconds
    #[serde(default = "default_latency_interval")]
    pub latency_recompute_interval_secs: u64,

    /// Per-service overrides
    #[serde(default)]
    pub services: HashMap<String, ServiceBalancerConfig>,
}

/// Per-service load balancer override
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceBalancerConfig {
    /// Strategy name for this service
    pub strategy: String,
}

fn default_strategy() -> String {
    crate::lb::registry::STRATEGY_ROUND_ROBIN.to_string()
}

fn default_successive_failed_times() -> u32 {
    3
}

fn default_session_timeout() -> u64 {
    3600
}

fn default_max_sessions() -> usize {
    100_000
}

fn default_latency_interval() -> u64 {
    30
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            filters: Vec::new(),
            successive_failed_times: default_successive_failed_times(),
            session_timeout_secs: default_session_timeout(),
            max_sessions: default_max_sessions(),
            latency_recompute_interval_secs: default_latency_interval(),
            services: HashMap::new(),
        }
    }
}

impl LoadBalancerConfig {
    /// Strategy configured for `service`, falling back to the global one
    pub fn strategy_for(&self, service: &str) -> &str {
        self.services
            .get(service)
            .map(|s| s.strategy.as_str())
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.strategy)
    }

    /// Sticky session lifetime
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    /// Latency recompute period, at least one second
    pub fn latency_recompute_interval(&self) -> Duration {
        Duration::from_secs(self.latency_recompute_interval_secs.max(1))
    }

    /// Every strategy name referenced by this configuration
    pub fn strategy_names(&self) -> impl Iterator<Item = (&str, &str)> {
        std::iter::once(("*", self.strategy.as_str())).chain(
            self.services
                .iter()
                .map(|(svc, cfg)| (svc.as_str(), cfg.strategy.as_str())),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg: LoadBalancerConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(cfg, LoadBalancerConfig::default());
        assert_eq!(cfg.strategy, "RoundRobin");
        assert_eq!(cfg.successive_failed_times, 3);
        assert_eq!(cfg.session_timeout(), Duration::from_secs(3600));
        assert_eq!(cfg.max_sessions, 100_000);
        assert_eq!(cfg.latency_recompute_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_parse_camel_case() {
        let yaml = r#"
strategy: Random
filters: [zoneaware]
successiveFailedTimes: 5
sessionTimeoutSecs: 60
services:
  orders: { strategy: WeightedResponse }
"#;
        let cfg: LoadBalancerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.filters, vec!["zoneaware"]);
        assert_eq!(cfg.successive_failed_times, 5);
        assert_eq!(cfg.session_timeout_secs, 60);
        assert_eq!(cfg.strategy_for("orders"), "WeightedResponse");
        assert_eq!(cfg.strategy_for("carts"), "Random");
    }

    #[test]
    fn test_strategy_names() {
        let mut cfg = LoadBalancerConfig::default();
        cfg.services.insert(
            "orders".into(),
            ServiceBalancerConfig {
                strategy: "Random".into(),
            },
        );
        let names: Vec<_> = cfg.strategy_names().collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&("orders", "Random")));
    }
}
