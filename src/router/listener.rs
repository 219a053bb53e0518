//! Governance listener — applies route rule events from the config hub
//!
//! Two key namespaces are served side by side:
//! - `cse.darklaunch.policy.<service>`: JSON dark launch policy
//! - `servicecomb.routeRule.<service>`: YAML list of route rules
//!
//! Invalid payloads are logged and dropped; the store keeps its previous rules.

use super::dark_launch::{dark_launch_to_route_rules, DarkLaunchRule};
use super::rule::RouteRule;
use super::store::RouteRuleStore;
use crate::error::{GovernanceError, Result};
use crate::provider::{ConfigEvent, ConfigValue, EventListener, EventType, KeyPattern};
use std::sync::Arc;

/// Prefix of legacy JSON dark launch policies
pub const DARK_LAUNCH_PREFIX: &str = "cse.darklaunch.policy.";

/// Prefix of YAML route rule lists
pub const ROUTE_RULE_PREFIX: &str = "servicecomb.routeRule.";

/// Which namespace a key belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleKey<'a> {
    DarkLaunch(&'a str),
    RouteList(&'a str),
}

fn parse_key(key: &str) -> Option<RuleKey<'_>> {
    if let Some(service) = key.strip_prefix(DARK_LAUNCH_PREFIX) {
        return Some(RuleKey::DarkLaunch(service)).filter(|_| !service.is_empty());
    }
    if let Some(service) = key.strip_prefix(ROUTE_RULE_PREFIX) {
        return Some(RuleKey::RouteList(service)).filter(|_| !service.is_empty());
    }
    None
}

/// Decode an event value into canonical rules
fn decode(key: RuleKey<'_>, value: &ConfigValue) -> Result<Vec<RouteRule>> {
    let raw = value.as_text().ok_or_else(|| {
        GovernanceError::Config(format!("expected a text value, got '{}'", value))
    })?;
    match key {
        RuleKey::DarkLaunch(_) => {
            let policy = DarkLaunchRule::from_json(raw)?;
            dark_launch_to_route_rules(&policy).map_err(GovernanceError::Config)
        }
        RuleKey::RouteList(_) => {
            if raw.trim().is_empty() {
                return Ok(Vec::new());
            }
            Ok(serde_yaml::from_str(raw)?)
        }
    }
}

/// Event listener that keeps a [`RouteRuleStore`] in sync with governance keys
pub struct RouteRuleListener {
    store: Arc<RouteRuleStore>,
}

impl RouteRuleListener {
    /// Create a listener updating `store`
    pub fn new(store: Arc<RouteRuleStore>) -> Self {
        Self { store }
    }

    /// Pattern selecting both rule namespaces
    pub fn key_pattern() -> Result<KeyPattern> {
        KeyPattern::regex(&format!(
            "^({}|{})",
            regex::escape(DARK_LAUNCH_PREFIX),
            regex::escape(ROUTE_RULE_PREFIX)
        ))
    }

    /// Apply one event to the store
    pub fn apply(&self, event: &ConfigEvent) -> Result<()> {
        let Some(key) = parse_key(&event.key) else {
            return Ok(());
        };
        let service = match key {
            RuleKey::DarkLaunch(s) | RuleKey::RouteList(s) => s,
        };

        match event.event_type {
            EventType::Create | EventType::Update => {
                let value = event.value.as_ref().ok_or_else(|| {
                    GovernanceError::Config(format!("{} event without value", event.event_type))
                })?;
                let rules = decode(key, value)?;
                self.store.set_route_rule_by_key(service, rules)
            }
            EventType::Delete => {
                self.store.delete_governed(service);
                Ok(())
            }
        }
    }
}

impl EventListener for RouteRuleListener {
    fn on_event(&self, event: &ConfigEvent) {
        if let Err(e) = self.apply(event) {
            tracing::error!(
                key = %event.key,
                event = %event.event_type,
                error = %e,
                "Route rule update rejected, keeping previous rules"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::rule::{Match, RouteTag};
    use crate::router::store::RuleOrigin;
    use crate::router::weight_pool::WeightPoolRegistry;
    use std::collections::HashMap;

    fn setup() -> (RouteRuleListener, Arc<RouteRuleStore>) {
        let store = Arc::new(RouteRuleStore::new(Arc::new(WeightPoolRegistry::new())));
        (RouteRuleListener::new(store.clone()), store)
    }

    fn event(event_type: EventType, key: &str, value: Option<&str>) -> ConfigEvent {
        ConfigEvent {
            event_type,
            key: key.to_string(),
            value: value.map(ConfigValue::from),
        }
    }

    const YAML_RULES: &str = r#"
- precedence: 3
  route:
    - tags: { version: "2.0" }
      weight: 100
"#;

    // --- Keys ---

    #[test]
    fn test_parse_key() {
        assert_eq!(
            parse_key("cse.darklaunch.policy.orders"),
            Some(RuleKey::DarkLaunch("orders"))
        );
        assert_eq!(
            parse_key("servicecomb.routeRule.orders"),
            Some(RuleKey::RouteList("orders"))
        );
        assert_eq!(parse_key("servicecomb.routeRule."), None);
        assert_eq!(parse_key("unrelated.key"), None);
    }

    #[test]
    fn test_key_pattern_covers_both_namespaces() {
        let pattern = RouteRuleListener::key_pattern().unwrap();
        assert!(pattern.matches("cse.darklaunch.policy.orders"));
        assert!(pattern.matches("servicecomb.routeRule.orders"));
        assert!(!pattern.matches("cseXdarklaunch.policy.orders"));
    }

    // --- Create / Update ---

    #[test]
    fn test_yaml_rule_list_applied() {
        let (listener, store) = setup();
        listener
            .apply(&event(EventType::Create, "servicecomb.routeRule.orders", Some(YAML_RULES)))
            .unwrap();
        let rules = store.fetch_route_rule_by_service_name("orders").unwrap();
        assert_eq!(rules[0].precedence, 3);
        assert_eq!(store.origin("orders"), Some(RuleOrigin::Governance));
    }

    #[test]
    fn test_dark_launch_policy_applied() {
        let (listener, store) = setup();
        let policy = r#"{"policyType":"RATE","ruleItems":[
            {"groupName":"a","groupCondition":"version=1.0","policyCondition":"30"},
            {"groupName":"b","groupCondition":"version=2.0","policyCondition":"70"}]}"#;
        listener
            .apply(&event(EventType::Update, "cse.darklaunch.policy.orders", Some(policy)))
            .unwrap();
        let rules = store.fetch_route_rule_by_service_name("orders").unwrap();
        assert_eq!(
            rules[0].routes,
            vec![RouteTag::version("1.0", 30), RouteTag::version("2.0", 70)]
        );
    }

    #[test]
    fn test_invalid_payloads_rejected() {
        let (listener, store) = setup();
        listener
            .apply(&event(EventType::Create, "servicecomb.routeRule.orders", Some(YAML_RULES)))
            .unwrap();

        let overweight = r#"
- precedence: 1
  route:
    - { tags: { version: a }, weight: 900 }
    - { tags: { version: b }, weight: 50 }
"#;
        assert!(listener
            .apply(&event(EventType::Update, "servicecomb.routeRule.orders", Some(overweight)))
            .is_err());
        assert!(listener
            .apply(&event(EventType::Update, "cse.darklaunch.policy.orders", Some("{broken")))
            .is_err());
        assert!(listener
            .apply(&event(EventType::Update, "servicecomb.routeRule.orders", None))
            .is_err());

        // previous valid snapshot retained
        let rules = store.fetch_route_rule_by_service_name("orders").unwrap();
        assert_eq!(rules[0].precedence, 3);
    }

    #[test]
    fn test_non_text_value_rejected() {
        let (listener, store) = setup();
        let ev = ConfigEvent {
            event_type: EventType::Create,
            key: "servicecomb.routeRule.orders".into(),
            value: Some(ConfigValue::Integer(7)),
        };
        assert!(listener.apply(&ev).is_err());
        assert!(store.is_empty());
    }

    // --- Delete ---

    #[test]
    fn test_delete_removes_governance_rules() {
        let (listener, store) = setup();
        listener
            .apply(&event(EventType::Create, "servicecomb.routeRule.orders", Some(YAML_RULES)))
            .unwrap();
        listener
            .apply(&event(EventType::Delete, "servicecomb.routeRule.orders", None))
            .unwrap();
        assert!(store.fetch_route_rule_by_service_name("orders").is_none());
    }

    #[test]
    fn test_delete_keeps_file_rules() {
        let (listener, store) = setup();
        let mut file = HashMap::new();
        file.insert(
            "orders".to_string(),
            vec![RouteRule {
                precedence: 2,
                routes: vec![RouteTag::version("0.0.1", 100)],
                matcher: Match::default(),
            }],
        );
        store.seed(&file, &HashMap::new()).unwrap();

        listener
            .apply(&event(EventType::Delete, "cse.darklaunch.policy.orders", None))
            .unwrap();
        assert_eq!(store.origin("orders"), Some(RuleOrigin::File));
    }

    #[test]
    fn test_unrelated_key_ignored() {
        let (listener, store) = setup();
        listener
            .apply(&event(EventType::Create, "some.other.key", Some("x")))
            .unwrap();
        assert!(store.is_empty());
    }
}
