//! Route selector — picks the destination version/app of a call
//!
//! Rules of the destination service are evaluated by descending precedence.
//! The first rule whose match holds is the only one that counts; its routes
//! are fed to the configured picker (weight pool or FitRate).

pub mod dark_launch;
pub mod fit_rate;
pub mod listener;
pub mod rule;
pub mod store;
pub mod weight_pool;

pub use dark_launch::{dark_launch_to_route_rules, DarkLaunchRule, DarkLaunchType, RuleItem};
pub use fit_rate::FitRateCounters;
pub use listener::{RouteRuleListener, DARK_LAUNCH_PREFIX, ROUTE_RULE_PREFIX};
pub use rule::{HeaderOperator, Match, RouteRule, RouteTag};
pub use store::{RouteRuleStore, RuleOrigin, RuleSnapshot};
pub use weight_pool::{PoolKey, WeightPool, WeightPoolRegistry};

use crate::config::Picker;
use crate::error::{GovernanceError, Result};
use crate::invocation::{Invocation, SourceInfo, DEFAULT_APP, LATEST_VERSION, TAG_APP, TAG_PROJECT, TAG_VERSION};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::sync::Arc;

/// Sort rules by descending precedence
///
/// The sort is stable: rules sharing a precedence keep insertion order.
pub fn sort_rules<R: Borrow<RouteRule>>(rules: &mut [R]) {
    rules.sort_by(|a, b| b.borrow().precedence.cmp(&a.borrow().precedence));
}

/// Route selector bound to a rule store
pub struct Router {
    store: Arc<RouteRuleStore>,
    pools: Arc<WeightPoolRegistry>,
    counters: FitRateCounters,
    picker: Picker,
}

impl Router {
    /// Create a router over `store`, building pools in `pools`
    pub fn new(store: Arc<RouteRuleStore>, pools: Arc<WeightPoolRegistry>, picker: Picker) -> Self {
        Self {
            store,
            pools,
            counters: FitRateCounters::new(),
            picker,
        }
    }

    /// The underlying rule store
    pub fn store(&self) -> &Arc<RouteRuleStore> {
        &self.store
    }

    /// FitRate counters of this router
    pub fn counters(&self) -> &FitRateCounters {
        &self.counters
    }

    /// Active picker
    pub fn picker(&self) -> Picker {
        self.picker
    }

    /// Decide the destination version and app of `invocation`
    ///
    /// Sets `version`, `app_id` and `route_tags`. When no rule matches, the app
    /// falls back to the caller's app (then the global default) and the
    /// version to `latest`.
    pub fn route(
        &self,
        headers: &HashMap<String, String>,
        source: Option<&SourceInfo>,
        invocation: &mut Invocation,
    ) -> Result<()> {
        let service = invocation.microservice_name.clone();
        if service.is_empty() {
            return Err(GovernanceError::Route(
                "invocation has no destination service".to_string(),
            ));
        }

        if let Some(snapshot) = self.store.snapshot(&service) {
            let templates = self.store.templates();
            let mut sorted: Vec<&RouteRule> = snapshot.rules.iter().collect();
            sort_rules(&mut sorted);

            let mut ordinal = 0;
            let mut previous = None;
            for rule in sorted {
                ordinal = if previous == Some(rule.precedence) { ordinal + 1 } else { 0 };
                previous = Some(rule.precedence);

                if !rule.matcher.matches(headers, source, &templates) {
                    continue;
                }
                let key = PoolKey {
                    service: service.clone(),
                    precedence: rule.precedence,
                    ordinal,
                };
                if let Some(tag) = self.pick(&service, rule, &key, snapshot.generation) {
                    apply_tag(invocation, &tag);
                    tracing::debug!(
                        service = %service,
                        precedence = rule.precedence,
                        tag = %tag.label(),
                        "Route rule matched"
                    );
                }
                break;
            }
        }

        if invocation.app_id.is_none() {
            let app = source
                .and_then(SourceInfo::app)
                .unwrap_or(DEFAULT_APP)
                .to_string();
            invocation.app_id = Some(app);
        }
        if invocation.version.is_none() {
            invocation.version = Some(LATEST_VERSION.to_string());
        }
        Ok(())
    }

    fn pick(&self, service: &str, rule: &RouteRule, key: &PoolKey, generation: u64) -> Option<RouteTag> {
        match self.picker {
            Picker::WeightPool => {
                let pool = self.pools.get_or_build(key, generation, &rule.routes);
                Some(pool.pick_one().clone())
            }
            Picker::FitRate => self.counters.fit_rate(&rule.routes, service).cloned(),
        }
    }
}

fn apply_tag(invocation: &mut Invocation, tag: &RouteTag) {
    for (k, v) in &tag.tags {
        invocation.route_tags.insert(k.clone(), v.clone());
    }
    if let Some(version) = tag.tags.get(TAG_VERSION) {
        invocation.version = Some(version.clone());
    }
    if let Some(app) = tag.tags.get(TAG_APP).or_else(|| tag.tags.get(TAG_PROJECT)) {
        invocation.app_id = Some(app.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router(picker: Picker) -> Router {
        let pools = Arc::new(WeightPoolRegistry::new());
        let store = Arc::new(RouteRuleStore::new(pools.clone()));
        Router::new(store, pools, picker)
    }

    fn tag(version: &str, app: Option<&str>, weight: u32) -> RouteTag {
        let mut t = RouteTag::version(version, weight);
        if let Some(app) = app {
            t.tags.insert("app".into(), app.into());
        }
        t
    }

    fn header_rule(precedence: i32, header: &str, value: &str, version: &str) -> RouteRule {
        let mut matcher = Match::default();
        let mut ops = HashMap::new();
        ops.insert("exact".to_string(), value.to_string());
        matcher.headers.insert(header.to_string(), ops);
        RouteRule {
            precedence,
            routes: vec![RouteTag::version(version, 100)],
            matcher,
        }
    }

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    // --- Sorting ---

    #[test]
    fn test_sort_rules_descending() {
        let mut rules: Vec<RouteRule> = [20, 30, 50, 40, 10]
            .iter()
            .map(|p| RouteRule {
                precedence: *p,
                ..Default::default()
            })
            .collect();
        sort_rules(&mut rules);
        let order: Vec<i32> = rules.iter().map(|r| r.precedence).collect();
        assert_eq!(order, vec![50, 40, 30, 20, 10]);
    }

    #[test]
    fn test_sort_rules_ties_keep_insertion_order() {
        let mut rules = vec![
            RouteRule {
                precedence: 1,
                routes: vec![RouteTag::version("first", 100)],
                ..Default::default()
            },
            RouteRule {
                precedence: 5,
                ..Default::default()
            },
            RouteRule {
                precedence: 1,
                routes: vec![RouteTag::version("second", 100)],
                ..Default::default()
            },
        ];
        sort_rules(&mut rules);
        assert_eq!(rules[1].routes[0].tags["version"], "first");
        assert_eq!(rules[2].routes[0].tags["version"], "second");
    }

    // --- Route ---

    #[test]
    fn test_route_full_weight_rule() {
        let r = router(Picker::WeightPool);
        r.store()
            .set_route_rule_by_key(
                "orders",
                vec![RouteRule {
                    precedence: 2,
                    routes: vec![tag("0.0.1", Some("sockshop"), 100)],
                    matcher: Match::default(),
                }],
            )
            .unwrap();

        let mut inv = Invocation::new("orders", "rest");
        r.route(&HashMap::new(), None, &mut inv).unwrap();
        assert_eq!(inv.version.as_deref(), Some("0.0.1"));
        assert_eq!(inv.app_id.as_deref(), Some("sockshop"));
        assert_eq!(inv.route_tags["app"], "sockshop");
    }

    #[test]
    fn test_route_first_match_wins() {
        let r = router(Picker::FitRate);
        r.store()
            .set_route_rule_by_key(
                "orders",
                vec![
                    header_rule(1, "user", "jason", "low"),
                    header_rule(10, "user", "jason", "high"),
                ],
            )
            .unwrap();

        for _ in 0..10 {
            let mut inv = Invocation::new("orders", "rest");
            r.route(&headers(&[("user", "jason")]), None, &mut inv).unwrap();
            assert_eq!(inv.version.as_deref(), Some("high"));
        }
    }

    #[test]
    fn test_route_skips_non_matching_rules() {
        let r = router(Picker::WeightPool);
        r.store()
            .set_route_rule_by_key(
                "orders",
                vec![
                    header_rule(10, "user", "jason", "vip"),
                    header_rule(1, "user", "tom", "normal"),
                ],
            )
            .unwrap();

        let mut inv = Invocation::new("orders", "rest");
        r.route(&headers(&[("user", "tom")]), None, &mut inv).unwrap();
        assert_eq!(inv.version.as_deref(), Some("normal"));
    }

    #[test]
    fn test_route_defaults_without_rules() {
        let r = router(Picker::WeightPool);
        let mut inv = Invocation::new("orders", "rest");
        r.route(&HashMap::new(), None, &mut inv).unwrap();
        assert_eq!(inv.version.as_deref(), Some(LATEST_VERSION));
        assert_eq!(inv.app_id.as_deref(), Some(DEFAULT_APP));
    }

    #[test]
    fn test_route_app_defaults_to_source_app() {
        let r = router(Picker::WeightPool);
        r.store()
            .set_route_rule_by_key("orders", vec![header_rule(1, "user", "x", "1.0")])
            .unwrap();
        let source = SourceInfo::new("gateway").with_tag("app", "mall");
        let mut inv = Invocation::new("orders", "rest");
        r.route(&headers(&[("user", "x")]), Some(&source), &mut inv).unwrap();
        assert_eq!(inv.version.as_deref(), Some("1.0"));
        assert_eq!(inv.app_id.as_deref(), Some("mall"));
    }

    #[test]
    fn test_route_no_match_keeps_defaults() {
        let r = router(Picker::WeightPool);
        r.store()
            .set_route_rule_by_key("orders", vec![header_rule(1, "user", "jason", "vip")])
            .unwrap();
        let mut inv = Invocation::new("orders", "rest");
        r.route(&headers(&[("user", "tom")]), None, &mut inv).unwrap();
        assert_eq!(inv.version.as_deref(), Some(LATEST_VERSION));
        assert!(inv.route_tags.is_empty());
    }

    #[test]
    fn test_route_requires_service() {
        let r = router(Picker::WeightPool);
        let mut inv = Invocation::default();
        assert!(r.route(&HashMap::new(), None, &mut inv).is_err());
    }

    #[test]
    fn test_route_fit_rate_alternates() {
        let r = router(Picker::FitRate);
        r.store()
            .set_route_rule_by_key(
                "orders",
                vec![RouteRule {
                    precedence: 1,
                    routes: vec![tag("a", None, 50), tag("b", None, 50)],
                    matcher: Match::default(),
                }],
            )
            .unwrap();

        let versions: Vec<String> = (0..4)
            .map(|_| {
                let mut inv = Invocation::new("orders", "rest");
                r.route(&HashMap::new(), None, &mut inv).unwrap();
                inv.version.unwrap()
            })
            .collect();
        assert_eq!(versions, vec!["a", "b", "a", "b"]);
    }

    #[test]
    fn test_route_pool_rebuilt_after_change() {
        let r = router(Picker::WeightPool);
        let rule = |v: &str| RouteRule {
            precedence: 1,
            routes: vec![RouteTag::version(v, 100)],
            matcher: Match::default(),
        };
        r.store().set_route_rule_by_key("orders", vec![rule("1.0")]).unwrap();

        let mut inv = Invocation::new("orders", "rest");
        r.route(&HashMap::new(), None, &mut inv).unwrap();
        assert_eq!(inv.version.as_deref(), Some("1.0"));

        r.store().set_route_rule_by_key("orders", vec![rule("2.0")]).unwrap();
        let mut inv = Invocation::new("orders", "rest");
        r.route(&HashMap::new(), None, &mut inv).unwrap();
        assert_eq!(inv.version.as_deref(), Some("2.0"));
    }

    #[test]
    fn test_route_in_flight_stale_rules_do_not_poison_pool() {
        let r = router(Picker::WeightPool);
        let rule = |v: &str| RouteRule {
            precedence: 1,
            routes: vec![RouteTag::version(v, 100)],
            matcher: Match::default(),
        };
        r.store().set_route_rule_by_key("orders", vec![rule("1.0")]).unwrap();

        // a call reads the rules, then a change lands before it builds its pool
        let in_flight = r.store().snapshot("orders").unwrap();
        r.store().set_route_rule_by_key("orders", vec![rule("2.0")]).unwrap();
        let key = PoolKey::new("orders", 1);
        let pool = r.pools.get_or_build(&key, in_flight.generation, &in_flight.rules[0].routes);
        assert_eq!(pool.pick_at(0).tags["version"], "1.0");

        let mut inv = Invocation::new("orders", "rest");
        r.route(&HashMap::new(), None, &mut inv).unwrap();
        assert_eq!(inv.version.as_deref(), Some("2.0"));
    }

    #[test]
    fn test_route_concurrent_updates_settle_on_last_rules() {
        let r = router(Picker::WeightPool);
        let rule = |v: String| RouteRule {
            precedence: 1,
            routes: vec![RouteTag::version(v, 100)],
            matcher: Match::default(),
        };
        r.store()
            .set_route_rule_by_key("orders", vec![rule("0".to_string())])
            .unwrap();

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..500 {
                        let mut inv = Invocation::new("orders", "rest");
                        r.route(&HashMap::new(), None, &mut inv).unwrap();
                    }
                });
            }
            for i in 1..=200 {
                r.store()
                    .set_route_rule_by_key("orders", vec![rule(i.to_string())])
                    .unwrap();
            }
        });

        for _ in 0..10 {
            let mut inv = Invocation::new("orders", "rest");
            r.route(&HashMap::new(), None, &mut inv).unwrap();
            assert_eq!(inv.version.as_deref(), Some("200"));
        }
    }

    #[test]
    fn test_route_equal_precedence_rules_use_separate_pools() {
        let r = router(Picker::WeightPool);
        r.store()
            .set_route_rule_by_key(
                "orders",
                vec![
                    header_rule(1, "user", "jason", "j"),
                    header_rule(1, "user", "tom", "t"),
                ],
            )
            .unwrap();

        let mut inv = Invocation::new("orders", "rest");
        r.route(&headers(&[("user", "jason")]), None, &mut inv).unwrap();
        assert_eq!(inv.version.as_deref(), Some("j"));

        let mut inv = Invocation::new("orders", "rest");
        r.route(&headers(&[("user", "tom")]), None, &mut inv).unwrap();
        assert_eq!(inv.version.as_deref(), Some("t"));
    }
}
