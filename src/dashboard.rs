//! Dashboard API — debug endpoints dumping rules, instances and latency as JSON

use crate::governor::Governor;
use crate::lb::{Instance, LatencyGroup};
use crate::router::{sort_rules, RouteRule, RuleOrigin};
use crate::{GovernorState, StatusSnapshot};
use serde::Serialize;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// Rule table entry of one destination service
#[derive(Debug, Clone, Serialize)]
pub struct RouteInfo {
    pub service: String,
    pub origin: Option<RuleOrigin>,
    /// Rules in evaluation order
    pub rules: Vec<RouteRule>,
}

/// Last candidates selected for one service
#[derive(Debug, Clone, Serialize)]
pub struct InstanceInfo {
    pub service: String,
    pub instances: Vec<Instance>,
}

/// Crate version information plus governor status
#[derive(Debug, Clone, Serialize)]
pub struct VersionInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub state: GovernorState,
    pub uptime_secs: u64,
}

impl VersionInfo {
    pub(crate) fn current(status: &StatusSnapshot) -> Self {
        Self {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            state: status.state,
            uptime_secs: status.uptime_secs,
        }
    }
}

/// Rule table sorted by service, rules in evaluation order
pub fn routes_snapshot(governor: &Governor) -> Vec<RouteInfo> {
    let store = governor.store();
    let mut routes: Vec<RouteInfo> = store
        .list_route_rule()
        .into_iter()
        .map(|(service, mut rules)| {
            sort_rules(&mut rules);
            RouteInfo {
                origin: store.origin(&service),
                service,
                rules,
            }
        })
        .collect();
    routes.sort_by(|a, b| a.service.cmp(&b.service));
    routes
}

// ---------------------------------------------------------------------------
// Dashboard API handler
// ---------------------------------------------------------------------------

/// Serves the governance state as JSON
pub struct DashboardApi {
    /// Path prefix for the dashboard
    pub path_prefix: String,
}

impl DashboardApi {
    /// Create a new dashboard API
    pub fn new(path_prefix: impl Into<String>) -> Self {
        Self {
            path_prefix: path_prefix.into(),
        }
    }

    /// Check if a request path matches the dashboard
    pub fn matches(&self, path: &str) -> bool {
        path.starts_with(&self.path_prefix)
    }

    /// Handle a dashboard API request
    pub fn handle(&self, path: &str, governor: &Governor) -> Option<DashboardResponse> {
        let sub_path = path.strip_prefix(&self.path_prefix)?;

        match sub_path {
            "/routes" | "/routes/" => Some(DashboardResponse::ok(&routes_snapshot(governor))),
            "/instances" | "/instances/" => {
                let mut instances: Vec<InstanceInfo> = governor
                    .balancer()
                    .last_instances()
                    .into_iter()
                    .map(|(service, instances)| InstanceInfo { service, instances })
                    .collect();
                instances.sort_by(|a, b| a.service.cmp(&b.service));
                Some(DashboardResponse::ok(&instances))
            }
            "/latency" | "/latency/" => {
                let groups: Vec<LatencyGroup> = governor.balancer().context().latency.snapshot();
                Some(DashboardResponse::ok(&groups))
            }
            "/version" | "/version/" => {
                Some(DashboardResponse::ok(&VersionInfo::current(&governor.status())))
            }
            s if s.starts_with("/routes/") => {
                let name = s["/routes/".len()..].trim_end_matches('/');
                match routes_snapshot(governor).into_iter().find(|r| r.service == name) {
                    Some(route) => Some(DashboardResponse::ok(&route)),
                    None => Some(DashboardResponse::not_found("Service has no route rules")),
                }
            }
            _ => Some(DashboardResponse::not_found("Not found")),
        }
    }
}

/// Response from the dashboard API
#[derive(Debug, Clone)]
pub struct DashboardResponse {
    /// HTTP status code
    pub status: u16,
    /// Content-Type header
    pub content_type: String,
    /// Response body
    pub body: String,
}

impl DashboardResponse {
    pub(crate) fn json(status: u16, body: String) -> Self {
        Self {
            status,
            content_type: "application/json".to_string(),
            body,
        }
    }

    pub(crate) fn ok<T: Serialize>(value: &T) -> Self {
        match serde_json::to_string_pretty(value) {
            Ok(body) => Self::json(200, body),
            Err(e) => {
                tracing::error!(error = %e, "Dashboard response serialization failed");
                Self::error(500, &e.to_string())
            }
        }
    }

    pub(crate) fn not_found(message: &str) -> Self {
        Self::error(404, message)
    }

    fn error(status: u16, message: &str) -> Self {
        Self::json(status, serde_json::json!({ "error": message }).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GovernanceConfig;
    use crate::invocation::Invocation;
    use crate::lb::StaticDiscovery;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    const CONFIG: &str = r#"
routeRule:
  orders:
    - precedence: 1
      route:
        - { tags: { version: "1.0" }, weight: 100 }
    - precedence: 9
      match: { headers: { user: { exact: jason } } }
      route:
        - { tags: { version: "2.0" }, weight: 100 }
"#;

    fn governor() -> Governor {
        let discovery = Arc::new(StaticDiscovery::new());
        discovery
            .register(Instance::new("o1", "orders", "1.0").with_endpoint("rest", "o1:80"))
            .unwrap();
        Governor::new(GovernanceConfig::from_yaml(CONFIG).unwrap(), discovery).unwrap()
    }

    fn api() -> DashboardApi {
        DashboardApi::new("/debug")
    }

    fn body(resp: &DashboardResponse) -> serde_json::Value {
        serde_json::from_str(&resp.body).unwrap()
    }

    #[test]
    fn test_dashboard_matches() {
        let api = api();
        assert!(api.matches("/debug/routes"));
        assert!(!api.matches("/api/routes"));
        assert!(api.handle("/api/routes", &governor()).is_none());
    }

    #[test]
    fn test_dashboard_routes_sorted_by_precedence() {
        let resp = api().handle("/debug/routes", &governor()).unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.content_type, "application/json");
        let json = body(&resp);
        assert_eq!(json[0]["service"], "orders");
        assert_eq!(json[0]["origin"], "file");
        assert_eq!(json[0]["rules"][0]["precedence"], 9);
        assert_eq!(json[0]["rules"][1]["precedence"], 1);
    }

    #[test]
    fn test_dashboard_route_by_service() {
        let gov = governor();
        let resp = api().handle("/debug/routes/orders/", &gov).unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(body(&resp)["rules"].as_array().unwrap().len(), 2);

        let resp = api().handle("/debug/routes/carts", &gov).unwrap();
        assert_eq!(resp.status, 404);
    }

    #[tokio::test]
    async fn test_dashboard_instances() {
        let gov = governor();
        let resp = api().handle("/debug/instances", &gov).unwrap();
        assert_eq!(body(&resp), serde_json::json!([]));

        let mut inv = Invocation::new("orders", "rest");
        gov.select(&HashMap::new(), &mut inv).await.unwrap();
        let resp = api().handle("/debug/instances", &gov).unwrap();
        let json = body(&resp);
        assert_eq!(json[0]["service"], "orders");
        assert_eq!(json[0]["instances"][0]["id"], "o1");
    }

    #[test]
    fn test_dashboard_latency() {
        let gov = governor();
        let latency = &gov.balancer().context().latency;
        latency.set_latency(Duration::from_millis(7), "o1:80", "orders", "1.0|default", "rest");
        latency.recompute();

        let resp = api().handle("/debug/latency", &gov).unwrap();
        let json = body(&resp);
        assert_eq!(json[0]["service"], "orders");
        assert_eq!(json[0]["stats"][0]["addr"], "o1:80");
    }

    #[test]
    fn test_dashboard_version() {
        let resp = api().handle("/debug/version", &governor()).unwrap();
        let json = body(&resp);
        assert_eq!(json["name"], env!("CARGO_PKG_NAME"));
        assert_eq!(json["state"], "created");
    }

    #[test]
    fn test_dashboard_not_found() {
        let resp = api().handle("/debug/unknown", &governor()).unwrap();
        assert_eq!(resp.status, 404);
        assert!(resp.body.contains("Not found"));
    }

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: serde::Serializer>(&self, _serializer: S) -> std::result::Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("boom"))
        }
    }

    #[test]
    fn test_serialization_failure_is_server_error() {
        let resp = DashboardResponse::ok(&Unserializable);
        assert_eq!(resp.status, 500);
        let body: serde_json::Value = serde_json::from_str(&resp.body).unwrap();
        assert!(body["error"].as_str().unwrap().contains("boom"));
    }
}
