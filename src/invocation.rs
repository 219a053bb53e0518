//! Invocation — the logical call being routed and balanced

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// App used when neither the route tag nor the caller names one
pub const DEFAULT_APP: &str = "default";

/// Version sentinel meaning "whatever is newest"
pub const LATEST_VERSION: &str = "latest";

/// Tag key carrying the destination version
pub const TAG_VERSION: &str = "version";

/// Tag key carrying the destination application
pub const TAG_APP: &str = "app";

/// Legacy alias of [`TAG_APP`]
pub const TAG_PROJECT: &str = "project";

/// Identity of the calling service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    /// Caller service name
    pub name: String,
    /// Caller tags (`version`, `app`, ...)
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

impl SourceInfo {
    /// Create a source with no tags
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: HashMap::new(),
        }
    }

    /// Add a tag
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// The caller's own app tag
    pub fn app(&self) -> Option<&str> {
        self.tags
            .get(TAG_APP)
            .or_else(|| self.tags.get(TAG_PROJECT))
            .map(String::as_str)
            .filter(|a| !a.is_empty())
    }
}

/// A single outbound call
///
/// `Router::route` fills in `version`, `app_id` and `route_tags`;
/// `LoadBalancer::build_strategy` reads them back to resolve instances.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    /// Calling service (consumer)
    pub source_service: String,
    /// Destination service
    pub microservice_name: String,
    /// Destination version, set by routing
    pub version: Option<String>,
    /// Destination app, set by routing
    pub app_id: Option<String>,
    /// Full tag set of the chosen route
    pub route_tags: HashMap<String, String>,
    /// Transport protocol (`rest`, `grpc`, ...)
    pub protocol: String,
    /// Explicit strategy override for this call
    pub strategy: Option<String>,
    /// Session identifier for sticky balancing
    pub session_id: Option<String>,
}

impl Invocation {
    /// Create an invocation for a destination service
    pub fn new(microservice_name: impl Into<String>, protocol: impl Into<String>) -> Self {
        Self {
            microservice_name: microservice_name.into(),
            protocol: protocol.into(),
            ..Default::default()
        }
    }

    /// Version to resolve, `latest` when routing set none
    pub fn version_or_latest(&self) -> &str {
        self.version.as_deref().unwrap_or(LATEST_VERSION)
    }

    /// App to resolve, the global default when routing set none
    pub fn app_or_default(&self) -> &str {
        self.app_id.as_deref().unwrap_or(DEFAULT_APP)
    }

    /// Key identifying the routed variant in latency statistics
    pub fn tags_key(&self) -> String {
        format!("{}|{}", self.version_or_latest(), self.app_or_default())
    }
}
