//! Local service descriptor — identity of the calling process

use crate::invocation::{SourceInfo, TAG_APP, TAG_VERSION};
use crate::router::rule::scalar_string;
use serde::{Deserialize, Serialize};

/// Identity of the local microservice
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalServiceConfig {
    /// Service name, used as the discovery consumer and as the rule `source`
    #[serde(default)]
    pub name: String,

    /// Application the service belongs to
    #[serde(default)]
    pub app: String,

    /// Version of this process
    #[serde(default, deserialize_with = "scalar_string")]
    pub version: String,

    /// Discovery environment (empty = default)
    #[serde(default)]
    pub environment: String,
}

impl LocalServiceConfig {
    /// Caller identity presented to rule matching
    pub fn source_info(&self) -> SourceInfo {
        let mut info = SourceInfo::new(self.name.clone());
        if !self.app.is_empty() {
            info = info.with_tag(TAG_APP, self.app.clone());
        }
        if !self.version.is_empty() {
            info = info.with_tag(TAG_VERSION, self.version.clone());
        }
        info
    }
}
