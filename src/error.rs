//! Centralized error types for A3S Traffic

use thiserror::Error;

/// Traffic governance error types
#[derive(Debug, Error)]
pub enum GovernanceError {
    /// Invalid or rejected configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML (de)serialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A strategy was asked to pick from an empty instance list
    #[error("none available instance")]
    NoneAvailableInstance,

    /// Load balancing failed for a specific destination
    #[error(transparent)]
    LoadBalance(#[from] LbError),

    /// Strategy name not present in the registry
    #[error("unknown load balancing strategy: {0}")]
    UnknownStrategy(String),

    /// Filter name not present in the registry
    #[error("unknown instance filter: {0}")]
    UnknownFilter(String),

    /// Invalid registration of a strategy, filter or config source
    #[error("Registration error: {0}")]
    Registration(String),

    /// Service discovery failed
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Invocation could not be routed
    #[error("Route error: {0}")]
    Route(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// No instance remained for a destination after discovery and filtering
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no available instance for app={app} service={service} version={version}: {message}")]
pub struct LbError {
    /// Application the destination belongs to
    pub app: String,
    /// Destination service name
    pub service: String,
    /// Destination version
    pub version: String,
    /// What went wrong
    pub message: String,
}

/// Convenience Result type alias
pub type Result<T> = std::result::Result<T, GovernanceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lb_error_display() {
        let err = LbError {
            app: "sockshop".into(),
            service: "orders".into(),
            version: "0.0.1".into(),
            message: "zero instances after filtering".into(),
        };
        let msg = GovernanceError::from(err).to_string();
        assert!(msg.contains("app=sockshop"));
        assert!(msg.contains("service=orders"));
        assert!(msg.contains("version=0.0.1"));
    }

    #[test]
    fn test_yaml_error_conversion() {
        let err = serde_yaml::from_str::<Vec<u32>>("{not: a list}").unwrap_err();
        let err: GovernanceError = err.into();
        assert!(matches!(err, GovernanceError::Yaml(_)));
    }
}
