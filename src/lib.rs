//! # A3S Traffic
//!
//! Client-side traffic governance for microservice calls: decides which
//! version of a destination service a call goes to, then which instance
//! of that version serves it.
//!
//! ## Architecture
//!
//! ```text
//! Invocation → Router (route rules, dark launch) → Discovery → Filters → Strategy → Instance
//!                  ↑                                                        ↑
//!        ConfigHub (file + governance keys)                   LatencyCollector (recompute task)
//! ```
//!
//! ## Core Features
//!
//! - **Route rules**: precedence-ordered rules with header, source and template matching
//! - **Dark launch**: legacy `RULE`/`RATE` policies translated into route rules
//! - **Traffic split**: 100-slot weight pools or the FitRate fairness picker
//! - **Hot reload**: governance keys override file rules per service at runtime
//! - **Load balancing**: round-robin, random, session stickiness, latency-aware
//! - **Zone affinity**: same zone, then same region, then anywhere
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use a3s_traffic::{config::GovernanceConfig, lb::StaticDiscovery, Governor, Invocation};
//! use std::{collections::HashMap, sync::Arc};
//!
//! #[tokio::main]
//! async fn main() -> a3s_traffic::Result<()> {
//!     let config = GovernanceConfig::from_file("traffic.yaml").await?;
//!     let governor = Governor::new(config, Arc::new(StaticDiscovery::new()))?;
//!     governor.start().await?;
//!
//!     let mut call = Invocation::new("orders", "rest");
//!     let instance = governor.select(&HashMap::new(), &mut call).await?;
//!     println!("{} -> {:?}", call.version_or_latest(), instance.endpoint("rest"));
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dashboard;
pub mod error;
pub mod governor;
pub mod invocation;
pub mod lb;
pub mod provider;
pub mod router;

// Re-export main types
pub use error::{GovernanceError, LbError, Result};
pub use governor::Governor;
pub use invocation::{Invocation, SourceInfo};
pub use lb::{Discovery, Instance, Strategy};
pub use router::{RouteRule, RouteTag, Router};

use serde::{Deserialize, Serialize};

/// Governor runtime state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GovernorState {
    /// Built from configuration, background tasks not started
    #[default]
    Created,
    /// Latency recompute task running
    Running,
    /// Background tasks stopped
    Stopped,
}

impl std::fmt::Display for GovernorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Governor status snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Current governor state
    pub state: GovernorState,
    /// Seconds since the governor was created
    pub uptime_secs: u64,
    /// Services currently holding route rules
    pub services_with_rules: usize,
    /// Config sources, highest priority first
    pub config_sources: Vec<String>,
}
