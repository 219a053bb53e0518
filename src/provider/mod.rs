//! Config providers — prioritized key/value sources feeding change events
//!
//! Sources (in-memory overrides, watched files, remote config servers) hold
//! raw key/value pairs. The [`ConfigHub`] merges them by priority and turns
//! changes of the effective value into [`ConfigEvent`]s for registered
//! [`EventListener`]s.

pub mod file_watcher;
mod hub;
pub mod memory;

pub use file_watcher::FileSource;
pub use hub::ConfigHub;
pub use memory::MemorySource;

use crate::error::Result;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

/// Priority of in-memory overrides
pub const MEMORY_SOURCE_PRIORITY: u32 = 0;

/// Priority of local file sources
pub const FILE_SOURCE_PRIORITY: u32 = 4;

/// A raw configuration value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValue {
    /// Text, including JSON and YAML documents
    Text(String),
    /// Integer scalar
    Integer(i64),
    /// Boolean scalar
    Bool(bool),
}

impl ConfigValue {
    /// Text content, if this is a text value
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{}", s),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for ConfigValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<bool> for ConfigValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Kind of change to an effective key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Key appeared
    Create,
    /// Key changed value
    Update,
    /// Key disappeared
    Delete,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// A change of one effective key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEvent {
    /// What happened
    pub event_type: EventType,
    /// Affected key
    pub key: String,
    /// New value; `None` on delete
    pub value: Option<ConfigValue>,
}

/// Receiver of config events
pub trait EventListener: Send + Sync {
    /// Handle one event; runs on the thread that reported the change
    fn on_event(&self, event: &ConfigEvent);
}

/// Key filter used when registering a listener
#[derive(Debug, Clone)]
pub enum KeyPattern {
    /// Keys starting with this prefix
    Prefix(String),
    /// Keys matching this regex
    Regex(Regex),
}

impl KeyPattern {
    /// Compile a regex pattern
    pub fn regex(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(Self::Regex)
            .map_err(|e| crate::GovernanceError::Registration(format!("invalid key pattern: {}", e)))
    }

    /// Whether `key` is selected
    pub fn matches(&self, key: &str) -> bool {
        match self {
            Self::Prefix(prefix) => key.starts_with(prefix.as_str()),
            Self::Regex(re) => re.is_match(key),
        }
    }
}

/// A prioritized key/value source
pub trait ConfigSource: Send + Sync {
    /// Unique source name
    fn name(&self) -> &str;

    /// Lower value wins when several sources hold a key
    fn priority(&self) -> u32;

    /// Current raw key/value pairs
    fn get_configs(&self) -> HashMap<String, ConfigValue>;

    /// Start reporting key changes to `sink`
    fn watch(&self, sink: EventSink) -> Result<()>;
}

/// Channel through which a source reports changed keys to its hub
#[derive(Clone)]
pub struct EventSink {
    hub: Weak<ConfigHub>,
}

impl EventSink {
    pub(crate) fn new(hub: &Arc<ConfigHub>) -> Self {
        Self {
            hub: Arc::downgrade(hub),
        }
    }

    /// Report that `key` may have changed in the source
    ///
    /// Returns false once the hub is gone.
    pub fn notify(&self, key: &str) -> bool {
        match self.hub.upgrade() {
            Some(hub) => {
                hub.refresh_key(key);
                true
            }
            None => false,
        }
    }

    /// A sink connected to nothing
    pub fn detached() -> Self {
        Self { hub: Weak::new() }
    }
}
