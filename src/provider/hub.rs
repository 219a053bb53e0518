//! Config hub — merges sources by priority and dispatches effective changes

use super::{ConfigEvent, ConfigSource, ConfigValue, EventListener, EventSink, EventType, KeyPattern};
use crate::error::{GovernanceError, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of config sources and listeners
#[derive(Default)]
pub struct ConfigHub {
    /// Sorted by ascending priority
    sources: RwLock<Vec<Arc<dyn ConfigSource>>>,
    listeners: RwLock<Vec<(KeyPattern, Arc<dyn EventListener>)>>,
    /// Last dispatched effective values
    ///
    /// Held across resolve and dispatch of a key, so refreshes apply in order.
    effective: Mutex<HashMap<String, ConfigValue>>,
}

impl ConfigHub {
    /// Create an empty hub
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add a source and dispatch the keys it makes effective
    pub fn add_source(self: &Arc<Self>, source: Arc<dyn ConfigSource>) -> Result<()> {
        let name = source.name().to_string();
        if name.is_empty() {
            return Err(GovernanceError::Registration(
                "config source must have a name".to_string(),
            ));
        }
        let duplicate = || {
            GovernanceError::Registration(format!("config source '{}' already added", name))
        };
        if self.sources.read().iter().any(|s| s.name() == name) {
            return Err(duplicate());
        }

        source.watch(EventSink::new(self))?;
        {
            let mut sources = self.sources.write();
            if sources.iter().any(|s| s.name() == name) {
                return Err(duplicate());
            }
            sources.push(source.clone());
            sources.sort_by_key(|s| s.priority());
        }
        tracing::info!(source = %name, priority = source.priority(), "Config source added");

        for key in source.get_configs().keys() {
            self.refresh_key(key);
        }
        Ok(())
    }

    /// Register a listener for keys selected by `pattern`
    ///
    /// Keys already effective are replayed to the new listener as `Create`.
    pub fn register_listener(&self, pattern: KeyPattern, listener: Arc<dyn EventListener>) {
        let effective = self.effective.lock();
        for (key, value) in effective.iter() {
            if pattern.matches(key) {
                listener.on_event(&ConfigEvent {
                    event_type: EventType::Create,
                    key: key.clone(),
                    value: Some(value.clone()),
                });
            }
        }
        tracing::debug!(pattern = ?pattern, "Config listener registered");
        self.listeners.write().push((pattern, listener));
    }

    /// Merged snapshot of all effective keys
    pub fn get_configs(&self) -> HashMap<String, ConfigValue> {
        self.effective.lock().clone()
    }

    /// Effective value of one key
    pub fn get(&self, key: &str) -> Option<ConfigValue> {
        self.effective.lock().get(key).cloned()
    }

    /// Names of added sources, highest priority first
    pub fn source_names(&self) -> Vec<String> {
        self.sources
            .read()
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    /// Re-resolve `key` across sources and dispatch if its effective value changed
    pub(crate) fn refresh_key(&self, key: &str) {
        let mut effective = self.effective.lock();
        let resolved = self
            .sources
            .read()
            .iter()
            .find_map(|s| s.get_configs().get(key).cloned());
        let previous = effective.get(key).cloned();

        let event_type = match (&previous, &resolved) {
            (None, None) => return,
            (None, Some(_)) => EventType::Create,
            (Some(_), None) => EventType::Delete,
            (Some(old), Some(new)) if old == new => return,
            (Some(_), Some(_)) => EventType::Update,
        };

        match &resolved {
            Some(value) => {
                effective.insert(key.to_string(), value.clone());
            }
            None => {
                effective.remove(key);
            }
        }

        let event = ConfigEvent {
            event_type,
            key: key.to_string(),
            value: resolved,
        };
        tracing::debug!(key, event = %event.event_type, "Config change");

        let listeners = self.listeners.read();
        for (pattern, listener) in listeners.iter() {
            if pattern.matches(key) {
                listener.on_event(&event);
            }
        }
    }
}
