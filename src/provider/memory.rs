//! In-memory source — runtime overrides set programmatically

use super::{ConfigSource, ConfigValue, EventSink, MEMORY_SOURCE_PRIORITY};
use crate::error::Result;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Key/value overrides held in memory
pub struct MemorySource {
    name: String,
    priority: u32,
    values: RwLock<HashMap<String, ConfigValue>>,
    sink: RwLock<Option<EventSink>>,
}

impl MemorySource {
    /// Create the default `memory` source
    pub fn new() -> Self {
        Self::with_name("memory", MEMORY_SOURCE_PRIORITY)
    }

    /// Create a source with an explicit name and priority
    pub fn with_name(name: impl Into<String>, priority: u32) -> Self {
        Self {
            name: name.into(),
            priority,
            values: RwLock::new(HashMap::new()),
            sink: RwLock::new(None),
        }
    }

    /// Set a key and report it
    pub fn set(&self, key: impl Into<String>, value: impl Into<ConfigValue>) {
        let key = key.into();
        self.values.write().insert(key.clone(), value.into());
        self.notify(&key);
    }

    /// Remove a key and report it
    pub fn delete(&self, key: &str) {
        let removed = self.values.write().remove(key).is_some();
        if removed {
            self.notify(key);
        }
    }

    fn notify(&self, key: &str) {
        if let Some(sink) = self.sink.read().as_ref() {
            sink.notify(key);
        }
    }
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn get_configs(&self) -> HashMap<String, ConfigValue> {
        self.values.read().clone()
    }

    fn watch(&self, sink: EventSink) -> Result<()> {
        *self.sink.write() = Some(sink);
        Ok(())
    }
}
