//! File source — a YAML key/value file watched for hot reload
//!
//! Uses the `notify` crate for cross-platform file system events
//! (inotify on Linux, kqueue on macOS, ReadDirectoryChanges on Windows).
//!
//! ```yaml
//! servicecomb.routeRule.orders: |
//!   - precedence: 2
//!     route:
//!       - tags: { version: 0.0.1 }
//!         weight: 100
//! cse.darklaunch.policy.carts: '{"policyType":"RATE","ruleItems":[]}'
//! ```
//! Sequences and mappings are re-encoded as YAML text.

use super::{ConfigSource, ConfigValue, EventSink, FILE_SOURCE_PRIORITY};
use crate::error::{GovernanceError, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

/// Quiet period that coalesces bursts of file events into one reload
const DEBOUNCE_MS: u64 = 500;

/// Watched YAML file of configuration keys
pub struct FileSource {
    name: String,
    priority: u32,
    path: PathBuf,
    /// Last successfully parsed content
    values: Arc<RwLock<HashMap<String, ConfigValue>>>,
    reload_count: Arc<AtomicU64>,
    /// Set once the source is added to a hub
    sink: RwLock<Option<EventSink>>,
}

impl FileSource {
    /// Load `path`; fails if the file is missing or malformed
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let values = read_values(&path)?;
        Ok(Self {
            name: format!("file:{}", path.display()),
            priority: FILE_SOURCE_PRIORITY,
            path,
            values: Arc::new(RwLock::new(values)),
            reload_count: Arc::new(AtomicU64::new(0)),
            sink: RwLock::new(None),
        })
    }

    /// Override the priority
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Watched path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Successful reloads since creation
    pub fn reload_count(&self) -> u64 {
        self.reload_count.load(Ordering::Relaxed)
    }

    /// Re-read the file now, returning the keys whose value changed
    ///
    /// Changed keys are reported to the hub when the source is watched.
    /// A malformed file keeps the previous content.
    pub fn reload(&self) -> Result<Vec<String>> {
        let changed = reload_into(&self.path, &self.values, &self.reload_count)?;
        if let Some(sink) = self.sink.read().as_ref() {
            for key in &changed {
                sink.notify(key);
            }
        }
        Ok(changed)
    }
}

impl ConfigSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn get_configs(&self) -> HashMap<String, ConfigValue> {
        self.values.read().clone()
    }

    /// Spawns a background thread that reloads on file system events and
    /// reports changed keys through `sink`
    fn watch(&self, sink: EventSink) -> Result<()> {
        *self.sink.write() = Some(sink.clone());
        let (notify_tx, notify_rx) = mpsc::channel();

        let mut watcher: RecommendedWatcher = Watcher::new(notify_tx, notify::Config::default())
            .map_err(|e| GovernanceError::Other(format!("Failed to create file watcher: {}", e)))?;

        // Watch the parent directory so editors that replace the file are seen
        let watch_path = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        watcher
            .watch(watch_path, RecursiveMode::NonRecursive)
            .map_err(|e| {
                GovernanceError::Other(format!("Failed to watch {}: {}", watch_path.display(), e))
            })?;

        let path = self.path.clone();
        let values = self.values.clone();
        let reload_count = self.reload_count.clone();

        std::thread::spawn(move || {
            let _watcher = watcher; // Keep watcher alive
            loop {
                match notify_rx.recv() {
                    Ok(Ok(event)) => {
                        if !is_relevant_event(&event, &path) {
                            continue;
                        }
                        // Drain the burst before reading the file once
                        while notify_rx
                            .recv_timeout(Duration::from_millis(DEBOUNCE_MS))
                            .is_ok()
                        {}

                        tracing::info!(path = %path.display(), "Config file change detected, reloading");
                        match reload_into(&path, &values, &reload_count) {
                            Ok(changed) => {
                                for key in &changed {
                                    if !sink.notify(key) {
                                        tracing::debug!("Config hub dropped, stopping file watcher");
                                        return;
                                    }
                                }
                                tracing::info!(changed = changed.len(), "Config file reloaded");
                            }
                            Err(e) => {
                                tracing::error!(
                                    error = %e,
                                    path = %path.display(),
                                    "Config file reload failed, keeping previous content"
                                );
                            }
                        }
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "File watcher error");
                    }
                    Err(_) => break,
                }
            }
        });

        Ok(())
    }
}

fn reload_into(
    path: &Path,
    values: &RwLock<HashMap<String, ConfigValue>>,
    reload_count: &AtomicU64,
) -> Result<Vec<String>> {
    let next = read_values(path)?;
    let mut current = values.write();

    let mut changed: Vec<String> = next
        .iter()
        .filter(|(k, v)| current.get(*k) != Some(*v))
        .map(|(k, _)| k.clone())
        .collect();
    changed.extend(current.keys().filter(|k| !next.contains_key(*k)).cloned());

    *current = next;
    reload_count.fetch_add(1, Ordering::Relaxed);
    Ok(changed)
}

fn read_values(path: &Path) -> Result<HashMap<String, ConfigValue>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        GovernanceError::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    parse_values(&content)
}

/// Flatten a YAML document of `key: value` pairs
pub fn parse_values(content: &str) -> Result<HashMap<String, ConfigValue>> {
    if content.trim().is_empty() {
        return Ok(HashMap::new());
    }
    let raw: HashMap<String, serde_yaml::Value> = serde_yaml::from_str(content)?;
    raw.into_iter()
        .map(|(k, v)| Ok((k, to_config_value(v)?)))
        .collect()
}

fn to_config_value(value: serde_yaml::Value) -> Result<ConfigValue> {
    use serde_yaml::Value;
    Ok(match value {
        Value::String(s) => ConfigValue::Text(s),
        Value::Bool(b) => ConfigValue::Bool(b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => ConfigValue::Integer(i),
            None => ConfigValue::Text(n.to_string()),
        },
        Value::Null => ConfigValue::Text(String::new()),
        other => ConfigValue::Text(serde_yaml::to_string(&other)?),
    })
}

/// Check if a file system event touches the watched file
fn is_relevant_event(event: &Event, path: &Path) -> bool {
    let kind_ok = matches!(
        event.kind,
        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
    );
    let file_name = path.file_name();
    kind_ok
        && (event.paths.is_empty()
            || event.paths.iter().any(|p| p.file_name() == file_name))
}
