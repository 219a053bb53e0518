//! Session stickiness — repeat calls of one session go to the same instance
//!
//! Bindings live in a [`SessionStore`] shared by every strategy of a balancer.
//! The store also counts successive failures per instance; a bound instance
//! whose count reached the configured threshold is treated as stale and the
//! session is re-bound through round-robin.

use super::round_robin::RoundRobinIndex;
use super::{Instance, LbContext, Selection, Strategy};
use crate::config::LoadBalancerConfig;
use crate::error::{GovernanceError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

struct SessionBinding {
    instance_id: String,
    last_access: Instant,
}

/// Session → instance bindings plus per-instance failure counters
pub struct SessionStore {
    ttl: Duration,
    max_sessions: usize,
    failure_threshold: u32,
    sessions: Mutex<HashMap<String, SessionBinding>>,
    failures: Mutex<HashMap<String, u32>>,
}

impl SessionStore {
    pub fn new(ttl: Duration, max_sessions: usize, failure_threshold: u32) -> Self {
        Self {
            ttl,
            max_sessions: max_sessions.max(1),
            failure_threshold,
            sessions: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Build from load balancer settings
    pub fn from_config(config: &LoadBalancerConfig) -> Self {
        Self::new(
            config.session_timeout(),
            config.max_sessions,
            config.successive_failed_times,
        )
    }

    /// Instance bound to `session_id`, refreshing its access time
    pub fn get(&self, session_id: &str) -> Option<String> {
        let mut sessions = self.sessions.lock();
        if let Some(binding) = sessions.get_mut(session_id) {
            if binding.last_access.elapsed() < self.ttl {
                binding.last_access = Instant::now();
                return Some(binding.instance_id.clone());
            }
            sessions.remove(session_id);
        }
        None
    }

    /// Bind `session_id` to `instance_id`, evicting the oldest binding when full
    pub fn bind(&self, session_id: &str, instance_id: &str) {
        let mut sessions = self.sessions.lock();
        if sessions.len() >= self.max_sessions && !sessions.contains_key(session_id) {
            let now = Instant::now();
            let ttl = self.ttl;
            sessions.retain(|_, b| now.duration_since(b.last_access) < ttl);
            if sessions.len() >= self.max_sessions {
                if let Some(oldest) = sessions
                    .iter()
                    .min_by_key(|(_, b)| b.last_access)
                    .map(|(k, _)| k.clone())
                {
                    sessions.remove(&oldest);
                }
            }
        }
        sessions.insert(
            session_id.to_string(),
            SessionBinding {
                instance_id: instance_id.to_string(),
                last_access: Instant::now(),
            },
        );
    }

    /// Drop a binding
    pub fn unbind(&self, session_id: &str) -> bool {
        self.sessions.lock().remove(session_id).is_some()
    }

    /// Number of tracked sessions
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove expired bindings, returning how many were dropped
    pub fn evict_expired(&self) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        let now = Instant::now();
        sessions.retain(|_, b| now.duration_since(b.last_access) < self.ttl);
        before - sessions.len()
    }

    /// Spawn a task dropping expired bindings every `interval`
    pub fn spawn_sweep(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let dropped = store.evict_expired();
                if dropped > 0 {
                    tracing::debug!(dropped, remaining = store.len(), "Expired sessions evicted");
                }
            }
        })
    }

    /// Record a failed call, returning the new successive-failure count
    pub fn increment_failure(&self, instance_id: &str) -> u32 {
        let mut failures = self.failures.lock();
        let count = failures.entry(instance_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Record a successful call
    pub fn reset_failure(&self, instance_id: &str) {
        self.failures.lock().remove(instance_id);
    }

    /// Current successive-failure count
    pub fn failure_count(&self, instance_id: &str) -> u32 {
        self.failures.lock().get(instance_id).copied().unwrap_or(0)
    }

    /// Whether `instance_id` failed too many times in a row
    pub fn is_stale(&self, instance_id: &str) -> bool {
        self.failure_threshold > 0 && self.failure_count(instance_id) >= self.failure_threshold
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::from_config(&LoadBalancerConfig::default())
    }
}

/// Strategy keeping a session on its previously chosen instance
pub struct SessionStickiness {
    index: Arc<RoundRobinIndex>,
    store: Arc<SessionStore>,
    instances: Vec<Instance>,
    session_id: Option<String>,
}

impl SessionStickiness {
    pub fn new(ctx: &LbContext) -> Self {
        Self {
            index: ctx.round_robin.clone(),
            store: ctx.sessions.clone(),
            instances: Vec::new(),
            session_id: None,
        }
    }

    fn bound_instance(&self) -> Option<Instance> {
        let session_id = self.session_id.as_deref()?;
        let instance_id = self.store.get(session_id)?;
        if self.store.is_stale(&instance_id) {
            tracing::debug!(session = session_id, instance = %instance_id, "Sticky instance stale, re-binding");
            return None;
        }
        self.instances.iter().find(|i| i.id == instance_id).cloned()
    }
}

impl Strategy for SessionStickiness {
    fn receive_data(&mut self, instances: Vec<Instance>, selection: Selection) {
        self.instances = instances;
        self.session_id = selection.session_id.filter(|s| !s.is_empty());
    }

    fn pick(&mut self) -> Result<Instance> {
        if self.instances.is_empty() {
            return Err(GovernanceError::NoneAvailableInstance);
        }
        if let Some(instance) = self.bound_instance() {
            return Ok(instance);
        }

        let instance = self.instances[self.index.next(self.instances.len())].clone();
        let session_id = self
            .session_id
            .get_or_insert_with(|| uuid::Uuid::new_v4().to_string());
        self.store.bind(session_id, &instance.id);
        Ok(instance)
    }

    fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }
}
