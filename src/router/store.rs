//! Route rule store — per-service rule lists with file bootstrap and governance overrides
//!
//! Each service moves through
//! `Unloaded → LoadedFromFile → OverriddenByGovernance → Updated → Removed`.
//! File rules are only a bootstrap default: once governance has spoken for a
//! service its rules win, and a governance delete removes the entry instead of
//! reverting to the file.

use super::rule::{validate_rules, Match, RouteRule};
use super::weight_pool::WeightPoolRegistry;
use crate::error::{GovernanceError, Result};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Where the current rules of a service came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RuleOrigin {
    /// Seeded from the local bootstrap file
    File,
    /// Set by a governance event or the admin API
    Governance,
}

/// Stored rules of one service
#[derive(Debug, Clone)]
struct RuleEntry {
    rules: Arc<Vec<RouteRule>>,
    origin: RuleOrigin,
}

/// Rules of one service paired with the pool generation they were read at
#[derive(Debug, Clone)]
pub struct RuleSnapshot {
    pub rules: Arc<Vec<RouteRule>>,
    pub generation: u64,
}

/// In-memory route rule table
///
/// Writers swap rules and invalidate pools under the same table lock, so a
/// [`RuleSnapshot`] never pairs new rules with an old generation or the reverse.
pub struct RouteRuleStore {
    rules: RwLock<HashMap<String, RuleEntry>>,
    templates: RwLock<Arc<HashMap<String, Match>>>,
    pools: Arc<WeightPoolRegistry>,
}

impl RouteRuleStore {
    /// Create an empty store invalidating `pools` on every change
    pub fn new(pools: Arc<WeightPoolRegistry>) -> Self {
        Self {
            rules: RwLock::new(HashMap::new()),
            templates: RwLock::new(Arc::new(HashMap::new())),
            pools,
        }
    }

    /// Seed rules and templates from the bootstrap file
    ///
    /// Every service is validated before anything is stored.
    pub fn seed(
        &self,
        rules: &HashMap<String, Vec<RouteRule>>,
        templates: &HashMap<String, Match>,
    ) -> Result<()> {
        for (service, list) in rules {
            validate_rules(service, list, templates).map_err(GovernanceError::Config)?;
        }

        *self.templates.write() = Arc::new(templates.clone());
        let mut table = self.rules.write();
        for (service, list) in rules {
            table.insert(
                service.clone(),
                RuleEntry {
                    rules: Arc::new(list.clone()),
                    origin: RuleOrigin::File,
                },
            );
            self.pools.reset_service(service);
            tracing::info!(service = %service, rules = list.len(), "Route rules loaded from file");
        }
        Ok(())
    }

    /// Rules of a service, if any
    pub fn fetch_route_rule_by_service_name(&self, service: &str) -> Option<Arc<Vec<RouteRule>>> {
        self.rules.read().get(service).map(|e| e.rules.clone())
    }

    /// Rules of a service with their pool generation, read atomically
    pub fn snapshot(&self, service: &str) -> Option<RuleSnapshot> {
        let table = self.rules.read();
        let entry = table.get(service)?;
        Some(RuleSnapshot {
            rules: entry.rules.clone(),
            generation: self.pools.generation(service),
        })
    }

    /// Origin of the current rules of a service
    pub fn origin(&self, service: &str) -> Option<RuleOrigin> {
        self.rules.read().get(service).map(|e| e.origin)
    }

    /// Validate and replace the rules of a service
    ///
    /// On failure the previous rules are kept.
    pub fn set_route_rule_by_key(&self, service: &str, rules: Vec<RouteRule>) -> Result<()> {
        let templates = self.templates();
        validate_rules(service, &rules, &templates).map_err(GovernanceError::Config)?;

        let count = rules.len();
        let mut table = self.rules.write();
        table.insert(
            service.to_string(),
            RuleEntry {
                rules: Arc::new(rules),
                origin: RuleOrigin::Governance,
            },
        );
        self.pools.reset_service(service);
        drop(table);
        tracing::info!(service, rules = count, "Route rules replaced");
        Ok(())
    }

    /// Remove the rules of a service regardless of origin
    pub fn delete_route_rule_by_key(&self, service: &str) -> bool {
        let mut table = self.rules.write();
        let removed = table.remove(service).is_some();
        if removed {
            self.pools.reset_service(service);
            drop(table);
            tracing::info!(service, "Route rules removed");
        }
        removed
    }

    /// Remove the rules of a service only if governance set them
    pub fn delete_governed(&self, service: &str) -> bool {
        let mut table = self.rules.write();
        if table.get(service).map(|e| e.origin) != Some(RuleOrigin::Governance) {
            tracing::debug!(service, "No governance rules to remove");
            return false;
        }
        table.remove(service);
        self.pools.reset_service(service);
        drop(table);
        tracing::info!(service, "Governance route rules removed");
        true
    }

    /// Snapshot of the whole table
    pub fn list_route_rule(&self) -> HashMap<String, Vec<RouteRule>> {
        self.rules
            .read()
            .iter()
            .map(|(k, e)| (k.clone(), e.rules.as_ref().clone()))
            .collect()
    }

    /// Current source templates
    pub fn templates(&self) -> Arc<HashMap<String, Match>> {
        self.templates.read().clone()
    }

    /// Add or replace a source template
    pub fn set_template(&self, name: impl Into<String>, template: Match) -> Result<()> {
        super::rule::validate_match(&template).map_err(GovernanceError::Config)?;
        let mut guard = self.templates.write();
        let mut next = guard.as_ref().clone();
        next.insert(name.into(), template);
        *guard = Arc::new(next);
        Ok(())
    }

    /// Number of services with rules
    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    /// Whether no service has rules
    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }
}
