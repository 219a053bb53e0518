//! Static discovery — instances registered in memory

use super::{Discovery, Instance};
use crate::error::{GovernanceError, Result};
use crate::invocation::LATEST_VERSION;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::HashMap;

/// In-memory registry answering discovery lookups
///
/// `latest` resolves to the highest version registered for the service and app.
#[derive(Default)]
pub struct StaticDiscovery {
    /// service name → instances
    instances: RwLock<HashMap<String, Vec<Instance>>>,
}

impl StaticDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an instance, replacing one with the same id
    pub fn register(&self, instance: Instance) -> Result<()> {
        if instance.id.is_empty() || instance.service_name.is_empty() {
            return Err(GovernanceError::Registration(
                "instance must have an id and a service name".to_string(),
            ));
        }
        let mut instances = self.instances.write();
        let list = instances.entry(instance.service_name.clone()).or_default();
        list.retain(|i| i.id != instance.id);
        tracing::debug!(service = %instance.service_name, id = %instance.id, "Instance registered");
        list.push(instance);
        Ok(())
    }

    /// Remove an instance by id
    pub fn deregister(&self, service: &str, id: &str) -> bool {
        let mut instances = self.instances.write();
        match instances.get_mut(service) {
            Some(list) => {
                let before = list.len();
                list.retain(|i| i.id != id);
                before != list.len()
            }
            None => false,
        }
    }

    /// All registered instances, keyed by service
    pub fn all(&self) -> HashMap<String, Vec<Instance>> {
        self.instances.read().clone()
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    async fn find_microservice_instances(
        &self,
        _consumer: &str,
        app: &str,
        service: &str,
        version: &str,
        environment: &str,
    ) -> Result<Vec<Instance>> {
        if service.is_empty() {
            return Err(GovernanceError::Discovery(
                "lookup without a service name".to_string(),
            ));
        }
        let instances = self.instances.read();
        let candidates: Vec<&Instance> = instances
            .get(service)
            .map(|list| {
                list.iter()
                    .filter(|i| i.app == app)
                    .filter(|i| environment.is_empty() || i.environment == environment)
                    .collect()
            })
            .unwrap_or_default();

        let wanted = if version == LATEST_VERSION {
            match candidates.iter().map(|i| i.version.as_str()).max_by(|a, b| compare_versions(a, b)) {
                Some(v) => v.to_string(),
                None => return Ok(Vec::new()),
            }
        } else {
            version.to_string()
        };

        Ok(candidates
            .into_iter()
            .filter(|i| i.version == wanted)
            .cloned()
            .collect())
    }
}

/// Compare dotted versions numerically, segment by segment
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            (Some(l), Some(r)) => {
                let ord = match (l.parse::<u64>(), r.parse::<u64>()) {
                    (Ok(l), Ok(r)) => l.cmp(&r),
                    _ => l.cmp(r),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}
