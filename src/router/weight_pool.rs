//! Weight pool — O(1) weighted random selection of route tags
//!
//! A pool expands a rule's routes into a 100-slot table where each tag owns
//! `weight` contiguous slots. Slots left over are owned by a synthetic
//! `version: latest` tag. Pools are immutable; a rule change drops them from
//! the registry and the next pick rebuilds from the current routes.

use super::rule::RouteTag;
use crate::invocation::{LATEST_VERSION, TAG_VERSION};
use parking_lot::RwLock;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;

/// Number of slots in every pool
pub const POOL_SIZE: usize = 100;

/// Precomputed selection table for one rule
#[derive(Debug, Clone)]
pub struct WeightPool {
    tags: Vec<RouteTag>,
    /// slot → index into `tags`
    slots: Vec<usize>,
}

impl WeightPool {
    /// Build a pool from routes, in order
    pub fn new(routes: &[RouteTag]) -> Self {
        let mut tags = Vec::with_capacity(routes.len() + 1);
        let mut slots = Vec::with_capacity(POOL_SIZE);

        for route in routes {
            let free = POOL_SIZE - slots.len();
            let claim = (route.weight as usize).min(free);
            if claim == 0 {
                continue;
            }
            tags.push(route.clone());
            let idx = tags.len() - 1;
            slots.extend(std::iter::repeat(idx).take(claim));
        }

        if slots.len() < POOL_SIZE {
            let latest = RouteTag::version(LATEST_VERSION, (POOL_SIZE - slots.len()) as u32);
            tags.push(latest);
            let idx = tags.len() - 1;
            slots.resize(POOL_SIZE, idx);
        }

        Self { tags, slots }
    }

    /// Draw one tag uniformly over the slots
    pub fn pick_one(&self) -> &RouteTag {
        let slot = rand::thread_rng().gen_range(0..POOL_SIZE);
        self.pick_at(slot)
    }

    /// Tag owning `slot` (taken modulo the pool size)
    pub fn pick_at(&self, slot: usize) -> &RouteTag {
        &self.tags[self.slots[slot % POOL_SIZE]]
    }

    /// Distinct tags in the pool, including the synthetic `latest` tag
    pub fn tags(&self) -> &[RouteTag] {
        &self.tags
    }
}

/// Identity of a pool: one per rule of a service
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    /// Destination service
    pub service: String,
    /// Rule precedence
    pub precedence: i32,
    /// Position among rules sharing the same precedence
    pub ordinal: usize,
}

impl PoolKey {
    /// Key of the first (or only) rule with this precedence
    pub fn new(service: impl Into<String>, precedence: i32) -> Self {
        Self {
            service: service.into(),
            precedence,
            ordinal: 0,
        }
    }
}

#[derive(Default)]
struct PoolTable {
    pools: HashMap<PoolKey, Arc<WeightPool>>,
    /// service → invalidation count
    generations: HashMap<String, u64>,
}

/// Registry of built pools
///
/// Every invalidation of a service bumps its generation. A pool built from
/// routes read under an older generation is handed back to its caller but
/// never cached.
#[derive(Default)]
pub struct WeightPoolRegistry {
    table: RwLock<PoolTable>,
}

impl WeightPoolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Current generation of a service's pools
    pub fn generation(&self, service: &str) -> u64 {
        self.table
            .read()
            .generations
            .get(service)
            .copied()
            .unwrap_or(0)
    }

    /// Cached pool for `key`
    pub fn get(&self, key: &PoolKey) -> Option<Arc<WeightPool>> {
        self.table.read().pools.get(key).cloned()
    }

    /// Store a pool
    pub fn set(&self, key: PoolKey, pool: Arc<WeightPool>) {
        self.table.write().pools.insert(key, pool);
    }

    /// Cached pool, or build one from `routes` read at `generation`
    pub fn get_or_build(&self, key: &PoolKey, generation: u64, routes: &[RouteTag]) -> Arc<WeightPool> {
        if let Some(pool) = self.get(key) {
            return pool;
        }
        let pool = Arc::new(WeightPool::new(routes));
        let mut table = self.table.write();
        let current = table.generations.get(&key.service).copied().unwrap_or(0);
        if current != generation {
            tracing::debug!(service = %key.service, generation, current, "Stale routes, pool not cached");
            return pool;
        }
        table.pools.entry(key.clone()).or_insert(pool).clone()
    }

    /// Invalidate one pool
    pub fn reset(&self, key: &PoolKey) {
        self.table.write().pools.remove(key);
    }

    /// Invalidate every pool of a service and advance its generation
    pub fn reset_service(&self, service: &str) -> usize {
        let mut table = self.table.write();
        *table.generations.entry(service.to_string()).or_insert(0) += 1;
        let before = table.pools.len();
        table.pools.retain(|k, _| k.service != service);
        let removed = before - table.pools.len();
        if removed > 0 {
            tracing::debug!(service, removed, "Weight pools invalidated");
        }
        removed
    }

    /// Number of cached pools
    pub fn len(&self) -> usize {
        self.table.read().pools.len()
    }

    /// Whether no pool is cached
    pub fn is_empty(&self) -> bool {
        self.table.read().pools.is_empty()
    }
}

/// Version carried by a tag, if any
pub(crate) fn tag_version(tag: &RouteTag) -> Option<&str> {
    tag.tags.get(TAG_VERSION).map(String::as_str)
}
