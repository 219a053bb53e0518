//! Round-robin strategy over a shared monotonic index

use super::{Instance, LbContext, Selection, Strategy};
use crate::error::{GovernanceError, Result};
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Monotonic index shared by every strategy of one balancer
///
/// Starts from a random seed so that fresh processes do not all hit the
/// first instance.
#[derive(Debug)]
pub struct RoundRobinIndex {
    next: AtomicUsize,
}

impl RoundRobinIndex {
    /// Create an index with a random starting point
    pub fn new() -> Self {
        Self::starting_at(rand::thread_rng().gen_range(0..1024))
    }

    /// Create an index with a fixed starting point
    pub fn starting_at(start: usize) -> Self {
        Self {
            next: AtomicUsize::new(start),
        }
    }

    /// Next position in `0..len`; `len` must be non-zero
    pub fn next(&self, len: usize) -> usize {
        self.next.fetch_add(1, Ordering::Relaxed) % len
    }
}

impl Default for RoundRobinIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Cycles through the candidates
pub struct RoundRobin {
    index: Arc<RoundRobinIndex>,
    instances: Vec<Instance>,
}

impl RoundRobin {
    pub fn new(ctx: &LbContext) -> Self {
        Self {
            index: ctx.round_robin.clone(),
            instances: Vec::new(),
        }
    }
}

impl Strategy for RoundRobin {
    fn receive_data(&mut self, instances: Vec<Instance>, _selection: Selection) {
        self.instances = instances;
    }

    fn pick(&mut self) -> Result<Instance> {
        if self.instances.is_empty() {
            return Err(GovernanceError::NoneAvailableInstance);
        }
        let idx = self.index.next(self.instances.len());
        Ok(self.instances[idx].clone())
    }
}
