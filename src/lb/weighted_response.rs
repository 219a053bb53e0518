//! Weighted response strategy — latency-aware with a round-robin share

use super::latency::LatencyCollector;
use super::round_robin::RoundRobinIndex;
use super::{Instance, LbContext, Selection, Strategy};
use crate::error::{GovernanceError, Result};
use rand::Rng;
use std::sync::Arc;

/// Share of calls sent to the fastest instance
pub const FASTEST_RATIO: f64 = 0.7;

/// Prefers the lowest-average-latency instance, round-robin otherwise
///
/// Keeping a share on round-robin lets slower instances keep producing
/// fresh samples.
pub struct WeightedResponse {
    index: Arc<RoundRobinIndex>,
    latency: Arc<LatencyCollector>,
    ratio: f64,
    instances: Vec<Instance>,
    selection: Selection,
}

impl WeightedResponse {
    pub fn new(ctx: &LbContext) -> Self {
        Self::with_ratio(ctx, FASTEST_RATIO)
    }

    /// Use a custom probability of picking the fastest instance
    pub fn with_ratio(ctx: &LbContext, ratio: f64) -> Self {
        Self {
            index: ctx.round_robin.clone(),
            latency: ctx.latency.clone(),
            ratio: ratio.clamp(0.0, 1.0),
            instances: Vec::new(),
            selection: Selection::default(),
        }
    }

    fn fastest(&self) -> Option<&Instance> {
        let stats = self.latency.sorted_stats(
            &self.selection.service_name,
            &self.selection.tags,
            &self.selection.protocol,
        )?;
        let best = stats.first()?;
        self.instances
            .iter()
            .find(|i| i.endpoint(&self.selection.protocol) == Some(best.addr.as_str()))
    }
}

impl Strategy for WeightedResponse {
    fn receive_data(&mut self, instances: Vec<Instance>, selection: Selection) {
        self.instances = instances;
        self.selection = selection;
    }

    fn pick(&mut self) -> Result<Instance> {
        if self.instances.is_empty() {
            return Err(GovernanceError::NoneAvailableInstance);
        }
        if rand::thread_rng().gen_bool(self.ratio) {
            if let Some(instance) = self.fastest() {
                return Ok(instance.clone());
            }
        }
        Ok(self.instances[self.index.next(self.instances.len())].clone())
    }
}
