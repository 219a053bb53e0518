//! FitRate — deterministic fairness-over-time route picking
//!
//! Each call goes to the first tag whose served share (`count * 100 / total`)
//! is still at or below its configured weight. Over many calls the split
//! converges to the configured percentages; individual calls are not random.

use super::rule::RouteTag;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Per-destination invoke counters
///
/// Counters live until [`FitRateCounters::reset`]; their cardinality is the
/// number of distinct destinations and tags ever routed.
#[derive(Default)]
pub struct FitRateCounters {
    counts: Mutex<HashMap<String, u64>>,
}

impl FitRateCounters {
    /// Create empty counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick a route for `destination`
    ///
    /// Returns `None` when every tag is above its share, meaning the call
    /// belongs to the unallocated remainder.
    pub fn fit_rate<'a>(&self, routes: &'a [RouteTag], destination: &str) -> Option<&'a RouteTag> {
        let first = routes.first()?;
        if first.weight >= 100 {
            return Some(first);
        }

        let total_key = format!("{}-t", destination);
        let mut counts = self.counts.lock();

        let total = counts.get(&total_key).copied().unwrap_or(0);
        if total == 0 {
            counts.insert(tag_key(destination, first), 1);
            counts.insert(total_key, 1);
            return Some(first);
        }

        let chosen = routes.iter().find(|tag| {
            let served = counts.get(&tag_key(destination, tag)).copied().unwrap_or(0);
            served * 100 / total <= u64::from(tag.weight)
        });
        if let Some(tag) = chosen {
            *counts.entry(tag_key(destination, tag)).or_insert(0) += 1;
        }
        *counts.entry(total_key).or_insert(0) += 1;
        chosen
    }

    /// Calls routed to `tag` for `destination`
    pub fn count(&self, destination: &str, tag: &RouteTag) -> u64 {
        self.counts
            .lock()
            .get(&tag_key(destination, tag))
            .copied()
            .unwrap_or(0)
    }

    /// Drop the counters of one destination
    pub fn reset(&self, destination: &str) {
        let prefix = format!("{}-", destination);
        self.counts.lock().retain(|k, _| !k.starts_with(&prefix));
    }

    /// Drop all counters
    pub fn reset_all(&self) {
        self.counts.lock().clear();
    }
}

fn tag_key(destination: &str, tag: &RouteTag) -> String {
    format!("{}-{}", destination, tag.label())
}
