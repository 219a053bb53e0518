//! Latency statistics — sliding windows of call latency per instance address
//!
//! Samples are appended on every completed call. A periodic task averages each
//! window and sorts the addresses of every `(service, tags, protocol)` group,
//! fastest first. Readers only ever see the last completed sort.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Samples kept per key
pub const MAX_SAMPLES: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GroupKey {
    service: String,
    tags: String,
    protocol: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SampleKey {
    addr: String,
    group: GroupKey,
}

/// Average latency of one instance address
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtocolStats {
    pub addr: String,
    pub avg_latency: Duration,
    pub samples: usize,
}

/// One sorted group as exposed to introspection
#[derive(Debug, Clone, Serialize)]
pub struct LatencyGroup {
    pub service: String,
    pub tags: String,
    pub protocol: String,
    pub stats: Vec<ProtocolStats>,
}

/// Collector of latency samples and their sorted averages
#[derive(Default)]
pub struct LatencyCollector {
    samples: Mutex<HashMap<SampleKey, VecDeque<Duration>>>,
    sorted: RwLock<HashMap<GroupKey, Arc<Vec<ProtocolStats>>>>,
}

impl LatencyCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one latency sample, dropping the oldest once the window is full
    pub fn set_latency(&self, latency: Duration, addr: &str, service: &str, tags: &str, protocol: &str) {
        let key = SampleKey {
            addr: addr.to_string(),
            group: GroupKey {
                service: service.to_string(),
                tags: tags.to_string(),
                protocol: protocol.to_string(),
            },
        };
        let mut samples = self.samples.lock();
        let window = samples.entry(key).or_default();
        if window.len() >= MAX_SAMPLES {
            window.pop_front();
        }
        window.push_back(latency);
    }

    /// Recompute every average and publish the new sort
    pub fn recompute(&self) {
        let mut groups: HashMap<GroupKey, Vec<ProtocolStats>> = HashMap::new();
        {
            let samples = self.samples.lock();
            for (key, window) in samples.iter() {
                if window.is_empty() {
                    continue;
                }
                let total: Duration = window.iter().sum();
                groups.entry(key.group.clone()).or_default().push(ProtocolStats {
                    addr: key.addr.clone(),
                    avg_latency: total / window.len() as u32,
                    samples: window.len(),
                });
            }
        }

        let sorted = groups
            .into_iter()
            .map(|(group, mut stats)| {
                stats.sort_by(|a, b| a.avg_latency.cmp(&b.avg_latency).then_with(|| a.addr.cmp(&b.addr)));
                (group, Arc::new(stats))
            })
            .collect::<HashMap<_, _>>();

        tracing::debug!(groups = sorted.len(), "Latency statistics recomputed");
        *self.sorted.write() = sorted;
    }

    /// Last published sort for a group, fastest first
    pub fn sorted_stats(&self, service: &str, tags: &str, protocol: &str) -> Option<Arc<Vec<ProtocolStats>>> {
        let key = GroupKey {
            service: service.to_string(),
            tags: tags.to_string(),
            protocol: protocol.to_string(),
        };
        self.sorted.read().get(&key).cloned()
    }

    /// All published groups, ordered by service, tags and protocol
    pub fn snapshot(&self) -> Vec<LatencyGroup> {
        let mut groups: Vec<LatencyGroup> = self
            .sorted
            .read()
            .iter()
            .map(|(key, stats)| LatencyGroup {
                service: key.service.clone(),
                tags: key.tags.clone(),
                protocol: key.protocol.clone(),
                stats: stats.as_ref().clone(),
            })
            .collect();
        groups.sort_by(|a, b| (&a.service, &a.tags, &a.protocol).cmp(&(&b.service, &b.tags, &b.protocol)));
        groups
    }

    /// Spawn the periodic recompute task
    pub fn spawn_recompute(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let collector = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                collector.recompute();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_average_and_sort() {
        let c = LatencyCollector::new();
        c.set_latency(ms(30), "10.0.0.1:80", "orders", "1.0|default", "rest");
        c.set_latency(ms(10), "10.0.0.2:80", "orders", "1.0|default", "rest");
        c.set_latency(ms(20), "10.0.0.2:80", "orders", "1.0|default", "rest");

        assert!(c.sorted_stats("orders", "1.0|default", "rest").is_none());
        c.recompute();

        let stats = c.sorted_stats("orders", "1.0|default", "rest").unwrap();
        assert_eq!(stats[0].addr, "10.0.0.2:80");
        assert_eq!(stats[0].avg_latency, ms(15));
        assert_eq!(stats[1].avg_latency, ms(30));
    }

    #[test]
    fn test_window_keeps_latest_ten() {
        let c = LatencyCollector::new();
        // first sample is an outlier that must fall out of the window
        c.set_latency(ms(1000), "a", "orders", "", "rest");
        for _ in 0..10 {
            c.set_latency(ms(10), "a", "orders", "", "rest");
        }
        c.recompute();
        let stats = c.sorted_stats("orders", "", "rest").unwrap();
        assert_eq!(stats[0].samples, MAX_SAMPLES);
        assert_eq!(stats[0].avg_latency, ms(10));
    }

    #[test]
    fn test_groups_are_separate() {
        let c = LatencyCollector::new();
        c.set_latency(ms(5), "a", "orders", "", "rest");
        c.set_latency(ms(5), "a", "orders", "", "grpc");
        c.set_latency(ms(5), "a", "carts", "", "rest");
        c.recompute();
        assert_eq!(c.snapshot().len(), 3);
        assert_eq!(c.sorted_stats("orders", "", "rest").unwrap().len(), 1);
    }

    #[test]
    fn test_readers_see_last_recompute_only() {
        let c = LatencyCollector::new();
        c.set_latency(ms(50), "a", "orders", "", "rest");
        c.recompute();
        c.set_latency(ms(1), "b", "orders", "", "rest");
        assert_eq!(c.sorted_stats("orders", "", "rest").unwrap().len(), 1);
        c.recompute();
        assert_eq!(c.sorted_stats("orders", "", "rest").unwrap()[0].addr, "b");
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_recompute() {
        let c = Arc::new(LatencyCollector::new());
        c.set_latency(ms(5), "a", "orders", "", "rest");
        let handle = c.spawn_recompute(Duration::from_secs(30));

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(c.sorted_stats("orders", "", "rest").is_some());
        handle.abort();
    }
}
