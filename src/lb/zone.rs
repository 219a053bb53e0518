//! Zone affinity — prefer instances close to the local data center

use super::{DataCenterInfo, Filter, Instance};

/// Registered name of the zone affinity filter
pub const ZONE_AWARE: &str = "zoneaware";

/// Keeps same region+zone instances, else same region, else everything
#[derive(Debug, Clone, Default)]
pub struct ZoneAwareFilter {
    local: Option<DataCenterInfo>,
}

impl ZoneAwareFilter {
    pub fn new(local: Option<DataCenterInfo>) -> Self {
        Self { local }
    }
}

impl Filter for ZoneAwareFilter {
    fn name(&self) -> &str {
        ZONE_AWARE
    }

    fn apply(&self, instances: Vec<Instance>) -> Vec<Instance> {
        let Some(local) = self.local.as_ref() else {
            return instances;
        };

        let in_region = |i: &Instance| {
            i.data_center
                .as_ref()
                .map(|dc| dc.region == local.region)
                .unwrap_or(false)
        };
        let in_zone = |i: &Instance| {
            in_region(i)
                && i.data_center
                    .as_ref()
                    .map(|dc| dc.available_zone == local.available_zone)
                    .unwrap_or(false)
        };

        let same_zone: Vec<Instance> = instances.iter().filter(|i| in_zone(i)).cloned().collect();
        if !same_zone.is_empty() {
            return same_zone;
        }
        let same_region: Vec<Instance> = instances.iter().filter(|i| in_region(i)).cloned().collect();
        if !same_region.is_empty() {
            return same_region;
        }
        instances
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inst(id: &str, region: &str, zone: &str) -> Instance {
        Instance::new(id, "orders", "1.0").with_data_center(region, zone)
    }

    fn local() -> Option<DataCenterInfo> {
        Some(DataCenterInfo {
            name: "dc1".into(),
            region: "us-east".into(),
            available_zone: "us-east-1a".into(),
        })
    }

    fn ids(list: &[Instance]) -> Vec<&str> {
        list.iter().map(|i| i.id.as_str()).collect()
    }

    #[test]
    fn test_same_zone_preferred() {
        let f = ZoneAwareFilter::new(local());
        let out = f.apply(vec![
            inst("a", "us-east", "us-east-1a"),
            inst("b", "us-east", "us-east-1b"),
            inst("c", "eu-west", "eu-west-1a"),
        ]);
        assert_eq!(ids(&out), vec!["a"]);
    }

    #[test]
    fn test_falls_back_to_region() {
        let f = ZoneAwareFilter::new(local());
        let out = f.apply(vec![
            inst("b", "us-east", "us-east-1b"),
            inst("c", "eu-west", "eu-west-1a"),
        ]);
        assert_eq!(ids(&out), vec!["b"]);
    }

    #[test]
    fn test_falls_back_to_all() {
        let f = ZoneAwareFilter::new(local());
        let out = f.apply(vec![
            inst("c", "eu-west", "eu-west-1a"),
            Instance::new("d", "orders", "1.0"),
        ]);
        assert_eq!(ids(&out), vec!["c", "d"]);
    }

    #[test]
    fn test_no_local_data_center_is_noop() {
        let f = ZoneAwareFilter::new(None);
        let out = f.apply(vec![inst("c", "eu-west", "eu-west-1a"), inst("a", "us-east", "us-east-1a")]);
        assert_eq!(ids(&out), vec!["c", "a"]);
    }

    #[test]
    fn test_zone_match_requires_region() {
        let f = ZoneAwareFilter::new(local());
        // same zone name in a different region is not a zone match
        let out = f.apply(vec![
            inst("x", "ap-south", "us-east-1a"),
            inst("b", "us-east", "us-east-1b"),
        ]);
        assert_eq!(ids(&out), vec!["b"]);
    }
}
