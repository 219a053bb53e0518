//! Router settings — which picker distributes traffic inside a matched rule

use serde::{Deserialize, Serialize};

/// Picker used to choose a route tag from a matched rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Picker {
    /// Independent draws from a 100-slot cumulative table
    #[default]
    WeightPool,
    /// Greedy least-served-relative-to-target scheduling
    FitRate,
}

impl std::str::FromStr for Picker {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "weightPool" | "weight-pool" => Ok(Self::WeightPool),
            "fitRate" | "fit-rate" => Ok(Self::FitRate),
            other => Err(format!("unknown picker: {}", other)),
        }
    }
}

/// Router configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Route tag picker (default: weightPool)
    #[serde(default)]
    pub picker: Picker,
}
