//! Random strategy — uniform pick per call

use super::{Instance, Selection, Strategy};
use crate::error::{GovernanceError, Result};
use rand::Rng;

/// Uniformly random choice among candidates
#[derive(Default)]
pub struct RandomStrategy {
    instances: Vec<Instance>,
}

impl RandomStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Strategy for RandomStrategy {
    fn receive_data(&mut self, instances: Vec<Instance>, _selection: Selection) {
        self.instances = instances;
    }

    fn pick(&mut self) -> Result<Instance> {
        if self.instances.is_empty() {
            return Err(GovernanceError::NoneAvailableInstance);
        }
        let idx = rand::thread_rng().gen_range(0..self.instances.len());
        Ok(self.instances[idx].clone())
    }
}
