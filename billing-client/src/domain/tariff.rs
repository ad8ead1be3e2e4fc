use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tariff {
    pub cost_per_unit: f64,
}

impl Tariff {
    pub fn new(cost_per_unit: f64) -> Self {
        Self { cost_per_unit }
    }

    pub fn is_positive(&self) -> bool {
        self.cost_per_unit.is_finite() && self.cost_per_unit > 0.0
    }
}
