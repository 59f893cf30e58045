//! Workload simulator configuration.

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq)]
pub struct SimulatorConfig {
    /// Seed for the deterministic operation stream.
    #[serde(default = "default_seed")]
    pub seed: u64,

    #[serde(default = "default_operations")]
    pub operations: usize,

    /// Largest request size the simulator draws.
    #[validate(range(min = 1))]
    #[serde(default = "default_max_alloc")]
    pub max_alloc: usize,

    /// Chance that a step frees a live block instead of allocating.
    #[validate(range(min = 0.0, max = 1.0))]
    #[serde(default = "default_free_probability")]
    pub free_probability: f64,

    /// Chance that a step offers a pointer the pool never handed out.
    #[validate(range(min = 0.0, max = 1.0))]
    #[serde(default)]
    pub chaos_probability: f64,
}

fn default_seed() -> u64 {
    42
}

fn default_operations() -> usize {
    10_000
}

fn default_max_alloc() -> usize {
    4096
}

fn default_free_probability() -> f64 {
    0.45
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            operations: default_operations(),
            max_alloc: default_max_alloc(),
            free_probability: default_free_probability(),
            chaos_probability: 0.0,
        }
    }
}
