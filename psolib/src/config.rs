use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::errors::{PsoError, PsoResult};

// Velocities are limited to this fraction of each dimension's range
pub const VELOCITY_LIMIT_FRACTION: f64 = 0.2;

// Per-dimension box constraints of the search space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl Bounds {
    pub fn new(lower: Vec<f64>, upper: Vec<f64>) -> Self {
        Bounds { lower, upper }
    }

    // The same interval on every dimension, e.g. [-10, 10]^4
    pub fn uniform(dimension: usize, lower: f64, upper: f64) -> Self {
        Bounds {
            lower: vec![lower; dimension],
            upper: vec![upper; dimension],
        }
    }

    pub fn range(&self, i: usize) -> f64 {
        self.upper[i] - self.lower[i]
    }

    pub fn velocity_limits(&self) -> Vec<f64> {
        (0..self.lower.len())
            .map(|i| VELOCITY_LIMIT_FRACTION * self.range(i))
            .collect()
    }

    pub fn contains(&self, position: &[f64]) -> bool {
        position.len() == self.lower.len()
            && position
                .iter()
                .enumerate()
                .all(|(i, x)| self.lower[i] <= *x && *x <= self.upper[i])
    }

    pub fn validate(&self, dimension: usize) -> PsoResult<()> {
        if self.lower.len() != dimension {
            return Err(PsoError::configuration(format!(
                "lower bound has {} components, expected {}",
                self.lower.len(),
                dimension
            )));
        }
        if self.upper.len() != dimension {
            return Err(PsoError::configuration(format!(
                "upper bound has {} components, expected {}",
                self.upper.len(),
                dimension
            )));
        }

        for i in 0..dimension {
            let (lower, upper) = (self.lower[i], self.upper[i]);
            if !lower.is_finite() || !upper.is_finite() {
                return Err(PsoError::configuration(format!(
                    "bounds of dimension {} are not finite: [{}, {}]",
                    i, lower, upper
                )));
            }
            if lower > upper {
                return Err(PsoError::configuration(format!(
                    "bounds of dimension {} are inverted: {} > {}",
                    i, lower, upper
                )));
            }
            // Sampling velocities needs the width itself to be representable
            if !(upper - lower).is_finite() {
                return Err(PsoError::configuration(format!(
                    "bounds of dimension {} are too wide: [{}, {}]",
                    i, lower, upper
                )));
            }
        }

        Ok(())
    }
}

// Velocity update coefficients, fixed for the lifetime of a swarm
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    pub inertia: f64,
    pub cognitive: f64,
    pub social: f64,
}

impl Hyperparameters {
    pub fn new(inertia: f64, cognitive: f64, social: f64) -> Self {
        Hyperparameters {
            inertia,
            cognitive,
            social,
        }
    }

    pub fn validate(&self) -> PsoResult<()> {
        let coefficients = [
            ("inertia", self.inertia),
            ("cognitive", self.cognitive),
            ("social", self.social),
        ];
        for (name, value) in coefficients {
            if !value.is_finite() || value < 0.0 {
                return Err(PsoError::configuration(format!(
                    "{} coefficient must be a non-negative number, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Hyperparameters {
            inertia: 0.9,
            cognitive: 0.7,
            social: 0.7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopologyKind {
    // Each particle sees itself and its two ring neighbours
    #[default]
    Ring,
    // Every particle sees every other particle
    Global,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmConfig {
    pub size: usize,
    pub dimension: usize,
    pub bounds: Bounds,
    #[serde(default)]
    pub hyperparameters: Hyperparameters,
    #[serde(default)]
    pub topology: TopologyKind,
    // Advance the particles of one step on the rayon pool
    #[serde(default)]
    pub parallel_particles: bool,
}

impl SwarmConfig {
    pub fn new(size: usize, dimension: usize, bounds: Bounds) -> Self {
        SwarmConfig {
            size,
            dimension,
            bounds,
            hyperparameters: Hyperparameters::default(),
            topology: TopologyKind::default(),
            parallel_particles: false,
        }
    }

    pub fn with_hyperparameters(mut self, hyperparameters: Hyperparameters) -> Self {
        self.hyperparameters = hyperparameters;
        self
    }

    pub fn with_topology(mut self, topology: TopologyKind) -> Self {
        self.topology = topology;
        self
    }

    pub fn with_parallel_particles(mut self, parallel_particles: bool) -> Self {
        self.parallel_particles = parallel_particles;
        self
    }

    pub fn validate(&self) -> PsoResult<()> {
        if self.size == 0 {
            return Err(PsoError::configuration("swarm size must be positive"));
        }
        if self.dimension == 0 {
            return Err(PsoError::configuration("dimension must be positive"));
        }
        self.bounds.validate(self.dimension)?;
        self.hyperparameters.validate()
    }
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    pub swarm_count: usize,
    pub steps_per_swarm: usize,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    // Swarm `i` is seeded with `base_seed + i`
    #[serde(default)]
    pub base_seed: u64,
    #[serde(default)]
    pub join_timeout_secs: Option<u64>,
}

impl RunnerConfig {
    pub fn swarm_seed(&self, index: usize) -> u64 {
        self.base_seed.wrapping_add(index as u64)
    }

    pub fn join_timeout(&self) -> Option<Duration> {
        self.join_timeout_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> PsoResult<()> {
        if self.worker_count == 0 {
            return Err(PsoError::configuration("worker count must be positive"));
        }
        if self.join_timeout_secs == Some(0) {
            return Err(PsoError::configuration("join timeout must be positive"));
        }
        Ok(())
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        RunnerConfig {
            swarm_count: 4,
            steps_per_swarm: 100,
            worker_count: default_worker_count(),
            base_seed: 12,
            join_timeout_secs: None,
        }
    }
}

// Reads any of the configuration structures from a JSON file
pub fn read_config<T: DeserializeOwned>(path: impl AsRef<Path>) -> PsoResult<T> {
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents).map_err(|e| e.into())
}
