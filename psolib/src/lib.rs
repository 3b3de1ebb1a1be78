//! Particle swarm optimization over bounded real vector spaces.
//!
//! A [`Swarm`] minimizes an [`Objective`] with a ring of particles; a
//! [`MultiSwarmRunner`] advances many independent swarms on a pool of worker
//! threads.

pub mod benchmarks;
pub mod config;
pub mod errors;
pub mod logging;
pub mod objective;
pub mod particle;
pub mod report;
pub mod runner;
pub mod swarm;
pub mod topology;

pub use benchmarks::{CosineWell, ObjectiveKind, Sphere};
pub use config::{read_config, Bounds, Hyperparameters, RunnerConfig, SwarmConfig, TopologyKind};
pub use errors::{ObjectiveError, PsoError, PsoResult};
pub use objective::{Fallible, Objective};
pub use particle::{Best, Particle};
pub use report::SwarmSnapshot;
pub use runner::{MultiSwarmRunner, RunReport, SwarmOutcome};
pub use swarm::Swarm;
pub use topology::Topology;
