use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::PsoResult;
use crate::particle::Best;
use crate::swarm::Swarm;

// Owned copy of what plotting and reporting collaborators need from a swarm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmSnapshot {
    pub seed: u64,
    pub objective: String,
    pub steps: usize,
    pub global_best: Best,
    pub history: Vec<f64>,
}

// Writes one row per recorded global best:
// - step (0 is the value at construction)
// - global_best
pub fn write_history_csv(swarm: &Swarm, output: impl AsRef<Path>) -> PsoResult<()> {
    let file = File::create(output)?;
    let mut writer = csv::Writer::from_writer(file);

    writer.write_record(["step", "global_best"])?;
    for (step, value) in swarm.history().iter().enumerate() {
        writer.write_record([step.to_string(), value.to_string()])?;
    }

    writer.flush()?;
    Ok(())
}

// Writes the current particle positions, one row per particle, for scatter plots.
// Columns are the particle index, x0..x{D-1} and the particle's personal best value.
pub fn write_positions_csv(swarm: &Swarm, output: impl AsRef<Path>) -> PsoResult<()> {
    let file = File::create(output)?;
    let mut writer = csv::Writer::from_writer(file);

    let mut headers = vec!["particle".to_string()];
    headers.extend((0..swarm.dimension()).map(|i| format!("x{}", i)));
    headers.push("personal_best".to_string());
    writer.write_record(headers)?;

    for particle in swarm.particles() {
        let mut record = Vec::with_capacity(swarm.dimension() + 2);
        record.push(particle.index().to_string());
        record.extend(particle.position().iter().map(|x| x.to_string()));
        record.push(particle.personal_best().value.to_string());
        writer.write_record(record)?;
    }

    writer.flush()?;
    Ok(())
}

pub fn write_snapshots_json(
    snapshots: &[SwarmSnapshot],
    output: impl AsRef<Path>,
) -> PsoResult<()> {
    let file = File::create(output)?;
    serde_json::to_writer_pretty(file, snapshots)?;
    Ok(())
}
