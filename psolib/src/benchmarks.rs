// Standard objectives used by the benchmark driver, the tests and the benches.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{Bounds, Hyperparameters};
use crate::errors::{ObjectiveError, PsoResult};
use crate::objective::Objective;
use crate::swarm::Swarm;

// f(x) = sum(x_i^2), minimum 0 at the origin
#[derive(Debug, Clone, Copy, Default)]
pub struct Sphere;

impl Objective for Sphere {
    fn evaluate(&self, position: &[f64]) -> Result<f64, ObjectiveError> {
        Ok(position.iter().map(|x| x * x).sum())
    }

    fn name(&self) -> &str {
        "sphere"
    }
}

// f(x) = sum(1 - cos(x_i)) + sum(x_i^2) / 100
// A bowl covered in cosine ripples, with many local minima and a global minimum 0 at the origin.
// In four dimensions this is 4 - cos(x) - cos(y) - cos(z) - cos(t) + (x^2 + y^2 + z^2 + t^2) / 100.
#[derive(Debug, Clone, Copy, Default)]
pub struct CosineWell;

impl Objective for CosineWell {
    fn evaluate(&self, position: &[f64]) -> Result<f64, ObjectiveError> {
        let ripples: f64 = position.iter().map(|x| 1.0 - x.cos()).sum();
        let bowl: f64 = position.iter().map(|x| x * x).sum::<f64>() / 100.0;
        Ok(ripples + bowl)
    }

    fn name(&self) -> &str {
        "cosine_well"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveKind {
    Sphere,
    #[default]
    CosineWell,
}

impl ObjectiveKind {
    pub fn objective(&self) -> Arc<dyn Objective> {
        match self {
            ObjectiveKind::Sphere => Arc::new(Sphere),
            ObjectiveKind::CosineWell => Arc::new(CosineWell),
        }
    }
}

// 20 particles in 4 dimensions minimizing the cosine well over [-10, 10]^4
pub fn test_swarm(seed: u64) -> PsoResult<Swarm> {
    Swarm::new(
        20,
        4,
        Arc::new(CosineWell),
        Bounds::uniform(4, -10.0, 10.0),
        Hyperparameters::default(),
        seed,
    )
}
