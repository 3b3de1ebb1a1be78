use rand::rngs::SmallRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::{Bounds, Hyperparameters};
use crate::errors::PsoResult;
use crate::objective::{evaluate, Objective};

/// A point of the search space together with its fitness.
///
/// Bests are always stored as copies, never as views of a particle's live
/// position, so moving a particle can never change a recorded best.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Best {
    pub position: Vec<f64>,
    pub value: f64,
}

impl Best {
    pub fn new(position: &[f64], value: f64) -> Self {
        Best {
            position: position.to_vec(),
            value,
        }
    }
}

/// One candidate solution of a swarm.
///
/// Particles are created and mutated only by their [`Swarm`](crate::Swarm);
/// outside the crate they are read-only views.
#[derive(Debug, Clone)]
pub struct Particle {
    index: usize,
    position: Vec<f64>,
    velocity: Vec<f64>,
    velocity_limits: Vec<f64>,
    personal_best: Best,
    neighborhood_best: Best,
    hyperparameters: Hyperparameters,
    // Each particle owns its generator so particles can be advanced in any order
    rng: SmallRng,
}

impl Particle {
    // Draws a random position inside the bounds and a random velocity in
    // [-range, range], then evaluates the starting point as the personal best.
    pub(crate) fn new(
        index: usize,
        objective: &dyn Objective,
        bounds: &Bounds,
        hyperparameters: Hyperparameters,
        mut rng: SmallRng,
    ) -> PsoResult<Self> {
        let dimension = bounds.lower.len();

        let position: Vec<f64> = (0..dimension)
            .map(|i| rng.gen_range(bounds.lower[i]..=bounds.upper[i]))
            .collect();
        let velocity: Vec<f64> = (0..dimension)
            .map(|i| bounds.range(i) * rng.gen_range(-1.0..=1.0))
            .collect();

        let fitness = evaluate(objective, &position)?;
        let personal_best = Best::new(&position, fitness);

        Ok(Particle {
            index,
            position,
            velocity,
            velocity_limits: bounds.velocity_limits(),
            neighborhood_best: personal_best.clone(),
            personal_best,
            hyperparameters,
            rng,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn position(&self) -> &[f64] {
        &self.position
    }

    pub fn velocity(&self) -> &[f64] {
        &self.velocity
    }

    pub fn velocity_limits(&self) -> &[f64] {
        &self.velocity_limits
    }

    pub fn personal_best(&self) -> &Best {
        &self.personal_best
    }

    pub fn neighborhood_best(&self) -> &Best {
        &self.neighborhood_best
    }

    pub fn hyperparameters(&self) -> Hyperparameters {
        self.hyperparameters
    }

    // v_i = w*v_i + r_p*phi_p*(p_i - x_i) + r_g*phi_g*(g_i - x_i), clamped to [-vmax_i, vmax_i]
    pub(crate) fn update_velocity(&mut self) {
        let Hyperparameters {
            inertia,
            cognitive,
            social,
        } = self.hyperparameters;

        for i in 0..self.position.len() {
            let r_p: f64 = self.rng.gen();
            let r_g: f64 = self.rng.gen();

            let velocity = inertia * self.velocity[i]
                + r_p * cognitive * (self.personal_best.position[i] - self.position[i])
                + r_g * social * (self.neighborhood_best.position[i] - self.position[i]);

            let limit = self.velocity_limits[i];
            self.velocity[i] = velocity.clamp(-limit, limit);
        }
    }

    // Moves the particle; hitting a wall pins it there and kills that velocity component
    pub(crate) fn update_position(&mut self, bounds: &Bounds) {
        for i in 0..self.position.len() {
            self.position[i] += self.velocity[i];

            if self.position[i] > bounds.upper[i] {
                self.position[i] = bounds.upper[i];
                self.velocity[i] = 0.0;
            } else if self.position[i] < bounds.lower[i] {
                self.position[i] = bounds.lower[i];
                self.velocity[i] = 0.0;
            }
        }
    }

    // The only place the personal best changes, and only on strict improvement
    pub(crate) fn update_personal_best(&mut self, objective: &dyn Objective) -> PsoResult<()> {
        let fitness = evaluate(objective, &self.position)?;
        if fitness < self.personal_best.value {
            self.personal_best = Best::new(&self.position, fitness);
        }
        Ok(())
    }

    // Velocity, then position, then personal best. The order is part of the algorithm.
    pub(crate) fn step(&mut self, objective: &dyn Objective, bounds: &Bounds) -> PsoResult<()> {
        self.update_velocity();
        self.update_position(bounds);
        self.update_personal_best(objective)
    }

    pub(crate) fn set_neighborhood_best(&mut self, best: Best) {
        self.neighborhood_best = best;
    }

    #[cfg(test)]
    pub(crate) fn set_personal_best(&mut self, best: Best) {
        self.personal_best = best;
    }
}

impl std::fmt::Display for Particle {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "Particle #{} (w={:4.2}, phi_p={:4.2}, phi_g={:4.2}, best={:8.2e})",
            self.index,
            self.hyperparameters.inertia,
            self.hyperparameters.cognitive,
            self.hyperparameters.social,
            self.personal_best.value
        )
    }
}
