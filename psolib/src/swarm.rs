use std::sync::Arc;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::config::{Bounds, Hyperparameters, SwarmConfig};
use crate::errors::PsoResult;
use crate::objective::Objective;
use crate::particle::{Best, Particle};
use crate::report::SwarmSnapshot;
use crate::topology::Topology;

// Progress is logged every tenth of a verbose run
const PROGRESS_REPORTS: usize = 10;

/// A fixed population of particles coupled by a neighbour topology.
///
/// A swarm is seeded explicitly and owns everything it touches, so two
/// swarms built from the same configuration and seed evolve identically,
/// no matter which thread advances them.
pub struct Swarm {
    config: SwarmConfig,
    seed: u64,
    objective: Arc<dyn Objective>,
    particles: Vec<Particle>,
    topology: Topology,
    global_best: Best,
    // Global best value at construction, then one entry per completed step
    history: Vec<f64>,
    verbose: bool,
}

impl Swarm {
    pub fn new(
        size: usize,
        dimension: usize,
        objective: Arc<dyn Objective>,
        bounds: Bounds,
        hyperparameters: Hyperparameters,
        seed: u64,
    ) -> PsoResult<Self> {
        let config =
            SwarmConfig::new(size, dimension, bounds).with_hyperparameters(hyperparameters);
        Swarm::from_config(config, objective, seed)
    }

    pub fn from_config(
        config: SwarmConfig,
        objective: Arc<dyn Objective>,
        seed: u64,
    ) -> PsoResult<Self> {
        config.validate()?;

        // Every particle gets its own generator, derived from the swarm seed
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut particles = Vec::with_capacity(config.size);
        for index in 0..config.size {
            let particle_rng = SmallRng::seed_from_u64(rng.gen());
            particles.push(Particle::new(
                index,
                objective.as_ref(),
                &config.bounds,
                config.hyperparameters,
                particle_rng,
            )?);
        }

        // The first particle sets the global best, the rest can only improve it
        let mut global_best = particles[0].personal_best().clone();
        for particle in &particles[1..] {
            if particle.personal_best().value < global_best.value {
                global_best = particle.personal_best().clone();
            }
        }

        let topology = Topology::new(config.topology, config.size);
        let history = vec![global_best.value];

        let mut swarm = Swarm {
            config,
            seed,
            objective,
            particles,
            topology,
            global_best,
            history,
            verbose: false,
        };
        swarm.refresh_neighborhood_bests();

        log::debug!(
            "Constructed {} with seed {} ({:?} topology, {} dimensions)",
            swarm,
            seed,
            swarm.config.topology,
            swarm.config.dimension
        );
        Ok(swarm)
    }

    // Log coarse progress from `run`
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    /// Advances every particle by one step, then refreshes the neighbourhood
    /// bests, the global best and the history, in that order.
    ///
    /// If the objective fails the error is returned as is. Particles that were
    /// already advanced keep their new state, but the step is not recorded in
    /// the history and the bests are not refreshed.
    pub fn step(&mut self) -> PsoResult<()> {
        let objective = self.objective.as_ref();
        let bounds = &self.config.bounds;

        // Particles only read their own state and the frozen neighbourhood bests here
        let result = if self.config.parallel_particles {
            self.particles
                .par_iter_mut()
                .try_for_each(|particle| particle.step(objective, bounds))
        } else {
            self.particles
                .iter_mut()
                .try_for_each(|particle| particle.step(objective, bounds))
        };

        if let Err(e) = result {
            log::error!(
                "Step {} of swarm (seed {}) failed: {}",
                self.steps_completed() + 1,
                self.seed,
                e
            );
            return Err(e);
        }

        // Every personal best of this step is final from here on
        self.refresh_neighborhood_bests();
        self.update_global_best();
        self.history.push(self.global_best.value);
        Ok(())
    }

    pub fn run(&mut self, n_steps: usize) -> PsoResult<()> {
        self.run_until(n_steps, || false).map(|_| ())
    }

    /// Like [`Swarm::run`], but checks `stop` before every step and returns
    /// early once it is true. Returns the number of steps taken.
    pub fn run_until(&mut self, n_steps: usize, stop: impl Fn() -> bool) -> PsoResult<usize> {
        let report_every = (n_steps / PROGRESS_REPORTS).max(1);

        for i in 0..n_steps {
            if stop() {
                log::debug!(
                    "Swarm (seed {}) stopped after {} of {} steps",
                    self.seed,
                    i,
                    n_steps
                );
                return Ok(i);
            }
            self.step()?;

            if self.verbose && ((i + 1) % report_every == 0 || i + 1 == n_steps) {
                log::info!(
                    "{:6.2}% complete, swarm best {:e}",
                    100.0 * (i + 1) as f64 / n_steps as f64,
                    self.global_best.value
                );
            }
        }

        Ok(n_steps)
    }

    // Gives every particle a copy of the lowest personal best among its neighbours.
    // All choices are made before any neighbourhood best is written.
    pub(crate) fn refresh_neighborhood_bests(&mut self) {
        let choices: Vec<usize> = (0..self.particles.len())
            .map(|j| {
                let neighbors = self.topology.neighbors(j);
                let mut best = neighbors[0];
                for &k in &neighbors[1..] {
                    if self.particles[k].personal_best().value
                        < self.particles[best].personal_best().value
                    {
                        best = k;
                    }
                }
                best
            })
            .collect();

        for (j, k) in choices.into_iter().enumerate() {
            let best = self.particles[k].personal_best().clone();
            self.particles[j].set_neighborhood_best(best);
        }
    }

    fn update_global_best(&mut self) {
        let candidate = self
            .particles
            .iter()
            .map(|particle| particle.personal_best())
            .min_by(|a, b| a.value.total_cmp(&b.value));

        if let Some(candidate) = candidate {
            if candidate.value < self.global_best.value {
                self.global_best = candidate.clone();
            }
        }
    }

    pub fn size(&self) -> usize {
        self.config.size
    }

    pub fn dimension(&self) -> usize {
        self.config.dimension
    }

    pub fn bounds(&self) -> &Bounds {
        &self.config.bounds
    }

    pub fn hyperparameters(&self) -> Hyperparameters {
        self.config.hyperparameters
    }

    pub fn config(&self) -> &SwarmConfig {
        &self.config
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn objective_name(&self) -> &str {
        self.objective.name()
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    // Current particle positions, in particle order
    pub fn positions(&self) -> impl Iterator<Item = &[f64]> + '_ {
        self.particles.iter().map(|particle| particle.position())
    }

    pub fn global_best(&self) -> &Best {
        &self.global_best
    }

    pub fn history(&self) -> &[f64] {
        &self.history
    }

    pub fn steps_completed(&self) -> usize {
        self.history.len() - 1
    }

    pub fn snapshot(&self) -> SwarmSnapshot {
        SwarmSnapshot {
            seed: self.seed,
            objective: self.objective_name().to_string(),
            steps: self.steps_completed(),
            global_best: self.global_best.clone(),
            history: self.history.clone(),
        }
    }

    #[cfg(test)]
    pub(crate) fn particles_mut(&mut self) -> &mut [Particle] {
        &mut self.particles
    }
}

impl std::fmt::Debug for Swarm {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Swarm")
            .field("config", &self.config)
            .field("seed", &self.seed)
            .field("objective", &self.objective_name())
            .field("global_best", &self.global_best)
            .field("steps_completed", &self.steps_completed())
            .finish()
    }
}

impl std::fmt::Display for Swarm {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "Swarm (particles={}, objective={}, best={:8.2e})",
            self.config.size,
            self.objective_name(),
            self.global_best.value
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::benchmarks::CosineWell;
    use crate::config::TopologyKind;
    use crate::errors::PsoError;
    use crate::objective::Fallible;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn square(x: &[f64]) -> f64 {
        x.iter().map(|xi| xi * xi).sum()
    }

    fn cosine_swarm(seed: u64) -> Swarm {
        Swarm::new(
            10,
            4,
            Arc::new(CosineWell),
            Bounds::uniform(4, -10.0, 10.0),
            Hyperparameters::default(),
            seed,
        )
        .unwrap()
    }

    #[test]
    fn construction_rejects_bad_configurations() {
        let objective: Arc<dyn Objective> = Arc::new(square);
        let build = |size, dimension, bounds| {
            Swarm::new(
                size,
                dimension,
                objective.clone(),
                bounds,
                Hyperparameters::default(),
                0,
            )
        };

        assert!(build(0, 1, Bounds::uniform(1, -1.0, 1.0)).unwrap_err().is_configuration());
        assert!(build(5, 0, Bounds::uniform(0, -1.0, 1.0)).unwrap_err().is_configuration());
        assert!(build(5, 2, Bounds::uniform(3, -1.0, 1.0)).unwrap_err().is_configuration());
        assert!(build(5, 2, Bounds::new(vec![-1.0, 1.0], vec![1.0, -1.0]))
            .unwrap_err()
            .is_configuration());
        assert!(Swarm::new(
            5,
            1,
            objective.clone(),
            Bounds::uniform(1, -1.0, 1.0),
            Hyperparameters::new(0.9, -0.7, 0.7),
            0
        )
        .unwrap_err()
        .is_configuration());
    }

    #[test]
    fn construction_records_the_initial_best() {
        let swarm = cosine_swarm(4);

        let minimum = swarm
            .particles()
            .iter()
            .map(|p| p.personal_best().value)
            .fold(f64::INFINITY, f64::min);
        assert_eq!(swarm.global_best().value, minimum);
        assert_eq!(swarm.history(), &[minimum]);
        assert_eq!(swarm.steps_completed(), 0);
        assert_eq!(swarm.positions().count(), 10);

        // Neighbourhood bests are already refreshed before the first step
        for (j, particle) in swarm.particles().iter().enumerate() {
            let expected = swarm
                .topology()
                .neighbors(j)
                .iter()
                .map(|&k| swarm.particles()[k].personal_best().value)
                .fold(f64::INFINITY, f64::min);
            assert_eq!(particle.neighborhood_best().value, expected);
        }
    }

    #[test]
    fn ring_refresh_picks_the_lowest_neighbour() {
        let mut swarm = Swarm::new(
            5,
            1,
            Arc::new(square),
            Bounds::uniform(1, -10.0, 10.0),
            Hyperparameters::default(),
            0,
        )
        .unwrap();

        let values = [5.0, 3.0, 8.0, 1.0, 9.0];
        for (particle, value) in swarm.particles_mut().iter_mut().zip(values) {
            particle.set_personal_best(Best::new(&[value], value));
        }
        swarm.refresh_neighborhood_bests();

        let neighborhood: Vec<f64> = swarm
            .particles()
            .iter()
            .map(|p| p.neighborhood_best().value)
            .collect();
        assert_eq!(neighborhood, vec![3.0, 3.0, 1.0, 1.0, 1.0]);

        // The stored best is a copy of the winning neighbour's personal best
        assert_eq!(swarm.particles()[4].neighborhood_best().position, vec![1.0]);
    }

    #[test]
    fn global_topology_shares_the_swarm_minimum() {
        let config = SwarmConfig::new(6, 2, Bounds::uniform(2, -5.0, 5.0))
            .with_topology(TopologyKind::Global);
        let mut swarm = Swarm::from_config(config, Arc::new(square), 9).unwrap();
        swarm.run(5).unwrap();

        for particle in swarm.particles() {
            assert_eq!(particle.neighborhood_best(), swarm.global_best());
        }
    }

    #[test]
    fn steps_keep_particles_inside_the_box() {
        let mut swarm = cosine_swarm(21);
        let limits = swarm.bounds().velocity_limits();

        for _ in 0..100 {
            swarm.step().unwrap();
            for particle in swarm.particles() {
                assert!(swarm.bounds().contains(particle.position()));
                for (v, limit) in particle.velocity().iter().zip(&limits) {
                    assert!(v.abs() <= *limit);
                }
            }
        }
    }

    #[test]
    fn global_best_is_the_lowest_personal_best() {
        let mut swarm = cosine_swarm(8);

        for _ in 0..50 {
            swarm.step().unwrap();
            let minimum = swarm
                .particles()
                .iter()
                .map(|p| p.personal_best().value)
                .fold(f64::INFINITY, f64::min);
            assert_eq!(swarm.global_best().value, minimum);
        }

        assert_eq!(swarm.history().len(), 51);
        assert!(swarm.history().windows(2).all(|w| w[1] <= w[0]));
    }

    #[test]
    fn same_seed_same_history() {
        let mut first = cosine_swarm(12);
        let mut second = cosine_swarm(12);
        first.run(200).unwrap();
        second.run(200).unwrap();

        assert_eq!(first.history(), second.history());
        assert_eq!(first.global_best(), second.global_best());

        let mut other = cosine_swarm(13);
        other.run(200).unwrap();
        assert_ne!(first.history(), other.history());
    }

    #[test]
    fn parallel_particles_match_sequential_ones() {
        let config = SwarmConfig::new(16, 3, Bounds::uniform(3, -10.0, 10.0));
        let mut sequential = Swarm::from_config(config.clone(), Arc::new(CosineWell), 77).unwrap();
        let mut parallel = Swarm::from_config(
            config.with_parallel_particles(true),
            Arc::new(CosineWell),
            77,
        )
        .unwrap();

        sequential.run(60).unwrap();
        parallel.run(60).unwrap();
        assert_eq!(sequential.history(), parallel.history());
    }

    #[test]
    fn converges_on_a_parabola() {
        let mut swarm = Swarm::new(
            20,
            1,
            Arc::new(|x: &[f64]| x[0] * x[0]),
            Bounds::uniform(1, -10.0, 10.0),
            Hyperparameters::new(0.9, 0.7, 0.7),
            12,
        )
        .unwrap();
        swarm.run(300).unwrap();

        assert!(
            swarm.global_best().value < 1e-3,
            "global best {} after 300 steps",
            swarm.global_best().value
        );
        assert_eq!(swarm.global_best().value, *swarm.history().last().unwrap());
    }

    #[test]
    fn failed_step_keeps_the_recorded_history() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        // 10 evaluations to construct, 10 per step: the 25th call lands in step 2
        let flaky = Fallible::new("flaky", move |x: &[f64]| {
            if counter.fetch_add(1, Ordering::SeqCst) + 1 >= 25 {
                return Err("evaluation budget exhausted".into());
            }
            Ok(square(x))
        });

        let mut swarm = Swarm::new(
            10,
            2,
            Arc::new(flaky),
            Bounds::uniform(2, -3.0, 3.0),
            Hyperparameters::default(),
            1,
        )
        .unwrap();

        let err = swarm.run(5).unwrap_err();
        assert!(matches!(err, PsoError::ObjectiveEvaluation { .. }));
        assert_eq!(swarm.steps_completed(), 1);
        assert_eq!(swarm.history().len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 25);
    }

    #[test]
    fn failing_construction_is_an_objective_error() {
        let undefined = Fallible::new("undefined", |_: &[f64]| Err("nowhere defined".into()));
        let err = Swarm::new(
            3,
            1,
            Arc::new(undefined),
            Bounds::uniform(1, 0.0, 1.0),
            Hyperparameters::default(),
            0,
        )
        .err()
        .unwrap();
        assert!(matches!(err, PsoError::ObjectiveEvaluation { .. }));
    }

    #[test]
    fn single_particle_swarm_follows_itself() {
        let mut swarm = Swarm::new(
            1,
            2,
            Arc::new(square),
            Bounds::uniform(2, -1.0, 1.0),
            Hyperparameters::default(),
            3,
        )
        .unwrap();
        swarm.run(10).unwrap();

        let particle = &swarm.particles()[0];
        assert_eq!(particle.neighborhood_best(), particle.personal_best());
        assert_eq!(swarm.global_best(), particle.personal_best());
    }

    #[test]
    fn run_until_stops_between_steps() {
        let mut swarm = cosine_swarm(6);
        let steps = AtomicUsize::new(0);
        let taken = swarm
            .run_until(50, || steps.fetch_add(1, Ordering::SeqCst) >= 7)
            .unwrap();

        assert_eq!(taken, 7);
        assert_eq!(swarm.steps_completed(), 7);
        assert_eq!(swarm.run_until(3, || false).unwrap(), 3);
        assert_eq!(swarm.history().len(), 11);
    }

    #[test]
    fn display_names_the_objective() {
        let swarm = cosine_swarm(0);
        let text = swarm.to_string();
        assert!(text.starts_with("Swarm (particles=10, objective=cosine_well, best="));
    }
}
