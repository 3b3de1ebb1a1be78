use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use psolib::logging;
use psolib::report::{write_history_csv, write_positions_csv, write_snapshots_json};
use psolib::{
    read_config, Bounds, MultiSwarmRunner, ObjectiveKind, RunnerConfig, Swarm, SwarmConfig,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BenchmarkConfig {
    #[serde(default)]
    objective: ObjectiveKind,
    #[serde(default = "default_swarm")]
    swarm: SwarmConfig,
    #[serde(default)]
    runner: RunnerConfig,
    #[serde(default = "default_output_dir")]
    output_dir: String,
    #[serde(default = "default_log_file")]
    log_file: String,
    #[serde(default)]
    verbose: bool,
}

// 20 particles in [-10, 10]^4, the classic cosine well setup
fn default_swarm() -> SwarmConfig {
    SwarmConfig::new(20, 4, Bounds::uniform(4, -10.0, 10.0))
}

fn default_output_dir() -> String {
    "results/".to_string()
}

fn default_log_file() -> String {
    "logs/benchmark.log".to_string()
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        BenchmarkConfig {
            objective: ObjectiveKind::default(),
            swarm: default_swarm(),
            runner: RunnerConfig::default(),
            output_dir: default_output_dir(),
            log_file: default_log_file(),
            verbose: false,
        }
    }
}

// Each run gets its own timestamped directory below the output directory
fn validate_output_directory(path: &str) -> anyhow::Result<PathBuf> {
    let run_dir = Path::new(path).join(chrono::Local::now().format("%Y%m%d-%H%M%S").to_string());
    if !run_dir.exists() {
        log::info!("Creating output directory at {}...", run_dir.display());
        std::fs::create_dir_all(&run_dir)?;
    }
    log::info!("Saving results to {}...", run_dir.display());
    Ok(run_dir)
}

fn build_swarms(config: &BenchmarkConfig) -> anyhow::Result<Vec<Swarm>> {
    (0..config.runner.swarm_count)
        .map(|i| {
            let seed = config.runner.swarm_seed(i);
            let swarm = Swarm::from_config(config.swarm.clone(), config.objective.objective(), seed)
                .with_context(|| format!("failed to build swarm {} (seed {})", i, seed))?;
            Ok(swarm.with_verbose(config.verbose))
        })
        .collect()
}

fn save_results(runner: &MultiSwarmRunner, run_dir: &Path) -> anyhow::Result<()> {
    for (i, swarm) in runner.swarms().enumerate() {
        write_history_csv(swarm, run_dir.join(format!("swarm_{}_history.csv", i)))?;
        write_positions_csv(swarm, run_dir.join(format!("swarm_{}_positions.csv", i)))?;
    }

    let snapshots: Vec<_> = runner.swarms().map(|swarm| swarm.snapshot()).collect();
    write_snapshots_json(&snapshots, run_dir.join("summary.json"))?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    // Read settings, falling back to the defaults when no path is given
    let config: BenchmarkConfig = match std::env::args().nth(1) {
        Some(path) => read_config(&path).with_context(|| format!("failed to read {}", path))?,
        None => BenchmarkConfig::default(),
    };

    // Configure logger
    logging::configure_logger(&config.log_file)
        .map_err(|e| anyhow::anyhow!("failed to configure logger: {}", e))?;

    config.swarm.validate()?;
    config.runner.validate()?;

    log::info!("Validating output directory...");
    let run_dir = validate_output_directory(&config.output_dir)?;

    let swarms = build_swarms(&config)?;
    for swarm in &swarms {
        log::info!("{}", swarm);
    }

    let mut runner = MultiSwarmRunner::new(swarms);
    if let Some(timeout) = config.runner.join_timeout() {
        runner = runner.with_join_timeout(timeout);
    }

    log::info!(
        "Running {} swarms for {} steps on {} workers...",
        runner.len(),
        config.runner.steps_per_swarm,
        config.runner.worker_count
    );
    let start = Instant::now();
    let report = runner.run(config.runner.steps_per_swarm, config.runner.worker_count)?;
    log::info!("Finished in {:.2?}", start.elapsed());

    for outcome in &report.outcomes {
        log::info!(
            "Swarm {} (worker {}): best={:8.2e} after {} steps in {:.2?}",
            outcome.index,
            outcome.worker,
            outcome.best_value,
            outcome.steps_completed,
            outcome.elapsed
        );
    }
    if let Some(best) = report.best() {
        let swarm = runner
            .swarm(best.index)
            .context("best swarm missing from runner")?;
        log::info!(
            "Best swarm {}: {:8.2e} at {:?}",
            best.index,
            best.best_value,
            swarm.global_best().position
        );
    }

    save_results(&runner, &run_dir)?;
    log::info!("Results saved to {}", run_dir.display());
    Ok(())
}
