use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};

use crate::errors::{PsoError, PsoResult};
use crate::swarm::Swarm;

// Messages on the task queue. Swarms travel inside the message, so the worker
// that receives one has exclusive access to it until it sends it back.
enum Task {
    Run { index: usize, swarm: Swarm },
    Shutdown,
}

enum TaskOutcome {
    Finished,
    // The run was already aborted when the worker picked this swarm up
    Skipped,
    // The run was aborted while this swarm was being advanced
    Interrupted { steps: usize },
    Failed(PsoError),
}

// Sent back by a worker once per swarm, whatever happened to it
struct Completion {
    index: usize,
    worker: usize,
    swarm: Swarm,
    outcome: TaskOutcome,
    elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwarmOutcome {
    pub index: usize,
    pub worker: usize,
    pub best_value: f64,
    pub steps_completed: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    // In completion order, which depends on scheduling
    pub outcomes: Vec<SwarmOutcome>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn best(&self) -> Option<&SwarmOutcome> {
        self.outcomes
            .iter()
            .min_by(|a, b| a.best_value.total_cmp(&b.best_value))
    }
}

/// Advances a collection of independent swarms on a fixed pool of worker threads.
///
/// Workers pull swarm indices from a FIFO queue until they receive a shutdown
/// message. No data is shared between swarms, and each swarm is held by at
/// most one worker at a time.
///
/// Failures are fail-fast: the first objective error or worker panic stops
/// workers from starting the remaining queued swarms and stops swarms in
/// flight before their next step. Every swarm is handed back to the runner,
/// and the first error is returned. A join timeout, when set, is fatal too;
/// late workers stop before their next step and the swarms they still hold
/// are given up.
pub struct MultiSwarmRunner {
    swarms: Vec<Option<Swarm>>,
    join_timeout: Option<Duration>,
}

impl MultiSwarmRunner {
    pub fn new(swarms: Vec<Swarm>) -> Self {
        MultiSwarmRunner {
            swarms: swarms.into_iter().map(Some).collect(),
            join_timeout: None,
        }
    }

    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = Some(timeout);
        self
    }

    pub fn len(&self) -> usize {
        self.swarms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.swarms.is_empty()
    }

    // None only for swarms given up after a timeout
    pub fn swarm(&self, index: usize) -> Option<&Swarm> {
        self.swarms.get(index).and_then(|slot| slot.as_ref())
    }

    pub fn swarms(&self) -> impl Iterator<Item = &Swarm> + '_ {
        self.swarms.iter().flatten()
    }

    pub fn into_swarms(self) -> Vec<Swarm> {
        self.swarms.into_iter().flatten().collect()
    }

    fn missing(&self) -> Vec<usize> {
        self.swarms
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(index, _)| index)
            .collect()
    }

    // Puts back any swarm still waiting in the queue
    fn restore_queued(&mut self, tasks: &Receiver<Task>) {
        while let Ok(task) = tasks.try_recv() {
            if let Task::Run { index, swarm } = task {
                self.swarms[index] = Some(swarm);
            }
        }
    }

    /// Runs every swarm for `steps_per_swarm` steps on `worker_count` workers
    /// and returns once all workers have exited.
    pub fn run(&mut self, steps_per_swarm: usize, worker_count: usize) -> PsoResult<RunReport> {
        if worker_count == 0 {
            return Err(PsoError::configuration("worker count must be positive"));
        }
        let lost = self.missing();
        if !lost.is_empty() {
            return Err(PsoError::configuration(format!(
                "swarms {:?} were given up by an earlier timed out run",
                lost
            )));
        }

        let start = Instant::now();
        let swarm_count = self.swarms.len();
        log::info!(
            "Running {} swarms for {} steps on {} workers",
            swarm_count,
            steps_per_swarm,
            worker_count
        );

        // Every task and every shutdown message fits, so queueing never blocks
        let (task_sender, task_receiver) = bounded::<Task>(swarm_count + worker_count);
        let (completion_sender, completion_receiver) = unbounded::<Completion>();
        let abort = Arc::new(AtomicBool::new(false));

        for index in 0..swarm_count {
            if let Some(swarm) = self.swarms[index].take() {
                if let Err(e) = task_sender.try_send(Task::Run { index, swarm }) {
                    if let Task::Run { index, swarm } = e.into_inner() {
                        self.swarms[index] = Some(swarm);
                    }
                    self.restore_queued(&task_receiver);
                    return Err(PsoError::configuration("task queue rejected a swarm"));
                }
            }
        }
        // One shutdown message per worker, queued behind every task
        for _ in 0..worker_count {
            if task_sender.try_send(Task::Shutdown).is_err() {
                self.restore_queued(&task_receiver);
                return Err(PsoError::configuration(
                    "task queue rejected a shutdown message",
                ));
            }
        }
        drop(task_sender);

        let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(worker_count);
        for worker in 0..worker_count {
            let tasks = task_receiver.clone();
            let completions = completion_sender.clone();
            let abort = abort.clone();

            let spawned = thread::Builder::new()
                .name(format!("pso-worker-{}", worker))
                .spawn(move || work(worker, steps_per_swarm, tasks, completions, abort));

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) if handles.is_empty() => {
                    log::error!("Failed to spawn any worker: {}", e);
                    self.restore_queued(&task_receiver);
                    return Err(e.into());
                }
                Err(e) => {
                    // The workers already running will drain the queue on their own
                    log::warn!(
                        "Failed to spawn worker {}, continuing with {}: {}",
                        worker,
                        handles.len(),
                        e
                    );
                    break;
                }
            }
        }
        drop(task_receiver);
        drop(completion_sender);

        let deadline = self.join_timeout.map(|timeout| start + timeout);
        let mut outcomes = Vec::with_capacity(swarm_count);
        let mut first_error: Option<PsoError> = None;
        let mut remaining = swarm_count;

        while remaining > 0 {
            let received = match deadline {
                Some(deadline) => completion_receiver
                    .recv_timeout(deadline.saturating_duration_since(Instant::now())),
                None => completion_receiver
                    .recv()
                    .map_err(|_| RecvTimeoutError::Disconnected),
            };

            let completion = match received {
                Ok(completion) => completion,
                Err(RecvTimeoutError::Timeout) => {
                    // Late workers are left detached and stop before their next step;
                    // their swarms are dropped with them
                    abort.store(true, Ordering::SeqCst);
                    let pending = self.missing();
                    let timeout = self.join_timeout.unwrap_or_default();
                    log::error!("Swarms {:?} did not finish within {:?}", pending, timeout);
                    return Err(PsoError::WorkerTimeout { timeout, pending });
                }
                Err(RecvTimeoutError::Disconnected) => break,
            };
            remaining -= 1;

            let Completion {
                index,
                worker,
                swarm,
                outcome,
                elapsed,
            } = completion;

            match outcome {
                TaskOutcome::Finished => {
                    log::info!(
                        "Swarm {} finished on worker {} in {:?}: best {:e}",
                        index,
                        worker,
                        elapsed,
                        swarm.global_best().value
                    );
                    outcomes.push(SwarmOutcome {
                        index,
                        worker,
                        best_value: swarm.global_best().value,
                        steps_completed: swarm.steps_completed(),
                        elapsed,
                    });
                }
                TaskOutcome::Skipped => {
                    log::debug!(
                        "Swarm {} skipped by worker {} after an earlier failure",
                        index,
                        worker
                    );
                }
                TaskOutcome::Interrupted { steps } => {
                    log::debug!(
                        "Swarm {} interrupted on worker {} after {} steps",
                        index,
                        worker,
                        steps
                    );
                }
                TaskOutcome::Failed(e) => {
                    log::error!("Swarm {} failed on worker {}: {}", index, worker, e);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
            self.swarms[index] = Some(swarm);
        }

        // Every worker has read its shutdown message or is about to
        for (worker, handle) in handles.into_iter().enumerate() {
            if let Err(payload) = handle.join() {
                let e = PsoError::worker_failure(worker, None, payload);
                log::error!("{}", e);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        let missing = self.missing();
        if !missing.is_empty() {
            return Err(PsoError::configuration(format!(
                "workers exited without returning swarms {:?}",
                missing
            )));
        }

        let elapsed = start.elapsed();
        log::info!("All {} swarms finished in {:?}", swarm_count, elapsed);
        Ok(RunReport { outcomes, elapsed })
    }
}

// Worker loop: take a swarm, run it to completion, send it back, repeat until shutdown
fn work(
    worker: usize,
    steps_per_swarm: usize,
    tasks: Receiver<Task>,
    completions: Sender<Completion>,
    abort: Arc<AtomicBool>,
) {
    log::debug!("Worker {} started", worker);

    while let Ok(task) = tasks.recv() {
        let (index, mut swarm) = match task {
            Task::Run { index, swarm } => (index, swarm),
            Task::Shutdown => break,
        };

        let start = Instant::now();
        let outcome = if abort.load(Ordering::SeqCst) {
            TaskOutcome::Skipped
        } else {
            // A panicking objective must not take the swarm down with the worker
            let stop = || abort.load(Ordering::SeqCst);
            match panic::catch_unwind(AssertUnwindSafe(|| swarm.run_until(steps_per_swarm, stop))) {
                Ok(Ok(steps)) if steps == steps_per_swarm => TaskOutcome::Finished,
                Ok(Ok(steps)) => TaskOutcome::Interrupted { steps },
                Ok(Err(e)) => {
                    abort.store(true, Ordering::SeqCst);
                    TaskOutcome::Failed(e)
                }
                Err(payload) => {
                    abort.store(true, Ordering::SeqCst);
                    TaskOutcome::Failed(PsoError::worker_failure(worker, Some(index), payload))
                }
            }
        };

        let completion = Completion {
            index,
            worker,
            swarm,
            outcome,
            elapsed: start.elapsed(),
        };
        if completions.send(completion).is_err() {
            log::warn!(
                "Worker {} finished swarm {} after the runner stopped waiting",
                worker,
                index
            );
            break;
        }
    }

    log::debug!("Worker {} exiting", worker);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Bounds, Hyperparameters};
    use crate::objective::{Fallible, Objective};
    use std::sync::atomic::AtomicUsize;

    fn parabola_swarm(seed: u64) -> Swarm {
        Swarm::new(
            20,
            1,
            Arc::new(|x: &[f64]| x[0] * x[0]),
            Bounds::uniform(1, -10.0, 10.0),
            Hyperparameters::default(),
            seed,
        )
        .unwrap()
    }

    fn parabola_swarms() -> Vec<Swarm> {
        (0..4).map(|i| parabola_swarm(100 + i)).collect()
    }

    fn final_values(runner: &MultiSwarmRunner) -> Vec<f64> {
        runner.swarms().map(|s| s.global_best().value).collect()
    }

    #[test]
    fn results_do_not_depend_on_worker_count() {
        let mut two_workers = MultiSwarmRunner::new(parabola_swarms());
        let report = two_workers.run(100, 2).unwrap();

        assert_eq!(report.outcomes.len(), 4);
        for swarm in two_workers.swarms() {
            assert_eq!(swarm.steps_completed(), 100);
            assert_eq!(swarm.history().len(), 101);
        }

        let mut four_workers = MultiSwarmRunner::new(parabola_swarms());
        four_workers.run(100, 4).unwrap();
        assert_eq!(final_values(&two_workers), final_values(&four_workers));

        // And both match a plain sequential run of the same seeds
        let sequential: Vec<f64> = parabola_swarms()
            .into_iter()
            .map(|mut swarm| {
                swarm.run(100).unwrap();
                swarm.global_best().value
            })
            .collect();
        assert_eq!(final_values(&two_workers), sequential);
    }

    #[test]
    fn every_swarm_is_reported_once() {
        let mut runner = MultiSwarmRunner::new(parabola_swarms());
        let report = runner.run(10, 3).unwrap();

        let mut indices: Vec<usize> = report.outcomes.iter().map(|o| o.index).collect();
        indices.sort();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert!(report.outcomes.iter().all(|o| o.worker < 3 && o.steps_completed == 10));

        let best = report.best().unwrap();
        let minimum = final_values(&runner).into_iter().fold(f64::INFINITY, f64::min);
        assert_eq!(best.best_value, minimum);
    }

    #[test]
    fn runs_accumulate_on_the_same_swarms() {
        let mut runner = MultiSwarmRunner::new(parabola_swarms());
        runner.run(5, 2).unwrap();
        runner.run(7, 2).unwrap();

        assert!(runner.swarms().all(|s| s.steps_completed() == 12));
        assert_eq!(runner.into_swarms().len(), 4);
    }

    #[test]
    fn zero_workers_is_a_configuration_error() {
        let mut runner = MultiSwarmRunner::new(parabola_swarms());
        assert!(runner.run(10, 0).unwrap_err().is_configuration());
        assert_eq!(runner.swarms().count(), 4);
        assert!(runner.swarms().all(|s| s.steps_completed() == 0));
    }

    #[test]
    fn more_workers_than_swarms() {
        let mut runner = MultiSwarmRunner::new(vec![parabola_swarm(1)]);
        let report = runner.run(20, 8).unwrap();
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(runner.swarm(0).unwrap().steps_completed(), 20);
    }

    #[test]
    fn empty_runner_returns_immediately() {
        let mut runner = MultiSwarmRunner::new(Vec::new());
        assert!(runner.is_empty());
        let report = runner.run(10, 2).unwrap();
        assert!(report.outcomes.is_empty());
        assert!(report.best().is_none());
    }

    #[test]
    fn panicking_objective_is_a_worker_failure() {
        let armed = Arc::new(AtomicBool::new(false));
        let trigger = armed.clone();
        let objective: Arc<dyn Objective> = Arc::new(move |x: &[f64]| {
            if trigger.load(Ordering::SeqCst) {
                panic!("objective blew up");
            }
            x[0] * x[0]
        });

        let mut swarms = parabola_swarms();
        swarms[2] = Swarm::new(
            5,
            1,
            objective,
            Bounds::uniform(1, -1.0, 1.0),
            Hyperparameters::default(),
            2,
        )
        .unwrap();
        armed.store(true, Ordering::SeqCst);

        let mut runner = MultiSwarmRunner::new(swarms);
        match runner.run(10, 2).unwrap_err() {
            PsoError::WorkerFailure { swarm, message, .. } => {
                assert_eq!(swarm, Some(2));
                assert_eq!(message, "objective blew up");
            }
            other => panic!("unexpected error: {}", other),
        }

        // Every swarm, including the failed one, is still held by the runner
        assert_eq!(runner.swarms().count(), 4);
        assert_eq!(runner.swarm(2).unwrap().steps_completed(), 0);
    }

    #[test]
    fn objective_errors_are_returned_unchanged() {
        let armed = Arc::new(AtomicBool::new(false));
        let trigger = armed.clone();
        let failing = Fallible::new("failing", move |x: &[f64]| {
            if trigger.load(Ordering::SeqCst) {
                return Err("outside the domain".into());
            }
            Ok(x[0] * x[0])
        });
        let swarm = Swarm::new(
            3,
            1,
            Arc::new(failing),
            Bounds::uniform(1, -1.0, 1.0),
            Hyperparameters::default(),
            0,
        )
        .unwrap();
        armed.store(true, Ordering::SeqCst);

        let mut runner = MultiSwarmRunner::new(vec![swarm]);
        match runner.run(3, 1).unwrap_err() {
            PsoError::ObjectiveEvaluation { source, .. } => {
                assert_eq!(source.to_string(), "outside the domain")
            }
            other => panic!("unexpected error: {}", other),
        }

        // The swarm comes back with its construction-time history intact
        assert_eq!(runner.swarm(0).unwrap().history().len(), 1);
    }

    #[test]
    fn timeout_gives_up_on_slow_swarms() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let slow = move |x: &[f64]| {
            counter.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            x[0] * x[0]
        };
        let swarm = Swarm::new(
            2,
            1,
            Arc::new(slow),
            Bounds::uniform(1, -1.0, 1.0),
            Hyperparameters::default(),
            0,
        )
        .unwrap();

        let mut runner =
            MultiSwarmRunner::new(vec![swarm]).with_join_timeout(Duration::from_millis(50));
        match runner.run(200, 1).unwrap_err() {
            PsoError::WorkerTimeout { pending, timeout } => {
                assert_eq!(pending, vec![0]);
                assert_eq!(timeout, Duration::from_millis(50));
            }
            other => panic!("unexpected error: {}", other),
        }

        assert!(runner.swarm(0).is_none());
        assert!(runner.run(1, 1).unwrap_err().is_configuration());

        // The detached worker finishes at most its current step, then stops evaluating
        thread::sleep(Duration::from_millis(300));
        let settled = calls.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(300));
        assert_eq!(calls.load(Ordering::SeqCst), settled);
        assert!(settled < 2 + 2 * 200);
    }
}
