use crate::errors::{ObjectiveError, PsoError, PsoResult};

/// A scalar function to be minimized over a bounded box.
///
/// Objectives are shared between swarms running on different workers, so they
/// must be `Send + Sync` and must not rely on mutable shared state. Any plain
/// closure or function with the signature `Fn(&[f64]) -> f64` is an objective;
/// objectives that can fail are wrapped in [`Fallible`].
pub trait Objective: Send + Sync {
    fn evaluate(&self, position: &[f64]) -> Result<f64, ObjectiveError>;

    // Only used when printing swarms
    fn name(&self) -> &str {
        "objective"
    }
}

impl<F> Objective for F
where
    F: Fn(&[f64]) -> f64 + Send + Sync,
{
    fn evaluate(&self, position: &[f64]) -> Result<f64, ObjectiveError> {
        Ok(self(position))
    }
}

// An objective that may be undefined at some points of the search space
pub struct Fallible<F> {
    name: String,
    function: F,
}

impl<F> Fallible<F>
where
    F: Fn(&[f64]) -> Result<f64, ObjectiveError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, function: F) -> Self {
        Fallible {
            name: name.into(),
            function,
        }
    }
}

impl<F> Objective for Fallible<F>
where
    F: Fn(&[f64]) -> Result<f64, ObjectiveError> + Send + Sync,
{
    fn evaluate(&self, position: &[f64]) -> Result<f64, ObjectiveError> {
        (self.function)(position)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// Evaluates the objective, rejecting failures and non-finite fitness values.
// The position is copied into the error so the caller can inspect where it happened.
pub(crate) fn evaluate(objective: &dyn Objective, position: &[f64]) -> PsoResult<f64> {
    match objective.evaluate(position) {
        Ok(fitness) if fitness.is_finite() => Ok(fitness),
        Ok(fitness) => Err(PsoError::ObjectiveEvaluation {
            position: position.to_vec(),
            source: format!("non-finite fitness {}", fitness).into(),
        }),
        Err(source) => Err(PsoError::ObjectiveEvaluation {
            position: position.to_vec(),
            source,
        }),
    }
}
