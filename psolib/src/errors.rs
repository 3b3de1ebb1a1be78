use std::any::Any;
use std::time::Duration;

// Errors raised by objectives are boxed so any error type can cross worker threads
pub type ObjectiveError = Box<dyn std::error::Error + Send + Sync>;

pub type PsoResult<T> = Result<T, PsoError>;

#[derive(Debug)]
pub enum PsoError {
    // Malformed construction inputs, always detected before any step runs
    Configuration {
        message: String,
    },

    // The objective failed, or returned NaN/inf, at `position`
    ObjectiveEvaluation {
        position: Vec<f64>,
        source: ObjectiveError,
    },

    // A worker panicked, while advancing `swarm` if it held one
    WorkerFailure {
        worker: usize,
        swarm: Option<usize>,
        message: String,
    },

    // The runner gave up waiting on the listed swarms
    WorkerTimeout {
        timeout: Duration,
        pending: Vec<usize>,
    },

    Io(std::io::Error),
    Csv(csv::Error),
    Json(serde_json::Error),
}

impl PsoError {
    pub fn configuration(message: impl Into<String>) -> Self {
        PsoError::Configuration {
            message: message.into(),
        }
    }

    pub(crate) fn worker_failure(
        worker: usize,
        swarm: Option<usize>,
        payload: Box<dyn Any + Send>,
    ) -> Self {
        // Panic payloads are almost always a &str or a String
        let message = if let Some(message) = payload.downcast_ref::<&str>() {
            message.to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "unknown panic payload".to_string()
        };

        PsoError::WorkerFailure {
            worker,
            swarm,
            message,
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, PsoError::Configuration { .. })
    }
}

impl std::fmt::Display for PsoError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            PsoError::Configuration { message } => write!(f, "ConfigurationError: {}", message),
            PsoError::ObjectiveEvaluation { position, source } => write!(
                f,
                "ObjectiveEvaluationError: objective failed at {:?}: {}",
                position, source
            ),
            PsoError::WorkerFailure {
                worker,
                swarm: Some(swarm),
                message,
            } => write!(
                f,
                "WorkerFailure: worker {} panicked while running swarm {}: {}",
                worker, swarm, message
            ),
            PsoError::WorkerFailure {
                worker,
                swarm: None,
                message,
            } => write!(f, "WorkerFailure: worker {} panicked: {}", worker, message),
            PsoError::WorkerTimeout { timeout, pending } => write!(
                f,
                "WorkerTimeout: swarms {:?} did not finish within {:?}",
                pending, timeout
            ),
            PsoError::Io(err) => write!(f, "IoError: {}", err),
            PsoError::Csv(err) => write!(f, "CsvError: {}", err),
            PsoError::Json(err) => write!(f, "JsonError: {}", err),
        }
    }
}

impl std::error::Error for PsoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PsoError::ObjectiveEvaluation { source, .. } => Some(source.as_ref()),
            PsoError::Io(err) => Some(err),
            PsoError::Csv(err) => Some(err),
            PsoError::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PsoError {
    fn from(err: std::io::Error) -> Self {
        PsoError::Io(err)
    }
}

impl From<csv::Error> for PsoError {
    fn from(err: csv::Error) -> Self {
        PsoError::Csv(err)
    }
}

impl From<serde_json::Error> for PsoError {
    fn from(err: serde_json::Error) -> Self {
        PsoError::Json(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_become_messages() {
        let err = PsoError::worker_failure(1, Some(3), Box::new("objective exploded"));
        assert_eq!(
            err.to_string(),
            "WorkerFailure: worker 1 panicked while running swarm 3: objective exploded"
        );

        let err = PsoError::worker_failure(0, None, Box::new(String::from("owned message")));
        assert_eq!(err.to_string(), "WorkerFailure: worker 0 panicked: owned message");
        match err {
            PsoError::WorkerFailure { message, .. } => assert_eq!(message, "owned message"),
            other => panic!("unexpected error: {}", other),
        }

        let err = PsoError::worker_failure(0, Some(0), Box::new(42_u32));
        match err {
            PsoError::WorkerFailure { message, .. } => assert_eq!(message, "unknown panic payload"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn objective_errors_keep_their_source() {
        use std::error::Error;

        let err = PsoError::ObjectiveEvaluation {
            position: vec![1.0, 2.0],
            source: "undefined at this point".into(),
        };
        assert!(err.to_string().contains("[1.0, 2.0]"));
        assert_eq!(err.source().unwrap().to_string(), "undefined at this point");
    }
}
