//! Error taxonomy for the pointer-chase harness

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChaseError {
    /// Array too small to form a cycle, or otherwise unusable sweep parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Coverage validation found sub-cycles or out-of-range successors
    #[error("Corrupt permutation: visited {visited} of {n} indices")]
    CorruptPermutation { n: usize, visited: usize },

    /// Profiler could not be launched, timed out, or rejected the events
    #[error("Profiler unavailable: {0}")]
    ProfilerUnavailable(String),

    /// Output sink rejected a row; fatal for the sweep
    #[error("Sink write failure: {0}")]
    SinkWrite(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChaseError {
    /// Errors that end the whole sweep rather than a single trial
    pub fn is_fatal(&self) -> bool {
        matches!(self, ChaseError::SinkWrite(_) | ChaseError::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, ChaseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corrupt_permutation_message() {
        let err = ChaseError::CorruptPermutation { n: 10, visited: 4 };
        assert_eq!(
            err.to_string(),
            "Corrupt permutation: visited 4 of 10 indices"
        );
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_sink_errors_are_fatal() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err = ChaseError::SinkWrite(csv::Error::from(io));
        assert!(err.is_fatal());
        assert!(!ChaseError::ProfilerUnavailable("timeout".into()).is_fatal());
    }
}
