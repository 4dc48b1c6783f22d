//! Error types shared by every sweep crate.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while preparing, running or recording a trial.
#[derive(Debug, Error)]
pub enum SweepError {
    /// Filesystem operation failed
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Parameters or input documents are inconsistent
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The simulation engine rejected its setup or failed while running
    #[error("Engine error: {0}")]
    Engine(String),

    /// A document could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The work queue store is unusable
    #[error("Queue error: {0}")]
    Queue(String),

    /// Test-mode uptime schedule or fixture is absent
    #[error("Missing fixture: {}", .0.display())]
    MissingFixture(PathBuf),

    /// Topology name outside the closed catalog
    #[error("Unknown topology: {0}")]
    UnknownTopology(String),
}

impl SweepError {
    /// Creates an I/O error tagged with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid input error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Creates an engine error.
    pub fn engine(msg: impl Into<String>) -> Self {
        Self::Engine(msg.into())
    }

    /// Creates a queue error.
    pub fn queue(msg: impl Into<String>) -> Self {
        Self::Queue(msg.into())
    }

    /// Creates a serialization error from any displayable cause.
    pub fn serialization(cause: impl std::fmt::Display) -> Self {
        Self::Serialization(cause.to_string())
    }
}
