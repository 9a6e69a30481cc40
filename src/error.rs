use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrainError {
    #[error("cannot view {actual} elements as {batch_size} x 1 x {volume_shape:?}")]
    Reshape {
        batch_size: usize,
        volume_shape: [usize; 3],
        actual: usize,
    },

    #[error("batch size must be at least 1")]
    ZeroBatchSize,

    #[error("{0} dataset is empty")]
    EmptyDataset(&'static str),

    #[error("{phase} pass saw {actual} of {expected} samples")]
    IncompleteEpoch {
        phase: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{path}:{line}: {reason}")]
    Manifest {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("failed to load volume {path}: {reason}")]
    Volume { path: PathBuf, reason: String },

    #[error("checkpoint {path}: {reason}")]
    Checkpoint { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
