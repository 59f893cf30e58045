use safepool_core::{PoolError, ValidationError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("pool construction failed: {0}")]
    Pool(#[from] PoolError),

    #[error("pool invariant broken after operation {op}: {source}")]
    Invariant {
        op: usize,
        #[source]
        source: ValidationError,
    },

    #[error("operation {op}: pool accepted foreign pointer {offset:?}")]
    ForeignFreeAccepted { op: usize, offset: Option<usize> },

    #[error("operation {op}: block at {offset} was overwritten while live")]
    Corruption { op: usize, offset: usize },

    #[error("operation {op}: pool declined a block it handed out at {offset}")]
    FreeDeclined { op: usize, offset: usize },

    #[error("{name} probability {value} is outside [0, 1]")]
    InvalidProbability { name: &'static str, value: f64 },

    #[error("state hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },
}
