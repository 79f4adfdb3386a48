use std::time::Duration;

use tessera_raycast::RaycastError;
use tessera_tiles::{ModelId, TileError};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum DispatchError {
    /// The model was never created, or was already deleted.
    #[error("model {0:?} is not registered")]
    UnknownModel(ModelId),

    #[error("model {0:?} already exists")]
    DuplicateModel(ModelId),

    #[error("worker thread {0} does not exist")]
    UnknownThread(usize),

    #[error("unknown execute method `{0}`")]
    UnknownMethod(String),

    #[error("bad arguments for `{method}`: {reason}")]
    BadArguments { method: String, reason: String },

    /// An error reported by a worker, carried across the channel as text.
    #[error("worker error: {0}")]
    Worker(String),

    #[error("worker channel closed")]
    Disconnected,

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),

    #[error(transparent)]
    Tile(#[from] TileError),

    #[error(transparent)]
    Raycast(#[from] RaycastError),
}
