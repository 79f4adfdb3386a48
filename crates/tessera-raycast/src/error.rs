use tessera_tiles::TileError;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum RaycastError {
    /// The ray has a zero or non-finite direction, or a non-finite origin.
    #[error("invalid ray: {0}")]
    InvalidRay(&'static str),

    /// Geometry lookup for a candidate failed.
    #[error(transparent)]
    Tile(#[from] TileError),
}
