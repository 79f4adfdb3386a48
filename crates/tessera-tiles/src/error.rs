//! Error types for tiling, caching and scheduling.

use thiserror::Error;

use crate::sample::{RepresentationId, SampleId, TileId};

/// Errors raised by the tile engine.
///
/// Malformed-state variants mean a scheduler invariant was violated; callers
/// should treat them as fatal for the model rather than retry.
#[derive(Debug, Error, PartialEq)]
pub enum TileError {
    /// A tile is missing its visibility or highlight track.
    #[error("tile {0:?} is malformed: missing `{1}` track")]
    MalformedTile(TileId, &'static str),

    /// A tile or template was expected to hold buffers but does not.
    #[error("tile {0:?} has no buffers where they were expected")]
    MissingBuffers(TileId),

    /// A generated segment does not match the size recorded for its slot.
    #[error("tile {tile:?} slot {slot}: expected {expected} vertices, got {actual}")]
    SlotSizeMismatch {
        /// Tile being written.
        tile: TileId,
        /// Slot index inside the tile.
        slot: u32,
        /// Vertex count reserved during sizing.
        expected: u32,
        /// Vertex count produced by the builder.
        actual: u32,
    },

    /// No registered builder knows this representation.
    #[error("unsupported representation {0:?}")]
    UnsupportedRepresentation(RepresentationId),

    /// The requested combination cannot produce renderable geometry.
    #[error("unsupported input: {0}")]
    UnsupportedInput(String),

    /// A sample id was not found in the model.
    #[error("unknown sample {0:?}")]
    UnknownSample(SampleId),

    /// A tile id was not found in the scheduler.
    #[error("unknown tile {0:?}")]
    UnknownTile(TileId),
}
