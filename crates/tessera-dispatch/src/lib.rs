//! Worker pool and message protocol for tile streaming.
//!
//! The controlling thread owns a [`Dispatcher`]. Each model is hosted by
//! exactly one worker thread, which runs its [`tessera_tiles::TileScheduler`],
//! answers requests and streams batched tile events back. The controlling
//! side mirrors those events into [`RenderTiles`] for drawing.

pub mod batcher;
pub mod coalescer;
pub mod dispatcher;
pub mod error;
pub mod execute;
pub mod protocol;
pub mod render_tiles;
pub mod router;
mod worker;

pub use batcher::RequestBatcher;
pub use coalescer::RequestCoalescer;
pub use dispatcher::{Dispatcher, Pending};
pub use error::DispatchError;
pub use protocol::{
    CreateModel, ExecuteArg, MemoryUsage, MessageClass, RaycastKind, Reply, Request, RequestBody, RequestId,
    Response, TileBatch, WorkerMessage,
};
pub use render_tiles::{DrawGroup, RenderTile, RenderTiles};
pub use router::{MessageHandler, MessageRouter};
