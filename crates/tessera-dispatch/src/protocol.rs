//! Messages exchanged between the controlling thread and worker threads.
//!
//! Every message carries a [`MessageClass`] tag. Requests flow controlling to
//! worker and are answered by a [`Response`] with the same request id; tile
//! batches, material announcements and unsolicited errors flow worker to
//! controlling without a request. Large buffers travel inside the messages
//! by move.

use std::fmt;

use glam::Mat4;
use tessera_math::{Aabb, Frustum};
use tessera_raycast::{RaycastHit, RaycastQuery};
use tessera_tiles::{
    GeometryEdit, ItemId, MaterialId, MeshBuilders, ModelId, Sample, TileRequest, View,
};

pub type RequestId = u64;

/// Stable message class tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageClass {
    CreateModel,
    DeleteModel,
    Execute,
    Raycast,
    FetchBoxes,
    RefreshView,
    /// A batch of tile events for one model.
    RecomputeMeshes,
    CreateMaterial,
    ThrowError,
}

impl MessageClass {
    pub const ALL: [MessageClass; 9] = [
        MessageClass::CreateModel,
        MessageClass::DeleteModel,
        MessageClass::Execute,
        MessageClass::Raycast,
        MessageClass::FetchBoxes,
        MessageClass::RefreshView,
        MessageClass::RecomputeMeshes,
        MessageClass::CreateMaterial,
        MessageClass::ThrowError,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            MessageClass::CreateModel => "CREATE_MODEL",
            MessageClass::DeleteModel => "DELETE_MODEL",
            MessageClass::Execute => "EXECUTE",
            MessageClass::Raycast => "RAYCAST",
            MessageClass::FetchBoxes => "FETCH_BOXES",
            MessageClass::RefreshView => "REFRESH_VIEW",
            MessageClass::RecomputeMeshes => "RECOMPUTE_MESHES",
            MessageClass::CreateMaterial => "CREATE_MATERIAL",
            MessageClass::ThrowError => "THROW_ERROR",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|class| class.tag() == tag)
    }
}

impl fmt::Display for MessageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

// ---------------------------------------------------------------------------
// Controlling -> worker
// ---------------------------------------------------------------------------

/// Positional argument of an EXECUTE call.
#[derive(Clone, Debug, PartialEq)]
pub enum ExecuteArg {
    Null,
    Bool(bool),
    Int(i64),
    Items(Vec<ItemId>),
    Edit(GeometryEdit),
}

/// Everything a worker needs to host a model. Moved into the worker.
pub struct CreateModel {
    pub model: ModelId,
    /// Model-to-world transform.
    pub transform: Mat4,
    pub samples: Vec<Sample>,
    pub item_count: usize,
    pub builders: MeshBuilders,
}

impl fmt::Debug for CreateModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateModel")
            .field("model", &self.model)
            .field("samples", &self.samples.len())
            .field("item_count", &self.item_count)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum RaycastKind {
    Ray(RaycastQuery),
    /// Selection rectangle as a frustum; `None` uses the configured policy.
    Rect {
        frustum: Frustum,
        fully_inside: Option<bool>,
    },
}

#[derive(Debug)]
pub enum RequestBody {
    CreateModel(Box<CreateModel>),
    DeleteModel { model: ModelId },
    Execute { model: ModelId, method: String, args: Vec<ExecuteArg> },
    Raycast { model: ModelId, kind: RaycastKind },
    FetchBoxes { model: ModelId, items: Option<Vec<ItemId>> },
    RefreshView { model: ModelId, view: View },
}

impl RequestBody {
    pub fn class(&self) -> MessageClass {
        match self {
            RequestBody::CreateModel(_) => MessageClass::CreateModel,
            RequestBody::DeleteModel { .. } => MessageClass::DeleteModel,
            RequestBody::Execute { .. } => MessageClass::Execute,
            RequestBody::Raycast { .. } => MessageClass::Raycast,
            RequestBody::FetchBoxes { .. } => MessageClass::FetchBoxes,
            RequestBody::RefreshView { .. } => MessageClass::RefreshView,
        }
    }

    pub fn model(&self) -> ModelId {
        match self {
            RequestBody::CreateModel(create) => create.model,
            RequestBody::DeleteModel { model }
            | RequestBody::Execute { model, .. }
            | RequestBody::Raycast { model, .. }
            | RequestBody::FetchBoxes { model, .. }
            | RequestBody::RefreshView { model, .. } => *model,
        }
    }
}

#[derive(Debug)]
pub struct Request {
    pub id: RequestId,
    pub body: RequestBody,
}

// ---------------------------------------------------------------------------
// Worker -> controlling
// ---------------------------------------------------------------------------

/// Memory held for one model on its worker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryUsage {
    /// Bytes of this model's materialized tiles.
    pub generated: usize,
    /// Bytes of the worker's template cache (shared by all its models).
    pub cache: usize,
    /// Bytes of per-item state.
    pub items: usize,
}

/// Successful result of a request.
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    Done,
    Count(usize),
    Items(Vec<ItemId>),
    Memory(MemoryUsage),
    Hit(Option<RaycastHit>),
    Boxes(Vec<Aabb>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub id: RequestId,
    pub class: MessageClass,
    /// Worker-side failures arrive as text.
    pub result: Result<Reply, String>,
}

/// Tile events of one model, in emission order.
#[derive(Clone, Debug, PartialEq)]
pub struct TileBatch {
    pub model: ModelId,
    pub requests: Vec<TileRequest>,
    /// Buffer bytes moved with this batch.
    pub transfer_bytes: usize,
}

impl TileBatch {
    pub fn new(model: ModelId, requests: Vec<TileRequest>) -> Self {
        let transfer_bytes = requests.iter().map(TileRequest::transfer_bytes).sum();
        Self {
            model,
            requests,
            transfer_bytes,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum WorkerMessage {
    Response(Response),
    RecomputeMeshes(TileBatch),
    /// First use of a material by a model's tiles.
    CreateMaterial { model: ModelId, material: MaterialId },
    ThrowError { model: Option<ModelId>, message: String },
}

impl WorkerMessage {
    pub fn class(&self) -> MessageClass {
        match self {
            WorkerMessage::Response(response) => response.class,
            WorkerMessage::RecomputeMeshes(_) => MessageClass::RecomputeMeshes,
            WorkerMessage::CreateMaterial { .. } => MessageClass::CreateMaterial,
            WorkerMessage::ThrowError { .. } => MessageClass::ThrowError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_round_trip() {
        for class in MessageClass::ALL {
            assert_eq!(MessageClass::from_tag(class.tag()), Some(class));
        }
        assert_eq!(MessageClass::from_tag("NOPE"), None);
    }

    #[test]
    fn test_response_class_routes_by_request() {
        let message = WorkerMessage::Response(Response {
            id: 4,
            class: MessageClass::FetchBoxes,
            result: Ok(Reply::Boxes(Vec::new())),
        });
        assert_eq!(message.class(), MessageClass::FetchBoxes);
        assert_eq!(
            WorkerMessage::RecomputeMeshes(TileBatch::new(ModelId(0), Vec::new())).class(),
            MessageClass::RecomputeMeshes
        );
    }
}
