//! Controlling-thread side of the worker pool.
//!
//! Models are assigned to the least-loaded worker when created and stay
//! there until deleted. Every operation posts a request and returns a
//! [`Pending`] reply handle keyed by request id; nothing here waits on a
//! worker. [`Dispatcher::poll`] drains worker messages once per frame and
//! routes them: replies resolve their handles, tile batches update the
//! model's [`RenderTiles`].

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use glam::Mat4;
use rustc_hash::FxHashMap;
use tessera_config::Config;
use tessera_math::Frustum;
use tessera_raycast::RaycastQuery;
use tessera_tiles::{GeometryEdit, ItemId, MaterialId, MeshBuilders, ModelId, Sample, View};
use tracing::{debug, error, info, warn};

use crate::error::DispatchError;
use crate::execute;
use crate::protocol::{
    CreateModel, ExecuteArg, MessageClass, RaycastKind, Reply, Request, RequestBody, RequestId, WorkerMessage,
};
use crate::render_tiles::RenderTiles;
use crate::router::MessageRouter;
use crate::worker::spawn_worker;

type ReplySender = Sender<Result<Reply, DispatchError>>;

/// Reply handle for one posted request.
#[derive(Debug)]
pub struct Pending {
    id: RequestId,
    receiver: Receiver<Result<Reply, DispatchError>>,
}

impl Pending {
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// The reply, once [`Dispatcher::poll`] has routed it.
    pub fn try_take(&self) -> Option<Result<Reply, DispatchError>> {
        self.receiver.try_recv().ok()
    }
}

// ---------------------------------------------------------------------------
// Controller state and handlers
// ---------------------------------------------------------------------------

/// State the routed handlers act on.
struct ControllerState {
    /// Model to worker index.
    assignments: DashMap<ModelId, usize>,
    resolvers: DashMap<RequestId, ReplySender>,
    tiles: FxHashMap<ModelId, RenderTiles>,
    materials: BTreeSet<(ModelId, MaterialId)>,
    errors: Vec<(Option<ModelId>, String)>,
}

fn resolve_response(state: &mut ControllerState, message: WorkerMessage) {
    let WorkerMessage::Response(response) = message else {
        return;
    };
    let Some((_, resolver)) = state.resolvers.remove(&response.id) else {
        debug!(id = response.id, class = %response.class, "reply without a waiting caller");
        return;
    };
    let result = response.result.map_err(|message| {
        error!(id = response.id, class = %response.class, %message, "worker request failed");
        DispatchError::Worker(message)
    });
    // The caller may have dropped its handle.
    let _ = resolver.send(result);
}

fn apply_tile_batch(state: &mut ControllerState, message: WorkerMessage) {
    let WorkerMessage::RecomputeMeshes(batch) = message else {
        return;
    };
    if !state.assignments.contains_key(&batch.model) {
        debug!(model = batch.model.0, "tile batch for deleted model ignored");
        return;
    }
    state
        .tiles
        .entry(batch.model)
        .or_insert_with(|| RenderTiles::new(batch.model))
        .apply_batch(batch);
}

fn create_material(state: &mut ControllerState, message: WorkerMessage) {
    let WorkerMessage::CreateMaterial { model, material } = message else {
        return;
    };
    if state.assignments.contains_key(&model) && state.materials.insert((model, material)) {
        debug!(model = model.0, material = material.0, "material created");
    }
}

fn report_error(state: &mut ControllerState, message: WorkerMessage) {
    let WorkerMessage::ThrowError { model, message } = message else {
        return;
    };
    error!(model = model.map(|m| m.0), %message, "worker error");
    state.errors.push((model, message));
}

fn controller_router() -> MessageRouter<ControllerState> {
    let mut router = MessageRouter::new();
    for class in [
        MessageClass::CreateModel,
        MessageClass::DeleteModel,
        MessageClass::Execute,
        MessageClass::Raycast,
        MessageClass::FetchBoxes,
        MessageClass::RefreshView,
    ] {
        router.register(class, resolve_response);
    }
    router.register(MessageClass::RecomputeMeshes, apply_tile_batch);
    router.register(MessageClass::CreateMaterial, create_material);
    router.register(MessageClass::ThrowError, report_error);
    router
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

struct WorkerHandle {
    sender: Option<Sender<Request>>,
    receiver: Receiver<WorkerMessage>,
    thread: Option<JoinHandle<()>>,
    /// Models assigned, including ones whose creation is still in flight.
    models: AtomicUsize,
}

pub struct Dispatcher {
    workers: Vec<WorkerHandle>,
    next_request: AtomicU64,
    router: MessageRouter<ControllerState>,
    state: ControllerState,
}

impl Dispatcher {
    /// Spawn one worker per core beyond the configured reserve.
    pub fn new(config: &Config) -> Result<Self, DispatchError> {
        let threads = config.workers.thread_count(num_cpus::get());
        Self::with_threads(threads, config)
    }

    pub fn with_threads(threads: usize, config: &Config) -> Result<Self, DispatchError> {
        let threads = threads.max(1);
        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads {
            let (request_tx, request_rx) = unbounded();
            let (message_tx, message_rx) = unbounded();
            let thread = spawn_worker(index, config.clone(), request_rx, message_tx)?;
            workers.push(WorkerHandle {
                sender: Some(request_tx),
                receiver: message_rx,
                thread: Some(thread),
                models: AtomicUsize::new(0),
            });
        }
        info!(threads, "dispatcher started");
        Ok(Self {
            workers,
            next_request: AtomicU64::new(1),
            router: controller_router(),
            state: ControllerState {
                assignments: DashMap::new(),
                resolvers: DashMap::new(),
                tiles: FxHashMap::default(),
                materials: BTreeSet::new(),
                errors: Vec::new(),
            },
        })
    }

    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }

    /// Models currently assigned to worker `thread`.
    pub fn model_count(&self, thread: usize) -> Result<usize, DispatchError> {
        self.workers
            .get(thread)
            .map(|w| w.models.load(Ordering::Acquire))
            .ok_or(DispatchError::UnknownThread(thread))
    }

    pub fn thread_of(&self, model: ModelId) -> Result<usize, DispatchError> {
        self.state
            .assignments
            .get(&model)
            .map(|entry| *entry)
            .ok_or(DispatchError::UnknownModel(model))
    }

    /// Reserve the least-loaded worker for `model`. The count is taken
    /// before the worker has built the model.
    fn assign(&self, model: ModelId) -> Result<usize, DispatchError> {
        match self.state.assignments.entry(model) {
            Entry::Occupied(_) => Err(DispatchError::DuplicateModel(model)),
            Entry::Vacant(slot) => {
                let (thread, worker) = self
                    .workers
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, w)| w.models.load(Ordering::Acquire))
                    .ok_or(DispatchError::UnknownThread(0))?;
                worker.models.fetch_add(1, Ordering::AcqRel);
                slot.insert(thread);
                Ok(thread)
            }
        }
    }

    fn unassign(&self, model: ModelId) -> Result<usize, DispatchError> {
        let (_, thread) = self
            .state
            .assignments
            .remove(&model)
            .ok_or(DispatchError::UnknownModel(model))?;
        if let Some(worker) = self.workers.get(thread) {
            worker.models.fetch_sub(1, Ordering::AcqRel);
        }
        Ok(thread)
    }

    fn post(&self, thread: usize, body: RequestBody) -> Result<Pending, DispatchError> {
        let sender = self
            .workers
            .get(thread)
            .ok_or(DispatchError::UnknownThread(thread))?
            .sender
            .as_ref()
            .ok_or(DispatchError::Disconnected)?;
        let id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = bounded(1);
        self.state.resolvers.insert(id, reply_tx);
        if sender.send(Request { id, body }).is_err() {
            self.state.resolvers.remove(&id);
            return Err(DispatchError::Disconnected);
        }
        Ok(Pending { id, receiver: reply_rx })
    }

    fn post_to_model(&self, model: ModelId, body: RequestBody) -> Result<Pending, DispatchError> {
        let thread = self.thread_of(model)?;
        self.post(thread, body)
    }

    // --- Model lifecycle ---

    pub fn create_model(
        &self,
        model: ModelId,
        transform: Mat4,
        samples: Vec<Sample>,
        item_count: usize,
        builders: MeshBuilders,
    ) -> Result<Pending, DispatchError> {
        let thread = self.assign(model)?;
        debug!(model = model.0, thread, samples = samples.len(), "assigning model");
        let body = RequestBody::CreateModel(Box::new(CreateModel {
            model,
            transform,
            samples,
            item_count,
            builders,
        }));
        self.post(thread, body).inspect_err(|_| {
            let _ = self.unassign(model);
        })
    }

    /// Drop the model here at once; the worker frees its state when the
    /// request arrives. Tile batches still in flight are ignored.
    pub fn delete_model(&mut self, model: ModelId) -> Result<Pending, DispatchError> {
        let thread = self.unassign(model)?;
        self.state.tiles.remove(&model);
        self.state.materials.retain(|(owner, _)| *owner != model);
        self.post(thread, RequestBody::DeleteModel { model })
    }

    pub fn refresh_view(&self, model: ModelId, view: View) -> Result<Pending, DispatchError> {
        self.post_to_model(model, RequestBody::RefreshView { model, view })
    }

    // --- Queries ---

    pub fn execute(&self, model: ModelId, method: &str, args: Vec<ExecuteArg>) -> Result<Pending, DispatchError> {
        self.post_to_model(
            model,
            RequestBody::Execute {
                model,
                method: method.to_string(),
                args,
            },
        )
    }

    pub fn set_visible(&self, model: ModelId, items: Vec<ItemId>, visible: bool) -> Result<Pending, DispatchError> {
        self.execute(
            model,
            execute::SET_VISIBLE,
            vec![ExecuteArg::Items(items), ExecuteArg::Bool(visible)],
        )
    }

    /// `preserve` of `None` uses the worker's configured merge policy.
    pub fn set_highlight(
        &self,
        model: ModelId,
        items: Vec<ItemId>,
        highlight: u16,
        preserve: Option<bool>,
    ) -> Result<Pending, DispatchError> {
        self.execute(
            model,
            execute::SET_HIGHLIGHT,
            vec![
                ExecuteArg::Items(items),
                ExecuteArg::Int(i64::from(highlight)),
                preserve.map_or(ExecuteArg::Null, ExecuteArg::Bool),
            ],
        )
    }

    pub fn reset_highlight(&self, model: ModelId, items: Option<Vec<ItemId>>) -> Result<Pending, DispatchError> {
        self.execute(
            model,
            execute::RESET_HIGHLIGHT,
            vec![items.map_or(ExecuteArg::Null, ExecuteArg::Items)],
        )
    }

    pub fn visible_items(&self, model: ModelId) -> Result<Pending, DispatchError> {
        self.execute(model, execute::GET_VISIBLE_ITEMS, Vec::new())
    }

    pub fn items_with_geometry(&self, model: ModelId) -> Result<Pending, DispatchError> {
        self.execute(model, execute::GET_ITEMS_WITH_GEOMETRY, Vec::new())
    }

    pub fn memory_usage(&self, model: ModelId) -> Result<Pending, DispatchError> {
        self.execute(model, execute::GET_MEMORY_USAGE, Vec::new())
    }

    pub fn edit_geometry(&self, model: ModelId, edit: GeometryEdit) -> Result<Pending, DispatchError> {
        self.execute(model, execute::EDIT_GEOMETRY, vec![ExecuteArg::Edit(edit)])
    }

    pub fn raycast(&self, model: ModelId, query: RaycastQuery) -> Result<Pending, DispatchError> {
        self.post_to_model(
            model,
            RequestBody::Raycast {
                model,
                kind: RaycastKind::Ray(query),
            },
        )
    }

    pub fn rect_raycast(
        &self,
        model: ModelId,
        frustum: Frustum,
        fully_inside: Option<bool>,
    ) -> Result<Pending, DispatchError> {
        self.post_to_model(
            model,
            RequestBody::Raycast {
                model,
                kind: RaycastKind::Rect { frustum, fully_inside },
            },
        )
    }

    /// Local-space item boxes; `None` fetches every item with geometry.
    pub fn fetch_boxes(&self, model: ModelId, items: Option<Vec<ItemId>>) -> Result<Pending, DispatchError> {
        self.post_to_model(model, RequestBody::FetchBoxes { model, items })
    }

    // --- Controlling-side state ---

    /// Route every message the workers have sent so far. Returns how many.
    pub fn poll(&mut self) -> usize {
        let mut routed = 0;
        for worker in &self.workers {
            while let Ok(message) = worker.receiver.try_recv() {
                self.router.route(&mut self.state, message);
                routed += 1;
            }
        }
        routed
    }

    /// Poll until `pending` resolves or `timeout` passes.
    ///
    /// Blocks the calling thread; for tools and tests rather than a frame loop.
    pub fn wait(&mut self, pending: &Pending, timeout: Duration) -> Result<Reply, DispatchError> {
        let deadline = Instant::now() + timeout;
        loop {
            self.poll();
            if let Some(result) = pending.try_take() {
                return result;
            }
            if Instant::now() >= deadline {
                warn!(id = pending.id, ?timeout, "reply timed out");
                return Err(DispatchError::Timeout(timeout));
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    pub fn render_tiles(&self, model: ModelId) -> Option<&RenderTiles> {
        self.state.tiles.get(&model)
    }

    pub fn materials(&self, model: ModelId) -> Vec<MaterialId> {
        self.state
            .materials
            .iter()
            .filter(|(owner, _)| *owner == model)
            .map(|(_, material)| *material)
            .collect()
    }

    /// Errors workers reported without a request to attach them to.
    pub fn take_errors(&mut self) -> Vec<(Option<ModelId>, String)> {
        std::mem::take(&mut self.state.errors)
    }

    /// Close every worker channel and join the threads.
    pub fn shutdown(&mut self) {
        for worker in &mut self.workers {
            worker.sender.take();
        }
        for worker in &mut self.workers {
            if let Some(thread) = worker.thread.take()
                && thread.join().is_err()
            {
                error!("worker thread panicked");
            }
        }
        self.state.resolvers.clear();
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
