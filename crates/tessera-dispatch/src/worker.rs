//! Worker thread: owns every model assigned to it along with the shared
//! template cache, answers requests in arrival order and advances the tile
//! schedulers on a fixed tick.

use std::collections::BTreeMap;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, select};
use rustc_hash::FxHashSet;
use tessera_config::Config;
use tessera_raycast::{BoxController, RaycastEngine, RaycastScene};
use tessera_tiles::{
    ItemState, MaterialId, MeshBuilders, ModelId, TileRequest, TileScheduler, WorkerRuntime,
};
use tracing::{debug, debug_span, error, info, trace, warn};

use crate::batcher::RequestBatcher;
use crate::error::DispatchError;
use crate::execute::{ExecuteContext, execute};
use crate::protocol::{CreateModel, RaycastKind, Reply, Request, RequestBody, Response, WorkerMessage};

/// Everything a worker keeps for one model.
pub(crate) struct ModelState {
    pub scheduler: TileScheduler,
    pub items: ItemState,
    pub boxes: BoxController,
    pub builders: MeshBuilders,
    /// Materials already announced to the controlling side.
    pub materials: FxHashSet<MaterialId>,
}

pub(crate) fn spawn_worker(
    index: usize,
    config: Config,
    inbox: Receiver<Request>,
    outbox: Sender<WorkerMessage>,
) -> Result<JoinHandle<()>, DispatchError> {
    thread::Builder::new()
        .name(format!("tessera-worker-{index}"))
        .spawn(move || Worker::new(index, config, outbox).run(inbox))
        .map_err(|err| DispatchError::Spawn(err.to_string()))
}

struct Worker {
    index: usize,
    config: Config,
    runtime: WorkerRuntime,
    models: BTreeMap<ModelId, ModelState>,
    batcher: RequestBatcher,
    engine: RaycastEngine,
    outbox: Sender<WorkerMessage>,
    /// Which model gets the first share of the next tick's budget.
    rotation: usize,
}

impl Worker {
    fn new(index: usize, config: Config, outbox: Sender<WorkerMessage>) -> Self {
        Self {
            index,
            runtime: WorkerRuntime::from_config(&config.cache),
            models: BTreeMap::new(),
            batcher: RequestBatcher::new(&config.batching, Instant::now()),
            engine: RaycastEngine::new(config.raycast.clone()),
            outbox,
            rotation: 0,
            config,
        }
    }

    fn run(mut self, inbox: Receiver<Request>) {
        let ticker = crossbeam_channel::tick(self.config.scheduler.tick_interval());
        info!(worker = self.index, "worker started");
        loop {
            select! {
                recv(inbox) -> request => match request {
                    Ok(request) => self.handle(request),
                    Err(_) => break,
                },
                recv(ticker) -> _ => self.tick(Instant::now()),
            }
        }
        for batch in self.batcher.flush_all() {
            self.send(WorkerMessage::RecomputeMeshes(batch));
        }
        info!(worker = self.index, models = self.models.len(), "worker stopped");
    }

    fn send(&self, message: WorkerMessage) {
        if self.outbox.send(message).is_err() {
            debug!(worker = self.index, "controlling side disconnected");
        }
    }

    // --- Requests ---

    fn handle(&mut self, request: Request) {
        let class = request.body.class();
        let model = request.body.model();
        let _span = debug_span!("request", worker = self.index, %class, model = model.0).entered();

        let result = self.dispatch(request.body).map_err(|err| {
            warn!(%err, "request failed");
            err.to_string()
        });
        self.send(WorkerMessage::Response(Response {
            id: request.id,
            class,
            result,
        }));
    }

    fn dispatch(&mut self, body: RequestBody) -> Result<Reply, DispatchError> {
        match body {
            RequestBody::CreateModel(create) => self.create_model(*create),
            RequestBody::DeleteModel { model } => {
                self.delete_model(model);
                Ok(Reply::Done)
            }
            RequestBody::Execute { model, method, args } => {
                let state = self.models.get_mut(&model).ok_or(DispatchError::UnknownModel(model))?;
                execute(
                    &mut ExecuteContext {
                        model: state,
                        runtime: &mut self.runtime,
                        config: &self.config,
                    },
                    method,
                    args,
                )
            }
            RequestBody::Raycast { model, kind } => {
                let state = self.models.get(&model).ok_or(DispatchError::UnknownModel(model))?;
                let scene = RaycastScene {
                    boxes: &state.boxes,
                    scheduler: &state.scheduler,
                    items: &state.items,
                    builders: &state.builders,
                };
                match kind {
                    RaycastKind::Ray(query) => Ok(Reply::Hit(self.engine.raycast(&scene, &mut self.runtime, &query)?)),
                    RaycastKind::Rect { frustum, fully_inside } => {
                        Ok(Reply::Items(self.engine.rect_raycast(&scene, &frustum, fully_inside)))
                    }
                }
            }
            RequestBody::FetchBoxes { model, items } => {
                let state = self.models.get(&model).ok_or(DispatchError::UnknownModel(model))?;
                Ok(Reply::Boxes(state.boxes.fetch_boxes(items.as_deref())))
            }
            RequestBody::RefreshView { model, view } => {
                match self.models.get_mut(&model) {
                    Some(state) => state.scheduler.set_view(view, &mut self.runtime),
                    None => debug!(model = model.0, "view for unknown model ignored"),
                }
                Ok(Reply::Done)
            }
        }
    }

    fn create_model(&mut self, create: CreateModel) -> Result<Reply, DispatchError> {
        let CreateModel {
            model,
            transform,
            samples,
            item_count,
            builders,
        } = create;
        if self.models.contains_key(&model) {
            return Err(DispatchError::DuplicateModel(model));
        }
        let item_count = samples
            .iter()
            .map(|s| s.item.0 as usize + 1)
            .max()
            .unwrap_or(0)
            .max(item_count);

        let scheduler = TileScheduler::new(model, transform, samples, &builders, &self.config)?;
        let boxes = BoxController::from_samples(scheduler.samples());
        info!(
            worker = self.index,
            model = model.0,
            tiles = scheduler.tiles().count(),
            items = item_count,
            "model created"
        );
        self.models.insert(
            model,
            ModelState {
                scheduler,
                items: ItemState::new(item_count),
                boxes,
                builders,
                materials: FxHashSet::default(),
            },
        );
        Ok(Reply::Done)
    }

    fn delete_model(&mut self, model: ModelId) {
        match self.models.remove(&model) {
            Some(mut state) => {
                state.scheduler.dispose(&mut self.runtime);
                let dropped = self.batcher.discard(model);
                info!(worker = self.index, model = model.0, dropped, "model deleted");
            }
            None => debug!(model = model.0, "delete of unknown model ignored"),
        }
    }

    // --- Tick ---

    fn tick(&mut self, now: Instant) {
        let ids: Vec<ModelId> = self.models.keys().copied().collect();
        if !ids.is_empty() {
            let first = self.rotation % ids.len();
            self.rotation = self.rotation.wrapping_add(1);
            for &model in ids[first..].iter().chain(&ids[..first]) {
                self.update_model(model, now);
            }
        }
        for batch in self.batcher.tick(Instant::now()) {
            self.send(WorkerMessage::RecomputeMeshes(batch));
        }
    }

    fn update_model(&mut self, model: ModelId, started: Instant) {
        let Some(state) = self.models.get_mut(&model) else {
            return;
        };
        if state.scheduler.is_finished() || state.scheduler.view().is_none() {
            return;
        }

        let mut outgoing = Vec::new();
        match state
            .scheduler
            .update(&mut self.runtime, &state.builders, &state.items, started)
        {
            Ok(stats) => {
                trace!(
                    model = model.0,
                    processed = stats.processed,
                    created = stats.created,
                    updated = stats.updated,
                    deleted = stats.deleted,
                    "scheduler tick"
                );
                for request in state.scheduler.take_requests() {
                    if let TileRequest::Create(create) = &request
                        && state.materials.insert(create.material)
                    {
                        outgoing.push(WorkerMessage::CreateMaterial {
                            model,
                            material: create.material,
                        });
                    }
                    if let Some(batch) = self.batcher.push(request) {
                        outgoing.push(WorkerMessage::RecomputeMeshes(batch));
                    }
                }
            }
            Err(err) => {
                error!(worker = self.index, model = model.0, %err, "scheduler failed, dropping model");
                self.delete_model(model);
                outgoing.push(WorkerMessage::ThrowError {
                    model: Some(model),
                    message: err.to_string(),
                });
            }
        }
        for message in outgoing {
            self.send(message);
        }
    }
}
