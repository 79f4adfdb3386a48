//! Folding of pending tile events before they are batched.
//!
//! Rules, per `(model, tile)` against the most recent pending event:
//! - DELETE after a pending CREATE or DELETE removes both.
//! - CREATE replaces a pending CREATE.
//! - UPDATE folds into a pending CREATE or UPDATE.
//!
//! A DELETE or CREATE also drops pending UPDATEs of the same tile, so the
//! queue holds at most a DELETE and a CREATE per live tile.

use tessera_tiles::{ModelId, TileId, TileRequest};

#[derive(Debug, Default)]
pub struct RequestCoalescer {
    pending: Vec<TileRequest>,
}

fn key(request: &TileRequest) -> Option<(ModelId, TileId)> {
    request.tile().map(|tile| (request.model(), tile))
}

impl RequestCoalescer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending(&self) -> &[TileRequest] {
        &self.pending
    }

    pub fn take(&mut self) -> Vec<TileRequest> {
        std::mem::take(&mut self.pending)
    }

    /// Drop everything queued for `model`.
    pub fn discard_model(&mut self, model: ModelId) -> usize {
        let before = self.pending.len();
        self.pending.retain(|r| r.model() != model);
        before - self.pending.len()
    }

    fn last_for(&self, target: (ModelId, TileId)) -> Option<usize> {
        self.pending.iter().rposition(|r| key(r) == Some(target))
    }

    fn drop_updates(&mut self, target: (ModelId, TileId)) {
        self.pending
            .retain(|r| !(matches!(r, TileRequest::Update(_)) && key(r) == Some(target)));
    }

    pub fn push(&mut self, request: TileRequest) {
        let Some(target) = key(&request) else {
            self.pending.push(request);
            return;
        };

        match request {
            TileRequest::Delete { .. } => {
                self.drop_updates(target);
                match self.last_for(target) {
                    Some(index) => {
                        self.pending.remove(index);
                    }
                    None => self.pending.push(request),
                }
            }
            TileRequest::Create(_) => {
                self.drop_updates(target);
                if let Some(index) = self.last_for(target)
                    && matches!(self.pending[index], TileRequest::Create(_))
                {
                    self.pending.remove(index);
                }
                self.pending.push(request);
            }
            TileRequest::Update(update) => match self.last_for(target).map(|i| &mut self.pending[i]) {
                Some(TileRequest::Create(create)) => {
                    create.visibility = update.visibility;
                    create.highlights = update.highlights;
                }
                Some(TileRequest::Update(pending)) => *pending = update,
                _ => self.pending.push(TileRequest::Update(update)),
            },
            TileRequest::Finish { .. } => self.pending.push(request),
        }
    }
}
