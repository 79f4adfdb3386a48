//! Message routing on the controlling side: a fixed table from
//! [`MessageClass`] to handler, so a new message class only adds an entry.

use rustc_hash::FxHashMap;
use tracing::warn;

use crate::protocol::{MessageClass, WorkerMessage};

/// Handler for one message class, run against controller state `C`.
pub trait MessageHandler<C>: Send {
    fn handle(&self, state: &mut C, message: WorkerMessage);
}

impl<C, F> MessageHandler<C> for F
where
    F: Fn(&mut C, WorkerMessage) + Send,
{
    fn handle(&self, state: &mut C, message: WorkerMessage) {
        self(state, message);
    }
}

pub struct MessageRouter<C> {
    handlers: FxHashMap<MessageClass, Box<dyn MessageHandler<C>>>,
}

impl<C> MessageRouter<C> {
    pub fn new() -> Self {
        Self {
            handlers: FxHashMap::default(),
        }
    }

    /// Register `handler` for `class`, replacing any previous one.
    pub fn register<H: MessageHandler<C> + 'static>(&mut self, class: MessageClass, handler: H) {
        self.handlers.insert(class, Box::new(handler));
    }

    /// Returns `false` when no handler is registered and the message was dropped.
    pub fn route(&self, state: &mut C, message: WorkerMessage) -> bool {
        let class = message.class();
        match self.handlers.get(&class) {
            Some(handler) => {
                handler.handle(state, message);
                true
            }
            None => {
                warn!(%class, "no handler registered, dropping message");
                false
            }
        }
    }

    pub fn registered_classes(&self) -> impl Iterator<Item = &MessageClass> {
        self.handlers.keys()
    }
}

impl<C> Default for MessageRouter<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use tessera_tiles::{MaterialId, ModelId};

    use super::*;
    use crate::protocol::TileBatch;

    #[derive(Default)]
    struct Seen {
        materials: Vec<MaterialId>,
        batches: usize,
    }

    fn router() -> MessageRouter<Seen> {
        let mut router = MessageRouter::new();
        router.register(MessageClass::CreateMaterial, |seen: &mut Seen, message: WorkerMessage| {
            if let WorkerMessage::CreateMaterial { material, .. } = message {
                seen.materials.push(material);
            }
        });
        router.register(MessageClass::RecomputeMeshes, |seen: &mut Seen, _: WorkerMessage| {
            seen.batches += 1
        });
        router
    }

    #[test]
    fn test_routes_by_class() {
        let router = router();
        let mut seen = Seen::default();
        assert!(router.route(
            &mut seen,
            WorkerMessage::CreateMaterial {
                model: ModelId(0),
                material: MaterialId(7),
            },
        ));
        assert!(router.route(
            &mut seen,
            WorkerMessage::RecomputeMeshes(TileBatch::new(ModelId(0), Vec::new())),
        ));
        assert_eq!(seen.materials, vec![MaterialId(7)]);
        assert_eq!(seen.batches, 1);
    }

    #[test]
    fn test_unregistered_class_is_dropped() {
        let router = router();
        let mut seen = Seen::default();
        let handled = router.route(
            &mut seen,
            WorkerMessage::ThrowError {
                model: None,
                message: "boom".into(),
            },
        );
        assert!(!handled);
        assert_eq!(router.registered_classes().count(), 2);
    }
}
