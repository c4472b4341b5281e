use super::{EventListener, ListenerId};
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Contract shared by the synchronous and asynchronous dispatchers
pub trait EventDispatcher<E>: Send + Sync {
    /// Begin delivering events
    fn start(&self);

    /// Stop delivering events; queued events are kept until the next `start`
    fn stop(&self);

    /// Register a listener; listeners are called in registration order
    fn add_listener(&self, listener: Arc<dyn EventListener<E>>) -> ListenerId;

    /// Unregister a listener. Returns true if it was registered.
    fn remove_listener(&self, id: ListenerId) -> bool;

    /// Hand an event over for delivery
    fn dispatch(&self, event: E);

    /// Discard events that have not been delivered yet
    fn reset(&self);
}

/// Ordered listener list owned by a dispatcher
pub struct ListenerRegistry<E> {
    listeners: RwLock<Vec<(ListenerId, Arc<dyn EventListener<E>>)>>,
}

impl<E> ListenerRegistry<E> {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn add(&self, listener: Arc<dyn EventListener<E>>) -> ListenerId {
        let id = ListenerId::new();
        self.listeners.write().push((id, listener));
        tracing::debug!("{} added", id);
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        let removed = listeners.len() != before;
        if removed {
            tracing::debug!("{} removed", id);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Deliver `event` to every listener in registration order
    ///
    /// The list is snapshotted first so a listener may add or remove
    /// listeners. A panicking listener is logged and the rest still run.
    pub fn notify(&self, event: &E) {
        let snapshot: Vec<(ListenerId, Arc<dyn EventListener<E>>)> =
            self.listeners.read().iter().cloned().collect();

        for (id, listener) in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener.on_event(event))).is_err() {
                tracing::error!("{} panicked while handling an event", id);
            }
        }
    }
}

impl<E> Default for ListenerRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Calls every listener inline before `dispatch` returns
///
/// A slow listener blocks whoever dispatched, which for the controller is
/// the protocol loop. Mostly useful in tests.
pub struct SynchronousEventDispatcher<E> {
    registry: ListenerRegistry<E>,
}

impl<E> SynchronousEventDispatcher<E> {
    pub fn new() -> Self {
        Self {
            registry: ListenerRegistry::new(),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.registry.len()
    }
}

impl<E> Default for SynchronousEventDispatcher<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Send> EventDispatcher<E> for SynchronousEventDispatcher<E> {
    fn start(&self) {}

    fn stop(&self) {}

    fn add_listener(&self, listener: Arc<dyn EventListener<E>>) -> ListenerId {
        self.registry.add(listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.registry.remove(id)
    }

    fn dispatch(&self, event: E) {
        self.registry.notify(&event);
    }

    fn reset(&self) {}
}
