use super::{EventDispatcher, EventListener, ListenerId, ListenerRegistry};
use crossbeam_channel::{select, unbounded, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

struct Consumer {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Delivers events from a single dedicated consumer thread
///
/// `dispatch` pushes onto an unbounded FIFO queue and returns immediately, so
/// producers never wait on listener work. The consumer drains the queue in
/// order. `stop` interrupts the consumer's wait; whatever is still queued
/// stays there until `start` is called again or `reset` discards it.
pub struct AsyncEventDispatcher<E> {
    registry: Arc<ListenerRegistry<E>>,
    queue_tx: Sender<E>,
    queue_rx: Receiver<E>,
    consumer: Mutex<Option<Consumer>>,
}

impl<E: Send + 'static> AsyncEventDispatcher<E> {
    pub fn new() -> Self {
        let (queue_tx, queue_rx) = unbounded();
        Self {
            registry: Arc::new(ListenerRegistry::new()),
            queue_tx,
            queue_rx,
            consumer: Mutex::new(None),
        }
    }

    /// Number of events waiting for delivery
    pub fn queued(&self) -> usize {
        self.queue_rx.len()
    }

    pub fn is_running(&self) -> bool {
        self.consumer.lock().is_some()
    }

    pub fn listener_count(&self) -> usize {
        self.registry.len()
    }

    fn run(registry: Arc<ListenerRegistry<E>>, queue: Receiver<E>, stop: Receiver<()>) {
        tracing::debug!("Event consumer started");
        loop {
            match stop.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => break,
                Err(TryRecvError::Empty) => {}
            }

            select! {
                recv(stop) -> _ => break,
                recv(queue) -> event => match event {
                    Ok(event) => registry.notify(&event),
                    Err(_) => break,
                },
            }
        }
        tracing::debug!("Event consumer stopped");
    }
}

impl<E: Send + 'static> Default for AsyncEventDispatcher<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Send + 'static> EventDispatcher<E> for AsyncEventDispatcher<E> {
    fn start(&self) {
        let mut consumer = self.consumer.lock();
        if consumer.is_some() {
            return;
        }

        let (stop_tx, stop_rx) = unbounded();
        let registry = self.registry.clone();
        let queue = self.queue_rx.clone();
        let spawned = thread::Builder::new()
            .name("event-dispatcher".into())
            .spawn(move || Self::run(registry, queue, stop_rx));

        match spawned {
            Ok(handle) => *consumer = Some(Consumer { stop_tx, handle }),
            Err(e) => tracing::error!("Failed to spawn event consumer: {}", e),
        }
    }

    fn stop(&self) {
        let Some(consumer) = self.consumer.lock().take() else {
            return;
        };

        let _ = consumer.stop_tx.send(());
        // A listener may stop its own dispatcher; joining would deadlock.
        if consumer.handle.thread().id() != thread::current().id()
            && consumer.handle.join().is_err()
        {
            tracing::error!("Event consumer thread panicked");
        }
    }

    fn add_listener(&self, listener: Arc<dyn EventListener<E>>) -> ListenerId {
        self.registry.add(listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.registry.remove(id)
    }

    fn dispatch(&self, event: E) {
        // Both ends live in self, so the channel cannot be disconnected here.
        if self.queue_tx.send(event).is_err() {
            tracing::warn!("Event queue closed, event dropped");
        }
    }

    fn reset(&self) {
        let dropped = self.queue_rx.try_iter().count();
        if dropped > 0 {
            tracing::debug!("Discarded {} queued events", dropped);
        }
    }
}

impl<E> Drop for AsyncEventDispatcher<E> {
    fn drop(&mut self) {
        if let Some(consumer) = self.consumer.get_mut().take() {
            let _ = consumer.stop_tx.send(());
            if consumer.handle.thread().id() != thread::current().id() {
                let _ = consumer.handle.join();
            }
        }
    }
}
