use tokio::sync::broadcast::error::RecvError;

pub struct EventBus<T> {
    tx: tokio::sync::broadcast::Sender<T>,
}

pub struct EventListener<T> {
    rx: tokio::sync::broadcast::Receiver<T>,
}

#[derive(Clone)]
pub struct EventEmitter<T> {
    tx: tokio::sync::broadcast::Sender<T>,
}

impl<T: Clone + std::fmt::Debug> EventBus<T> {
    pub fn new(buffer_size: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(buffer_size);
        Self { tx }
    }

    pub fn subscribe(&self) -> EventListener<T> {
        EventListener::new(self.tx.subscribe())
    }

    pub fn emitter(&self) -> EventEmitter<T> {
        EventEmitter::new(self.tx.clone())
    }
}

impl<T: Clone> EventListener<T> {
    pub fn new(rx: tokio::sync::broadcast::Receiver<T>) -> Self {
        Self { rx }
    }

    /// Waits for the next event. Skips over lagged events, returns `None` once all emitters are gone.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Closed) => {
                    tracing::error!("Channel for event receiver of {} is closed", std::any::type_name::<T>());
                    return None;
                }
                Err(RecvError::Lagged(count)) => {
                    tracing::warn!(
                        "Channel for event receiver of {} lagged by {} messages",
                        std::any::type_name::<T>(),
                        count
                    );
                }
            }
        }
    }
}

impl<T: Clone + std::fmt::Debug> EventEmitter<T> {
    fn new(tx: tokio::sync::broadcast::Sender<T>) -> Self {
        Self { tx }
    }

    pub fn send(&self, event: T) {
        //no active listener is not an error
        if self.tx.receiver_count() == 0 {
            tracing::trace!("No listener for event {:?}", event);
            return;
        }

        if let Err(e) = self.tx.send(event.clone()) {
            tracing::error!("Error sending event {:?}: {}", event, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_listener_receives_emitted_event() {
        let bus = EventBus::<u32>::new(4);
        let mut listener = bus.subscribe();

        bus.emitter().send(7);

        assert_eq!(listener.recv().await, Some(7));
    }

    #[tokio::test]
    async fn test_listener_skips_lagged_events() {
        let bus = EventBus::<u32>::new(2);
        let mut listener = bus.subscribe();
        let emitter = bus.emitter();

        for i in 0..5 {
            emitter.send(i);
        }

        assert_eq!(listener.recv().await, Some(3));
        assert_eq!(listener.recv().await, Some(4));
    }

    #[tokio::test]
    async fn test_listener_ends_when_bus_is_dropped() {
        let bus = EventBus::<u32>::new(2);
        let mut listener = bus.subscribe();

        drop(bus);

        assert_eq!(listener.recv().await, None);
    }
}
