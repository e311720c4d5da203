use tokio::sync::broadcast;

/// Typed multi-subscriber notification channel.
///
/// Each component defines a closed event enum and owns one `EventBus` for it.
/// Emission never fails: events sent while nobody is subscribed are dropped,
/// and slow subscribers observe `RecvError::Lagged` instead of blocking the
/// emitter.
#[derive(Debug)]
pub struct EventBus<E> {
    tx: broadcast::Sender<E>,
}

impl<E: Clone> EventBus<E> {
    /// Channel that buffers up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Send `event` to every current subscriber.
    pub fn emit(&self, event: E) {
        let _ = self.tx.send(event);
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.tx.subscribe()
    }
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Ping {
        One,
        Two(u32),
    }

    #[tokio::test]
    async fn test_emit_and_receive() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        bus.emit(Ping::One);
        bus.clone().emit(Ping::Two(7));
        assert_eq!(rx.recv().await.unwrap(), Ping::One);
        assert_eq!(rx.recv().await.unwrap(), Ping::Two(7));
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus: EventBus<Ping> = EventBus::default();
        bus.emit(Ping::One);
    }
}
