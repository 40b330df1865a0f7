//! Non-blocking event fan-out.
//!
//! Subscribers get a bounded channel each; on overflow the event is dropped
//! for that subscriber and counted. The producer never blocks, so event
//! delivery cannot stall the step loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use sim_event::{Envelope, SimEvent};
use tokio::sync::mpsc;

/// Default per-subscriber buffer.
pub const DEFAULT_BUFFER: usize = 256;

/// Fan-out bus for [`SimEvent`]s.
pub struct EventBus {
    simulation_id: Mutex<Option<String>>,
    subscribers: Mutex<Vec<mpsc::Sender<Envelope>>>,
    dropped: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            simulation_id: Mutex::new(None),
            subscribers: Mutex::new(Vec::new()),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn set_simulation_id(&self, simulation_id: impl Into<String>) {
        *self.simulation_id.lock().expect("bus id poisoned") = Some(simulation_id.into());
    }

    /// Registers a subscriber with the default buffer.
    pub fn subscribe(&self) -> mpsc::Receiver<Envelope> {
        self.subscribe_with_buffer(DEFAULT_BUFFER)
    }

    pub fn subscribe_with_buffer(&self, buffer: usize) -> mpsc::Receiver<Envelope> {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        self.subscribers
            .lock()
            .expect("bus subscribers poisoned")
            .push(tx);
        rx
    }

    /// Subscription as a `Stream`, for consumers that compose with
    /// `tokio_stream` combinators (WebSocket bridges, exporters).
    pub fn subscribe_stream(&self) -> tokio_stream::wrappers::ReceiverStream<Envelope> {
        tokio_stream::wrappers::ReceiverStream::new(self.subscribe())
    }

    /// Emits to every live subscriber; full buffers drop the event.
    pub fn emit(&self, event: SimEvent) {
        let envelope = Envelope::wrap(
            self.simulation_id.lock().expect("bus id poisoned").clone(),
            chrono::Utc::now().to_rfc3339(),
            event,
        );

        let mut subscribers = self.subscribers.lock().expect("bus subscribers poisoned");
        subscribers.retain(|tx| !tx.is_closed());
        for tx in subscribers.iter() {
            if tx.try_send(envelope.clone()).is_err() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Events dropped because a subscriber's buffer was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock().expect("bus subscribers poisoned");
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: subscribers receive enveloped events in order.
    #[tokio::test]
    async fn delivery_in_order() {
        let bus = EventBus::new();
        bus.set_simulation_id("sim-1");
        let mut rx = bus.subscribe();

        bus.emit(SimEvent::StepStarted { step: 1 });
        bus.emit(SimEvent::StepCompleted {
            step: 1,
            status: "completed".into(),
        });

        let first = rx.recv().await.unwrap();
        assert_eq!(first.simulation_id.as_deref(), Some("sim-1"));
        assert_eq!(first.event, SimEvent::StepStarted { step: 1 });
        let second = rx.recv().await.unwrap();
        assert!(matches!(second.event, SimEvent::StepCompleted { .. }));
    }

    /// **Scenario**: a full subscriber drops events and the producer counts
    /// them without blocking.
    #[tokio::test]
    async fn overflow_drops_without_blocking() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_with_buffer(2);

        for step in 0..5 {
            bus.emit(SimEvent::StepStarted { step });
        }
        assert_eq!(bus.dropped_count(), 3);

        // The two buffered events survive.
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
    }

    /// **Scenario**: the stream wrapper yields the same envelopes.
    #[tokio::test]
    async fn stream_subscription() {
        use tokio_stream::StreamExt;

        let bus = EventBus::new();
        let mut stream = bus.subscribe_stream();
        bus.emit(SimEvent::SimulationStarted);
        let envelope = stream.next().await.unwrap();
        assert_eq!(envelope.event, SimEvent::SimulationStarted);
    }

    /// **Scenario**: closed subscribers are pruned.
    #[tokio::test]
    async fn closed_subscribers_pruned() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        drop(rx);
        bus.emit(SimEvent::SimulationStarted);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
