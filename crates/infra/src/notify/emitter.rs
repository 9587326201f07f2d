use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};
use uuid::Uuid;

use fundhub_events::{Event, EventBus, EventEnvelope};
use fundhub_ledger::LedgerEvent;

/// Outbound notification boundary.
///
/// `emit` is called after the state change has committed and every lock is
/// released. It cannot fail from the engine's point of view: delivery
/// problems are logged and dropped, never retried.
pub trait NotificationEmitter: Send + Sync {
    fn emit(&self, event: &LedgerEvent);
}

impl<N> NotificationEmitter for Arc<N>
where
    N: NotificationEmitter + ?Sized,
{
    fn emit(&self, event: &LedgerEvent) {
        (**self).emit(event)
    }
}

/// Discards every notification.
#[derive(Debug, Default, Copy, Clone)]
pub struct NoopEmitter;

impl NotificationEmitter for NoopEmitter {
    fn emit(&self, _event: &LedgerEvent) {}
}

/// Wraps each event in an [`EventEnvelope`] and publishes it on a bus.
#[derive(Debug)]
pub struct BusNotificationEmitter<B> {
    bus: B,
    sequence: AtomicU64,
}

impl<B> BusNotificationEmitter<B> {
    pub fn new(bus: B) -> Self {
        Self {
            bus,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<B> NotificationEmitter for BusNotificationEmitter<B>
where
    B: EventBus<EventEnvelope<LedgerEvent>>,
{
    fn emit(&self, event: &LedgerEvent) {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let envelope = EventEnvelope::new(
            Uuid::now_v7(),
            event.subject_id(),
            event.event_type(),
            sequence,
            event.clone(),
        );

        match self.bus.publish(envelope) {
            Ok(()) => debug!(event_type = event.event_type(), sequence, "notification published"),
            Err(e) => warn!(
                event_type = event.event_type(),
                sequence,
                error = ?e,
                "notification dropped"
            ),
        }
    }
}
