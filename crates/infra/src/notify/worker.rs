use std::io;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use fundhub_events::{EventBus, EventEnvelope, Subscription};
use fundhub_ledger::LedgerEvent;

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Consumer side of notification delivery.
///
/// Drains a bus subscription on its own thread and hands each envelope to
/// `handler` (an email sender, a push gateway, a test recorder). Handler errors
/// are logged; the message is not redelivered.
#[derive(Debug)]
pub struct NotificationWorker;

impl NotificationWorker {
    pub fn spawn<B, H, E>(name: &'static str, bus: B, mut handler: H) -> io::Result<WorkerHandle>
    where
        B: EventBus<EventEnvelope<LedgerEvent>> + 'static,
        H: FnMut(EventEnvelope<LedgerEvent>) -> Result<(), E> + Send + 'static,
        E: core::fmt::Debug + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sub = bus.subscribe();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(name, sub, shutdown_rx, &mut handler))?;

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

fn worker_loop<H, E>(
    name: &'static str,
    sub: Subscription<EventEnvelope<LedgerEvent>>,
    shutdown_rx: mpsc::Receiver<()>,
    handler: &mut H,
) where
    H: FnMut(EventEnvelope<LedgerEvent>) -> Result<(), E>,
    E: core::fmt::Debug,
{
    let tick = Duration::from_millis(50);
    info!(worker = name, "notification worker started");

    loop {
        if shutdown_rx.try_recv().is_ok() {
            // Deliver what is already queued before stopping.
            while let Ok(msg) = sub.try_recv() {
                deliver(name, msg, handler);
            }
            break;
        }

        match sub.recv_timeout(tick) {
            Ok(msg) => deliver(name, msg, handler),
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    info!(worker = name, "notification worker stopped");
}

fn deliver<H, E>(name: &'static str, msg: EventEnvelope<LedgerEvent>, handler: &mut H)
where
    H: FnMut(EventEnvelope<LedgerEvent>) -> Result<(), E>,
    E: core::fmt::Debug,
{
    let event_type = msg.event_type().to_string();
    if let Err(err) = handler(msg) {
        warn!(worker = name, event_type = %event_type, error = ?err, "notification handler failed");
    }
}
