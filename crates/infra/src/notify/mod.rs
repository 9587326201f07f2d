//! Fire-and-forget delivery of committed ledger events.

pub mod emitter;
pub mod worker;

pub use emitter::{BusNotificationEmitter, NoopEmitter, NotificationEmitter};
pub use worker::{NotificationWorker, WorkerHandle};
