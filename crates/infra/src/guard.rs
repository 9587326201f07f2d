//! Per-entity ordered locking.
//!
//! There is no global ledger lock. Each operation names every entity it
//! touches up front; the guard sorts the batch by [`LockKey`]'s total order
//! and acquires it against a single deadline. Because every caller acquires in
//! the same order, two operations can never wait on each other in a cycle.
//!
//! A thread holding a [`LockSet`] may only acquire keys strictly greater than
//! everything it already holds; anything else is refused with
//! `DeadlockAvoided` instead of risking a cycle or a self-deadlock.

use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

use fundhub_core::{AccountId, ProjectId};

use crate::error::{EngineError, EngineResult};

/// Lockable entity. The derived `Ord` is the global acquisition order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockKey {
    Account(AccountId),
    Project(ProjectId),
}

impl core::fmt::Display for LockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            LockKey::Account(id) => write!(f, "account:{id}"),
            LockKey::Project(id) => write!(f, "project:{id}"),
        }
    }
}

#[derive(Debug, Default)]
struct Slot {
    held: Mutex<bool>,
    released: Condvar,
}

impl Slot {
    fn release(&self) {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        *held = false;
        drop(held);
        self.released.notify_one();
    }
}

type SlotTable = Arc<Mutex<HashMap<LockKey, Arc<Slot>>>>;

/// Forget `key`'s slot once only the table refers to it.
///
/// Anyone waiting on or holding the slot keeps a clone, and clones are only
/// handed out under the table lock, so a count of one means nobody can be
/// using it.
fn prune(table: &Mutex<HashMap<LockKey, Arc<Slot>>>, key: LockKey) {
    let mut slots = table.lock().unwrap_or_else(|e| e.into_inner());
    if slots.get(&key).is_some_and(|slot| Arc::strong_count(slot) == 1) {
        slots.remove(&key);
    }
}

thread_local! {
    static HELD: RefCell<Vec<LockKey>> = const { RefCell::new(Vec::new()) };
}

/// Concurrency-control layer shared by the ledger store and the funding coordinator.
#[derive(Debug)]
pub struct ConsistencyGuard {
    slots: SlotTable,
    timeout: Duration,
}

impl ConsistencyGuard {
    pub fn new(timeout: Duration) -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Keys that currently have a slot (held or waited on).
    pub fn tracked_keys(&self) -> usize {
        self.slots.lock().map(|slots| slots.len()).unwrap_or(0)
    }

    fn slot(&self, key: LockKey) -> EngineResult<Arc<Slot>> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| EngineError::poisoned("guard slot table"))?;
        Ok(slots.entry(key).or_default().clone())
    }

    fn timed_out(&self) -> EngineError {
        EngineError::LockTimeout {
            timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Acquire every key in one ordered batch, or none of them.
    ///
    /// Duplicates are collapsed. On timeout the keys already taken by this
    /// batch are released before `LockTimeout` is returned.
    pub fn acquire(&self, keys: impl IntoIterator<Item = LockKey>) -> EngineResult<LockSet> {
        let mut keys: Vec<LockKey> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();

        if let Some(first) = keys.first() {
            let highest_held = HELD.with(|h| h.borrow().iter().max().copied());
            if let Some(held) = highest_held {
                if *first <= held {
                    return Err(EngineError::DeadlockAvoided(format!(
                        "requested {first} while holding {held}"
                    )));
                }
            }
        }

        let deadline = Instant::now() + self.timeout;
        let mut set = LockSet {
            entries: Vec::with_capacity(keys.len()),
            table: self.slots.clone(),
            _not_send: PhantomData,
        };

        for key in keys {
            let slot = self.slot(key)?;
            let mut held = slot
                .held
                .lock()
                .map_err(|_| EngineError::poisoned("entity"))?;
            while *held {
                let now = Instant::now();
                if now >= deadline {
                    debug!(key = %key, "lock wait timed out");
                    drop(held);
                    drop(slot);
                    prune(&self.slots, key);
                    // `set` drops here and releases what the batch took.
                    return Err(self.timed_out());
                }
                let (guard, _) = slot
                    .released
                    .wait_timeout(held, deadline - now)
                    .map_err(|_| EngineError::poisoned("entity"))?;
                held = guard;
            }
            *held = true;
            drop(held);

            HELD.with(|h| h.borrow_mut().push(key));
            set.entries.push((key, slot));
        }

        Ok(set)
    }
}

/// Locks held by the current thread; released in reverse order on drop.
///
/// Deliberately `!Send`: ownership of the locks is tracked per thread.
#[derive(Debug)]
pub struct LockSet {
    entries: Vec<(LockKey, Arc<Slot>)>,
    table: SlotTable,
    _not_send: PhantomData<*const ()>,
}

impl LockSet {
    pub fn keys(&self) -> impl Iterator<Item = LockKey> + '_ {
        self.entries.iter().map(|(k, _)| *k)
    }

    pub fn covers(&self, keys: &[LockKey]) -> bool {
        keys.iter()
            .all(|k| self.entries.iter().any(|(held, _)| held == k))
    }

    /// Fail unless every key is held by this set.
    pub fn require(&self, keys: &[LockKey]) -> EngineResult<()> {
        match keys.iter().find(|k| !self.covers(std::slice::from_ref(k))) {
            None => Ok(()),
            Some(missing) => Err(EngineError::DeadlockAvoided(format!(
                "operation needs {missing} but the caller does not hold it"
            ))),
        }
    }
}

impl Drop for LockSet {
    fn drop(&mut self) {
        for (key, slot) in self.entries.drain(..).rev() {
            slot.release();
            drop(slot);
            prune(&self.table, key);
            HELD.with(|h| {
                let mut held = h.borrow_mut();
                if let Some(pos) = held.iter().rposition(|k| *k == key) {
                    held.remove(pos);
                }
            });
        }
    }
}
