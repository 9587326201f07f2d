//! Append-only transaction journal.
//!
//! The journal is the source of truth for every money movement. Account
//! balances and project totals are caches that must always agree with it.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryJournal;
pub use r#trait::{
    Appended, JournalError, Page, PageRequest, TransactionFilter, TransactionJournal,
};
