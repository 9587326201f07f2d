//! `fundhub-core`: ledger foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, money, optimistic versions and the error taxonomy shared by
//! every layer of the engine.

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod money;
pub mod value_object;

pub use aggregate::{AggregateRoot, ExpectedVersion};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{AccountId, BudgetId, CategoryId, InvestmentId, OwnerId, ProjectId, TransactionId};
pub use money::{Currency, Money};
pub use value_object::ValueObject;
