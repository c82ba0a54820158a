//! Run persistence
//!
//! This module provides:
//! - [`RunStore`] trait for definitions, runs, and step results
//! - [`InMemoryRunStore`] for tests and embedded use
//! - [`PostgresRunStore`] for production

mod memory;
mod postgres;
mod store;

pub use memory::InMemoryRunStore;
pub use postgres::PostgresRunStore;
pub use store::{RunStore, StepWrite, StoreError};
