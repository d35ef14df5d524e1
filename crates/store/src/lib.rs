//! Storage for the checkout pipeline.
//!
//! Four contracts live here, each with an in-memory implementation for tests
//! and development and a PostgreSQL implementation:
//! - [`StockLedger`]: authoritative stock per variant, conditional decrement
//! - [`OrderRepository`]: transactional order persistence
//! - [`Catalog`]: read-only price lookups
//! - [`PaymentRecordStore`]: append/update-only record of captured funds
//!
//! The ledger and the repository share one transaction type so the stock
//! decrement and the order insert commit or roll back together.

pub mod catalog;
pub mod error;
pub mod ledger;
pub mod memory;
pub mod payments;
pub mod postgres;
pub mod repository;

pub use catalog::Catalog;
pub use error::{Result, StoreError};
pub use ledger::{Availability, StockLedger};
pub use memory::{InMemoryStore, InMemoryTx};
pub use payments::PaymentRecordStore;
pub use postgres::PostgresStore;
pub use repository::{OrderRepository, with_transaction};
