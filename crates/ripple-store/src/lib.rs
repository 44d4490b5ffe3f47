#![deny(unsafe_code)]
//! # ripple-store
//!
//! Event persistence for the ripple change-intelligence core.
//!
//! The [`EventStore`] trait is the contract the rest of the system programs
//! against. Two adapters implement it:
//!
//! - [`SqliteEventStore`] — the durable adapter: a single local SQLite file
//!   with a transactionally-maintained full-text index, secondary indexes,
//!   and a partial unique index enforcing idempotency keys.
//! - [`MemoryEventStore`] — a deterministic in-memory reference adapter for
//!   tests and short-lived embedding hosts.
//!
//! Writes are durable before return; readers observe a consistent snapshot;
//! the full-text index never lags the row table.

pub mod memory;
pub mod query;
pub mod sqlite;
pub mod traits;

pub use memory::MemoryEventStore;
pub use query::{EventQuery, EventQueryBuilder};
pub use sqlite::SqliteEventStore;
pub use traits::{validate_new_event, EventStore};
