// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable per-member entitlement ledger.
//!
//! Every write is an upsert (no trigger ever fails merely because the member record does not
//! exist yet) and atomic per record, so a concurrent reader never observes a torn state such as
//! `trial_used` set without its expiry. Records are independent of each other; no cross-record
//! transactions are required.
mod memory;
mod sqlite;
mod traits;

pub use memory::MemoryStore;
pub use sqlite::{
    SqliteStore, SqliteStoreBuilder, StoreError, connection_pool, create_database,
    run_pending_migrations,
};
pub use traits::EntitlementStore;
