// SPDX-License-Identifier: MIT OR Apache-2.0

//! Access-entitlement state machine for a gated community space.
//!
//! Three independent, asynchronously-arriving trigger kinds funnel into one engine: member
//! joins, payment-signal changes and time-based trial expiry. The engine reads and writes the
//! entitlement ledger, issues role mutations through the bucket allocator and sends best-effort
//! notifications. All triggers are processed by a single [`EngineActor`] task, which makes
//! per-member handling single-flight by construction.
mod actor;
mod allocator;
mod engine;
pub mod messages;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
#[cfg(test)]
mod tests;
mod traits;

pub use actor::{EngineActor, ToEngineActor};
pub use allocator::{BucketAllocator, BucketSelector, UniformSelector};
pub use engine::{EngineError, EntitlementEngine};
pub use traits::{LiveMembership, Notifier};
