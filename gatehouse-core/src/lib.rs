// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core data types for gatehouse, a system granting and revoking time-boxed ("trial") and
//! subscription-backed ("paid") access to a gated community space.
mod config;
mod entitlement;
mod identifiers;
mod time;

pub use config::{Config, ConfigBuilder, ConfigError};
pub use entitlement::{AccessState, EntitlementRecord};
pub use identifiers::{BucketId, MemberId};
pub use time::{Timestamp, now};
