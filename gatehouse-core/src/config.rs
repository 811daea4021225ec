// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashSet;
use std::time::Duration;

use thiserror::Error;

use crate::identifiers::BucketId;

const DEFAULT_TRIAL_DURATION: Duration = Duration::from_secs(48 * 60 * 60);
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Immutable runtime configuration for all gatehouse components.
///
/// Constructed once at process start and passed by reference into each component's constructor.
/// Components never read configuration from ambient global state.
#[derive(Clone, Debug)]
pub struct Config {
    /// Pool of interchangeable access buckets. Must hold at least two entries so the bucket a
    /// member occupies carries no information about why they hold access.
    pub bucket_pool: Vec<BucketId>,

    /// The distinguished payment-signal role, managed by an external billing integration. Only
    /// ever read by this system, never granted or revoked.
    pub payment_bucket: BucketId,

    /// Checkout link included in upgrade-nudge notifications.
    pub upgrade_link: String,

    /// How long a fresh trial grants access for.
    ///
    /// Default: 48 hours.
    pub trial_duration: Duration,

    /// Minimum account age required to receive a trial. Zero disables the policy.
    ///
    /// Default: zero (disabled).
    pub min_account_age: Duration,

    /// Interval between expiry sweep runs.
    ///
    /// Default: 60 seconds.
    pub sweep_interval: Duration,
}

impl Config {
    pub fn builder(payment_bucket: BucketId, upgrade_link: &str) -> ConfigBuilder {
        ConfigBuilder {
            bucket_pool: Vec::new(),
            payment_bucket,
            upgrade_link: upgrade_link.to_string(),
            trial_duration: DEFAULT_TRIAL_DURATION,
            min_account_age: Duration::ZERO,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    /// Trial duration in milliseconds, the unit expiry timestamps are persisted in.
    pub fn trial_duration_ms(&self) -> u64 {
        self.trial_duration.as_millis() as u64
    }

    /// Trial duration in whole hours, used in notification texts.
    pub fn trial_hours(&self) -> u64 {
        self.trial_duration.as_secs() / 3600
    }
}

/// Builder for [`Config`] with validation on `build`.
///
/// Any returned error is fatal: the process must not begin handling events with an incomplete or
/// inconsistent configuration.
#[derive(Clone, Debug)]
pub struct ConfigBuilder {
    bucket_pool: Vec<BucketId>,
    payment_bucket: BucketId,
    upgrade_link: String,
    trial_duration: Duration,
    min_account_age: Duration,
    sweep_interval: Duration,
}

impl ConfigBuilder {
    /// Define the pool of interchangeable access buckets.
    pub fn bucket_pool(mut self, pool: impl IntoIterator<Item = BucketId>) -> Self {
        self.bucket_pool = pool.into_iter().collect();
        self
    }

    /// Define how long a fresh trial grants access for.
    pub fn trial_duration(mut self, duration: Duration) -> Self {
        self.trial_duration = duration;
        self
    }

    /// Require a minimum account age before a trial is granted.
    pub fn min_account_age(mut self, age: Duration) -> Self {
        self.min_account_age = age;
        self
    }

    /// Define the interval between expiry sweep runs.
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn build(self) -> Result<Config, ConfigError> {
        if self.bucket_pool.len() < 2 {
            return Err(ConfigError::PoolTooSmall(self.bucket_pool.len()));
        }

        let mut seen = HashSet::new();
        for bucket in &self.bucket_pool {
            if !seen.insert(bucket) {
                return Err(ConfigError::DuplicatePoolBucket(bucket.clone()));
            }
        }

        if self.bucket_pool.contains(&self.payment_bucket) {
            return Err(ConfigError::PaymentBucketInPool(self.payment_bucket));
        }

        if self.upgrade_link.is_empty() {
            return Err(ConfigError::MissingUpgradeLink);
        }

        Ok(Config {
            bucket_pool: self.bucket_pool,
            payment_bucket: self.payment_bucket,
            upgrade_link: self.upgrade_link,
            trial_duration: self.trial_duration,
            min_account_age: self.min_account_age,
            sweep_interval: self.sweep_interval,
        })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    /// Fewer than two pool buckets would make the privileged holder distinguishable by
    /// identifier alone.
    #[error("bucket pool needs at least 2 entries, got {0}")]
    PoolTooSmall(usize),

    #[error("bucket {0} appears more than once in the pool")]
    DuplicatePoolBucket(BucketId),

    #[error("payment bucket {0} must not be part of the interchangeable pool")]
    PaymentBucketInPool(BucketId),

    #[error("upgrade link must not be empty")]
    MissingUpgradeLink,
}
