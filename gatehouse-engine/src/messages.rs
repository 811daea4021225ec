// SPDX-License-Identifier: MIT OR Apache-2.0

//! Direct-message texts sent by the engine.
//!
//! The member experience is entirely through these texts and access presence; there is no other
//! user-facing channel.
use gatehouse_core::Config;

/// Sent when a fresh trial was granted.
pub fn welcome(config: &Config) -> String {
    format!(
        "Welcome! Your {}-hour trial access is active, the members-only areas are open for you \
         right now.\n\nWant to keep access once the trial ends? Upgrade any time:\n{}",
        config.trial_hours(),
        config.upgrade_link
    )
}

/// Sent when the one-time trial lapsed.
pub fn trial_expired(config: &Config) -> String {
    format!(
        "Your free trial just ended. Don't lose access to the members-only areas, reactivate \
         instantly here:\n{}\n\nOnce you check out, your access is restored automatically.",
        config.upgrade_link
    )
}

/// Sent when a returning member has already consumed their trial.
pub fn trial_already_used(config: &Config) -> String {
    format!(
        "Welcome back! The free trial has already been used on this account.\n\nGet instant \
         access here:\n{}",
        config.upgrade_link
    )
}

/// Sent when the account-age policy blocks a trial.
pub fn account_too_new(config: &Config) -> String {
    format!(
        "Quick security check: your account is too new to receive a free trial.\n\nYou can still \
         get instant access here:\n{}",
        config.upgrade_link
    )
}

/// Sent when the payment signal appeared.
pub fn purchase_confirmed() -> String {
    "Payment confirmed, your access is active. Welcome aboard!".to_string()
}
