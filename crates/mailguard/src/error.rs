//! Error types surfaced by the mailguard library
//!
//! Policy refusals ([`MailError::Restricted`], [`MailError::DangerousLabels`])
//! are kept apart from ordinary failures so callers can tell "ask a human"
//! from "retry or fix the input".

use crate::gmail::AuthError;
use crate::policy::{AccessTier, Capability, RestrictedOperation};
use crate::store::StoreError;

/// Exit status for operations blocked by policy
pub const EXIT_POLICY_BLOCKED: u8 = 3;

/// Exit status for every other failure
pub const EXIT_FAILURE: u8 = 1;

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("{0}")]
    Restricted(RestrictedOperation),

    #[error(
        "refusing to add dangerous label(s) {}; pass --allow-dangerous to apply them anyway",
        .labels.join(", ")
    )]
    DangerousLabels { labels: Vec<String> },

    #[error(
        "account {email} has no recorded scopes, so it cannot {capability}; \
         run `mailguard auth upgrade {email}` to re-authorize it"
    )]
    UnknownScope { email: String, capability: Capability },

    #[error(
        "account {email} is {tier} and cannot {capability}; \
         run `mailguard auth upgrade {email}` to grant live access"
    )]
    InsufficientScope {
        email: String,
        capability: Capability,
        tier: AccessTier,
    },

    #[error("authorization failed: {0}")]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("no account registered for {0}")]
    AccountNotFound(String),

    #[error("account {0} already exists; use `mailguard auth upgrade` to change its access")]
    AccountExists(String),

    #[error(
        "no account selected; pass --account or run `mailguard config default-account set <email>`"
    )]
    NoAccountSelected,

    #[error("OAuth client credentials are not configured; run `mailguard auth credentials`")]
    MissingCredentials,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("remote call failed: {0:#}")]
    Remote(anyhow::Error),
}

impl MailError {
    /// Whether a policy layer refused the operation before any remote call
    pub fn is_policy_blocked(&self) -> bool {
        matches!(
            self,
            MailError::Restricted(_) | MailError::DangerousLabels { .. }
        )
    }

    pub fn exit_code(&self) -> u8 {
        if self.is_policy_blocked() {
            EXIT_POLICY_BLOCKED
        } else {
            EXIT_FAILURE
        }
    }
}
