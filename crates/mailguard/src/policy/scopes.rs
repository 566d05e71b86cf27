//! OAuth scope tiers and per-capability enforcement
//!
//! Accounts carry the scope list granted at authorization time. Before any
//! mutating call the required [`Capability`] is checked against that list.
//! An account with no recorded scopes is [`AccessTier::Unknown`] and is
//! refused for every mutation until it is re-authorized.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::MailError;
use crate::models::Account;

pub const GMAIL_READONLY: &str = "https://www.googleapis.com/auth/gmail.readonly";
pub const GMAIL_MODIFY: &str = "https://www.googleapis.com/auth/gmail.modify";
pub const GMAIL_LABELS: &str = "https://www.googleapis.com/auth/gmail.labels";

/// Scope set requested for read-only (dry-run) setup
pub const READ_ONLY_SCOPES: &[&str] = &[GMAIL_READONLY];

/// Scope set requested for live setup and upgrades
pub const LIVE_SCOPES: &[&str] = &[GMAIL_MODIFY, GMAIL_LABELS];

/// Tier requested when authorizing an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    ReadOnly,
    Live,
}

impl AccessMode {
    pub fn scopes(self) -> &'static [&'static str] {
        match self {
            AccessMode::ReadOnly => READ_ONLY_SCOPES,
            AccessMode::Live => LIVE_SCOPES,
        }
    }
}

/// Tier an account actually holds, derived from its recorded scopes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessTier {
    /// No scopes recorded (legacy record); fails closed
    Unknown,
    ReadOnly,
    Live,
}

impl AccessTier {
    pub fn from_scopes(scopes: &[String]) -> Self {
        if scopes.is_empty() {
            AccessTier::Unknown
        } else if scopes.iter().any(|s| s == GMAIL_MODIFY) {
            AccessTier::Live
        } else {
            AccessTier::ReadOnly
        }
    }
}

impl fmt::Display for AccessTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AccessTier::Unknown => "unknown",
            AccessTier::ReadOnly => "read-only",
            AccessTier::Live => "live",
        })
    }
}

/// Mutation classes gated by scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Create or edit labels
    ManageLabels,
    /// Add or remove labels on threads (includes archiving)
    ModifyThreads,
}

impl Capability {
    /// Any one of these scopes satisfies the capability
    pub fn satisfying_scopes(self) -> &'static [&'static str] {
        match self {
            Capability::ManageLabels => &[GMAIL_LABELS, GMAIL_MODIFY],
            Capability::ModifyThreads => &[GMAIL_MODIFY],
        }
    }

    pub fn is_granted_by(self, scopes: &[String]) -> bool {
        self.satisfying_scopes()
            .iter()
            .any(|required| scopes.iter().any(|s| s == required))
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Capability::ManageLabels => "manage labels",
            Capability::ModifyThreads => "modify thread labels",
        })
    }
}

/// Refuse `capability` unless the account's recorded scopes grant it
pub fn ensure_capability(account: &Account, capability: Capability) -> Result<(), MailError> {
    let scopes = account.granted_scopes();
    if scopes.is_empty() {
        return Err(MailError::UnknownScope {
            email: account.email.clone(),
            capability,
        });
    }
    if !capability.is_granted_by(scopes) {
        return Err(MailError::InsufficientScope {
            email: account.email.clone(),
            capability,
            tier: account.tier(),
        });
    }
    Ok(())
}
