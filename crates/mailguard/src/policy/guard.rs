//! Dangerous-operation guard
//!
//! Narrows whatever the OAuth scope allows. Sending and deleting are never
//! attempted; adding a label from [`DANGEROUS_LABELS`] needs an explicit
//! per-call override.

use std::fmt;

use serde::Serialize;

use crate::error::MailError;
use crate::gmail;
use crate::models::{LabelId, ThreadId};

/// Labels whose application moves mail somewhere irrecoverable or
/// side-effecting. Matched case-insensitively.
pub const DANGEROUS_LABELS: &[&str] = &[LabelId::TRASH, LabelId::SPAM];

/// Operation categories refused regardless of granted scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestrictedKind {
    Send,
    Delete,
}

impl fmt::Display for RestrictedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RestrictedKind::Send => "sending mail",
            RestrictedKind::Delete => "deleting mail",
        })
    }
}

/// A blocked operation plus what a human can do instead
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestrictedOperation {
    pub kind: RestrictedKind,
    pub guidance: String,
    /// Web links for the items involved, when known
    pub urls: Vec<String>,
}

impl fmt::Display for RestrictedOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} is blocked by policy. {}", self.kind, self.guidance)?;
        for url in &self.urls {
            write!(f, "\n  {url}")?;
        }
        Ok(())
    }
}

/// Refuse a send-equivalent operation
pub fn restricted_send(account: Option<&str>) -> RestrictedOperation {
    RestrictedOperation {
        kind: RestrictedKind::Send,
        guidance: "Ask a human to compose and send the message from the Gmail web interface."
            .to_string(),
        urls: vec![gmail::inbox_url(account)],
    }
}

/// Refuse a delete-equivalent operation on the given threads
pub fn restricted_delete(account: Option<&str>, threads: &[ThreadId]) -> RestrictedOperation {
    RestrictedOperation {
        kind: RestrictedKind::Delete,
        guidance: "Ask a human to open the thread in the Gmail web interface and delete it there."
            .to_string(),
        urls: threads
            .iter()
            .map(|id| gmail::thread_url(account, id))
            .collect(),
    }
}

pub fn is_dangerous_label(label: &str) -> bool {
    let label = label.trim();
    DANGEROUS_LABELS
        .iter()
        .any(|dangerous| dangerous.eq_ignore_ascii_case(label))
}

/// Every requested addition that names a dangerous label, in request order
pub fn dangerous_additions(add: &[String]) -> Vec<String> {
    add.iter()
        .filter(|label| is_dangerous_label(label))
        .cloned()
        .collect()
}

/// Refuse dangerous label additions unless `allow_dangerous` is set
pub fn check_label_additions(add: &[String], allow_dangerous: bool) -> Result<(), MailError> {
    if allow_dangerous {
        return Ok(());
    }
    let offending = dangerous_additions(add);
    if offending.is_empty() {
        Ok(())
    } else {
        Err(MailError::DangerousLabels { labels: offending })
    }
}
