//! Thread model representing a Gmail thread (conversation)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Message;

/// Unique identifier for a thread (Gmail thread ID)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadId(pub String);

impl ThreadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ThreadId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ThreadId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Summary row returned by thread search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub id: ThreadId,
    /// Subject of the latest message
    pub subject: String,
    /// Sender of the latest message, as shown in the From header
    pub from: String,
    pub snippet: String,
    pub last_message_at: Option<DateTime<Utc>>,
    pub message_count: usize,
    /// Union of the label IDs on the thread's messages
    pub label_ids: Vec<String>,
}

/// A full thread with every message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: ThreadId,
    pub messages: Vec<Message>,
}

/// Parameters for listing or searching threads
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadQuery {
    /// Gmail search syntax (e.g. "from:alice is:unread")
    pub query: Option<String>,
    pub max_results: Option<u32>,
    /// Continuation token from a previous page
    pub page_token: Option<String>,
    pub label_ids: Vec<String>,
}

impl ThreadQuery {
    /// Gmail caps thread listing at 500 results per page
    pub const MAX_RESULTS_LIMIT: u32 = 500;

    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: Some(query.into()),
            ..Self::default()
        }
    }

    pub fn with_max_results(mut self, max: u32) -> Self {
        self.max_results = Some(max.clamp(1, Self::MAX_RESULTS_LIMIT));
        self
    }

    pub fn with_page_token(mut self, token: impl Into<String>) -> Self {
        self.page_token = Some(token.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label_ids.push(label.into());
        self
    }
}

/// One page of thread search results
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadPage {
    pub threads: Vec<ThreadSummary>,
    pub next_page_token: Option<String>,
    pub result_size_estimate: Option<u32>,
}
