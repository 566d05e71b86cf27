//! Remote mail API abstraction

use std::sync::Arc;

use anyhow::Result;

use crate::gmail::{API_BASE_URL, GmailAuth, GmailClient, GoogleTokenEndpoint, TOKEN_URL};
use crate::models::{
    Account, Label, LabelId, LabelUpdate, MessageId, NewLabel, OAuthTokens, Thread, ThreadId,
    ThreadPage, ThreadQuery,
};

/// Trait for remote mailbox operations
///
/// Implementations perform the call as asked; permission checks happen
/// before anything reaches this trait.
pub trait MailApi: Send + Sync {
    /// Search threads using the provider's query syntax
    fn search_threads(&self, query: &ThreadQuery) -> Result<ThreadPage>;

    /// Get a thread with every message
    fn get_thread(&self, id: &ThreadId) -> Result<Thread>;

    /// Add and remove label IDs on a thread
    fn modify_thread_labels(&self, id: &ThreadId, add: &[String], remove: &[String]) -> Result<()>;

    fn list_labels(&self) -> Result<Vec<Label>>;

    fn create_label(&self, label: &NewLabel) -> Result<Label>;

    fn update_label(&self, id: &LabelId, update: &LabelUpdate) -> Result<Label>;

    /// Raw bytes of an attachment
    fn get_attachment(&self, message_id: &MessageId, attachment_id: &str) -> Result<Vec<u8>>;

    /// Credentials that changed since the last call (e.g. a rotated refresh
    /// token) and should be persisted
    fn rotated_tokens(&self) -> Option<OAuthTokens> {
        None
    }
}

/// Builds a [`MailApi`] for an account
pub trait ApiConnector: Send + Sync {
    fn connect(&self, account: &Account) -> Result<Arc<dyn MailApi>>;
}

/// Connector producing [`GmailClient`]s
#[derive(Debug, Clone)]
pub struct GmailConnector {
    token_url: String,
    api_base_url: String,
}

impl Default for GmailConnector {
    fn default() -> Self {
        Self {
            token_url: TOKEN_URL.to_string(),
            api_base_url: API_BASE_URL.to_string(),
        }
    }
}

impl GmailConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point at different endpoints (e.g. a local test server)
    pub fn with_endpoints(token_url: impl Into<String>, api_base_url: impl Into<String>) -> Self {
        Self {
            token_url: token_url.into(),
            api_base_url: api_base_url.into(),
        }
    }
}

impl ApiConnector for GmailConnector {
    fn connect(&self, account: &Account) -> Result<Arc<dyn MailApi>> {
        let auth = GmailAuth::new(
            account.oauth2.clone(),
            Box::new(GoogleTokenEndpoint::new(&self.token_url)),
        );
        Ok(Arc::new(GmailClient::with_base_url(
            auth,
            &self.api_base_url,
        )))
    }
}
