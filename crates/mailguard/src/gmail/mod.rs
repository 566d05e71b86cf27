//! Gmail API integration
//!
//! This module provides:
//! - OAuth2 authorization code flow with PKCE
//! - Callback transports (loopback listener, manual paste)
//! - Token endpoint access and access-token refresh
//! - Gmail API client implementing [`crate::remote::MailApi`]
//! - Response normalization to domain models

mod auth;
mod client;
mod normalize;
mod token;
mod transport;

pub use auth::{AUTHORIZE_URL, AuthError, AuthFlow, CallbackParams, FlowOptions, Grant, code_challenge};
pub use client::{API_BASE_URL, GmailClient};
pub use normalize::{normalize_label, normalize_message, normalize_thread, summarize_thread};
pub use token::{CodeExchange, GmailAuth, GoogleTokenEndpoint, TOKEN_URL, TokenEndpoint, TokenResponse};
pub use transport::{
    CALLBACK_PATH, CallbackTransport, DEFAULT_CALLBACK_TIMEOUT, LoopbackTransport,
    MANUAL_REDIRECT_URI, ManualTransport,
};

use crate::models::ThreadId;

/// Gmail web interface base
pub const WEB_BASE_URL: &str = "https://mail.google.com/mail/";

fn web_url(account: Option<&str>, fragment: &str) -> String {
    match account {
        Some(email) => format!(
            "{}?authuser={}#{}",
            WEB_BASE_URL,
            urlencoding::encode(email),
            fragment
        ),
        None => format!("{WEB_BASE_URL}#{fragment}"),
    }
}

/// Web link to the inbox, selecting `account` when given
pub fn inbox_url(account: Option<&str>) -> String {
    web_url(account, "inbox")
}

/// Web link that opens a thread regardless of which label it carries
pub fn thread_url(account: Option<&str>, thread_id: &ThreadId) -> String {
    web_url(
        account,
        &format!("all/{}", urlencoding::encode(thread_id.as_str())),
    )
}

/// Gmail API response types
pub mod api {
    use serde::{Deserialize, Serialize};

    use crate::models::LabelColor;

    /// Response from listing threads
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ListThreadsResponse {
        pub threads: Option<Vec<ThreadRef>>,
        pub next_page_token: Option<String>,
        pub result_size_estimate: Option<u32>,
    }

    /// Reference to a thread (ID plus snippet)
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ThreadRef {
        pub id: String,
        #[serde(default)]
        pub snippet: String,
    }

    /// Thread with its messages
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GmailThread {
        pub id: String,
        pub messages: Option<Vec<GmailMessage>>,
    }

    /// Message from Gmail API (full or metadata format)
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GmailMessage {
        pub id: String,
        pub thread_id: String,
        pub label_ids: Option<Vec<String>>,
        #[serde(default)]
        pub snippet: String,
        /// Milliseconds since epoch, as a decimal string
        pub internal_date: Option<String>,
        pub payload: Option<MessagePart>,
    }

    /// Email header (name-value pair)
    #[derive(Debug, Deserialize, Serialize)]
    pub struct Header {
        pub name: String,
        pub value: String,
    }

    /// Part body; inline data or a reference to an attachment
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageBody {
        pub size: Option<u64>,
        pub data: Option<String>,
        pub attachment_id: Option<String>,
    }

    /// MIME part; the message payload is the root part
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessagePart {
        pub part_id: Option<String>,
        pub mime_type: Option<String>,
        pub filename: Option<String>,
        pub headers: Option<Vec<Header>>,
        pub body: Option<MessageBody>,
        pub parts: Option<Vec<MessagePart>>,
    }

    /// Response from listing labels
    #[derive(Debug, Deserialize)]
    pub struct ListLabelsResponse {
        pub labels: Option<Vec<GmailLabel>>,
    }

    /// Label from Gmail API
    #[derive(Debug, Deserialize)]
    pub struct GmailLabel {
        pub id: String,
        pub name: String,
        /// "system" or "user"
        #[serde(rename = "type")]
        pub label_type: Option<String>,
        pub color: Option<LabelColor>,
    }

    /// Body for label create and patch
    #[derive(Debug, Default, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct LabelRequest {
        #[serde(skip_serializing_if = "Option::is_none")]
        pub name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub color: Option<LabelColor>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub label_list_visibility: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub message_list_visibility: Option<String>,
    }

    /// Body for threads.modify
    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ModifyThreadRequest {
        pub add_label_ids: Vec<String>,
        pub remove_label_ids: Vec<String>,
    }

    /// Attachment payload
    #[derive(Debug, Deserialize)]
    pub struct AttachmentBody {
        pub size: Option<u64>,
        pub data: Option<String>,
    }
}
