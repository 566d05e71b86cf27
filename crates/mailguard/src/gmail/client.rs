//! Gmail API HTTP client
//!
//! Implements [`MailApi`] against the Gmail REST API.
//! Uses synchronous HTTP (ureq) to be executor-agnostic.

use anyhow::{Context, Result};
use log::debug;
use serde::de::DeserializeOwned;
use url::Url;

use super::GmailAuth;
use super::api::{
    AttachmentBody, GmailLabel, GmailThread, LabelRequest, ListLabelsResponse,
    ListThreadsResponse, ModifyThreadRequest,
};
use super::normalize::{
    decode_base64_bytes, normalize_label, normalize_thread, summarize_thread,
};
use crate::models::{
    Label, LabelId, LabelUpdate, MessageId, NewLabel, OAuthTokens, Thread, ThreadId, ThreadPage,
    ThreadQuery,
};
use crate::remote::MailApi;

/// Gmail API base URL
pub const API_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1";

/// Gmail API client for one account
pub struct GmailClient {
    auth: GmailAuth,
    base_url: String,
}

impl GmailClient {
    pub fn new(auth: GmailAuth) -> Self {
        Self::with_base_url(auth, API_BASE_URL)
    }

    pub fn with_base_url(auth: GmailAuth, base_url: impl Into<String>) -> Self {
        Self {
            auth,
            base_url: base_url.into(),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Url::parse(&format!("{}/users/me/{}", self.base_url, path))
            .with_context(|| format!("Invalid Gmail API URL for {path}"))
    }

    fn bearer(&self) -> Result<String> {
        Ok(format!("Bearer {}", self.auth.get_access_token()?))
    }

    fn get_json<T: DeserializeOwned>(&self, url: &Url, what: &str) -> Result<T> {
        debug!("GET {}", url.path());
        let mut response = ureq::get(url.as_str())
            .header("Authorization", &self.bearer()?)
            .call()
            .with_context(|| format!("Failed to send {what} request"))?;

        response
            .body_mut()
            .read_json()
            .with_context(|| format!("Failed to parse {what} response"))
    }

    /// Fetch a thread with only the headers a summary needs
    fn get_thread_metadata(&self, id: &str) -> Result<GmailThread> {
        let mut url = self.endpoint(&format!("threads/{}", urlencoding::encode(id)))?;
        url.query_pairs_mut()
            .append_pair("format", "metadata")
            .append_pair("metadataHeaders", "Subject")
            .append_pair("metadataHeaders", "From");
        self.get_json(&url, "thread metadata")
    }
}

impl MailApi for GmailClient {
    fn search_threads(&self, query: &ThreadQuery) -> Result<ThreadPage> {
        let mut url = self.endpoint("threads")?;
        {
            let mut pairs = url.query_pairs_mut();
            if let Some(max) = query.max_results {
                pairs.append_pair("maxResults", &max.min(ThreadQuery::MAX_RESULTS_LIMIT).to_string());
            }
            if let Some(q) = query.query.as_deref().filter(|q| !q.trim().is_empty()) {
                pairs.append_pair("q", q);
            }
            if let Some(token) = &query.page_token {
                pairs.append_pair("pageToken", token);
            }
            for label in &query.label_ids {
                pairs.append_pair("labelIds", label);
            }
        }

        let list: ListThreadsResponse = self.get_json(&url, "list threads")?;

        let threads = list
            .threads
            .unwrap_or_default()
            .into_iter()
            .map(|thread_ref| {
                let thread = self.get_thread_metadata(&thread_ref.id)?;
                Ok(summarize_thread(thread, &thread_ref.snippet))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ThreadPage {
            threads,
            next_page_token: list.next_page_token,
            result_size_estimate: list.result_size_estimate,
        })
    }

    fn get_thread(&self, id: &ThreadId) -> Result<Thread> {
        let mut url = self.endpoint(&format!("threads/{}", urlencoding::encode(id.as_str())))?;
        url.query_pairs_mut().append_pair("format", "full");

        let thread: GmailThread = self.get_json(&url, "get thread")?;
        normalize_thread(thread)
    }

    fn modify_thread_labels(&self, id: &ThreadId, add: &[String], remove: &[String]) -> Result<()> {
        let url = self.endpoint(&format!(
            "threads/{}/modify",
            urlencoding::encode(id.as_str())
        ))?;
        debug!("POST {}", url.path());

        ureq::post(url.as_str())
            .header("Authorization", &self.bearer()?)
            .send_json(&ModifyThreadRequest {
                add_label_ids: add.to_vec(),
                remove_label_ids: remove.to_vec(),
            })
            .with_context(|| format!("Failed to modify labels on thread {}", id.as_str()))?;
        Ok(())
    }

    fn list_labels(&self) -> Result<Vec<Label>> {
        let url = self.endpoint("labels")?;
        let labels: ListLabelsResponse = self.get_json(&url, "list labels")?;
        Ok(labels
            .labels
            .unwrap_or_default()
            .into_iter()
            .map(normalize_label)
            .collect())
    }

    fn create_label(&self, label: &NewLabel) -> Result<Label> {
        let url = self.endpoint("labels")?;
        debug!("POST {}", url.path());

        let mut response = ureq::post(url.as_str())
            .header("Authorization", &self.bearer()?)
            .send_json(&LabelRequest {
                name: Some(label.name.clone()),
                color: label.color.clone(),
                label_list_visibility: Some("labelShow".to_string()),
                message_list_visibility: Some("show".to_string()),
            })
            .with_context(|| format!("Failed to create label {}", label.name))?;

        let created: GmailLabel = response
            .body_mut()
            .read_json()
            .context("Failed to parse created label")?;
        Ok(normalize_label(created))
    }

    fn update_label(&self, id: &LabelId, update: &LabelUpdate) -> Result<Label> {
        let url = self.endpoint(&format!("labels/{}", urlencoding::encode(id.as_str())))?;
        debug!("PATCH {}", url.path());

        let mut response = ureq::patch(url.as_str())
            .header("Authorization", &self.bearer()?)
            .send_json(&LabelRequest {
                name: update.name.clone(),
                color: update.color.clone(),
                ..LabelRequest::default()
            })
            .with_context(|| format!("Failed to update label {}", id.as_str()))?;

        let updated: GmailLabel = response
            .body_mut()
            .read_json()
            .context("Failed to parse updated label")?;
        Ok(normalize_label(updated))
    }

    fn get_attachment(&self, message_id: &MessageId, attachment_id: &str) -> Result<Vec<u8>> {
        let url = self.endpoint(&format!(
            "messages/{}/attachments/{}",
            urlencoding::encode(message_id.as_str()),
            urlencoding::encode(attachment_id)
        ))?;

        let body: AttachmentBody = self.get_json(&url, "get attachment")?;
        let data = body.data.context("Attachment response has no data")?;
        decode_base64_bytes(&data).context("Attachment data is not valid base64")
    }

    fn rotated_tokens(&self) -> Option<OAuthTokens> {
        self.auth.rotated_tokens()
    }
}
