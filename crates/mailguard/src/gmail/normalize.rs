//! Gmail API response normalization
//!
//! Converts Gmail API responses to mailguard domain models.

use anyhow::{Context, Result};
use base64::prelude::*;
use chrono::{DateTime, TimeZone, Utc};

use super::api::{GmailLabel, GmailMessage, GmailThread, MessagePart};
use crate::models::{
    AttachmentRef, EmailAddress, Label, Message, MessageId, Thread, ThreadId, ThreadSummary,
};

/// Normalize a Gmail API message
pub fn normalize_message(gmail_msg: GmailMessage) -> Result<Message> {
    let payload = gmail_msg
        .payload
        .as_ref()
        .with_context(|| format!("Message {} has no payload", gmail_msg.id))?;

    let from = extract_header(payload, "From").map(|s| EmailAddress::parse(&s));
    let to = extract_header(payload, "To")
        .map(|s| EmailAddress::parse_list(&s))
        .unwrap_or_default();
    let cc = extract_header(payload, "Cc")
        .map(|s| EmailAddress::parse_list(&s))
        .unwrap_or_default();
    let subject = extract_header(payload, "Subject").unwrap_or_default();

    let body_text = extract_plain_text_body(payload);
    let mut attachments = Vec::new();
    collect_attachments(payload, &mut attachments);

    Ok(Message {
        id: MessageId::new(&gmail_msg.id),
        thread_id: ThreadId::new(&gmail_msg.thread_id),
        from,
        to,
        cc,
        subject,
        snippet: decode_html_entities(&gmail_msg.snippet),
        body_text,
        received_at: parse_internal_date(gmail_msg.internal_date.as_deref()),
        label_ids: gmail_msg.label_ids.unwrap_or_default(),
        attachments,
    })
}

/// Normalize a full-format thread
pub fn normalize_thread(gmail_thread: GmailThread) -> Result<Thread> {
    let messages = gmail_thread
        .messages
        .unwrap_or_default()
        .into_iter()
        .map(normalize_message)
        .collect::<Result<Vec<_>>>()
        .with_context(|| format!("Failed to normalize thread {}", gmail_thread.id))?;

    Ok(Thread {
        id: ThreadId::new(gmail_thread.id),
        messages,
    })
}

/// Summarize a metadata-format thread for search results
///
/// Subject and sender come from the latest message; labels are the union
/// across messages in first-seen order.
pub fn summarize_thread(gmail_thread: GmailThread, fallback_snippet: &str) -> ThreadSummary {
    let messages = gmail_thread.messages.unwrap_or_default();

    let mut label_ids: Vec<String> = Vec::new();
    for label in messages.iter().flat_map(|m| m.label_ids.iter().flatten()) {
        if !label_ids.contains(label) {
            label_ids.push(label.clone());
        }
    }

    let latest = messages.last();
    let header = |name: &str| {
        latest
            .and_then(|m| m.payload.as_ref())
            .and_then(|p| extract_header(p, name))
            .unwrap_or_default()
    };
    let snippet = latest
        .map(|m| m.snippet.as_str())
        .filter(|s| !s.is_empty())
        .unwrap_or(fallback_snippet);

    ThreadSummary {
        id: ThreadId::new(gmail_thread.id.clone()),
        subject: header("Subject"),
        from: header("From"),
        snippet: decode_html_entities(snippet),
        last_message_at: latest.and_then(|m| parse_internal_date(m.internal_date.as_deref())),
        message_count: messages.len(),
        label_ids,
    }
}

/// Normalize a Gmail label
pub fn normalize_label(gmail_label: GmailLabel) -> Label {
    let label = if gmail_label.label_type.as_deref() == Some("system") {
        Label::system(gmail_label.id, gmail_label.name)
    } else {
        Label::new(gmail_label.id, gmail_label.name)
    };
    match gmail_label.color {
        Some(color) => label.with_color(color),
        None => label,
    }
}

/// Parse internal date (milliseconds since epoch)
fn parse_internal_date(internal_date: Option<&str>) -> Option<DateTime<Utc>> {
    let millis: i64 = internal_date?.parse().ok()?;
    Utc.timestamp_millis_opt(millis).single()
}

/// Extract a header value by name
fn extract_header(payload: &MessagePart, name: &str) -> Option<String> {
    payload.headers.as_ref()?.iter().find_map(|h| {
        if h.name.eq_ignore_ascii_case(name) {
            Some(h.value.clone())
        } else {
            None
        }
    })
}

fn is_mime(part: &MessagePart, prefix: &str) -> bool {
    part.mime_type.as_ref().is_some_and(|m| m.starts_with(prefix))
}

/// Extract plain text body from message payload
fn extract_plain_text_body(payload: &MessagePart) -> Option<String> {
    // Simple message with body data
    if is_mime(payload, "text/plain")
        && let Some(body) = &payload.body
        && let Some(data) = &body.data
    {
        return decode_base64_body(data);
    }

    if let Some(parts) = &payload.parts
        && let Some(text) = find_plain_text_in_parts(parts)
    {
        return Some(text);
    }

    None
}

/// Recursively search message parts for text/plain content
fn find_plain_text_in_parts(parts: &[MessagePart]) -> Option<String> {
    for part in parts {
        if is_mime(part, "text/plain")
            && !is_attachment(part)
            && let Some(body) = &part.body
            && let Some(data) = &body.data
            && let Some(text) = decode_base64_body(data)
        {
            return Some(text);
        }

        if let Some(nested) = &part.parts
            && let Some(text) = find_plain_text_in_parts(nested)
        {
            return Some(text);
        }
    }

    None
}

fn is_attachment(part: &MessagePart) -> bool {
    part.filename.as_ref().is_some_and(|f| !f.is_empty())
}

/// Collect attachment descriptors in document order
fn collect_attachments(part: &MessagePart, out: &mut Vec<AttachmentRef>) {
    if is_attachment(part)
        && let Some(body) = &part.body
        && let Some(attachment_id) = &body.attachment_id
    {
        out.push(AttachmentRef {
            attachment_id: attachment_id.clone(),
            filename: part.filename.clone().unwrap_or_default(),
            mime_type: part.mime_type.clone(),
            size: body.size.unwrap_or(0),
        });
    }

    for child in part.parts.iter().flatten() {
        collect_attachments(child, out);
    }
}

/// Decode base64 data from the Gmail API
///
/// Gmail uses URL-safe base64 but padding can vary, so we try multiple decoders.
pub(crate) fn decode_base64_bytes(data: &str) -> Option<Vec<u8>> {
    use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE};

    let decoders: &[&base64::engine::GeneralPurpose] =
        &[&BASE64_URL_SAFE_NO_PAD, &URL_SAFE, &STANDARD, &STANDARD_NO_PAD];

    decoders.iter().find_map(|decoder| decoder.decode(data).ok())
}

fn decode_base64_body(data: &str) -> Option<String> {
    decode_base64_bytes(data).and_then(|bytes| String::from_utf8(bytes).ok())
}

/// Decode HTML entities in snippet text
fn decode_html_entities(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
}
