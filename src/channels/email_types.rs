//! Email-specific types: the fetched message snapshot and the outgoing envelope.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use mail_parser::{MessageParser, PartType};
use serde::{Deserialize, Serialize};

/// Immutable snapshot of an unseen message, fetched once per sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEmail {
    /// Mailbox UID, unique within the swept folder.
    pub uid: String,
    /// Bare sender address, lowercased and trimmed.
    pub sender: String,
    pub subject: String,
    /// `text/plain` body, if the message has one.
    pub text_body: Option<String>,
    /// `text/html` body, if the message has one.
    pub html_body: Option<String>,
    /// Header values keyed by lowercase header name.
    pub headers: HashMap<String, Vec<String>>,
    /// Date header as shown in the reply attribution line.
    pub date: String,
    pub received_at: DateTime<Utc>,
}

impl InboundEmail {
    /// Minimal constructor, mostly for tests and fakes.
    pub fn new(uid: impl Into<String>, sender: impl Into<String>, subject: impl Into<String>) -> Self {
        let received_at = Utc::now();
        Self {
            uid: uid.into(),
            sender: sender.into().trim().to_lowercase(),
            subject: subject.into(),
            text_body: None,
            html_body: None,
            headers: HashMap::new(),
            date: received_at.to_rfc2822(),
            received_at,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text_body = Some(text.into());
        self
    }

    pub fn with_html(mut self, html: impl Into<String>) -> Self {
        self.html_body = Some(html.into());
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers
            .entry(name.to_lowercase())
            .or_default()
            .push(value.into());
        self
    }

    /// First value of a header, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// The original Message-ID, angle brackets included.
    pub fn message_id(&self) -> Option<&str> {
        self.header("message-id").filter(|id| !id.trim().is_empty())
    }

    /// Parse a raw RFC 5322 message fetched under `uid`.
    ///
    /// Returns `None` when the bytes are not a parsable message.
    pub fn parse(uid: &str, raw: &[u8]) -> Option<Self> {
        let parsed = MessageParser::default().parse(raw)?;

        let sender = parsed
            .from()
            .and_then(|addr| addr.first())
            .and_then(|a| a.address())
            .map(|s| s.trim().to_lowercase())
            .unwrap_or_default();

        let text_body = parsed.text_part(0).and_then(|part| match &part.body {
            PartType::Text(text) => Some(text.to_string()),
            _ => None,
        });
        let html_body = parsed.html_part(0).and_then(|part| match &part.body {
            PartType::Html(html) => Some(html.to_string()),
            _ => None,
        });

        let mut headers: HashMap<String, Vec<String>> = HashMap::new();
        for header in parsed.headers() {
            if let Some(text) = header.value().as_text() {
                headers
                    .entry(header.name().to_lowercase())
                    .or_default()
                    .push(text.to_string());
            }
        }
        // mail-parser strips the angle brackets; threading headers need them back.
        if let Some(id) = parsed.message_id() {
            headers.insert("message-id".into(), vec![format!("<{id}>")]);
        }

        let (date, received_at) = match parsed.date() {
            Some(d) => (
                d.to_rfc822(),
                DateTime::from_timestamp(d.to_timestamp(), 0).unwrap_or_else(Utc::now),
            ),
            None => {
                let now = Utc::now();
                (now.to_rfc2822(), now)
            }
        };

        Some(Self {
            uid: uid.to_string(),
            sender,
            subject: parsed.subject().unwrap_or_default().to_string(),
            text_body,
            html_body,
            headers,
            date,
            received_at,
        })
    }
}

/// A fully formed outgoing message, ready for a [`Sender`](crate::channels::Sender).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<String>,
    pub subject: String,
    /// Plain-text UTF-8 body.
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<String>,
}
