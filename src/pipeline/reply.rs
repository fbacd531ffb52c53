//! Auto-reply composition.
//!
//! Builds the reply envelope for an inquiry: fixed greeting, an
//! "Original Message" header line, and a quoted copy of the original body
//! truncated to a fixed budget. Composition never fails.

use crate::channels::email_types::{InboundEmail, OutgoingEmail};
use crate::pipeline::sanitize::strip_html;
use crate::pipeline::types::Action;

/// Greeting and signature placed above the quoted original.
pub const REPLY_TEMPLATE: &str = "Dear friend,\nGood day!\n\nGlad to receive your email, and I will contact you soon.\n\nBest Regards!\nJed";

/// Character budget for the quoted block, truncation marker included.
pub const MAX_QUOTE_CHARS: usize = 3000;

/// Always the last quoted line when the original was cut short.
pub const TRUNCATION_MARKER: &str = "> [... truncated ...]";

pub const UNPARSABLE_BODY: &str = "[Could not parse original email body]";
pub const EMPTY_BODY: &str = "[Original email had no body]";

/// CC lists selected per action.
#[derive(Debug, Clone, Default)]
pub struct CcPolicy {
    pub default: Vec<String>,
    pub priority: Vec<String>,
}

impl CcPolicy {
    pub fn new(default: Vec<String>, priority: Vec<String>) -> Self {
        Self { default, priority }
    }

    /// The CC list for an action. Non-reply actions get none.
    pub fn for_action(&self, action: Action) -> &[String] {
        match action {
            Action::AutoReplyPriority => &self.priority,
            Action::AutoReplyStandard => &self.default,
            Action::DiscardBlocked | Action::MarkReadOnly => &[],
        }
    }
}

/// Composes auto-replies sent from a fixed address.
#[derive(Debug, Clone)]
pub struct ReplyComposer {
    from: String,
}

impl ReplyComposer {
    pub fn new(from: impl Into<String>) -> Self {
        Self { from: from.into() }
    }

    pub fn compose(&self, original: &InboundEmail, cc: &[String]) -> OutgoingEmail {
        let quoted = quote_block(&quotable_text(original));
        let body = format!(
            "{REPLY_TEMPLATE}\n\n\n--- Original Message ---\nOn {}, {} wrote:\n\n{quoted}",
            original.date, original.sender
        );
        let message_id = original.message_id().map(str::to_string);

        OutgoingEmail {
            from: self.from.clone(),
            to: original.sender.clone(),
            cc: cc.to_vec(),
            subject: format!("Re: {}", original.subject),
            body,
            in_reply_to: message_id.clone(),
            references: message_id,
        }
    }
}

/// Text to quote: plain body, else stripped HTML, else a placeholder.
pub fn quotable_text(original: &InboundEmail) -> String {
    if let Some(text) = original.text_body.as_deref().filter(|t| !t.is_empty()) {
        return text.to_string();
    }
    match original.html_body.as_deref().filter(|h| !h.is_empty()) {
        Some(html) => strip_html(html).unwrap_or_else(|| {
            tracing::warn!(uid = %original.uid, "Could not parse original HTML body for quoting");
            UNPARSABLE_BODY.to_string()
        }),
        None => EMPTY_BODY.to_string(),
    }
}

/// Prefix each line with "> ", stopping at the budget.
///
/// Each quoted line costs its length plus one for the newline. Before a line
/// is added, the marker's cost is reserved; if that would overflow the
/// budget the marker is appended instead and quoting stops.
pub fn quote_block(text: &str) -> String {
    let marker_cost = TRUNCATION_MARKER.chars().count() + 1;
    let mut quoted = Vec::new();
    let mut total = 0;

    // Old Mac mail ends lines with a bare CR.
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    for line in text.lines() {
        let cost = line.chars().count() + 3;
        if total + cost + marker_cost > MAX_QUOTE_CHARS {
            quoted.push(TRUNCATION_MARKER.to_string());
            break;
        }
        quoted.push(format!("> {line}"));
        total += cost;
    }

    quoted.join("\n")
}
