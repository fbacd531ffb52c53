//! Shared types for the message decision pipeline.

use serde::{Deserialize, Serialize};

// ── Classification ──────────────────────────────────────────────────

/// What the sender wants, as judged by the classification service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Intent {
    /// A business inquiry from a prospective customer.
    Inquiry,
    Spam,
    Other,
}

impl Intent {
    pub fn label(&self) -> &'static str {
        match self {
            Intent::Inquiry => "INQUIRY",
            Intent::Spam => "SPAM",
            Intent::Other => "OTHER",
        }
    }
}

/// Typed classification result. Region flags are not mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub intent: Intent,
    pub is_blocked_region: bool,
    pub is_priority_region: bool,
}

impl Default for Classification {
    /// The fallback used whenever the service call or its response is unusable.
    fn default() -> Self {
        Self {
            intent: Intent::Other,
            is_blocked_region: false,
            is_priority_region: false,
        }
    }
}

// ── Action ──────────────────────────────────────────────────────────

/// The single terminal action chosen for a message in a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    /// Move to Trash.
    DiscardBlocked,
    /// Auto-reply with the priority CC list.
    AutoReplyPriority,
    /// Auto-reply with the default CC list.
    AutoReplyStandard,
    MarkReadOnly,
}

impl Action {
    /// Resolve a classification into an action. Blocked region always wins.
    pub fn from_classification(classification: &Classification) -> Self {
        match classification {
            Classification {
                is_blocked_region: true,
                ..
            } => Action::DiscardBlocked,
            Classification {
                intent: Intent::Inquiry,
                is_priority_region: true,
                ..
            } => Action::AutoReplyPriority,
            Classification {
                intent: Intent::Inquiry,
                ..
            } => Action::AutoReplyStandard,
            _ => Action::MarkReadOnly,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Action::DiscardBlocked => "discard_blocked",
            Action::AutoReplyPriority => "auto_reply_priority",
            Action::AutoReplyStandard => "auto_reply_standard",
            Action::MarkReadOnly => "mark_read_only",
        }
    }
}

// ── Outcomes ────────────────────────────────────────────────────────

/// How processing of one message ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// The action ran; the message will not show up as unseen again.
    Completed,
    /// The reply could not be sent; left unread for the next poll.
    Deferred,
    /// An internal error occurred and the forced flag-seen succeeded.
    Recovered,
    /// An internal error occurred and the forced flag-seen failed too.
    Failed,
}

/// Result record for one message in one sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageOutcome {
    pub uid: String,
    /// `None` when processing ended in an internal error.
    pub action: Option<Action>,
    pub disposition: Disposition,
}

/// Summary of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub outcomes: Vec<MessageOutcome>,
}

impl SweepReport {
    pub fn count(&self, disposition: Disposition) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.disposition == disposition)
            .count()
    }

    pub fn outcome(&self, uid: &str) -> Option<&MessageOutcome> {
        self.outcomes.iter().find(|o| o.uid == uid)
    }
}
