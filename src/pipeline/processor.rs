//! Decision engine: one action per unseen message, per sweep.
//!
//! Flow for each message:
//! 1. Sender filter (no classifier call) → may short-circuit to mark-read
//! 2. Sanitize body + classify
//! 3. Resolve exactly one [`Action`] and execute it against the mailbox
//!
//! A message is flagged seen once its action completes. A failed reply send
//! leaves it unread so the next poll starts over. Any internal error forces
//! a best-effort seen flag so one bad message cannot loop forever.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{error, info, warn};

use crate::channels::email_types::InboundEmail;
use crate::channels::{Mailbox, Sender};
use crate::config::AppConfig;
use crate::error::{ChannelError, PipelineError};
use crate::llm::classifier::ClassifierClient;
use crate::pipeline::reply::{CcPolicy, ReplyComposer};
use crate::pipeline::rules::SenderFilter;
use crate::pipeline::sanitize::sanitize_body;
use crate::pipeline::types::{Action, Disposition, MessageOutcome, SweepReport};

/// Static inputs to the engine, fixed at startup.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub filter: SenderFilter,
    pub cc_policy: CcPolicy,
    /// From address for auto-replies.
    pub reply_from: String,
    pub trash_folder: String,
}

impl EngineConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            filter: SenderFilter::new(&config.exclude_addresses, &config.exclude_domains),
            cc_policy: CcPolicy::new(config.cc_list.clone(), config.priority_cc_list.clone()),
            reply_from: config.smtp.user.clone(),
            trash_folder: config.imap.trash_folder.clone(),
        }
    }
}

/// Per-message state machine plus the sweep that drives it.
pub struct DecisionEngine {
    filter: SenderFilter,
    cc_policy: CcPolicy,
    composer: ReplyComposer,
    trash_folder: String,
    classifier: Arc<ClassifierClient>,
    mailbox: Arc<dyn Mailbox>,
    sender: Arc<dyn Sender>,
}

impl DecisionEngine {
    pub fn new(
        config: EngineConfig,
        classifier: Arc<ClassifierClient>,
        mailbox: Arc<dyn Mailbox>,
        sender: Arc<dyn Sender>,
    ) -> Self {
        Self {
            filter: config.filter,
            cc_policy: config.cc_policy,
            composer: ReplyComposer::new(config.reply_from),
            trash_folder: config.trash_folder,
            classifier,
            mailbox,
            sender,
        }
    }

    /// One full pass: login, list unseen, process each message, logout.
    ///
    /// Login and listing failures abort the sweep. Per-message failures,
    /// panics included, are isolated. Logout failure is only logged.
    pub async fn sweep(&self) -> Result<SweepReport, ChannelError> {
        self.mailbox.login().await?;

        let result = match self.mailbox.list_unseen().await {
            Ok(messages) => Ok(self.process_all(messages).await),
            Err(e) => Err(e),
        };

        if let Err(e) = self.mailbox.logout().await {
            warn!(error = %e, "Mailbox logout failed");
        }

        let report = result?;
        info!(
            total = report.outcomes.len(),
            completed = report.count(Disposition::Completed),
            deferred = report.count(Disposition::Deferred),
            recovered = report.count(Disposition::Recovered),
            failed = report.count(Disposition::Failed),
            "Sweep complete"
        );
        Ok(report)
    }

    async fn process_all(&self, messages: Vec<InboundEmail>) -> SweepReport {
        if messages.is_empty() {
            info!("No unseen messages");
            return SweepReport::default();
        }

        info!(count = messages.len(), "Found unseen messages");

        let mut report = SweepReport::default();
        for message in &messages {
            let outcome = match AssertUnwindSafe(self.process(message)).catch_unwind().await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    error!(uid = %message.uid, error = %e, "Message processing failed");
                    self.force_seen(&message.uid).await
                }
                Err(panic) => {
                    let err = PipelineError::Panicked {
                        uid: message.uid.clone(),
                        reason: panic_reason(panic.as_ref()),
                    };
                    error!(uid = %message.uid, error = %err, "Message processing panicked");
                    self.force_seen(&message.uid).await
                }
            };
            report.outcomes.push(outcome);
        }
        report
    }

    /// Decide and execute the action for one message.
    pub async fn process(&self, message: &InboundEmail) -> Result<MessageOutcome, PipelineError> {
        info!(
            uid = %message.uid,
            sender = %message.sender,
            subject = %message.subject,
            "Processing message"
        );

        let action = self.decide(message).await;
        let disposition = self.execute(message, action).await?;

        Ok(MessageOutcome {
            uid: message.uid.clone(),
            action: Some(action),
            disposition,
        })
    }

    /// Resolve the single action for a message.
    pub async fn decide(&self, message: &InboundEmail) -> Action {
        if let Some(matched) = self.filter.evaluate(&message.sender) {
            info!(
                uid = %message.uid,
                sender = %message.sender,
                rule = ?matched,
                "Sender excluded, skipping classification"
            );
            return Action::MarkReadOnly;
        }

        let raw = message
            .html_body
            .as_deref()
            .filter(|h| !h.is_empty())
            .or(message.text_body.as_deref());
        let snippet = sanitize_body(raw);

        let classification = self
            .classifier
            .classify(&message.sender, &message.subject, &snippet)
            .await;
        let action = Action::from_classification(&classification);
        info!(uid = %message.uid, action = action.label(), "Action resolved");
        action
    }

    async fn execute(
        &self,
        message: &InboundEmail,
        action: Action,
    ) -> Result<Disposition, PipelineError> {
        let uid = message.uid.as_str();
        match action {
            Action::DiscardBlocked => {
                match self.mailbox.move_to(uid, &self.trash_folder).await {
                    Ok(()) => {
                        info!(uid = %uid, folder = %self.trash_folder, "Blocked-region message moved");
                    }
                    Err(e) => {
                        error!(
                            uid = %uid,
                            folder = %self.trash_folder,
                            error = %e,
                            "Move failed, marking read instead"
                        );
                        self.mailbox.flag_seen(uid).await?;
                    }
                }
                Ok(Disposition::Completed)
            }
            Action::AutoReplyPriority | Action::AutoReplyStandard => {
                let cc = self.cc_policy.for_action(action);
                let reply = self.composer.compose(message, cc);
                info!(
                    uid = %uid,
                    to = %reply.to,
                    cc = %cc.join(", "),
                    action = action.label(),
                    "Sending auto-reply"
                );

                if let Err(e) = self.sender.send(&reply).await {
                    error!(
                        uid = %uid,
                        error = %e,
                        "Auto-reply failed, leaving message unread for the next poll"
                    );
                    return Ok(Disposition::Deferred);
                }

                info!(uid = %uid, subject = %reply.subject, "Auto-reply sent");
                self.mailbox.flag_seen(uid).await?;
                Ok(Disposition::Completed)
            }
            Action::MarkReadOnly => {
                if let Err(e) = self.mailbox.flag_seen(uid).await {
                    warn!(uid = %uid, error = %e, "Failed to mark message read");
                }
                Ok(Disposition::Completed)
            }
        }
    }

    /// Best-effort seen flag after an internal error.
    async fn force_seen(&self, uid: &str) -> MessageOutcome {
        let disposition = match self.mailbox.flag_seen(uid).await {
            Ok(()) => {
                warn!(uid = %uid, "Marked read after processing error");
                Disposition::Recovered
            }
            Err(e) => {
                error!(
                    uid = %uid,
                    error = %e,
                    "Could not mark read after processing error, message may be retried"
                );
                Disposition::Failed
            }
        };
        MessageOutcome {
            uid: uid.to_string(),
            action: None,
            disposition,
        }
    }
}

/// Human-readable panic payload.
pub(crate) fn panic_reason(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
