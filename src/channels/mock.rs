//! In-memory mailbox and sender for tests and dry runs.
//!
//! The mock mailbox keeps real unseen/folder state: a successful
//! `flag_seen` or `move_to` removes the message from the unseen set, so
//! repeated sweeps behave like they would against a server.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::channels::email_types::{InboundEmail, OutgoingEmail};
use crate::channels::{Mailbox, Sender};
use crate::error::ChannelError;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One recorded mailbox operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailboxCall {
    Login,
    ListUnseen,
    FlagSeen(String),
    Move { uid: String, folder: String },
    Logout,
}

/// Fake mailbox with scriptable failures.
#[derive(Debug, Default)]
pub struct MockMailbox {
    unseen: Mutex<Vec<InboundEmail>>,
    moved: Mutex<Vec<(String, String)>>,
    calls: Mutex<Vec<MailboxCall>>,
    fail_login: AtomicBool,
    fail_list: AtomicBool,
    fail_logout: AtomicBool,
    fail_move: AtomicBool,
    /// Every flag_seen call fails while set.
    fail_all_flags: AtomicBool,
    /// Flag calls for these UIDs fail.
    fail_flag_uids: Mutex<HashSet<String>>,
    /// Number of upcoming flag_seen calls that fail before they start succeeding.
    flag_failures_remaining: AtomicUsize,
}

impl MockMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_messages(messages: Vec<InboundEmail>) -> Self {
        let mailbox = Self::new();
        *lock(&mailbox.unseen) = messages;
        mailbox
    }

    pub fn fail_login(&self, fail: bool) {
        self.fail_login.store(fail, Ordering::SeqCst);
    }

    pub fn fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    pub fn fail_logout(&self, fail: bool) {
        self.fail_logout.store(fail, Ordering::SeqCst);
    }

    pub fn fail_move(&self, fail: bool) {
        self.fail_move.store(fail, Ordering::SeqCst);
    }

    pub fn fail_all_flags(&self, fail: bool) {
        self.fail_all_flags.store(fail, Ordering::SeqCst);
    }

    pub fn fail_flag_for(&self, uid: &str) {
        lock(&self.fail_flag_uids).insert(uid.to_string());
    }

    /// Make the next `count` flag_seen calls fail.
    pub fn fail_next_flags(&self, count: usize) {
        self.flag_failures_remaining.store(count, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<MailboxCall> {
        lock(&self.calls).clone()
    }

    /// How many times `flag_seen` was attempted for `uid`.
    pub fn flag_attempts(&self, uid: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| matches!(c, MailboxCall::FlagSeen(u) if u == uid))
            .count()
    }

    pub fn unseen_uids(&self) -> Vec<String> {
        lock(&self.unseen).iter().map(|m| m.uid.clone()).collect()
    }

    /// `(uid, folder)` pairs successfully moved.
    pub fn moved(&self) -> Vec<(String, String)> {
        lock(&self.moved).clone()
    }

    fn record(&self, call: MailboxCall) {
        lock(&self.calls).push(call);
    }

    fn remove_unseen(&self, uid: &str) {
        lock(&self.unseen).retain(|m| m.uid != uid);
    }

    fn flag_should_fail(&self, uid: &str) -> bool {
        if self.fail_all_flags.load(Ordering::SeqCst) || lock(&self.fail_flag_uids).contains(uid) {
            return true;
        }
        self.flag_failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn rejected(command: &str) -> ChannelError {
    ChannelError::CommandRejected {
        command: command.to_string(),
        response: "NO simulated failure".to_string(),
    }
}

#[async_trait]
impl Mailbox for MockMailbox {
    async fn login(&self) -> Result<(), ChannelError> {
        self.record(MailboxCall::Login);
        if self.fail_login.load(Ordering::SeqCst) {
            return Err(ChannelError::AuthFailed {
                user: "mock".into(),
                reason: "simulated failure".into(),
            });
        }
        Ok(())
    }

    async fn list_unseen(&self) -> Result<Vec<InboundEmail>, ChannelError> {
        self.record(MailboxCall::ListUnseen);
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(rejected("UID SEARCH"));
        }
        Ok(lock(&self.unseen).clone())
    }

    async fn flag_seen(&self, uid: &str) -> Result<(), ChannelError> {
        self.record(MailboxCall::FlagSeen(uid.to_string()));
        if self.flag_should_fail(uid) {
            return Err(rejected("UID STORE"));
        }
        self.remove_unseen(uid);
        Ok(())
    }

    async fn move_to(&self, uid: &str, folder: &str) -> Result<(), ChannelError> {
        self.record(MailboxCall::Move {
            uid: uid.to_string(),
            folder: folder.to_string(),
        });
        if self.fail_move.load(Ordering::SeqCst) {
            return Err(rejected("UID MOVE"));
        }
        self.remove_unseen(uid);
        lock(&self.moved).push((uid.to_string(), folder.to_string()));
        Ok(())
    }

    async fn logout(&self) -> Result<(), ChannelError> {
        self.record(MailboxCall::Logout);
        if self.fail_logout.load(Ordering::SeqCst) {
            return Err(ChannelError::Protocol("simulated logout failure".into()));
        }
        Ok(())
    }
}

/// Fake sender that records every envelope it is asked to send.
#[derive(Debug, Default)]
pub struct MockSender {
    sent: Mutex<Vec<OutgoingEmail>>,
    attempts: AtomicUsize,
    fail: AtomicBool,
}

impl MockSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sender whose every send fails.
    pub fn failing() -> Self {
        let sender = Self::new();
        sender.fail.store(true, Ordering::SeqCst);
        sender
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Successfully sent envelopes, in order.
    pub fn sent(&self) -> Vec<OutgoingEmail> {
        lock(&self.sent).clone()
    }

    /// Send attempts, failed ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sender for MockSender {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), ChannelError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ChannelError::SendFailed {
                reason: "simulated SMTP failure".into(),
            });
        }
        lock(&self.sent).push(email.clone());
        Ok(())
    }
}
