//! Mailbox and sender capabilities.
//!
//! The decision engine only talks to these traits. Production
//! implementations live in [`email`]; in-memory fakes live in [`mock`].

pub mod email;
pub mod email_types;
pub mod mock;

use async_trait::async_trait;

pub use email::{ImapMailbox, SmtpSender};
pub use email_types::{InboundEmail, OutgoingEmail};
pub use mock::{MailboxCall, MockMailbox, MockSender};

use crate::error::ChannelError;

/// A remote mailbox holding the only persistent state: seen flags and folders.
///
/// One session spans one sweep: `login`, `list_unseen`, any number of
/// `flag_seen`/`move_to`, then `logout`. Every operation can fail on its own.
#[async_trait]
pub trait Mailbox: Send + Sync {
    async fn login(&self) -> Result<(), ChannelError>;

    /// Fetch every unseen message without marking it seen.
    async fn list_unseen(&self) -> Result<Vec<InboundEmail>, ChannelError>;

    async fn flag_seen(&self, uid: &str) -> Result<(), ChannelError>;

    async fn move_to(&self, uid: &str, folder: &str) -> Result<(), ChannelError>;

    async fn logout(&self) -> Result<(), ChannelError>;
}

/// Outbound mail transport.
#[async_trait]
pub trait Sender: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), ChannelError>;
}
