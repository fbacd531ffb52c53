//! Mail triage: polls a mailbox, classifies unseen mail, and applies one action per message.

pub mod channels;
pub mod config;
pub mod error;
pub mod llm;
pub mod logging;
pub mod pipeline;
