//! Mailbox abstraction: the only source of raw messages.
//!
//! A run opens the mailbox, lists every message once, fetches each in
//! order and closes it. No read position is persisted between runs.

pub mod imap;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::MailboxError;

pub use imap::ImapMailbox;

/// Mailbox-local message identifier (an IMAP sequence number for
/// [`ImapMailbox`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Source of raw RFC 822 messages with an open/close lifecycle.
#[async_trait]
pub trait Mailbox: Send {
    /// Short name for logging.
    fn name(&self) -> &str;

    /// Connect and authenticate. Failure here is fatal for the run.
    async fn open(&mut self) -> Result<(), MailboxError>;

    /// Every message currently in the mailbox, in mailbox order.
    async fn list_message_ids(&mut self) -> Result<Vec<MessageId>, MailboxError>;

    /// Raw bytes of one message. Does not change its flags.
    async fn fetch_raw(&mut self, id: &MessageId) -> Result<Vec<u8>, MailboxError>;

    /// Release the connection. Safe to call on a mailbox that is not open.
    async fn close(&mut self) -> Result<(), MailboxError>;
}
