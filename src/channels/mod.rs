//! Channel abstractions for mailbox input and alert output.

pub mod email;
pub mod telegram;

pub use email::{ImapMailbox, Mailbox};
pub use telegram::{Notifier, TelegramNotifier};
